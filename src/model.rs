// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/model.rs - 推理后端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use image::{ImageFormat, RgbImage};
use thiserror::Error;

use crate::frame::PixelRect;

#[derive(Error, Debug)]
pub enum BackendError {
  #[error("模型加载错误: {path}: {reason}")]
  ModelLoad { path: String, reason: String },
  #[error("位图解码错误: {0}")]
  DecodeError(#[from] image::ImageError),
  #[error("模型输出不一致: {0}")]
  OutputShape(String),
  #[error("模型缺少输出: {0}")]
  MissingOutput(String),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
  #[cfg(feature = "onnx_backend")]
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
}

/// 推理后端
///
/// 同一个实例会被所有工作线程同时调用，实现方自行保证线程安全。
pub trait InferenceBackend: Send + Sync {
  type Tensor;

  /// 位图字节 -> 输入张量 `[1, H, W, 3]`
  fn preprocess(&self, bytes: &[u8]) -> Result<Self::Tensor, BackendError>;
  fn infer(&self, tensor: Self::Tensor) -> Result<RawDetectionSet, BackendError>;
}

/// 一次推理的原始输出，三个序列等长，框为归一化的 `[y1, x1, y2, x2]`
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetectionSet {
  probabilities: Vec<f32>,
  class_ids: Vec<f32>,
  boxes: Vec<[f32; 4]>,
}

impl RawDetectionSet {
  pub fn new(
    probabilities: Vec<f32>,
    class_ids: Vec<f32>,
    boxes: Vec<[f32; 4]>,
  ) -> Result<Self, BackendError> {
    if probabilities.len() != class_ids.len() || probabilities.len() != boxes.len() {
      return Err(BackendError::OutputShape(format!(
        "scores {}, classes {}, boxes {}",
        probabilities.len(),
        class_ids.len(),
        boxes.len()
      )));
    }

    Ok(Self {
      probabilities,
      class_ids,
      boxes,
    })
  }

  pub fn len(&self) -> usize {
    self.probabilities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.probabilities.is_empty()
  }

  pub fn probabilities(&self) -> &[f32] {
    &self.probabilities
  }

  pub fn class_ids(&self) -> &[f32] {
    &self.class_ids
  }

  pub fn boxes(&self) -> &[[f32; 4]] {
    &self.boxes
  }

  /// 按索引升序遍历 `(probability, class_id, box)`
  pub fn iter(&self) -> impl Iterator<Item = (f32, f32, [f32; 4])> + '_ {
    self
      .probabilities
      .iter()
      .zip(&self.class_ids)
      .zip(&self.boxes)
      .map(|((&p, &c), &b)| (p, c, b))
  }
}

/// 过滤后的检测结果（像素坐标）
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: i64,
  /// 形如 `person (88%)`
  pub label: String,
  pub confidence: f32,
  pub rect: PixelRect,
}

/// 解码 BMP 位图为 RGB 图像
pub fn decode_bitmap(bytes: &[u8]) -> Result<RgbImage, BackendError> {
  let image = image::load_from_memory_with_format(bytes, ImageFormat::Bmp)?;
  Ok(image.to_rgb8())
}

mod labels;
pub use self::labels::{COCO_SSD_LABELS, LabelTable, LabelTableError, UNKNOWN_LABEL};

#[cfg(feature = "onnx_backend")]
mod onnx;
#[cfg(feature = "onnx_backend")]
pub use self::onnx::{OnnxBackend, OnnxBackendBuilder};
