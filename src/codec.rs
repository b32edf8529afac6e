// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/codec.rs - 帧编码与叠加绘制
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

use image::Rgb;
use thiserror::Error;

use crate::frame::{EncodedImage, Frame, PixelRect, Point};

/// 叠加层颜色
pub type Color = Rgb<u8>;

pub const OVERLAY_COLOR: Color = Rgb([64, 255, 134]);
pub const OVERLAY_THICKNESS: u32 = 2;
/// 标签锚点相对检测框左上角的偏移
pub const LABEL_OFFSET: (i32, i32) = (10, -20);

#[derive(Error, Debug)]
pub enum CodecError {
  #[error("空帧无法编码")]
  EmptyFrame,
  #[error("图像编码错误: {0}")]
  EncodeError(#[from] image::ImageError),
  #[error("字体加载错误: {0}")]
  FontError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 帧编码与绘制能力
///
/// `encode` 产出推理后端预处理能识别的无损位图；绘制操作原地修改帧，不重新分配。
pub trait FrameCodec: Send + Sync {
  fn encode(&self, frame: &Frame) -> Result<EncodedImage, CodecError>;
  fn draw_box(&self, frame: &mut Frame, rect: PixelRect, color: Color, thickness: u32);
  fn draw_label(&self, frame: &mut Frame, text: &str, point: Point, color: Color, thickness: u32);
}

mod image_codec;
pub use self::image_codec::ImageCodec;
