// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::{path::PathBuf, sync::Mutex};

use ort::{
  execution_providers::CUDAExecutionProvider,
  session::{Session, SessionOutputs},
  value::Tensor,
};
use tracing::{debug, info, warn};

use crate::model::{BackendError, InferenceBackend, RawDetectionSet, decode_bitmap};

const OUTPUT_BOXES: &str = "detection_boxes";
const OUTPUT_SCORES: &str = "detection_scores";
const OUTPUT_CLASSES: &str = "detection_classes";
const OUTPUT_NUM: &str = "num_detections";

/// 检测模型的输入输出节点名
#[derive(Debug, Clone)]
struct NodeNames {
  input: String,
  boxes: String,
  scores: String,
  classes: String,
  num: Option<String>,
}

/// SSD 类检测模型（输入 `uint8 [1, H, W, 3]`）
///
/// ORT 会话执行需要独占访问，内部用互斥锁串行化，调用方无需加锁。
pub struct OnnxBackend {
  session: Mutex<Session>,
  names: NodeNames,
}

pub struct OnnxBackendBuilder {
  model_path: PathBuf,
  intra_threads: usize,
  cuda: bool,
}

impl OnnxBackendBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      intra_threads: 4,
      cuda: true,
    }
  }

  pub fn intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads;
    self
  }

  pub fn cuda(mut self, cuda: bool) -> Self {
    self.cuda = cuda;
    self
  }

  pub fn build(self) -> Result<OnnxBackend, BackendError> {
    let path = self.model_path.display().to_string();
    let load_error = |e: ort::Error| BackendError::ModelLoad {
      path: path.clone(),
      reason: e.to_string(),
    };

    info!("加载模型文件: {}", path);
    let mut builder = Session::builder()
      .and_then(|b| b.with_intra_threads(self.intra_threads))
      .map_err(load_error)?;

    // CUDA 可选：注册失败时退回 CPU
    if self.cuda {
      match builder
        .clone()
        .with_execution_providers([CUDAExecutionProvider::default().build()])
      {
        Ok(with_cuda) => builder = with_cuda,
        Err(e) => warn!("CUDA 不可用，使用 CPU: {}", e),
      }
    }

    let session = builder.commit_from_file(&self.model_path).map_err(load_error)?;
    let names = resolve_node_names(&session).map_err(|e| BackendError::ModelLoad {
      path: path.clone(),
      reason: e.to_string(),
    })?;

    info!("模型加载完成");
    debug!("模型输入节点: {}", names.input);
    debug!(
      "模型输出节点: {}, {}, {}, {:?}",
      names.boxes, names.scores, names.classes, names.num
    );

    Ok(OnnxBackend {
      session: Mutex::new(session),
      names,
    })
  }
}

impl OnnxBackend {
  pub fn load(model_path: impl Into<PathBuf>) -> Result<Self, BackendError> {
    OnnxBackendBuilder::new(model_path).build()
  }
}

/// 按名称匹配输出节点，允许 TensorFlow 导出的 `:0` 后缀
fn find_output(outputs: &[String], wanted: &str) -> Option<String> {
  outputs
    .iter()
    .find(|name| name.as_str() == wanted || name.strip_suffix(":0") == Some(wanted))
    .cloned()
}

fn resolve_node_names(session: &Session) -> Result<NodeNames, BackendError> {
  let input = session
    .inputs
    .first()
    .map(|i| i.name.clone())
    .ok_or_else(|| BackendError::OutputShape("模型没有输入节点".to_string()))?;

  let outputs: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
  let required = |wanted: &str| {
    find_output(&outputs, wanted).ok_or_else(|| BackendError::MissingOutput(wanted.to_string()))
  };

  Ok(NodeNames {
    input,
    boxes: required(OUTPUT_BOXES)?,
    scores: required(OUTPUT_SCORES)?,
    classes: required(OUTPUT_CLASSES)?,
    num: find_output(&outputs, OUTPUT_NUM),
  })
}

fn extract_f32(outputs: &SessionOutputs<'_>, name: &str) -> Result<Vec<f32>, BackendError> {
  let value = outputs
    .get(name)
    .ok_or_else(|| BackendError::MissingOutput(name.to_string()))?;
  let (_shape, data) = value.try_extract_tensor::<f32>()?;
  Ok(data.to_vec())
}

impl InferenceBackend for OnnxBackend {
  type Tensor = Tensor<u8>;

  fn preprocess(&self, bytes: &[u8]) -> Result<Self::Tensor, BackendError> {
    let image = decode_bitmap(bytes)?;
    let (width, height) = image.dimensions();
    let shape = [1usize, height as usize, width as usize, 3];
    debug!("构造输入张量: {:?}", shape);
    Ok(Tensor::from_array((shape, image.into_raw().into_boxed_slice()))?)
  }

  fn infer(&self, tensor: Self::Tensor) -> Result<RawDetectionSet, BackendError> {
    let mut session = self
      .session
      .lock()
      .map_err(|_| BackendError::SessionPoisoned)?;

    let outputs = session.run(ort::inputs![self.names.input.as_str() => tensor])?;

    let boxes = extract_f32(&outputs, &self.names.boxes)?;
    let probabilities = extract_f32(&outputs, &self.names.scores)?;
    let class_ids = extract_f32(&outputs, &self.names.classes)?;

    if let Some(num) = &self.names.num {
      let num = extract_f32(&outputs, num)?;
      debug!("模型报告检测数: {:?}", num.first());
    }

    if boxes.len() != probabilities.len() * 4 {
      return Err(BackendError::OutputShape(format!(
        "boxes {} values for {} scores",
        boxes.len(),
        probabilities.len()
      )));
    }

    let boxes = boxes
      .chunks_exact(4)
      .map(|b| [b[0], b[1], b[2], b[3]])
      .collect();

    RawDetectionSet::new(probabilities, class_ids, boxes)
  }
}
