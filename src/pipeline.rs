// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/pipeline.rs - 单帧检测流水线
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  codec::{CodecError, FrameCodec, LABEL_OFFSET, OVERLAY_COLOR, OVERLAY_THICKNESS},
  frame::{Frame, PixelRect},
  model::{BackendError, Detection, InferenceBackend, LabelTable, RawDetectionSet},
};

/// 置信度阈值，严格大于才保留
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("帧编码失败: {0}")]
  Encode(#[from] CodecError),
  #[error("张量构造失败: {0}")]
  Preprocess(#[source] BackendError),
  #[error("推理失败: {0}")]
  Inference(#[source] BackendError),
}

impl PipelineError {
  pub fn stage(&self) -> &'static str {
    match self {
      PipelineError::Encode(_) => "encode",
      PipelineError::Preprocess(_) => "preprocess",
      PipelineError::Inference(_) => "infer",
    }
  }
}

/// 归一化的 `[y1, x1, y2, x2]` 转为像素坐标 `(x1, y1, x2, y2)`，向下取整
///
/// 不做裁剪和排序：模型给出倒置的框时结果同样倒置。
pub fn to_pixel_rect(normalized: [f32; 4], width: u32, height: u32) -> PixelRect {
  let (w, h) = (width as f32, height as f32);
  PixelRect {
    x1: (normalized[1] * w).floor() as i32,
    y1: (normalized[0] * h).floor() as i32,
    x2: (normalized[3] * w).floor() as i32,
    y2: (normalized[2] * h).floor() as i32,
  }
}

/// `person (88%)`
pub fn format_label(name: &str, confidence: f32) -> String {
  format!("{} ({}%)", name, (confidence * 100.0).round() as i64)
}

/// 过滤置信度并转换坐标，按索引升序输出
pub fn select_detections(
  raw: &RawDetectionSet,
  width: u32,
  height: u32,
  labels: &LabelTable,
) -> Vec<Detection> {
  raw
    .iter()
    .filter(|(probability, _, _)| *probability > CONFIDENCE_THRESHOLD)
    .map(|(probability, class_value, normalized)| {
      let (class_id, name) = labels.resolve(class_value);
      Detection {
        class_id,
        label: format_label(name, probability),
        confidence: probability,
        rect: to_pixel_rect(normalized, width, height),
      }
    })
    .collect()
}

/// 检测流水线：编码 -> 预处理 -> 推理 -> 过滤 -> 原地标注
///
/// 后端通过 `Arc` 在所有工作线程间共享，克隆流水线不会复制模型。
pub struct DetectionPipeline<C, B> {
  codec: C,
  backend: Arc<B>,
  labels: Arc<LabelTable>,
}

impl<C: Clone, B> Clone for DetectionPipeline<C, B> {
  fn clone(&self) -> Self {
    Self {
      codec: self.codec.clone(),
      backend: Arc::clone(&self.backend),
      labels: Arc::clone(&self.labels),
    }
  }
}

impl<C: FrameCodec, B: InferenceBackend> DetectionPipeline<C, B> {
  pub fn new(codec: C, backend: Arc<B>, labels: Arc<LabelTable>) -> Self {
    Self {
      codec,
      backend,
      labels,
    }
  }

  pub fn backend(&self) -> &Arc<B> {
    &self.backend
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  /// 对一帧执行检测并把结果画在同一帧上
  pub fn process(&self, frame: &mut Frame) -> Result<Vec<Detection>, PipelineError> {
    let tensor = {
      // 编码结果只活到张量构造完成
      let encoded = self.codec.encode(frame)?;
      debug!("帧编码完成: {} 字节", encoded.len());
      self
        .backend
        .preprocess(encoded.as_bytes())
        .map_err(PipelineError::Preprocess)?
    };

    let raw = self
      .backend
      .infer(tensor)
      .map_err(PipelineError::Inference)?;
    debug!("推理返回 {} 个候选", raw.len());

    let detections = select_detections(&raw, frame.width(), frame.height(), &self.labels);
    for detection in &detections {
      let PixelRect { x1, y1, x2, y2 } = detection.rect;
      info!(
        label = %detection.label,
        confidence = detection.confidence,
        x1,
        x2,
        y1,
        y2,
        "OBJECT DETECTED: {} | COORDINATES: x1 {} - x2 {} - y1 {} - y2 {}",
        detection.label,
        x1,
        x2,
        y1,
        y2
      );
      self.annotate(frame, detection);
    }

    Ok(detections)
  }

  fn annotate(&self, frame: &mut Frame, detection: &Detection) {
    self
      .codec
      .draw_box(frame, detection.rect, OVERLAY_COLOR, OVERLAY_THICKNESS);
    let anchor = detection
      .rect
      .top_left()
      .offset(LABEL_OFFSET.0, LABEL_OFFSET.1);
    self.codec.draw_label(
      frame,
      &detection.label,
      anchor,
      OVERLAY_COLOR,
      OVERLAY_THICKNESS,
    );
  }
}

#[cfg(test)]
mod tests {
  use std::{io, sync::Mutex};

  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{
    codec::{Color, ImageCodec},
    frame::{EncodedImage, Point},
  };

  struct StubBackend {
    raw: RawDetectionSet,
  }

  impl InferenceBackend for StubBackend {
    type Tensor = usize;

    fn preprocess(&self, bytes: &[u8]) -> Result<usize, BackendError> {
      Ok(bytes.len())
    }

    fn infer(&self, _tensor: usize) -> Result<RawDetectionSet, BackendError> {
      Ok(self.raw.clone())
    }
  }

  struct FailingBackend;

  impl InferenceBackend for FailingBackend {
    type Tensor = ();

    fn preprocess(&self, _bytes: &[u8]) -> Result<(), BackendError> {
      Ok(())
    }

    fn infer(&self, _tensor: ()) -> Result<RawDetectionSet, BackendError> {
      Err(BackendError::MissingOutput("detection_boxes".to_string()))
    }
  }

  /// 记录绘制调用的编解码器
  #[derive(Default)]
  struct RecordingCodec {
    calls: Mutex<Vec<String>>,
  }

  impl FrameCodec for RecordingCodec {
    fn encode(&self, _frame: &Frame) -> Result<EncodedImage, CodecError> {
      Ok(EncodedImage::new(vec![0; 4]))
    }

    fn draw_box(&self, _frame: &mut Frame, rect: PixelRect, _color: Color, thickness: u32) {
      self
        .calls
        .lock()
        .unwrap()
        .push(format!("box {:?} {}", rect, thickness));
    }

    fn draw_label(&self, _frame: &mut Frame, text: &str, point: Point, _color: Color, _t: u32) {
      self
        .calls
        .lock()
        .unwrap()
        .push(format!("label {} {},{}", text, point.x, point.y));
    }
  }

  fn frame(width: u32, height: u32) -> Frame {
    Frame::new(RgbImage::from_pixel(width, height, Rgb([0, 0, 0])))
  }

  #[test]
  fn test_pixel_rect_from_normalized_box() {
    let rect = to_pixel_rect([0.25, 0.1, 0.75, 0.9], 640, 480);
    assert_eq!(rect, PixelRect::new(64, 120, 576, 360));
  }

  #[test]
  fn test_pixel_rect_truncates() {
    let rect = to_pixel_rect([0.999, 0.999, 0.999, 0.999], 10, 10);
    assert_eq!(rect, PixelRect::new(9, 9, 9, 9));
  }

  #[test]
  fn test_inverted_box_passes_through() {
    let rect = to_pixel_rect([0.5, 0.8, 0.1, 0.2], 100, 100);
    assert_eq!(rect, PixelRect::new(80, 50, 20, 10));
  }

  #[test]
  fn test_format_label() {
    assert_eq!(format_label("person", 0.876), "person (88%)");
    assert_eq!(format_label("car", 0.9), "car (90%)");
    assert_eq!(format_label("dog", 1.0), "dog (100%)");
  }

  #[test]
  fn test_threshold_is_strict() {
    let raw = RawDetectionSet::new(
      vec![0.5, 0.500001, 0.3, 0.99],
      vec![1.0, 2.0, 3.0, 18.0],
      vec![[0.0, 0.0, 1.0, 1.0]; 4],
    )
    .unwrap();
    let detections = select_detections(&raw, 100, 100, &LabelTable::coco());
    let labels: Vec<_> = detections.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, vec!["bicycle (50%)", "dog (99%)"]);
    assert!(detections.iter().all(|d| d.confidence > CONFIDENCE_THRESHOLD));
  }

  #[test]
  fn test_process_annotates_each_detection() {
    let raw = RawDetectionSet::new(
      vec![0.876, 0.2],
      vec![1.0, 3.0],
      vec![[0.25, 0.1, 0.75, 0.9], [0.0, 0.0, 1.0, 1.0]],
    )
    .unwrap();
    let pipeline = DetectionPipeline::new(
      RecordingCodec::default(),
      Arc::new(StubBackend { raw }),
      LabelTable::coco(),
    );

    let mut frame = frame(640, 480);
    let detections = pipeline.process(&mut frame).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "person (88%)");
    assert_eq!(detections[0].class_id, 1);

    let calls = pipeline.codec.calls.lock().unwrap();
    assert_eq!(
      *calls,
      vec![
        format!("box {:?} 2", PixelRect::new(64, 120, 576, 360)),
        "label person (88%) 74,100".to_string(),
      ]
    );
  }

  #[test]
  fn test_process_reports_failing_stage() {
    let pipeline = DetectionPipeline::new(
      ImageCodec::new(),
      Arc::new(FailingBackend),
      LabelTable::coco(),
    );
    let error = pipeline.process(&mut frame(4, 4)).unwrap_err();
    assert_eq!(error.stage(), "infer");

    let error = pipeline.process(&mut Frame::empty()).unwrap_err();
    assert_eq!(error.stage(), "encode");
  }

  /// 收集 tracing 输出
  #[derive(Clone, Default)]
  struct LogBuffer(Arc<Mutex<Vec<u8>>>);

  impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
      Ok(())
    }
  }

  impl LogBuffer {
    fn contents(&self) -> String {
      String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
  }

  fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
      .with_writer(move || writer.clone())
      .with_max_level(tracing::Level::INFO)
      .with_ansi(false)
      .without_time()
      .finish();
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, buffer.contents())
  }

  #[test]
  fn test_detection_log_line() {
    let raw = RawDetectionSet::new(
      vec![0.876, 0.5],
      vec![1.0, 3.0],
      vec![[0.25, 0.1, 0.75, 0.9], [0.0, 0.0, 1.0, 1.0]],
    )
    .unwrap();
    let pipeline = DetectionPipeline::new(
      RecordingCodec::default(),
      Arc::new(StubBackend { raw }),
      LabelTable::coco(),
    );

    let mut frame = frame(640, 480);
    let (detections, logs) = capture_logs(|| pipeline.process(&mut frame).unwrap());
    assert_eq!(detections.len(), 1);

    assert_eq!(logs.matches("OBJECT DETECTED").count(), 1);
    assert!(logs.contains(
      "OBJECT DETECTED: person (88%) | COORDINATES: x1 64 - x2 576 - y1 120 - y2 360"
    ));
    for field in [
      "label=person (88%)",
      "confidence=0.876",
      "x1=64",
      "x2=576",
      "y1=120",
      "y2=360",
    ] {
      assert!(logs.contains(field), "missing {} in {}", field, logs);
    }
  }

  #[test]
  fn test_boundary_probability_is_not_logged() {
    let raw = RawDetectionSet::new(vec![0.5], vec![1.0], vec![[0.0, 0.0, 1.0, 1.0]]).unwrap();
    let pipeline = DetectionPipeline::new(
      RecordingCodec::default(),
      Arc::new(StubBackend { raw }),
      LabelTable::coco(),
    );

    let mut frame = frame(10, 10);
    let (detections, logs) = capture_logs(|| pipeline.process(&mut frame).unwrap());
    assert!(detections.is_empty());
    assert!(!logs.contains("OBJECT DETECTED"));
  }

  #[test]
  fn test_out_of_range_box_does_not_abort_frame() {
    let raw = RawDetectionSet::new(
      vec![0.9],
      vec![1.0],
      vec![[-1e9, -1e9, 1e9, 1e9]],
    )
    .unwrap();
    let pipeline = DetectionPipeline::new(
      ImageCodec::with_embedded_font().unwrap(),
      Arc::new(StubBackend { raw }),
      LabelTable::coco(),
    );

    let mut frame = frame(10, 10);
    let detections = pipeline.process(&mut frame).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(
      detections[0].rect,
      PixelRect::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX)
    );

    let image = frame.image();
    assert_eq!(*image.get_pixel(0, 0), OVERLAY_COLOR);
    assert_eq!(*image.get_pixel(9, 9), OVERLAY_COLOR);
    assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }
}
