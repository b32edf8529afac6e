// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/output/gstreamer_display.rs - GStreamer 窗口显示输出
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

//! # GStreamer 显示输出
//!
//! 每路摄像头打开一个 `autovideosink` 窗口，窗口标题为摄像头名称。
//!
//! ## URL Scheme
//!
//! `display://`

use std::sync::Mutex;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  FromUrlWithScheme,
  frame::Frame,
  model::Detection,
  output::Render,
  stream::VideoStream,
};

/// 显示时间戳使用的名义帧率
const NOMINAL_FPS: u64 = 30;

#[derive(Error, Debug)]
pub enum GStreamerDisplayOutputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
}

#[derive(Default)]
struct DisplayState {
  size: Option<(u32, u32)>,
  frame_count: u64,
}

/// 单路摄像头的显示窗口
pub struct GStreamerDisplayOutput {
  title: String,
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  state: Mutex<DisplayState>,
}

impl FromUrlWithScheme for GStreamerDisplayOutput {
  const SCHEME: &'static str = "display";
}

impl GStreamerDisplayOutput {
  pub fn pipeline_description(title: &str) -> String {
    format!(
      "appsrc name=src is-live=true format=time ! videoconvert ! autovideosink name=\"{}\" sync=false",
      title.replace('"', "'")
    )
  }

  pub fn open(stream: &VideoStream) -> Result<Self, GStreamerDisplayOutputError> {
    gst::init()?;

    let pipeline_desc = Self::pipeline_description(stream.label());
    info!("Creating display pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerDisplayOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerDisplayOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerDisplayOutputError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!("显示窗口已打开: {}", stream.label());

    Ok(GStreamerDisplayOutput {
      title: stream.label().to_string(),
      pipeline,
      appsrc,
      state: Mutex::new(DisplayState::default()),
    })
  }

  fn push_frame(&self, frame: &Frame) -> Result<(), GStreamerDisplayOutputError> {
    let mut state = self
      .state
      .lock()
      .map_err(|_| GStreamerDisplayOutputError::PipelineError("display state poisoned".into()))?;

    // 分辨率变化时重新协商 caps
    let size = (frame.width(), frame.height());
    if state.size != Some(size) {
      let caps = gst::Caps::builder("video/x-raw")
        .field("format", "RGB")
        .field("width", size.0 as i32)
        .field("height", size.1 as i32)
        .field("framerate", gst::Fraction::new(NOMINAL_FPS as i32, 1))
        .build();
      self.appsrc.set_caps(Some(&caps));
      debug!("{} caps: {}x{}", self.title, size.0, size.1);
      state.size = Some(size);
    }

    let data = frame.image().as_raw();
    let mut buffer = gst::Buffer::with_size(data.len())
      .map_err(|_| GStreamerDisplayOutputError::BufferCreationError)?;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerDisplayOutputError::BufferCreationError)?;
      let timestamp = state.frame_count * 1_000_000_000 / NOMINAL_FPS;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(1_000_000_000 / NOMINAL_FPS));
      let mut buffer_map = buffer_ref.map_writable().map_err(|_| {
        GStreamerDisplayOutputError::PipelineError("Failed to map buffer".to_string())
      })?;
      buffer_map.copy_from_slice(data);
    }
    state.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerDisplayOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }
}

impl Drop for GStreamerDisplayOutput {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer display pipeline: {}", e);
    }

    let frames = self.state.lock().map(|s| s.frame_count).unwrap_or_default();
    info!("显示窗口 {} 已关闭，共显示 {} 帧", self.title, frames);
  }
}

impl Render for GStreamerDisplayOutput {
  type Error = GStreamerDisplayOutputError;

  fn render_result(&self, frame: &Frame, _detections: &[Detection]) -> Result<(), Self::Error> {
    if frame.is_empty() {
      return Ok(());
    }
    self.push_frame(frame)
  }
}
