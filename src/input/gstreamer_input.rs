// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 同一套管道支持三类输入源：
//! - 摄像头设备索引（V4L2，`/dev/videoN`）
//! - 视频文件
//! - RTSP/HTTP 等网络流
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use shaobing::{input::{FrameSource, GStreamerInputPipelineBuilder}, stream::SourceDescriptor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let descriptor: SourceDescriptor = "rtsp://192.168.1.100:8554/stream".parse()?;
//! let mut input = GStreamerInputPipelineBuilder::from_descriptor(&descriptor).build()?;
//! while let Some(frame) = input.read()? {
//!     println!("帧: {}x{}", frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{ChannelOrder, Frame},
  input::{CaptureError, FrameSource},
  stream::SourceDescriptor,
};

/// 等待管道进入 PLAYING 的时间
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);
/// 单次取帧等待时间，超时视为空帧
const PULL_TIMEOUT: Duration = Duration::from_millis(500);

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  CameraSource { device: String },
  FileSource(String),
  NetworkSource(String),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::CameraSource { device } => {
        format!("v4l2src device={}", device)
      }
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::NetworkSource(uri) => {
        format!("uridecodebin uri=\"{}\"", uri)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  descriptor: String,
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn from_descriptor(descriptor: &SourceDescriptor) -> Self {
    let source = match descriptor {
      SourceDescriptor::DeviceIndex(index) => GStreamerInputBuilderItem::CameraSource {
        device: format!("/dev/video{}", index),
      },
      SourceDescriptor::FilePath(path) => {
        GStreamerInputBuilderItem::FileSource(path.display().to_string())
      }
      SourceDescriptor::NetworkUri(url) => GStreamerInputBuilderItem::NetworkSource(url.to_string()),
    };

    Self {
      descriptor: descriptor.to_string(),
      items: vec![
        source,
        GStreamerInputBuilderItem::TargetFormat {
          format: "RGB".to_string(),
        },
      ],
    }
  }

  pub fn pipeline_description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!(
      "{} ! appsink max-buffers=2 drop=true sync=false name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.pipeline_description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 先构造，失败时由 Drop 把管道置回 NULL
    let input = GStreamerInput {
      descriptor: self.descriptor,
      pipeline,
      appsink,
    };

    input.pipeline.set_state(gst::State::Playing)?;

    // 网络源是异步打开的，等待状态切换完成以便尽早发现无法连接
    let (result, current, _pending) = input
      .pipeline
      .state(gst::ClockTime::from_mseconds(OPEN_TIMEOUT.as_millis() as u64));
    if let Err(e) = result {
      let reason = input
        .pop_bus_error()
        .unwrap_or_else(|| format!("state change failed: {}", e));
      error!("输入源 {} 打开失败: {}", input.descriptor, reason);
      return Err(GStreamerInputError::PipelineError(reason));
    }
    debug!("输入源 {} 当前状态: {:?}", input.descriptor, current);

    Ok(input)
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  descriptor: String,
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
    debug!("输入源 {} 已释放", self.descriptor);
  }
}

impl GStreamerInput {
  fn pop_bus_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!("{} ({:?})", err.error(), err.debug())),
      _ => None,
    }
  }
}

impl FrameSource for GStreamerInput {
  fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
    if let Some(reason) = self.pop_bus_error() {
      return Err(CaptureError::Stream(reason));
    }

    let timeout = gst::ClockTime::from_mseconds(PULL_TIMEOUT.as_millis() as u64);
    match self.appsink.try_pull_sample(timeout) {
      Some(sample) => convert_sample(&sample).map(Some),
      None if self.appsink.is_eos() => {
        info!("输入源 {} 已结束", self.descriptor);
        Ok(None)
      }
      None => Ok(Some(Frame::empty())),
    }
  }
}

fn convert_sample(sample: &gst::Sample) -> Result<Frame, CaptureError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| CaptureError::Stream("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| CaptureError::Stream("No caps in sample".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|_| CaptureError::Stream("Failed to get video info from caps".to_string()))?;

  let order = match video_info.format() {
    gst_video::VideoFormat::Rgb => ChannelOrder::Rgb,
    gst_video::VideoFormat::Bgr => ChannelOrder::Bgr,
    other => return Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
  };

  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| CaptureError::Stream(format!("Failed to map buffer for reading: {}", e)))?;
  let data = map.as_slice();

  Frame::from_packed_rows(data, width, height, stride, order).ok_or(
    CaptureError::BufferSizeMismatch {
      expected: stride * height as usize,
      actual: data.len(),
    },
  )
}
