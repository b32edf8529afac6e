// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::Detection,
  stream::VideoStream,
};

/// 展示已标注的帧，每路摄像头一个实例
pub trait Render {
  type Error;
  fn render_result(&self, frame: &Frame, detections: &[Detection]) -> Result<(), Self::Error>;
}

#[cfg(feature = "gstreamer_output")]
mod gstreamer_display;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_display::{GStreamerDisplayOutput, GStreamerDisplayOutputError};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 显示输出错误: {0}")]
  GStreamerDisplayOutputError(#[from] GStreamerDisplayOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 丢弃所有帧
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutput;

impl FromUrl for NullOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(NullOutput)
  }
}

impl FromUrlWithScheme for NullOutput {
  const SCHEME: &'static str = "null";
}

impl Render for NullOutput {
  type Error = OutputError;

  fn render_result(&self, _frame: &Frame, _detections: &[Detection]) -> Result<(), Self::Error> {
    Ok(())
  }
}

/// 由 URL 解析出的输出配置，按摄像头打开具体输出
#[derive(Debug, Clone)]
pub enum OutputSpec {
  #[cfg(feature = "gstreamer_output")]
  Display,
  #[cfg(feature = "directory_record")]
  Directory(Url),
  Null,
}

impl FromUrl for OutputSpec {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "gstreamer_output")]
      GStreamerDisplayOutput::SCHEME => Ok(OutputSpec::Display),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputSpec::Directory(url.clone())),
      NullOutput::SCHEME => Ok(OutputSpec::Null),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl OutputSpec {
  pub fn open(&self, stream: &VideoStream) -> Result<OutputWrapper, OutputError> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputSpec::Display => Ok(OutputWrapper::GStreamerDisplayOutput(
        GStreamerDisplayOutput::open(stream)?,
      )),
      #[cfg(feature = "directory_record")]
      OutputSpec::Directory(url) => Ok(OutputWrapper::DirectoryRecordOutput(
        DirectoryRecordOutput::from_url(url)?.for_stream(stream),
      )),
      OutputSpec::Null => Ok(OutputWrapper::NullOutput(NullOutput)),
    }
  }
}

pub enum OutputWrapper {
  #[cfg(feature = "gstreamer_output")]
  GStreamerDisplayOutput(GStreamerDisplayOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  NullOutput(NullOutput),
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, detections: &[Detection]) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerDisplayOutput(output) => output
        .render_result(frame, detections)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, detections)
        .map_err(OutputError::from),
      OutputWrapper::NullOutput(output) => output.render_result(frame, detections),
    }
  }
}
