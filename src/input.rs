// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use crate::{frame::Frame, stream::SourceDescriptor};

/// 单路视频源
///
/// `Ok(None)` 表示流结束；网络抖动等情况下可能返回空帧，由调用方跳过重试。
pub trait FrameSource {
  fn read(&mut self) -> Result<Option<Frame>, CaptureError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
    (**self).read()
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法打开输入源 {descriptor}: {reason}")]
  SourceUnavailable { descriptor: String, reason: String },
  #[error("不支持的输入源: {0}")]
  Unsupported(String),
  #[cfg(feature = "read_image_file")]
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
}

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("视频流错误: {0}")]
  Stream(String),
  #[error("不支持的像素格式: {0}")]
  UnsupportedFormat(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 静态图片扩展名，其余文件交给视频解码
#[cfg(feature = "read_image_file")]
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
}

impl InputWrapper {
  /// 按描述类型选择具体的输入实现
  pub fn open(descriptor: &SourceDescriptor) -> Result<Self, InputError> {
    #[cfg(feature = "read_image_file")]
    {
      if let SourceDescriptor::FilePath(path) = descriptor
        && path
          .extension()
          .and_then(|e| e.to_str())
          .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
      {
        let input = ImageFileInput::open(path)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    return GStreamerInputPipelineBuilder::from_descriptor(descriptor)
      .build()
      .map(InputWrapper::GStreamerInput)
      .map_err(|e| InputError::SourceUnavailable {
        descriptor: descriptor.to_string(),
        reason: e.to_string(),
      });
    #[cfg(not(feature = "gstreamer_input"))]
    return Err(InputError::Unsupported(descriptor.to_string()));
  }
}

impl FrameSource for InputWrapper {
  fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.read(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.read(),
    }
  }
}
