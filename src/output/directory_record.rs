// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{Datelike, Local};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::Detection,
  output::Render,
  stream::VideoStream,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把检测结果写成与图片同名的 `.txt`
pub fn record_detections(detections: &[Detection], path: &Path) -> Result<(), std::io::Error> {
  let records: Vec<String> = detections
    .iter()
    .map(|d| {
      format!(
        "{}, {}, {:.4}, {}, {}, {}, {}",
        d.class_id, d.label, d.confidence, d.rect.x1, d.rect.y1, d.rect.x2, d.rect.y2
      )
    })
    .collect();
  std::fs::write(path.with_extension("txt"), records.join("\n"))
}

/// 按日期分目录保存已标注的帧：`<dir>/<摄像头>/YYYY/MM/DD/HH-MM-SS-XXXX.png`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: AtomicU16::new(0),
      always,
    }
  }

  /// 每路摄像头写入各自的子目录
  pub fn for_stream(mut self, stream: &VideoStream) -> Self {
    self.directory = self.directory.join(stream.id());
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, detections: &[Detection]) -> Result<(), Self::Error> {
    if frame.is_empty() || (!self.always && detections.is_empty()) {
      return Ok(());
    }

    let path = self.frame_path()?;
    frame.image().save(&path)?;
    record_detections(detections, &path)?;
    debug!("保存帧 {} ({} 个目标)", path.display(), detections.len());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{frame::PixelRect, stream::SourceDescriptor};

  fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("shaobing-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
  }

  fn files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
      return found;
    };
    for entry in entries.flatten() {
      let path = entry.path();
      if path.is_dir() {
        found.extend(files_with_extension(&path, ext));
      } else if path.extension().is_some_and(|e| e == ext) {
        found.push(path);
      }
    }
    found
  }

  #[test]
  fn test_from_url_reads_always_flag() {
    let url = url::Url::parse("folder:///tmp/records?always").unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    assert!(output.always);
    assert_eq!(output.directory(), Path::new("/tmp/records"));
  }

  #[test]
  fn test_saves_only_frames_with_detections() {
    let dir = scratch_dir("record");
    let stream = VideoStream::new("cam-a", "Camera A", SourceDescriptor::DeviceIndex(0));
    let output = DirectoryRecordOutput::new(&dir, false).for_stream(&stream);
    let frame = Frame::new(RgbImage::from_pixel(8, 8, Rgb([9, 9, 9])));

    output.render_result(&frame, &[]).unwrap();
    assert!(files_with_extension(&dir, "png").is_empty());

    let detection = Detection {
      class_id: 3,
      label: "car (90%)".to_string(),
      confidence: 0.9,
      rect: PixelRect::new(0, 0, 8, 8),
    };
    output.render_result(&frame, &[detection]).unwrap();

    let pngs = files_with_extension(&dir.join("cam-a"), "png");
    assert_eq!(pngs.len(), 1);
    let record = std::fs::read_to_string(pngs[0].with_extension("txt")).unwrap();
    assert_eq!(record, "3, car (90%), 0.9000, 0, 0, 8, 8");

    let _ = std::fs::remove_dir_all(&dir);
  }
}
