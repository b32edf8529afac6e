// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/stream.rs - 视频流（摄像头）配置
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

use std::{collections::HashSet, fmt, path::Path, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// 被识别为网络流的 URL 方案
const NETWORK_SCHEMES: [&str; 7] = ["rtsp", "rtsps", "rtmp", "http", "https", "udp", "srt"];

#[derive(Error, Debug)]
pub enum StreamConfigError {
  #[error("输入描述为空")]
  EmptyDescriptor,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("摄像头配置解析错误: {0}")]
  ParseError(#[from] serde_json::Error),
  #[error("摄像头配置为空")]
  NoStreams,
  #[error("摄像头 ID 重复: {0}")]
  DuplicateId(String),
}

/// 输入源描述：设备索引、文件路径或网络地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDescriptor", into = "RawDescriptor")]
pub enum SourceDescriptor {
  DeviceIndex(u32),
  FilePath(PathBuf),
  NetworkUri(Url),
}

impl FromStr for SourceDescriptor {
  type Err = StreamConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err(StreamConfigError::EmptyDescriptor);
    }

    if s.bytes().all(|b| b.is_ascii_digit())
      && let Ok(index) = s.parse::<u32>()
    {
      return Ok(SourceDescriptor::DeviceIndex(index));
    }

    if let Ok(url) = Url::parse(s) {
      if NETWORK_SCHEMES.contains(&url.scheme()) {
        return Ok(SourceDescriptor::NetworkUri(url));
      }
      if url.scheme() == "file"
        && let Ok(path) = url.to_file_path()
      {
        return Ok(SourceDescriptor::FilePath(path));
      }
    }

    Ok(SourceDescriptor::FilePath(PathBuf::from(s)))
  }
}

impl fmt::Display for SourceDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceDescriptor::DeviceIndex(index) => write!(f, "{}", index),
      SourceDescriptor::FilePath(path) => write!(f, "{}", path.display()),
      SourceDescriptor::NetworkUri(url) => write!(f, "{}", url),
    }
  }
}

// JSON 中的设备索引是数字，其余都是字符串
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawDescriptor {
  Index(u32),
  Text(String),
}

impl TryFrom<RawDescriptor> for SourceDescriptor {
  type Error = StreamConfigError;

  fn try_from(raw: RawDescriptor) -> Result<Self, Self::Error> {
    match raw {
      RawDescriptor::Index(index) => Ok(SourceDescriptor::DeviceIndex(index)),
      RawDescriptor::Text(text) => text.parse(),
    }
  }
}

impl From<SourceDescriptor> for RawDescriptor {
  fn from(descriptor: SourceDescriptor) -> Self {
    match descriptor {
      SourceDescriptor::DeviceIndex(index) => RawDescriptor::Index(index),
      other => RawDescriptor::Text(other.to_string()),
    }
  }
}

/// 一路视频流（摄像头），创建后不可修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStream {
  id: String,
  label: String,
  input: SourceDescriptor,
}

impl VideoStream {
  pub fn new(id: impl Into<String>, label: impl Into<String>, input: SourceDescriptor) -> Self {
    Self {
      id: id.into(),
      label: label.into(),
      input,
    }
  }

  /// 由命令行给出的输入依次生成 `1..=n` 号摄像头
  pub fn from_descriptors<I>(inputs: I) -> Vec<VideoStream>
  where
    I: IntoIterator<Item = SourceDescriptor>,
  {
    inputs
      .into_iter()
      .enumerate()
      .map(|(i, input)| VideoStream::new((i + 1).to_string(), format!("Camera {}", i + 1), input))
      .collect()
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn input(&self) -> &SourceDescriptor {
    &self.input
  }
}

/// 检查摄像头列表非空且 ID 唯一
pub fn validate_streams(streams: &[VideoStream]) -> Result<(), StreamConfigError> {
  if streams.is_empty() {
    return Err(StreamConfigError::NoStreams);
  }

  let mut seen = HashSet::new();
  for stream in streams {
    if !seen.insert(stream.id()) {
      return Err(StreamConfigError::DuplicateId(stream.id().to_string()));
    }
  }
  Ok(())
}

/// 从 JSON 文件读取摄像头列表
pub fn load_streams(path: impl AsRef<Path>) -> Result<Vec<VideoStream>, StreamConfigError> {
  let path = path.as_ref();
  info!("读取摄像头配置: {}", path.display());
  let content = std::fs::read_to_string(path)?;
  let streams = parse_streams(&content)?;
  info!("共 {} 路摄像头", streams.len());
  Ok(streams)
}

pub fn parse_streams(content: &str) -> Result<Vec<VideoStream>, StreamConfigError> {
  let streams: Vec<VideoStream> = serde_json::from_str(content)?;
  validate_streams(&streams)?;
  for stream in &streams {
    debug!("摄像头 [{}] {} -> {}", stream.id(), stream.label(), stream.input());
  }
  Ok(streams)
}
