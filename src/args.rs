// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use shaobing::stream::SourceDescriptor;

/// Shaobing 多路摄像头目标检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径（SSD 格式，输出 detection_boxes/scores/classes）
  #[arg(long, value_name = "FILE")]
  pub model: PathBuf,

  /// 摄像头配置文件（JSON）
  #[arg(long, value_name = "FILE", conflicts_with = "input")]
  pub config: Option<PathBuf>,

  /// 输入来源，可重复
  /// 支持格式:
  /// - 设备索引: 0, 1, ...
  /// - 视频/图片文件: /path/to/video.mp4
  /// - 网络流: rtsp://host/stream
  #[arg(long, value_name = "SOURCE")]
  pub input: Vec<SourceDescriptor>,

  /// 输出
  /// 支持格式:
  /// - display:// 每路一个窗口
  /// - folder:///path/to/dir[?always] 保存检测到目标的帧
  /// - null:// 不输出
  #[arg(long, default_value = "display://", value_name = "OUTPUT")]
  pub output: Url,

  /// 类别名称表（JSON 字符串数组），默认使用 COCO
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标注所用字体（TTF/OTF），默认查找系统字体，找不到时使用内置字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 每路最多处理的帧数
  #[arg(long, value_name = "COUNT")]
  pub frame_number: Option<u64>,

  /// 推理线程数
  #[arg(long, default_value = "4", value_name = "COUNT")]
  pub threads: usize,

  /// 禁用 CUDA
  #[arg(long)]
  pub cpu: bool,
}
