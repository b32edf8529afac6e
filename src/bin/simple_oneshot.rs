// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图片推理测试
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

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use shaobing::{
  codec::ImageCodec,
  input::{FrameSource, ImageFileInput},
  model::{LabelTable, OnnxBackend},
  pipeline::DetectionPipeline,
};

/// 对单张图片执行一次检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: PathBuf,
  /// 输入图片
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,
  /// 输出图片
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 标注所用字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输入来源: {}", args.input.display());
  info!("输出路径: {}", args.output.display());

  let mut input = ImageFileInput::open(&args.input)
    .with_context(|| format!("open {}", args.input.display()))?;
  let backend = OnnxBackend::load(&args.model)
    .with_context(|| format!("load model {}", args.model.display()))?;
  let codec = match &args.font {
    Some(path) => ImageCodec::from_font_file(path).context("load font")?,
    None => ImageCodec::with_default_font(),
  };
  let pipeline = DetectionPipeline::new(codec, Arc::new(backend), LabelTable::coco());

  let mut frame = input
    .read()
    .context("capture")?
    .context("没有输入帧")?;

  info!("开始推理...");
  let now = std::time::Instant::now();
  let detections = pipeline.process(&mut frame).context("detect")?;
  info!("推理完成，耗时: {:.2?}，{} 个目标", now.elapsed(), detections.len());

  frame
    .image()
    .save(&args.output)
    .with_context(|| format!("save {}", args.output.display()))?;
  info!("标注结果已保存: {}", args.output.display());

  Ok(())
}
