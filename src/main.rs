// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};

use shaobing::{
  FromUrl,
  codec::ImageCodec,
  model::{LabelTable, OnnxBackendBuilder},
  output::OutputSpec,
  pipeline::DetectionPipeline,
  stream::{VideoStream, load_streams, validate_streams},
  task::{Shutdown, WorkerError, WorkerOptions, WorkerPool, open_input, output_factory},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  info!("输出: {}", args.output);

  let labels = match &args.labels {
    Some(path) => Arc::new(
      LabelTable::from_json_file(path)
        .with_context(|| format!("load labels {}", path.display()))?,
    ),
    None => LabelTable::coco(),
  };
  info!("类别数: {}", labels.len());

  // 模型加载失败时不启动任何摄像头
  let backend = OnnxBackendBuilder::new(&args.model)
    .intra_threads(args.threads)
    .cuda(!args.cpu)
    .build()
    .with_context(|| format!("load model {}", args.model.display()))?;

  let codec = match &args.font {
    Some(path) => {
      ImageCodec::from_font_file(path).with_context(|| format!("load font {}", path.display()))?
    }
    None => ImageCodec::with_default_font(),
  };

  let streams = match &args.config {
    Some(path) => {
      load_streams(path).with_context(|| format!("load cameras {}", path.display()))?
    }
    None => {
      let streams = VideoStream::from_descriptors(args.input.iter().cloned());
      validate_streams(&streams).context("load cameras")?;
      streams
    }
  };
  for stream in &streams {
    info!("摄像头 {} [{}]: {}", stream.id(), stream.label(), stream.input());
  }

  let output = OutputSpec::from_url(&args.output).context("open output")?;

  let shutdown = Shutdown::new();
  shutdown
    .install_ctrlc_handler()
    .context("install Ctrl-C handler")?;

  let pipeline = DetectionPipeline::new(codec, Arc::new(backend), labels);
  let options = WorkerOptions::default().with_frame_limit(args.frame_number);
  let pool = WorkerPool::new(pipeline, options, shutdown);

  let results = pool.run(&streams, &open_input, &output_factory(output));

  let mut open_failures = 0;
  for (stream_id, result) in &results {
    match result {
      Ok(report) => info!(
        "摄像头 {}: 处理 {} 帧，跳过 {} 帧，失败 {} 帧，取帧错误 {} 次，目标 {} 个",
        stream_id,
        report.frames_processed,
        report.frames_skipped,
        report.frames_failed,
        report.capture_errors,
        report.detections
      ),
      Err(e @ (WorkerError::Open(_) | WorkerError::Output(_))) => {
        open_failures += 1;
        error!("摄像头 {} 无法打开: {}", stream_id, e);
      }
      Err(e) => error!("摄像头 {} 异常结束: {}", stream_id, e),
    }
  }

  if open_failures > 0 {
    bail!("{} 路摄像头无法打开", open_failures);
  }

  info!("任务完成，退出");
  Ok(())
}
