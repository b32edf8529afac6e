// 该文件是 Shaobing （哨兵） 项目的一部分。
// src/task.rs - 多路摄像头任务调度
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

use std::{
  fmt::Display,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  codec::FrameCodec,
  input::{CaptureError, FrameSource, InputError, InputWrapper},
  model::InferenceBackend,
  output::{OutputError, OutputSpec, OutputWrapper, Render},
  pipeline::DetectionPipeline,
  stream::VideoStream,
};

/// 收到中断后强制退出前的等待时间
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Opening,
  Capturing,
  Processing,
  Closed,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
  /// 送入流水线的帧数上限
  pub frame_limit: Option<u64>,
  pub empty_frame_backoff: Duration,
  /// 连续取帧失败的次数上限
  pub max_capture_errors: u32,
}

impl Default for WorkerOptions {
  fn default() -> Self {
    Self {
      frame_limit: None,
      empty_frame_backoff: Duration::from_millis(5),
      max_capture_errors: 30,
    }
  }
}

impl WorkerOptions {
  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }
}

/// 所有工作线程共享的退出标志
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn trigger(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_triggered(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// Ctrl-C 触发退出；若 30 秒内仍未退出则强制结束进程
  pub fn install_ctrlc_handler(&self) -> Result<(), ctrlc::Error> {
    let shutdown = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      shutdown.trigger();
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
  pub worker_id: usize,
  pub stream_id: String,
  pub frames_processed: u64,
  pub frames_skipped: u64,
  pub frames_failed: u64,
  pub capture_errors: u64,
  pub detections: u64,
}

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error("无法打开输入源: {0}")]
  Open(#[from] InputError),
  #[error("无法打开输出: {0}")]
  Output(#[from] OutputError),
  #[error("连续 {consecutive} 次取帧失败: {source}")]
  Capture {
    consecutive: u32,
    #[source]
    source: CaptureError,
  },
  #[error("无法创建工作线程: {0}")]
  Spawn(#[source] std::io::Error),
  #[error("工作线程崩溃: {0}")]
  Panicked(String),
}

/// 为每路摄像头打开输入
pub trait SourceFactory: Sync {
  type Source: FrameSource;
  fn open_source(&self, stream: &VideoStream) -> Result<Self::Source, WorkerError>;
}

impl<F, S, E> SourceFactory for F
where
  F: Fn(&VideoStream) -> Result<S, E> + Sync,
  S: FrameSource,
  WorkerError: From<E>,
{
  type Source = S;

  fn open_source(&self, stream: &VideoStream) -> Result<S, WorkerError> {
    self(stream).map_err(WorkerError::from)
  }
}

/// 为每路摄像头打开输出
pub trait SinkFactory: Sync {
  type Sink: Render;
  fn open_sink(&self, stream: &VideoStream) -> Result<Self::Sink, WorkerError>;
}

impl<F, R, E> SinkFactory for F
where
  F: Fn(&VideoStream) -> Result<R, E> + Sync,
  R: Render,
  WorkerError: From<E>,
{
  type Sink = R;

  fn open_sink(&self, stream: &VideoStream) -> Result<R, WorkerError> {
    self(stream).map_err(WorkerError::from)
  }
}

/// 默认输入：按描述符打开 GStreamer 或图片文件
pub fn open_input(stream: &VideoStream) -> Result<InputWrapper, InputError> {
  InputWrapper::open(stream.input())
}

/// 默认输出：按 URL 配置为每路摄像头打开输出
pub fn output_factory(
  spec: OutputSpec,
) -> impl Fn(&VideoStream) -> Result<OutputWrapper, OutputError> + Sync {
  move |stream: &VideoStream| spec.open(stream)
}

/// 单路摄像头的取帧循环
pub struct StreamWorker<'a, C, B> {
  worker_id: usize,
  stream: &'a VideoStream,
  pipeline: DetectionPipeline<C, B>,
  options: WorkerOptions,
  shutdown: Shutdown,
  state: WorkerState,
}

impl<'a, C: FrameCodec, B: InferenceBackend> StreamWorker<'a, C, B> {
  pub fn new(
    worker_id: usize,
    stream: &'a VideoStream,
    pipeline: DetectionPipeline<C, B>,
    options: WorkerOptions,
    shutdown: Shutdown,
  ) -> Self {
    Self {
      worker_id,
      stream,
      pipeline,
      options,
      shutdown,
      state: WorkerState::Opening,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  fn transition(&mut self, state: WorkerState) {
    if self.state != state {
      debug!(
        "WORKER ID [{}] 状态 {:?} -> {:?}",
        self.worker_id, self.state, state
      );
      self.state = state;
    }
  }

  /// 运行到流结束、达到帧数上限、收到退出信号或连续取帧失败
  pub fn run<S, R>(mut self, mut source: S, sink: R) -> Result<WorkerReport, WorkerError>
  where
    S: FrameSource,
    R: Render,
    R::Error: Display,
  {
    let mut report = WorkerReport {
      worker_id: self.worker_id,
      stream_id: self.stream.id().to_string(),
      ..Default::default()
    };
    let mut consecutive_errors = 0u32;
    let started = Instant::now();

    loop {
      if self.shutdown.is_triggered() {
        info!("WORKER ID [{}] 收到退出信号", self.worker_id);
        break;
      }
      if let Some(limit) = self.options.frame_limit
        && report.frames_processed + report.frames_failed >= limit
      {
        info!("WORKER ID [{}] 达到指定帧数 {}", self.worker_id, limit);
        break;
      }

      self.transition(WorkerState::Capturing);
      let mut frame = match source.read() {
        Ok(None) => {
          info!("WORKER ID [{}] 输入流结束", self.worker_id);
          break;
        }
        Ok(Some(frame)) if frame.is_empty() => {
          report.frames_skipped += 1;
          thread::sleep(self.options.empty_frame_backoff);
          continue;
        }
        Ok(Some(frame)) => frame,
        Err(e) => {
          report.capture_errors += 1;
          consecutive_errors += 1;
          warn!(
            worker_id = self.worker_id,
            stage = "capture",
            "WORKER ID [{}] 取帧失败 ({}/{}): {}",
            self.worker_id,
            consecutive_errors,
            self.options.max_capture_errors,
            e
          );
          if consecutive_errors >= self.options.max_capture_errors {
            self.transition(WorkerState::Closed);
            return Err(WorkerError::Capture {
              consecutive: consecutive_errors,
              source: e,
            });
          }
          thread::sleep(self.options.empty_frame_backoff);
          continue;
        }
      };
      consecutive_errors = 0;

      self.transition(WorkerState::Processing);
      let detections = match self.pipeline.process(&mut frame) {
        Ok(detections) => {
          report.frames_processed += 1;
          report.detections += detections.len() as u64;
          detections
        }
        Err(e) => {
          report.frames_failed += 1;
          warn!(
            worker_id = self.worker_id,
            stage = e.stage(),
            "WORKER ID [{}] 处理失败: {}",
            self.worker_id,
            e
          );
          Vec::new()
        }
      };

      if let Err(e) = sink.render_result(&frame, &detections) {
        warn!(
          worker_id = self.worker_id,
          stage = "render",
          "WORKER ID [{}] 输出失败: {}",
          self.worker_id,
          e
        );
      }
    }

    self.transition(WorkerState::Closed);
    info!(
      "WORKER ID [{}] 结束: 处理 {} 帧，跳过 {} 帧，失败 {} 帧，耗时 {:.2?}",
      self.worker_id,
      report.frames_processed,
      report.frames_skipped,
      report.frames_failed,
      started.elapsed()
    );
    Ok(report)
  }
}

/// 每路摄像头一个工作线程，共享同一个检测后端
pub struct WorkerPool<C, B> {
  pipeline: DetectionPipeline<C, B>,
  options: WorkerOptions,
  shutdown: Shutdown,
}

impl<C, B> WorkerPool<C, B>
where
  C: FrameCodec + Clone,
  B: InferenceBackend,
{
  pub fn new(pipeline: DetectionPipeline<C, B>, options: WorkerOptions, shutdown: Shutdown) -> Self {
    Self {
      pipeline,
      options,
      shutdown,
    }
  }

  pub fn shutdown(&self) -> &Shutdown {
    &self.shutdown
  }

  /// 运行所有摄像头，按配置顺序返回每路的结果
  pub fn run<SF, KF>(
    &self,
    streams: &[VideoStream],
    sources: &SF,
    sinks: &KF,
  ) -> Vec<(String, Result<WorkerReport, WorkerError>)>
  where
    SF: SourceFactory,
    KF: SinkFactory,
    <KF::Sink as Render>::Error: Display,
  {
    info!("启动 {} 路摄像头", streams.len());

    thread::scope(|scope| {
      let handles: Vec<_> = streams
        .iter()
        .enumerate()
        .map(|(index, stream)| {
          let worker_id = index + 1;
          let pipeline = self.pipeline.clone();
          let options = self.options.clone();
          let shutdown = self.shutdown.clone();

          let handle = thread::Builder::new()
            .name(format!("worker-{}", stream.id()))
            .spawn_scoped(scope, move || {
              info!("WORKER ID [{}] - DEVICE [{}]", worker_id, stream.label());
              let source = sources.open_source(stream)?;
              let sink = sinks.open_sink(stream)?;
              StreamWorker::new(worker_id, stream, pipeline, options, shutdown).run(source, sink)
            })
            .map_err(WorkerError::Spawn);
          (stream.id().to_string(), handle)
        })
        .collect();

      handles
        .into_iter()
        .map(|(stream_id, handle)| {
          let result = handle.and_then(|handle| {
            handle
              .join()
              .map_err(|payload| WorkerError::Panicked(panic_message(payload.as_ref())))
              .and_then(|result| result)
          });
          if let Err(e) = &result {
            warn!("摄像头 {} 异常结束: {}", stream_id, e);
          }
          (stream_id, result)
        })
        .collect()
    })
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}

#[cfg(test)]
mod tests {
  use std::{
    collections::VecDeque,
    convert::Infallible,
    sync::{Mutex, atomic::AtomicUsize},
  };

  use image::{Rgb, RgbImage};

  use super::*;
  use crate::{
    codec::ImageCodec,
    frame::Frame,
    model::{BackendError, Detection, LabelTable, RawDetectionSet},
    stream::SourceDescriptor,
  };

  enum Step {
    Frame,
    Empty,
    Fail,
    Panic,
  }

  struct ScriptedSource {
    steps: VecDeque<Step>,
  }

  impl ScriptedSource {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
      Self {
        steps: steps.into_iter().collect(),
      }
    }
  }

  impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<Option<Frame>, CaptureError> {
      match self.steps.pop_front() {
        Some(Step::Frame) => Ok(Some(Frame::new(RgbImage::from_pixel(
          20,
          10,
          Rgb([0, 0, 0]),
        )))),
        Some(Step::Empty) => Ok(Some(Frame::empty())),
        Some(Step::Fail) => Err(CaptureError::Stream("connection reset".to_string())),
        Some(Step::Panic) => panic!("source exploded"),
        None => Ok(None),
      }
    }
  }

  #[derive(Default)]
  struct CountingBackend {
    calls: AtomicUsize,
    fail: bool,
  }

  impl InferenceBackend for CountingBackend {
    type Tensor = ();

    fn preprocess(&self, _bytes: &[u8]) -> Result<(), BackendError> {
      Ok(())
    }

    fn infer(&self, _tensor: ()) -> Result<RawDetectionSet, BackendError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        return Err(BackendError::MissingOutput("detection_scores".to_string()));
      }
      RawDetectionSet::new(vec![0.9], vec![3.0], vec![[0.0, 0.0, 1.0, 1.0]])
    }
  }

  #[derive(Default, Clone)]
  struct RecordingSink {
    frames: Arc<Mutex<Vec<(u32, usize)>>>,
  }

  impl Render for RecordingSink {
    type Error = Infallible;

    fn render_result(&self, frame: &Frame, detections: &[Detection]) -> Result<(), Infallible> {
      self
        .frames
        .lock()
        .unwrap()
        .push((frame.width(), detections.len()));
      Ok(())
    }
  }

  fn pipeline(backend: CountingBackend) -> DetectionPipeline<ImageCodec, CountingBackend> {
    DetectionPipeline::new(ImageCodec::new(), Arc::new(backend), LabelTable::coco())
  }

  fn options() -> WorkerOptions {
    WorkerOptions {
      empty_frame_backoff: Duration::from_millis(1),
      max_capture_errors: 3,
      ..Default::default()
    }
  }

  fn stream(id: &str) -> VideoStream {
    VideoStream::new(id, format!("Camera {}", id), SourceDescriptor::DeviceIndex(0))
  }

  #[test]
  fn test_empty_frames_are_skipped() {
    let stream = stream("1");
    let pipeline = pipeline(CountingBackend::default());
    let backend = Arc::clone(pipeline.backend());
    let sink = RecordingSink::default();
    let source = ScriptedSource::new([Step::Empty, Step::Empty, Step::Empty, Step::Frame]);

    let report = StreamWorker::new(1, &stream, pipeline, options(), Shutdown::new())
      .run(source, sink.clone())
      .unwrap();

    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.frames_skipped, 3);
    assert_eq!(report.frames_processed, 1);
    assert_eq!(report.detections, 1);
    assert_eq!(*sink.frames.lock().unwrap(), vec![(20, 1)]);
  }

  #[test]
  fn test_pipeline_failure_still_forwards_frame() {
    let stream = stream("1");
    let backend = CountingBackend {
      fail: true,
      ..Default::default()
    };
    let sink = RecordingSink::default();
    let source = ScriptedSource::new([Step::Frame, Step::Frame]);

    let report = StreamWorker::new(1, &stream, pipeline(backend), options(), Shutdown::new())
      .run(source, sink.clone())
      .unwrap();

    assert_eq!(report.frames_failed, 2);
    assert_eq!(report.frames_processed, 0);
    assert_eq!(*sink.frames.lock().unwrap(), vec![(20, 0), (20, 0)]);
  }

  #[test]
  fn test_transient_capture_errors_recover() {
    let stream = stream("1");
    let sink = RecordingSink::default();
    let source = ScriptedSource::new([Step::Fail, Step::Fail, Step::Frame, Step::Fail]);

    let report = StreamWorker::new(
      1,
      &stream,
      pipeline(CountingBackend::default()),
      options(),
      Shutdown::new(),
    )
    .run(source, sink.clone())
    .unwrap();

    assert_eq!(report.capture_errors, 3);
    assert_eq!(report.frames_processed, 1);
  }

  #[test]
  fn test_consecutive_capture_errors_close_worker() {
    let stream = stream("1");
    let sink = RecordingSink::default();
    let source = ScriptedSource::new([Step::Frame, Step::Fail, Step::Fail, Step::Fail, Step::Frame]);

    let result = StreamWorker::new(
      1,
      &stream,
      pipeline(CountingBackend::default()),
      options(),
      Shutdown::new(),
    )
    .run(source, sink.clone());

    assert!(matches!(
      result,
      Err(WorkerError::Capture { consecutive: 3, .. })
    ));
  }

  #[test]
  fn test_frame_limit_and_shutdown() {
    let stream = stream("1");
    let sink = RecordingSink::default();
    let source = ScriptedSource::new([Step::Frame, Step::Frame, Step::Frame]);
    let report = StreamWorker::new(
      1,
      &stream,
      pipeline(CountingBackend::default()),
      options().with_frame_limit(Some(2)),
      Shutdown::new(),
    )
    .run(source, sink.clone())
    .unwrap();
    assert_eq!(report.frames_processed, 2);

    let shutdown = Shutdown::new();
    shutdown.trigger();
    let pipeline = pipeline(CountingBackend::default());
    let backend = Arc::clone(pipeline.backend());
    let source = ScriptedSource::new([Step::Frame]);
    let report = StreamWorker::new(1, &stream, pipeline, options(), shutdown)
      .run(source, sink.clone())
      .unwrap();
    assert_eq!(report.frames_processed, 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn test_pool_reports_in_configuration_order() {
    let streams = vec![stream("a"), stream("b"), stream("c")];
    let pool = WorkerPool::new(
      pipeline(CountingBackend::default()),
      options(),
      Shutdown::new(),
    );
    let sink = RecordingSink::default();

    let sources = |stream: &VideoStream| -> Result<ScriptedSource, WorkerError> {
      match stream.id() {
        "a" => Ok(ScriptedSource::new([Step::Frame, Step::Frame])),
        "b" => Err(WorkerError::Open(InputError::Unsupported("b".to_string()))),
        _ => Ok(ScriptedSource::new([Step::Panic])),
      }
    };
    let sinks = move |_: &VideoStream| -> Result<RecordingSink, WorkerError> { Ok(sink.clone()) };

    let results = pool.run(&streams, &sources, &sinks);
    let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);

    let report = results[0].1.as_ref().unwrap();
    assert_eq!(report.worker_id, 1);
    assert_eq!(report.frames_processed, 2);
    assert!(matches!(results[1].1, Err(WorkerError::Open(_))));
    assert!(matches!(&results[2].1, Err(WorkerError::Panicked(m)) if m == "source exploded"));
  }
}
