// 该文件是 Lvjing（滤镜）项目的一部分。
// src/pipeline.rs - 批量推理流水线
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

//! # 批量推理流水线
//!
//! 按批次执行 读取 -> 规范化 -> 编组 -> 推理 -> 反编组 -> 方向恢复 -> 写出。
//!
//! - 每个批次只调用一次推理引擎。
//! - 输出帧的顺序与读取顺序严格一致。
//! - 视频方向只由第一帧决定，整段视频统一处理。
//! - 引擎在运行结束时释放，无论成功、失败还是取消。
//! - 取消只在批次边界生效；被取消的运行不会调用 `finalize`，输出保持未完成状态。

use std::{
  fmt,
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc,
  },
  thread,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{FrameBatch, FrameBuffer, Orientation, RGB_CHANNELS},
  input::{FrameSource, InputError},
  model::{InferenceEngine, InferenceResult, ModelLoader, ModelShape, Role},
  normalize::{AlphaPolicy, FormatNormalizer, NormalizeError},
  output::{DEFAULT_FPS, FrameSink, OutputError, SinkFactory, SinkSpec},
  tensor::{MarshalError, OutputRange, Tensor, TensorShape, from_tensor, to_tensor},
};

pub const DEFAULT_BATCH_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
  Idle,
  Extracting,
  Normalizing,
  Marshalling,
  Inferring,
  Reconstructing,
  Writing,
  Finalizing,
  Done,
  Failed,
}

impl fmt::Display for PipelineState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      PipelineState::Idle => "空闲",
      PipelineState::Extracting => "读取",
      PipelineState::Normalizing => "规范化",
      PipelineState::Marshalling => "编组",
      PipelineState::Inferring => "推理",
      PipelineState::Reconstructing => "重建",
      PipelineState::Writing => "写出",
      PipelineState::Finalizing => "收尾",
      PipelineState::Done => "完成",
      PipelineState::Failed => "失败",
    };
    f.write_str(name)
  }
}

/// 最后一个不满的批次如何处理
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShortBatchPolicy {
  /// 按实际帧数推理，引擎须接受可变的批次维度
  #[default]
  AsIs,
  /// 复制最后一帧补满批次，对应的重复输出被丢弃
  PadWithLast,
}

/// 单帧失败（格式不支持、尺寸突变）时的处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FramePolicy {
  /// 终止整个运行
  #[default]
  Abort,
  /// 记录并跳过该帧
  SkipFrame,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub batch_size: usize,
  pub short_batch: ShortBatchPolicy,
  pub on_frame_error: FramePolicy,
  pub max_frames: Option<usize>,
  pub alpha: AlphaPolicy,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      batch_size: DEFAULT_BATCH_SIZE,
      short_batch: ShortBatchPolicy::default(),
      on_frame_error: FramePolicy::default(),
      max_frames: None,
      alpha: AlphaPolicy::default(),
    }
  }
}

impl PipelineConfig {
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  pub fn with_short_batch(mut self, policy: ShortBatchPolicy) -> Self {
    self.short_batch = policy;
    self
  }

  pub fn with_frame_policy(mut self, policy: FramePolicy) -> Self {
    self.on_frame_error = policy;
    self
  }

  pub fn with_max_frames(mut self, max_frames: Option<usize>) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn with_alpha_policy(mut self, alpha: AlphaPolicy) -> Self {
    self.alpha = alpha;
    self
  }

  pub fn validate(&self) -> Result<(), PipelineError> {
    if self.batch_size == 0 {
      return Err(PipelineError::InvalidConfig(
        "批次大小必须大于 0".to_string(),
      ));
    }
    Ok(())
  }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  UnsupportedFrameFormat,
  TensorShapeMismatch,
  InferenceUnavailable,
  /// 输入结束，只作为分类存在，从不作为错误产生
  SourceExhausted,
  SinkWriteFailure,
  SourceFailure,
  InvalidConfig,
  Cancelled,
  WorkerLost,
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("第 {index} 帧格式不支持: {source}")]
  UnsupportedFrameFormat {
    index: usize,
    source: NormalizeError,
  },
  #[error("第 {index} 帧尺寸 {actual:?} 与视频尺寸 {expected:?} 不一致")]
  FrameShapeChanged {
    index: usize,
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("张量形状错误: {0}")]
  TensorShapeMismatch(#[from] MarshalError),
  #[error("推理引擎不可用: {0}")]
  InferenceUnavailable(String),
  #[error("角色 '{role}' 写出失败: {source}")]
  SinkWriteFailure { role: Role, source: OutputError },
  #[error("输入源错误: {0}")]
  SourceFailure(#[from] InputError),
  #[error("配置错误: {0}")]
  InvalidConfig(String),
  #[error("运行已取消")]
  Cancelled,
  #[error("后台线程异常退出")]
  WorkerLost,
}

impl PipelineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::UnsupportedFrameFormat { .. } => ErrorKind::UnsupportedFrameFormat,
      PipelineError::FrameShapeChanged { .. } | PipelineError::TensorShapeMismatch(_) => {
        ErrorKind::TensorShapeMismatch
      }
      PipelineError::InferenceUnavailable(_) => ErrorKind::InferenceUnavailable,
      PipelineError::SinkWriteFailure { .. } => ErrorKind::SinkWriteFailure,
      PipelineError::SourceFailure(_) => ErrorKind::SourceFailure,
      PipelineError::InvalidConfig(_) => ErrorKind::InvalidConfig,
      PipelineError::Cancelled => ErrorKind::Cancelled,
      PipelineError::WorkerLost => ErrorKind::WorkerLost,
    }
  }

  /// 可按 [`FramePolicy::SkipFrame`] 跳过的单帧错误
  pub fn is_per_frame(&self) -> bool {
    matches!(
      self,
      PipelineError::UnsupportedFrameFormat { .. } | PipelineError::FrameShapeChanged { .. }
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFrame {
  pub index: usize,
  pub kind: ErrorKind,
  pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
  pub role: String,
  pub path: PathBuf,
}

/// 一次运行的统计与产物
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
  /// 从输入源读取的帧数
  pub frames_in: usize,
  /// 每个角色写出的帧数
  pub frames_out: usize,
  /// 推理调用次数
  pub batches: usize,
  pub skipped: Vec<SkippedFrame>,
  pub artifacts: Vec<Artifact>,
  /// 由第一帧决定，没有读到任何帧时为 None
  pub was_portrait: Option<bool>,
}

/// 运行终止时的失败信息：失败阶段、错误和截至失败时的统计
#[derive(Error, Debug)]
#[error("流水线在{stage}阶段失败: {error}")]
pub struct RunFailure {
  pub stage: PipelineState,
  #[source]
  pub error: PipelineError,
  pub report: RunReport,
}

impl RunFailure {
  pub fn kind(&self) -> ErrorKind {
    self.error.kind()
  }
}

pub type RunOutcome = Result<RunReport, RunFailure>;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

/// 单个视频的一次运行
///
/// 由调用方构造并拥有；`run` 消耗流水线，推理引擎的生命周期与这次运行相同。
pub struct BatchPipeline<L: ModelLoader> {
  loader: L,
  config: PipelineConfig,
  cancel: CancelToken,
}

/// 运行中的可变状态
struct RunState {
  state: PipelineState,
  report: RunReport,
}

impl RunState {
  fn enter(&mut self, state: PipelineState) {
    if self.state != state {
      debug!("流水线状态: {} -> {}", self.state, state);
      self.state = state;
    }
  }

  fn fail(self, error: PipelineError) -> RunFailure {
    error!("流水线在{}阶段失败: {}", self.state, error);
    debug!("流水线状态: {} -> {}", self.state, PipelineState::Failed);
    RunFailure {
      stage: self.state,
      error,
      report: self.report,
    }
  }
}

/// 一路输出角色及其写入端
struct RoleSink {
  role: Role,
  sink: Box<dyn FrameSink>,
}

impl<L: ModelLoader> BatchPipeline<L> {
  pub fn new(loader: L, config: PipelineConfig) -> Self {
    Self {
      loader,
      config,
      cancel: CancelToken::new(),
    }
  }

  pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn run<S, F>(self, source: &mut S, sinks: &F) -> RunOutcome
  where
    S: FrameSource + ?Sized,
    F: SinkFactory + ?Sized,
  {
    let BatchPipeline {
      loader,
      config,
      cancel,
    } = self;
    let mut run = RunState {
      state: PipelineState::Idle,
      report: RunReport::default(),
    };

    if let Err(e) = config.validate() {
      return Err(run.fail(e));
    }

    // 在读取任何帧、创建任何输出之前加载引擎
    let mut engine = match loader.load() {
      Ok(engine) => engine,
      Err(e) => return Err(run.fail(PipelineError::InferenceUnavailable(e.to_string()))),
    };
    let roles = engine.roles().to_vec();
    if roles.is_empty() {
      return Err(run.fail(PipelineError::InferenceUnavailable(
        "模型没有输出角色".to_string(),
      )));
    }

    let runner = Runner {
      config: &config,
      cancel: &cancel,
    };
    let result = runner.process(&mut run, &mut engine, &roles, source, sinks);
    drop(engine);
    debug!("推理引擎已释放");

    match result {
      Ok(()) => {
        run.enter(PipelineState::Done);
        info!(
          "流水线完成: 读取 {} 帧, 写出 {} 帧, {} 个批次, 跳过 {} 帧",
          run.report.frames_in,
          run.report.frames_out,
          run.report.batches,
          run.report.skipped.len()
        );
        Ok(run.report)
      }
      Err(e) => Err(run.fail(e)),
    }
  }

}

/// 一次运行中只读的配置与取消标记
struct Runner<'a> {
  config: &'a PipelineConfig,
  cancel: &'a CancelToken,
}

impl Runner<'_> {
  fn process<E, S, F>(
    &self,
    run: &mut RunState,
    engine: &mut E,
    roles: &[Role],
    source: &mut S,
    factory: &F,
  ) -> Result<(), PipelineError>
  where
    E: InferenceEngine,
    S: FrameSource + ?Sized,
    F: SinkFactory + ?Sized,
  {
    let batch_size = self.config.batch_size;
    let normalizer = FormatNormalizer::new().with_alpha_policy(self.config.alpha);
    let fps = source.metadata().fps.unwrap_or(DEFAULT_FPS);

    let mut sinks: Vec<RoleSink> = Vec::new();
    let mut orientation: Option<Orientation> = None;
    let mut video_shape: Option<(usize, usize)> = None;
    let mut pulled = 0usize;
    let mut exhausted = false;

    while !exhausted {
      if self.cancel.is_cancelled() {
        warn!("运行在第 {} 个批次前被取消", run.report.batches + 1);
        return Err(PipelineError::Cancelled);
      }

      // 1. 读取
      run.enter(PipelineState::Extracting);
      let mut raw = Vec::with_capacity(batch_size);
      while raw.len() < batch_size {
        if self.config.max_frames.is_some_and(|max| pulled >= max) {
          info!("达到最大帧数 {}, 停止读取", pulled);
          exhausted = true;
          break;
        }
        match source.next_frame()? {
          Some(frame) => {
            raw.push((pulled, frame));
            pulled += 1;
          }
          None => {
            exhausted = true;
            break;
          }
        }
      }
      if raw.is_empty() {
        break;
      }
      run.report.frames_in += raw.len();

      // 2. 方向只由第一帧决定
      let orientation = *orientation.get_or_insert_with(|| {
        let (_, first) = &raw[0];
        let orientation = first.orientation();
        info!(
          "视频方向: {:?} ({}x{})",
          orientation,
          first.width(),
          first.height()
        );
        run.report.was_portrait = Some(orientation == Orientation::Portrait);
        orientation
      });

      // 3. 规范化
      run.enter(PipelineState::Normalizing);
      let mut batch = FrameBatch::with_capacity(batch_size).map_err(MarshalError::from)?;
      for (index, frame) in raw {
        match normalize_frame(&normalizer, index, frame, &mut video_shape) {
          Ok(normalized) => batch.push(normalized).map_err(MarshalError::from)?,
          Err(e) => self.on_frame_error(run, index, e)?,
        }
      }
      if batch.is_empty() {
        continue;
      }
      let real = batch.len();
      if self.config.short_batch == ShortBatchPolicy::PadWithLast && !batch.is_full() {
        let padded = batch.pad_with_last();
        debug!("批次不足 {} 帧, 复制最后一帧补入 {} 帧", batch_size, padded);
      }

      // 4. 编组
      run.enter(PipelineState::Marshalling);
      let tensor = to_tensor(&batch)?;
      drop(batch);
      check_model_shape(engine.model_shape(), &tensor)?;

      // 5. 推理，每个批次一次
      run.enter(PipelineState::Inferring);
      let result = engine
        .infer(&tensor)
        .map_err(|e| PipelineError::InferenceUnavailable(e.to_string()))?;
      run.report.batches += 1;

      // 6. 反编组并恢复方向
      run.enter(PipelineState::Reconstructing);
      let outputs = reconstruct(roles, &result, tensor.shape(), real, orientation)?;
      drop(result);
      drop(tensor);

      // 7. 按原顺序写出
      run.enter(PipelineState::Writing);
      if sinks.is_empty() {
        sinks = create_sinks(factory, &outputs, fps)?;
      }
      for (RoleSink { role, sink }, (_, frames)) in sinks.iter_mut().zip(&outputs) {
        for frame in frames {
          sink
            .write_frame(frame)
            .map_err(|source| PipelineError::SinkWriteFailure {
              role: role.clone(),
              source,
            })?;
        }
      }
      run.report.frames_out += real;
      info!(
        "批次 #{} 完成: {} 帧, 累计写出 {} 帧",
        run.report.batches, real, run.report.frames_out
      );
    }

    run.enter(PipelineState::Finalizing);
    if sinks.is_empty() {
      warn!("没有任何帧被写出, 不生成输出");
    }
    for RoleSink { role, mut sink } in sinks {
      let path = sink
        .finalize()
        .map_err(|source| PipelineError::SinkWriteFailure {
          role: role.clone(),
          source,
        })?;
      info!("角色 '{}' 输出: {}", role, path.display());
      run.report.artifacts.push(Artifact {
        role: role.to_string(),
        path,
      });
    }

    Ok(())
  }

  fn on_frame_error(
    &self,
    run: &mut RunState,
    index: usize,
    error: PipelineError,
  ) -> Result<(), PipelineError> {
    match self.config.on_frame_error {
      FramePolicy::Abort => Err(error),
      FramePolicy::SkipFrame => {
        warn!("跳过第 {} 帧: {}", index, error);
        run.report.skipped.push(SkippedFrame {
          index,
          kind: error.kind(),
          reason: error.to_string(),
        });
        Ok(())
      }
    }
  }
}

/// 检查原始尺寸与视频的第一帧一致，再规范化
///
/// 必须在旋转之前比较，否则宽高互换的帧会通过检查，却按视频方向被错误地转回。
fn normalize_frame(
  normalizer: &FormatNormalizer,
  index: usize,
  frame: FrameBuffer,
  video_shape: &mut Option<(usize, usize)>,
) -> Result<crate::frame::NormalizedFrame, PipelineError> {
  let shape = (frame.width(), frame.height());
  match video_shape {
    Some(expected) if *expected != shape => {
      return Err(PipelineError::FrameShapeChanged {
        index,
        expected: *expected,
        actual: shape,
      });
    }
    Some(_) => {}
    None => *video_shape = Some(shape),
  }
  normalizer
    .normalize(frame)
    .map_err(|source| PipelineError::UnsupportedFrameFormat { index, source })
}

/// 固定的模型输入尺寸必须与张量一致，不做缩放
pub(crate) fn check_model_shape(model: ModelShape, tensor: &Tensor) -> Result<(), MarshalError> {
  let actual = tensor.shape();
  if model.accepts(actual.height, actual.width, actual.channels) {
    return Ok(());
  }
  Err(MarshalError::ShapeMismatch {
    expected: TensorShape::new(
      actual.batch,
      model.height.unwrap_or(actual.height),
      model.width.unwrap_or(actual.width),
      model.channels,
    ),
    actual,
  })
}

/// 校验推理输出，拆回逐帧图像，丢弃补齐的帧并恢复方向
///
/// 返回值按 `roles` 的顺序排列。
pub(crate) fn reconstruct(
  roles: &[Role],
  result: &InferenceResult,
  input: TensorShape,
  keep: usize,
  orientation: Orientation,
) -> Result<Vec<(Role, Vec<FrameBuffer>)>, PipelineError> {
  let mut outputs = Vec::with_capacity(roles.len());
  for role in roles {
    let tensor = result.get(role).ok_or_else(|| {
      PipelineError::InferenceUnavailable(format!("模型输出缺少角色 '{}'", role))
    })?;
    let shape = tensor.shape();
    if shape.batch != input.batch || shape.height != input.height || shape.width != input.width {
      return Err(
        MarshalError::ShapeMismatch {
          expected: TensorShape::new(input.batch, input.height, input.width, shape.channels),
          actual: shape,
        }
        .into(),
      );
    }
    if shape.channels != 1 && shape.channels != RGB_CHANNELS {
      return Err(MarshalError::UnsupportedChannels(shape.channels).into());
    }

    let frames = from_tensor(tensor, &shape, OutputRange::Byte)?
      .into_iter()
      .take(keep)
      .map(|frame| frame.restore_orientation(orientation).into_rgb())
      .collect();
    outputs.push((role.clone(), frames));
  }
  Ok(outputs)
}

fn create_sinks<F: SinkFactory + ?Sized>(
  factory: &F,
  outputs: &[(Role, Vec<FrameBuffer>)],
  fps: f64,
) -> Result<Vec<RoleSink>, PipelineError> {
  // 各角色的输出尺寸都已按输入校验过，取任意一帧即可
  let Some(first) = outputs.iter().find_map(|(_, frames)| frames.first()) else {
    return Ok(Vec::new());
  };
  let spec = SinkSpec {
    width: first.width(),
    height: first.height(),
    fps,
  };
  let multi_role = outputs.len() > 1;

  let mut sinks = Vec::with_capacity(outputs.len());
  for (role, _) in outputs {
    debug!(
      "创建角色 '{}' 的输出: {}x{} @ {} fps",
      role, spec.width, spec.height, spec.fps
    );
    let sink = factory
      .create_sink(role, multi_role, &spec)
      .map_err(|source| PipelineError::SinkWriteFailure {
        role: role.clone(),
        source,
      })?;
    sinks.push(RoleSink {
      role: role.clone(),
      sink,
    });
  }
  Ok(sinks)
}

/// 后台运行句柄
pub struct RunHandle {
  cancel: CancelToken,
  receiver: mpsc::Receiver<RunOutcome>,
  worker: Option<thread::JoinHandle<()>>,
  outcome: Option<RunOutcome>,
}

impl RunHandle {
  /// 请求取消，在下一个批次边界生效
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn cancel_token(&self) -> CancelToken {
    self.cancel.clone()
  }

  /// 非阻塞地检查运行是否结束
  pub fn try_outcome(&mut self) -> Option<&RunOutcome> {
    if self.outcome.is_none() {
      self.outcome = match self.receiver.try_recv() {
        Ok(outcome) => Some(outcome),
        Err(mpsc::TryRecvError::Empty) => None,
        Err(mpsc::TryRecvError::Disconnected) => Some(Err(worker_lost())),
      };
    }
    self.outcome.as_ref()
  }

  /// 阻塞直到收到唯一的终止通知
  pub fn wait(mut self) -> RunOutcome {
    let outcome = match self.outcome.take() {
      Some(outcome) => outcome,
      None => self.receiver.recv().unwrap_or_else(|_| Err(worker_lost())),
    };
    if let Some(worker) = self.worker.take()
      && worker.join().is_err()
    {
      error!("流水线线程异常退出");
    }
    outcome
  }
}

fn worker_lost() -> RunFailure {
  RunFailure {
    stage: PipelineState::Failed,
    error: PipelineError::WorkerLost,
    report: RunReport::default(),
  }
}

/// 在独立线程上执行一次运行，不阻塞调用线程
pub fn spawn_run<L, S, F>(pipeline: BatchPipeline<L>, mut source: S, sinks: F) -> RunHandle
where
  L: ModelLoader + Send + 'static,
  S: FrameSource + Send + 'static,
  F: SinkFactory + Send + 'static,
{
  let cancel = pipeline.cancel_token();
  let (sender, receiver) = mpsc::channel();
  let worker = thread::Builder::new()
    .name("lvjing-pipeline".to_string())
    .spawn(move || {
      let outcome = pipeline.run(&mut source, &sinks);
      drop(source);
      drop(sinks);
      if sender.send(outcome).is_err() {
        warn!("运行结果没有接收者");
      }
    });

  let worker = match worker {
    Ok(worker) => Some(worker),
    Err(e) => {
      error!("无法创建流水线线程: {}", e);
      None
    }
  };

  RunHandle {
    cancel,
    receiver,
    worker,
    outcome: None,
  }
}
