// 该文件是 Lvjing（滤镜）项目的一部分。
// tests/common/mod.rs - 测试用输入、引擎与输出
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

#![allow(dead_code)]

use std::{
  collections::{BTreeMap, VecDeque},
  path::PathBuf,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use lvjing::{
  frame::{FrameBuffer, Samples},
  input::{FrameSource, InputError, SourceMetadata},
  model::{InferenceEngine, InferenceResult, ModelLoader, ModelShape, Role},
  output::{FrameSink, OutputError, SinkFactory, SinkSpec, role_output_path},
  pipeline::CancelToken,
  tensor::{Tensor, TensorShape},
};
use thiserror::Error;

/// 第 i 帧的所有采样值都是 i
pub fn numbered_frames(count: usize, width: usize, height: usize) -> Vec<FrameBuffer> {
  (0..count)
    .map(|i| FrameBuffer::rgb8(width, height, vec![i as u8; width * height * 3]).unwrap())
    .collect()
}

pub fn bytes(frame: &FrameBuffer) -> &[u8] {
  match frame.samples() {
    Samples::Byte(data) => data,
    other => panic!("expected byte samples, got {:?}", other.storage()),
  }
}

pub fn first_values(frames: &[FrameBuffer]) -> Vec<u8> {
  frames.iter().map(|f| bytes(f)[0]).collect()
}

pub struct VecSource {
  frames: VecDeque<FrameBuffer>,
  pulled: Arc<AtomicUsize>,
  fps: Option<f64>,
}

impl VecSource {
  pub fn new(frames: Vec<FrameBuffer>) -> Self {
    Self {
      frames: frames.into(),
      pulled: Arc::new(AtomicUsize::new(0)),
      fps: Some(25.0),
    }
  }

  pub fn pulled(&self) -> Arc<AtomicUsize> {
    self.pulled.clone()
  }
}

impl FrameSource for VecSource {
  fn next_frame(&mut self) -> Result<Option<FrameBuffer>, InputError> {
    let frame = self.frames.pop_front();
    if frame.is_some() {
      self.pulled.fetch_add(1, Ordering::SeqCst);
    }
    Ok(frame)
  }

  fn metadata(&self) -> SourceMetadata {
    SourceMetadata {
      fps: self.fps,
      frame_count: Some(self.frames.len() as u64),
      ..SourceMetadata::default()
    }
  }
}

#[derive(Error, Debug)]
#[error("stub engine: {0}")]
pub struct StubError(pub String);

/// 引擎调用的观测数据
#[derive(Default, Clone)]
pub struct EngineStats {
  pub loads: Arc<AtomicUsize>,
  pub released: Arc<AtomicUsize>,
  pub shapes: Arc<Mutex<Vec<TensorShape>>>,
}

impl EngineStats {
  pub fn invocations(&self) -> usize {
    self.shapes.lock().unwrap().len()
  }

  pub fn batch_sizes(&self) -> Vec<usize> {
    self.shapes.lock().unwrap().iter().map(|s| s.batch).collect()
  }
}

/// 对输入乘以系数后按每个角色返回
#[derive(Clone)]
pub struct StubLoader {
  pub roles: Vec<Role>,
  pub scale: f32,
  pub shape: ModelShape,
  pub fail_load: bool,
  /// 第 n 次（从 1 开始）推理返回错误
  pub fail_on: Option<usize>,
  /// 第 n 次推理时触发取消
  pub cancel_on: Option<(usize, CancelToken)>,
  /// 把输出的通道数改为该值
  pub output_channels: Option<usize>,
  pub stats: EngineStats,
}

impl Default for StubLoader {
  fn default() -> Self {
    Self {
      roles: vec![Role::new("filtered")],
      scale: 1.0,
      shape: ModelShape::default(),
      fail_load: false,
      fail_on: None,
      cancel_on: None,
      output_channels: None,
      stats: EngineStats::default(),
    }
  }
}

impl ModelLoader for StubLoader {
  type Engine = StubEngine;
  type Error = StubError;

  fn load(self) -> Result<Self::Engine, Self::Error> {
    self.stats.loads.fetch_add(1, Ordering::SeqCst);
    if self.fail_load {
      return Err(StubError("model file missing".to_string()));
    }
    Ok(StubEngine { loader: self })
  }
}

pub struct StubEngine {
  loader: StubLoader,
}

impl InferenceEngine for StubEngine {
  type Error = StubError;

  fn model_shape(&self) -> ModelShape {
    self.loader.shape
  }

  fn roles(&self) -> &[Role] {
    &self.loader.roles
  }

  fn infer(&mut self, input: &Tensor) -> Result<InferenceResult, Self::Error> {
    let call = {
      let mut shapes = self.loader.stats.shapes.lock().unwrap();
      shapes.push(input.shape());
      shapes.len()
    };
    if self.loader.fail_on == Some(call) {
      return Err(StubError(format!("invocation {} failed", call)));
    }
    if let Some((at, token)) = &self.loader.cancel_on
      && *at == call
    {
      token.cancel();
    }

    let scale = self.loader.scale;
    let output = match self.loader.output_channels {
      None => input.clone().map(|v| v * scale),
      Some(channels) => {
        let shape = input.shape();
        let shape = TensorShape::new(shape.batch, shape.height, shape.width, channels);
        Tensor::new(shape, vec![0.5; shape.len().unwrap()]).unwrap()
      }
    };
    let mut result = InferenceResult::new();
    for role in &self.loader.roles {
      result.push(role.clone(), output.clone());
    }
    Ok(result)
  }
}

impl Drop for StubEngine {
  fn drop(&mut self) {
    self.loader.stats.released.fetch_add(1, Ordering::SeqCst);
  }
}

#[derive(Debug, Clone, Default)]
pub struct SinkRecord {
  pub path: PathBuf,
  pub spec: Option<SinkSpec>,
  pub frames: Vec<FrameBuffer>,
  pub finalized: bool,
}

/// 把输出保存在内存中，按角色名索引
#[derive(Clone)]
pub struct MemorySinkFactory {
  base: PathBuf,
  pub records: Arc<Mutex<BTreeMap<String, SinkRecord>>>,
  /// 写到第 n 帧（从 0 开始）时返回错误
  pub fail_write_at: Option<usize>,
}

impl MemorySinkFactory {
  pub fn new(base: &str) -> Self {
    Self {
      base: PathBuf::from(base),
      records: Arc::default(),
      fail_write_at: None,
    }
  }

  pub fn record(&self, role: &str) -> SinkRecord {
    self
      .records
      .lock()
      .unwrap()
      .get(role)
      .cloned()
      .unwrap_or_else(|| panic!("no sink for role {}", role))
  }

  pub fn is_empty(&self) -> bool {
    self.records.lock().unwrap().is_empty()
  }
}

impl SinkFactory for MemorySinkFactory {
  fn create_sink(
    &self,
    role: &Role,
    multi_role: bool,
    spec: &SinkSpec,
  ) -> Result<Box<dyn FrameSink>, OutputError> {
    let record = SinkRecord {
      path: role_output_path(&self.base, role, multi_role),
      spec: Some(*spec),
      ..SinkRecord::default()
    };
    self
      .records
      .lock()
      .unwrap()
      .insert(role.to_string(), record);
    Ok(Box::new(MemorySink {
      role: role.to_string(),
      records: self.records.clone(),
      fail_write_at: self.fail_write_at,
    }))
  }
}

struct MemorySink {
  role: String,
  records: Arc<Mutex<BTreeMap<String, SinkRecord>>>,
  fail_write_at: Option<usize>,
}

impl FrameSink for MemorySink {
  fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), OutputError> {
    let mut records = self.records.lock().unwrap();
    let record = records.get_mut(&self.role).unwrap();
    if self.fail_write_at == Some(record.frames.len()) {
      return Err(OutputError::SchemeMismatch("disk full".to_string()));
    }
    record.frames.push(frame.clone());
    Ok(())
  }

  fn finalize(&mut self) -> Result<PathBuf, OutputError> {
    let mut records = self.records.lock().unwrap();
    let record = records.get_mut(&self.role).unwrap();
    record.finalized = true;
    Ok(record.path.clone())
  }
}
