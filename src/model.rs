// 该文件是 Lvjing（滤镜）项目的一部分。
// src/model.rs - 推理引擎
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

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, tensor::Tensor};

/// 多输出模型中一路输出的名字，例如 "denoised"、"segmented"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Role(String);

impl Role {
  pub fn new(name: impl Into<String>) -> Self {
    Role(name.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for Role {
  fn from(name: &str) -> Self {
    Role::new(name)
  }
}

/// 加载时确定的模型输入形状，None 表示该维度可变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelShape {
  pub height: Option<usize>,
  pub width: Option<usize>,
  pub channels: usize,
}

impl Default for ModelShape {
  fn default() -> Self {
    Self {
      height: None,
      width: None,
      channels: crate::frame::RGB_CHANNELS,
    }
  }
}

impl ModelShape {
  pub fn fixed(height: usize, width: usize) -> Self {
    Self {
      height: Some(height),
      width: Some(width),
      ..Self::default()
    }
  }

  pub fn accepts(&self, height: usize, width: usize, channels: usize) -> bool {
    self.height.is_none_or(|h| h == height)
      && self.width.is_none_or(|w| w == width)
      && self.channels == channels
  }
}

/// 一次推理的全部输出，按角色标记
#[derive(Debug, Clone, Default)]
pub struct InferenceResult {
  outputs: Vec<(Role, Tensor)>,
}

impl InferenceResult {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_output(mut self, role: Role, tensor: Tensor) -> Self {
    self.outputs.push((role, tensor));
    self
  }

  pub fn push(&mut self, role: Role, tensor: Tensor) {
    self.outputs.push((role, tensor));
  }

  pub fn len(&self) -> usize {
    self.outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }

  pub fn get(&self, role: &Role) -> Option<&Tensor> {
    self
      .outputs
      .iter()
      .find(|(r, _)| r == role)
      .map(|(_, tensor)| tensor)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&Role, &Tensor)> {
    self.outputs.iter().map(|(role, tensor)| (role, tensor))
  }

  pub fn into_outputs(self) -> Vec<(Role, Tensor)> {
    self.outputs
  }
}

/// 不透明的推理引擎
///
/// 引擎被流水线独占，在 drop 时释放底层资源。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  fn model_shape(&self) -> ModelShape;
  fn roles(&self) -> &[Role];
  fn infer(&mut self, input: &Tensor) -> Result<InferenceResult, Self::Error>;
}

/// 模型句柄，加载后得到引擎
pub trait ModelLoader {
  type Engine: InferenceEngine;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(self) -> Result<Self::Engine, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("模型参数错误: {0}")]
  InvalidParameter(String),
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("推理错误: {0}")]
  Infer(String),
}

/// 从 URL 查询参数解析角色列表，形如 `roles=denoised,segmented`
pub(crate) fn roles_from_query(url: &Url) -> Option<Vec<Role>> {
  url
    .query_pairs()
    .find(|(k, _)| k == "roles")
    .map(|(_, v)| {
      v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Role::new)
        .collect::<Vec<_>>()
    })
    .filter(|roles| !roles.is_empty())
}

pub(crate) fn usize_from_query(url: &Url, key: &str) -> Result<Option<usize>, ModelError> {
  match url.query_pairs().find(|(k, _)| k == key) {
    Some((_, v)) => v
      .parse::<usize>()
      .map(Some)
      .map_err(|e| ModelError::InvalidParameter(format!("{}={}: {}", key, v, e))),
    None => Ok(None),
  }
}

mod echo;
pub use self::echo::{EchoEngine, EchoModel};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxEngine, OnnxModel};

/// 按 URL 方案选择的模型
pub enum ModelWrapper {
  Echo(EchoModel),
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      EchoModel::SCHEME => Ok(ModelWrapper::Echo(EchoModel::from_url(url)?)),
      #[cfg(feature = "model_onnx")]
      OnnxModel::SCHEME => Ok(ModelWrapper::Onnx(OnnxModel::from_url(url)?)),
      other => Err(ModelError::SchemeMismatch(format!(
        "不支持的模型方案 '{}'",
        other
      ))),
    }
  }
}

pub enum EngineWrapper {
  Echo(EchoEngine),
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxEngine),
}

impl ModelLoader for ModelWrapper {
  type Engine = EngineWrapper;
  type Error = ModelError;

  fn load(self) -> Result<Self::Engine, Self::Error> {
    match self {
      ModelWrapper::Echo(model) => model.load().map(EngineWrapper::Echo),
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.load().map(EngineWrapper::Onnx),
    }
  }
}

impl InferenceEngine for EngineWrapper {
  type Error = ModelError;

  fn model_shape(&self) -> ModelShape {
    match self {
      EngineWrapper::Echo(engine) => engine.model_shape(),
      #[cfg(feature = "model_onnx")]
      EngineWrapper::Onnx(engine) => engine.model_shape(),
    }
  }

  fn roles(&self) -> &[Role] {
    match self {
      EngineWrapper::Echo(engine) => engine.roles(),
      #[cfg(feature = "model_onnx")]
      EngineWrapper::Onnx(engine) => engine.roles(),
    }
  }

  fn infer(&mut self, input: &Tensor) -> Result<InferenceResult, Self::Error> {
    match self {
      EngineWrapper::Echo(engine) => engine.infer(input),
      #[cfg(feature = "model_onnx")]
      EngineWrapper::Onnx(engine) => engine.infer(input),
    }
  }
}
