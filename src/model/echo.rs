// 该文件是 Lvjing（滤镜）项目的一部分。
// src/model/echo.rs - 回显推理引擎
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

//! 把输入张量原样（可选乘一个系数）返回的引擎，用于空跑整条流水线。
//!
//! - `echo://` - 单一角色 `filtered`
//! - `echo://?roles=denoised,segmented&scale=0.5` - 多角色，每个值乘 0.5

use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    InferenceEngine, InferenceResult, ModelError, ModelLoader, ModelShape, Role,
    roles_from_query, usize_from_query,
  },
  tensor::Tensor,
};

const ECHO_DEFAULT_ROLE: &str = "filtered";

#[derive(Debug, Clone)]
pub struct EchoModel {
  roles: Vec<Role>,
  scale: f32,
  shape: ModelShape,
}

impl Default for EchoModel {
  fn default() -> Self {
    Self {
      roles: vec![Role::new(ECHO_DEFAULT_ROLE)],
      scale: 1.0,
      shape: ModelShape::default(),
    }
  }
}

impl EchoModel {
  pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
    self.roles = roles;
    self
  }

  pub fn with_scale(mut self, scale: f32) -> Self {
    self.scale = scale;
    self
  }

  pub fn with_shape(mut self, shape: ModelShape) -> Self {
    self.shape = shape;
    self
  }
}

impl FromUrlWithScheme for EchoModel {
  const SCHEME: &'static str = "echo";
}

impl FromUrl for EchoModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "期望模型方案 '{}', 实际模型方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut model = EchoModel::default();
    if let Some(roles) = roles_from_query(url) {
      model.roles = roles;
    }
    if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == "scale") {
      model.scale = v
        .parse::<f32>()
        .map_err(|e| ModelError::InvalidParameter(format!("scale={}: {}", v, e)))?;
    }
    model.shape.height = usize_from_query(url, "height")?;
    model.shape.width = usize_from_query(url, "width")?;

    Ok(model)
  }
}

impl ModelLoader for EchoModel {
  type Engine = EchoEngine;
  type Error = ModelError;

  fn load(self) -> Result<Self::Engine, Self::Error> {
    if self.roles.is_empty() {
      return Err(ModelError::Load("回显模型至少需要一个输出角色".to_string()));
    }
    info!("加载回显模型, 角色: {:?}, 系数: {}", self.roles, self.scale);
    Ok(EchoEngine {
      roles: self.roles,
      scale: self.scale,
      shape: self.shape,
      invocations: 0,
    })
  }
}

#[derive(Debug)]
pub struct EchoEngine {
  roles: Vec<Role>,
  scale: f32,
  shape: ModelShape,
  invocations: usize,
}

impl EchoEngine {
  pub fn invocations(&self) -> usize {
    self.invocations
  }
}

impl InferenceEngine for EchoEngine {
  type Error = ModelError;

  fn model_shape(&self) -> ModelShape {
    self.shape
  }

  fn roles(&self) -> &[Role] {
    &self.roles
  }

  fn infer(&mut self, input: &Tensor) -> Result<InferenceResult, Self::Error> {
    self.invocations += 1;
    debug!("回显推理 #{}, 形状 {}", self.invocations, input.shape());
    let scale = self.scale;
    let output = input.clone().map(|v| v * scale);
    let mut result = InferenceResult::new();
    for role in &self.roles {
      result.push(role.clone(), output.clone());
    }
    Ok(result)
  }
}

impl Drop for EchoEngine {
  fn drop(&mut self) {
    debug!("释放回显引擎, 共推理 {} 次", self.invocations);
  }
}
