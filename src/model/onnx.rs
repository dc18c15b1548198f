// 该文件是 Lvjing（滤镜）项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理引擎
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

//! # ONNX 推理引擎
//!
//! 模型须只有一个 NHWC f32 输入，每个输出也是 NHWC f32。
//!
//! ## URL 格式
//!
//! - `onnx:///path/to/model.onnx` - 可变输入尺寸，角色取输出张量名
//! - `onnx:///path/to/model.onnx?height=720&width=1280` - 固定输入尺寸
//! - `onnx:///path/to/model.onnx?roles=denoised,segmented` - 按输出顺序重命名角色

use std::path::PathBuf;

use ndarray::ArrayD;
use ort::{inputs, session::Session, value::TensorRef};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    InferenceEngine, InferenceResult, ModelError, ModelLoader, ModelShape, Role,
    roles_from_query, usize_from_query,
  },
  tensor::{Tensor, TensorShape},
};

#[derive(Debug, Clone)]
pub struct OnnxModel {
  model_path: PathBuf,
  shape: ModelShape,
  roles: Option<Vec<Role>>,
}

impl FromUrlWithScheme for OnnxModel {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModel {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let shape = ModelShape {
      height: usize_from_query(url, "height")?,
      width: usize_from_query(url, "width")?,
      ..ModelShape::default()
    };

    Ok(OnnxModel {
      model_path: PathBuf::from(url.path()),
      shape,
      roles: roles_from_query(url),
    })
  }
}

impl ModelLoader for OnnxModel {
  type Engine = OnnxEngine;
  type Error = ModelError;

  fn load(self) -> Result<Self::Engine, Self::Error> {
    info!("加载模型文件: {}", self.model_path.display());
    let session = Session::builder()
      .map_err(|e| ModelError::Load(format!("无法创建会话构建器: {}", e)))?
      .commit_from_file(&self.model_path)
      .map_err(|e| {
        ModelError::Load(format!("无法加载模型 {}: {}", self.model_path.display(), e))
      })?;

    let input_names: Vec<String> = session
      .inputs()
      .iter()
      .map(|input| input.name().to_string())
      .collect();
    let output_names: Vec<String> = session
      .outputs()
      .iter()
      .map(|output| output.name().to_string())
      .collect();

    if input_names.len() != 1 {
      return Err(ModelError::Load(format!(
        "预期模型输入数量为 1, 实际为 {}",
        input_names.len()
      )));
    }
    if output_names.is_empty() {
      return Err(ModelError::Load("模型没有输出".to_string()));
    }

    let roles = match self.roles {
      Some(roles) if roles.len() == output_names.len() => roles,
      Some(roles) => {
        return Err(ModelError::InvalidParameter(format!(
          "角色数量 {} 与模型输出数量 {} 不一致",
          roles.len(),
          output_names.len()
        )));
      }
      None => output_names.iter().map(|name| Role::new(name.as_str())).collect(),
    };

    debug!("模型输入: {:?}", input_names);
    debug!("模型输出: {:?} -> 角色 {:?}", output_names, roles);
    info!("模型加载完成");

    Ok(OnnxEngine {
      session,
      input_name: input_names[0].clone(),
      output_names,
      roles,
      shape: self.shape,
    })
  }
}

pub struct OnnxEngine {
  session: Session,
  input_name: String,
  output_names: Vec<String>,
  roles: Vec<Role>,
  shape: ModelShape,
}

impl InferenceEngine for OnnxEngine {
  type Error = ModelError;

  fn model_shape(&self) -> ModelShape {
    self.shape
  }

  fn roles(&self) -> &[Role] {
    &self.roles
  }

  fn infer(&mut self, input: &Tensor) -> Result<InferenceResult, Self::Error> {
    let array = ArrayD::from_shape_vec(input.shape().dims().to_vec(), input.data().to_vec())
      .map_err(|e| ModelError::Infer(format!("无法创建输入数组: {}", e)))?;
    let tensor_ref = TensorRef::from_array_view(array.view())
      .map_err(|e| ModelError::Infer(format!("无法创建输入张量: {}", e)))?;

    debug!("执行模型推理, 输入形状 {}", input.shape());
    let outputs = self
      .session
      .run(inputs![self.input_name.as_str() => tensor_ref])
      .map_err(|e| ModelError::Infer(format!("推理失败: {}", e)))?;

    let mut result = InferenceResult::new();
    for (name, role) in self.output_names.iter().zip(&self.roles) {
      let array = outputs[name.as_str()]
        .try_extract_array::<f32>()
        .map_err(|e| ModelError::Infer(format!("输出 '{}' 不是 f32: {}", name, e)))?;
      let dims = array.shape();
      if dims.len() != 4 {
        return Err(ModelError::Infer(format!(
          "输出 '{}' 不是 NHWC 四维张量: {:?}",
          name, dims
        )));
      }
      let shape = TensorShape::new(dims[0], dims[1], dims[2], dims[3]);
      let data = array.iter().copied().collect();
      let tensor = Tensor::new(shape, data).map_err(|e| ModelError::Infer(e.to_string()))?;
      result.push(role.clone(), tensor);
    }

    Ok(result)
  }
}

impl Drop for OnnxEngine {
  fn drop(&mut self) {
    info!("释放 ONNX 推理会话");
  }
}
