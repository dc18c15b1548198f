// 该文件是 Lvjing（滤镜）项目的一部分。
// src/live.rs - 单帧实时滤镜
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

use std::time::Instant;

use tracing::{debug, info};

use crate::{
  frame::{FrameBatch, FrameBuffer},
  model::{InferenceEngine, ModelLoader, Role},
  normalize::{AlphaPolicy, FormatNormalizer},
  pipeline::{PipelineError, check_model_shape, reconstruct},
  tensor::{MarshalError, to_tensor},
};

/// 持有已加载的引擎，逐帧执行滤镜
///
/// 与 [`crate::pipeline::BatchPipeline`] 不同，每帧按自身的方向处理。
/// 引擎在 `LiveFilter` 被 drop 时释放。
pub struct LiveFilter<E: InferenceEngine> {
  engine: E,
  normalizer: FormatNormalizer,
  frames: usize,
}

impl<E: InferenceEngine> LiveFilter<E> {
  pub fn new<L>(loader: L) -> Result<Self, PipelineError>
  where
    L: ModelLoader<Engine = E>,
  {
    let engine = loader
      .load()
      .map_err(|e| PipelineError::InferenceUnavailable(e.to_string()))?;
    if engine.roles().is_empty() {
      return Err(PipelineError::InferenceUnavailable(
        "模型没有输出角色".to_string(),
      ));
    }
    Ok(Self::with_engine(engine))
  }

  pub fn with_engine(engine: E) -> Self {
    Self {
      engine,
      normalizer: FormatNormalizer::new(),
      frames: 0,
    }
  }

  pub fn with_alpha_policy(mut self, alpha: AlphaPolicy) -> Self {
    self.normalizer = FormatNormalizer::new().with_alpha_policy(alpha);
    self
  }

  pub fn roles(&self) -> &[Role] {
    self.engine.roles()
  }

  pub fn frames(&self) -> usize {
    self.frames
  }

  /// 对一帧执行滤镜，返回每个角色的输出帧（3 通道字节 RGB，原方向）
  pub fn filter_frame(
    &mut self,
    frame: FrameBuffer,
  ) -> Result<Vec<(Role, FrameBuffer)>, PipelineError> {
    let now = Instant::now();
    let index = self.frames;
    let orientation = frame.orientation();

    let normalized = self
      .normalizer
      .normalize(frame)
      .map_err(|source| PipelineError::UnsupportedFrameFormat { index, source })?;
    let mut batch = FrameBatch::with_capacity(1).map_err(MarshalError::from)?;
    batch.push(normalized).map_err(MarshalError::from)?;
    let tensor = to_tensor(&batch)?;
    check_model_shape(self.engine.model_shape(), &tensor)?;

    let result = self
      .engine
      .infer(&tensor)
      .map_err(|e| PipelineError::InferenceUnavailable(e.to_string()))?;
    debug!("第 {} 帧推理完成, 耗时: {:.2?}", index, now.elapsed());

    let roles = self.engine.roles().to_vec();
    let outputs = reconstruct(&roles, &result, tensor.shape(), 1, orientation)?
      .into_iter()
      .filter_map(|(role, frames)| frames.into_iter().next().map(|frame| (role, frame)))
      .collect();

    self.frames += 1;
    info!("第 {} 帧滤镜完成, 耗时: {:.2?}", index, now.elapsed());
    Ok(outputs)
  }
}

impl<E: InferenceEngine> Drop for LiveFilter<E> {
  fn drop(&mut self) {
    debug!("释放实时滤镜, 共处理 {} 帧", self.frames);
  }
}
