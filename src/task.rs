// 该文件是 Lvjing（滤镜）项目的一部分。
// src/task.rs - 滤镜任务
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

use std::{thread, time::Duration};

use tracing::{info, warn};

use crate::{
  input::FrameSource,
  live::LiveFilter,
  model::ModelLoader,
  output::{DEFAULT_FPS, SinkFactory, SinkSpec},
  pipeline::{Artifact, BatchPipeline, PipelineConfig, RunOutcome, spawn_run},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 对单张图像执行一次滤镜
pub struct OneShotTask;

impl<I, M, O> Task<I, M, O> for OneShotTask
where
  I: FrameSource,
  M: ModelLoader,
  O: SinkFactory,
{
  type Output = Vec<Artifact>;
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let frame = input
      .next_frame()?
      .ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功: {}x{}", frame.width(), frame.height());

    let mut filter = LiveFilter::new(model)?;
    let now = std::time::Instant::now();
    let outputs = filter.filter_frame(frame)?;
    info!("滤镜完成，耗时: {:.2?}", now.elapsed());

    let multi_role = outputs.len() > 1;
    let mut artifacts = Vec::with_capacity(outputs.len());
    for (role, frame) in outputs {
      let spec = SinkSpec {
        width: frame.width(),
        height: frame.height(),
        fps: DEFAULT_FPS,
      };
      let mut sink = output.create_sink(&role, multi_role, &spec)?;
      sink.write_frame(&frame)?;
      let path = sink.finalize()?;
      info!("角色 '{}' 已保存: {}", role, path.display());
      artifacts.push(Artifact {
        role: role.to_string(),
        path,
      });
    }

    Ok(artifacts)
  }
}

/// 在后台线程处理整段视频，Ctrl-C 在批次边界取消运行
#[derive(Default, Debug)]
pub struct VideoTask {
  config: PipelineConfig,
}

impl VideoTask {
  pub fn with_config(mut self, config: PipelineConfig) -> Self {
    self.config = config;
    self
  }
}

impl<I, M, O> Task<I, M, O> for VideoTask
where
  I: FrameSource + Send + 'static,
  M: ModelLoader + Send + 'static,
  O: SinkFactory + Send + 'static,
{
  type Output = RunOutcome;
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!("开始任务, 批次大小 {}", self.config.batch_size);
    let pipeline = BatchPipeline::new(model, self.config);
    let token = pipeline.cancel_token();

    ctrlc::set_handler(move || {
      info!("收到中断信号，在当前批次结束后退出...");
      token.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let handle = spawn_run(pipeline, input, output);
    let outcome = handle.wait();
    info!("任务完成，退出");
    Ok(outcome)
  }
}
