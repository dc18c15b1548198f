// 该文件是 Lvjing（滤镜）项目的一部分。
// src/main.rs - 视频滤镜主程序
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

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use lvjing::{
  FromUrl,
  input::InputWrapper,
  model::ModelWrapper,
  output::OutputWrapper,
  task::{Task, VideoTask},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let output_url = args.output_url()?;

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出地址: {}", output_url);

  let model = ModelWrapper::from_url(&args.model)?;
  let input = InputWrapper::from_url(&args.input)?;
  let output = OutputWrapper::from_url(&output_url)?;

  let task = VideoTask::default().with_config(args.pipeline_config());
  match task.run_task(input, model, output)? {
    Ok(report) => {
      println!("{}", serde_json::to_string_pretty(&report)?);
      Ok(())
    }
    Err(failure) => {
      let summary = serde_json::json!({
        "stage": failure.stage,
        "kind": failure.kind(),
        "error": failure.error.to_string(),
        "report": failure.report,
      });
      println!("{}", serde_json::to_string_pretty(&summary)?);
      error!("运行失败: {}", failure);
      Err(failure.into())
    }
  }
}
