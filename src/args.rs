// 该文件是 Lvjing（滤镜）项目的一部分。
// src/args.rs - 项目参数配置
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

use clap::Parser;
use url::Url;

use lvjing::{
  normalize::AlphaPolicy,
  output::default_output_name,
  pipeline::{DEFAULT_BATCH_SIZE, FramePolicy, PipelineConfig, ShortBatchPolicy},
};

/// Lvjing 视频滤镜参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  /// - echo://?roles=denoised,segmented
  /// - onnx:///path/to/model.onnx?height=720&width=1280
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// - gst://file/path/to/video.mp4
  /// - folder:///path/to/frames?fps=30
  /// - image:///path/to/image.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出地址，省略时在当前目录生成 video_<时间戳>.mp4
  /// - video:///path/to/output.mp4?fps=30
  /// - gstvideo:///path/to/output.mp4
  /// - folder:///path/to/frames
  #[arg(long, value_name = "OUTPUT")]
  pub output: Option<Url>,

  /// 每次推理的帧数
  #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_name = "COUNT")]
  pub batch_size: usize,

  /// 最后一个批次不足时复制最后一帧补满
  #[arg(long)]
  pub pad_short_batch: bool,

  /// 跳过无法处理的帧而不是终止
  #[arg(long)]
  pub best_effort: bool,

  /// 4 通道输入以黑色为底合成，而不是直接丢弃 alpha
  #[arg(long)]
  pub premultiply_alpha: bool,

  /// 最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub max_frames: Option<usize>,
}

impl Args {
  pub fn pipeline_config(&self) -> PipelineConfig {
    PipelineConfig::default()
      .with_batch_size(self.batch_size)
      .with_short_batch(if self.pad_short_batch {
        ShortBatchPolicy::PadWithLast
      } else {
        ShortBatchPolicy::AsIs
      })
      .with_frame_policy(if self.best_effort {
        FramePolicy::SkipFrame
      } else {
        FramePolicy::Abort
      })
      .with_alpha_policy(if self.premultiply_alpha {
        AlphaPolicy::Premultiply
      } else {
        AlphaPolicy::Drop
      })
      .with_max_frames(self.max_frames)
  }

  pub fn output_url(&self) -> anyhow::Result<Url> {
    if let Some(output) = &self.output {
      return Ok(output.clone());
    }
    let path = std::env::current_dir()?.join(default_output_name());
    Ok(Url::parse(&format!("video://{}", path.display()))?)
  }
}
