// 该文件是 Lvjing（滤镜）项目的一部分。
// src/output/save_video_file.rs - 保存视频文件
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

//! 视频文件输出模块
//!
//! 输出帧先以 PNG 序列缓存在 `<输出路径>.frames/`，`finalize` 时调用 ffmpeg
//! 编码为 `<名称>.partial.<扩展名>`，编码成功后再改名为最终文件。
//! 运行被取消时缓存目录会被保留，不会出现看起来完整的视频文件。
//!
//! # URL 格式
//!
//! - `video:///path/to/output.mp4` - 帧率取自输入源，缺省 30 fps
//! - `video:///path/to/output.mp4?fps=24` - 强制指定帧率
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 命令行工具来编码视频。

use std::{
  path::{Path, PathBuf},
  process::Command,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::FrameBuffer,
  model::Role,
  output::{
    FrameSink, OutputError, SinkFactory, SinkSpec, ensure_parent, fps_from_query, partial_path,
    role_output_path, save_image_file::rgb_image,
  },
};

#[derive(Error, Debug)]
pub enum SaveVideoFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("视频编码错误: {0}")]
  EncodingError(String),
  #[error("参数验证错误: {0}")]
  ValidationError(String),
}

pub struct SaveVideoFileOutput {
  path: PathBuf,
  fps: Option<f64>,
}

impl FromUrlWithScheme for SaveVideoFileOutput {
  const SCHEME: &'static str = "video";
}

impl FromUrl for SaveVideoFileOutput {
  type Error = SaveVideoFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveVideoFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let fps = fps_from_query(uri).map_err(SaveVideoFileError::ValidationError)?;

    Ok(SaveVideoFileOutput {
      path: PathBuf::from(uri.path()),
      fps,
    })
  }
}

impl SaveVideoFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      fps: None,
    }
  }

  pub fn with_fps(mut self, fps: f64) -> Self {
    self.fps = Some(fps);
    self
  }
}

impl SinkFactory for SaveVideoFileOutput {
  fn create_sink(
    &self,
    role: &Role,
    multi_role: bool,
    spec: &SinkSpec,
  ) -> Result<Box<dyn FrameSink>, OutputError> {
    let path = role_output_path(&self.path, role, multi_role);
    let spec = SinkSpec {
      fps: self.fps.unwrap_or(spec.fps),
      ..*spec
    };
    Ok(Box::new(SaveVideoFileSink::create(path, spec)?))
  }
}

pub struct SaveVideoFileSink {
  path: PathBuf,
  frames_dir: PathBuf,
  spec: SinkSpec,
  frame_counter: usize,
  finalized: bool,
}

impl SaveVideoFileSink {
  pub fn create(path: PathBuf, spec: SinkSpec) -> Result<Self, SaveVideoFileError> {
    let frames_dir = frames_dir(&path);
    if frames_dir.exists() {
      warn!("清理上次遗留的帧缓存: {}", frames_dir.display());
      std::fs::remove_dir_all(&frames_dir)?;
    }
    std::fs::create_dir_all(&frames_dir)?;
    info!("初始化视频帧缓冲区: {}", frames_dir.display());

    Ok(SaveVideoFileSink {
      path,
      frames_dir,
      spec,
      frame_counter: 0,
      finalized: false,
    })
  }

  fn encode(&self, target: &Path) -> Result<(), SaveVideoFileError> {
    info!(
      "开始编码视频: {} 帧 @ {} fps -> {}",
      self.frame_counter,
      self.spec.fps,
      self.path.display()
    );

    let output = Command::new("ffmpeg")
      .arg("-y")
      .arg("-loglevel")
      .arg("error")
      .arg("-framerate")
      .arg(self.spec.fps.to_string())
      .arg("-i")
      .arg(self.frames_dir.join("frame_%06d.png"))
      .arg("-vf")
      .arg("pad=ceil(iw/2)*2:ceil(ih/2)*2")
      .arg("-c:v")
      .arg("libx264")
      .arg("-pix_fmt")
      .arg("yuv420p")
      .arg("-preset")
      .arg("fast")
      .arg("-crf")
      .arg("23")
      .arg(target)
      .output()
      .map_err(|e| {
        error!("无法执行 ffmpeg: {}", e);
        SaveVideoFileError::EncodingError(format!("无法执行 ffmpeg (请确保已安装): {}", e))
      })?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      error!("ffmpeg 错误: {}", stderr);
      return Err(SaveVideoFileError::EncodingError(format!(
        "ffmpeg 失败: {}",
        stderr
      )));
    }
    Ok(())
  }
}

fn frames_dir(path: &Path) -> PathBuf {
  let mut name = path.as_os_str().to_owned();
  name.push(".frames");
  PathBuf::from(name)
}

impl FrameSink for SaveVideoFileSink {
  fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    let image = rgb_image(frame, &self.spec)?;
    let frame_path = self
      .frames_dir
      .join(format!("frame_{:06}.png", self.frame_counter));
    image
      .save(&frame_path)
      .map_err(SaveVideoFileError::ImageError)?;
    debug!("缓存视频帧 {}", frame_path.display());
    self.frame_counter += 1;
    Ok(())
  }

  fn finalize(&mut self) -> Result<PathBuf, OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    if self.frame_counter == 0 {
      return Err(SaveVideoFileError::EncodingError("没有帧可以编码为视频".to_string()).into());
    }

    ensure_parent(&self.path).map_err(SaveVideoFileError::IoError)?;
    let partial = partial_path(&self.path);
    self.encode(&partial)?;
    std::fs::rename(&partial, &self.path).map_err(SaveVideoFileError::IoError)?;
    self.finalized = true;

    if let Err(e) = std::fs::remove_dir_all(&self.frames_dir) {
      warn!("清理临时目录失败: {}", e);
    }
    info!("视频已保存到文件: {}", self.path.display());
    Ok(self.path.clone())
  }
}

impl Drop for SaveVideoFileSink {
  fn drop(&mut self) {
    if !self.finalized {
      warn!(
        "视频输出未完成, {} 帧保留在 {}",
        self.frame_counter,
        self.frames_dir.display()
      );
    }
  }
}
