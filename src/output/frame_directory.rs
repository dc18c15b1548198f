// 该文件是 Lvjing（滤镜）项目的一部分。
// src/output/frame_directory.rs - 帧目录输出
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

//! 把输出帧逐张保存为 PNG：`folder:///path/to/frames`
//!
//! 写入过程中目录名为 `frames.partial`，`finalize` 后改名为 `frames`。

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::FrameBuffer,
  model::Role,
  output::{
    FrameSink, OutputError, SinkFactory, SinkSpec, partial_path, role_output_path,
    save_image_file::rgb_image,
  },
};

#[derive(Error, Debug)]
pub enum FrameDirectoryError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub struct FrameDirectoryOutput {
  directory: PathBuf,
}

impl FromUrlWithScheme for FrameDirectoryOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FrameDirectoryOutput {
  type Error = FrameDirectoryError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(FrameDirectoryError::SchemeMismatch);
    }

    Ok(FrameDirectoryOutput {
      directory: PathBuf::from(uri.path()),
    })
  }
}

impl FrameDirectoryOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }
}

impl SinkFactory for FrameDirectoryOutput {
  fn create_sink(
    &self,
    role: &Role,
    multi_role: bool,
    spec: &SinkSpec,
  ) -> Result<Box<dyn FrameSink>, OutputError> {
    let directory = role_output_path(&self.directory, role, multi_role);
    Ok(Box::new(FrameDirectorySink::create(directory, *spec)?))
  }
}

pub struct FrameDirectorySink {
  directory: PathBuf,
  partial: PathBuf,
  spec: SinkSpec,
  frame_counter: usize,
  finalized: bool,
}

impl FrameDirectorySink {
  pub fn create(directory: PathBuf, spec: SinkSpec) -> Result<Self, FrameDirectoryError> {
    let partial = partial_path(&directory);
    if partial.exists() {
      warn!("清理上次遗留的未完成目录: {}", partial.display());
      std::fs::remove_dir_all(&partial)?;
    }
    std::fs::create_dir_all(&partial)?;
    info!("帧目录输出: {}", partial.display());

    Ok(FrameDirectorySink {
      directory,
      partial,
      spec,
      frame_counter: 0,
      finalized: false,
    })
  }

  fn frame_path(&self) -> PathBuf {
    self
      .partial
      .join(format!("frame_{:06}.png", self.frame_counter))
  }
}

impl FrameSink for FrameDirectorySink {
  fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    let image = rgb_image(frame, &self.spec)?;

    let path = self.frame_path();
    image.save(&path).map_err(FrameDirectoryError::ImageError)?;
    debug!("写入帧 {}", path.display());
    self.frame_counter += 1;
    Ok(())
  }

  fn finalize(&mut self) -> Result<PathBuf, OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    if self.directory.exists() {
      warn!("覆盖已存在的输出目录: {}", self.directory.display());
      std::fs::remove_dir_all(&self.directory).map_err(FrameDirectoryError::IoError)?;
    }
    std::fs::rename(&self.partial, &self.directory).map_err(FrameDirectoryError::IoError)?;
    self.finalized = true;
    info!(
      "帧目录输出完成: {} 帧 -> {}",
      self.frame_counter,
      self.directory.display()
    );
    Ok(self.directory.clone())
  }
}

impl Drop for FrameDirectorySink {
  fn drop(&mut self) {
    if !self.finalized {
      warn!(
        "帧目录输出未完成, 已写入 {} 帧, 保留在 {}",
        self.frame_counter,
        self.partial.display()
      );
    }
  }
}
