// 该文件是 Lvjing（滤镜）项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::FrameBuffer,
  model::Role,
  output::{
    FrameSink, OutputError, SinkFactory, SinkSpec, canonical_bytes, ensure_parent, partial_path,
    role_output_path,
  },
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图像输出只能写入一帧")]
  MoreThanOneFrame,
  #[error("没有写入任何帧")]
  NoFrame,
}

/// 单张图像输出，用于一次性滤镜
pub struct SaveImageFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl SinkFactory for SaveImageFileOutput {
  fn create_sink(
    &self,
    role: &Role,
    multi_role: bool,
    spec: &SinkSpec,
  ) -> Result<Box<dyn FrameSink>, OutputError> {
    let path = role_output_path(&self.path, role, multi_role);
    Ok(Box::new(SaveImageFileSink::new(path, *spec)))
  }
}

/// 先写入 `name.partial.ext`，完成时改名
pub struct SaveImageFileSink {
  path: PathBuf,
  spec: SinkSpec,
  written: bool,
  finalized: bool,
}

impl SaveImageFileSink {
  pub fn new(path: PathBuf, spec: SinkSpec) -> Self {
    Self {
      path,
      spec,
      written: false,
      finalized: false,
    }
  }
}

impl FrameSink for SaveImageFileSink {
  fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    if self.written {
      return Err(SaveImageFileError::MoreThanOneFrame.into());
    }
    let image = rgb_image(frame, &self.spec)?;

    ensure_parent(&self.path).map_err(SaveImageFileError::IoError)?;
    image
      .save(partial_path(&self.path))
      .map_err(SaveImageFileError::ImageError)?;
    self.written = true;
    Ok(())
  }

  fn finalize(&mut self) -> Result<PathBuf, OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    if !self.written {
      return Err(SaveImageFileError::NoFrame.into());
    }
    std::fs::rename(partial_path(&self.path), &self.path).map_err(SaveImageFileError::IoError)?;
    self.finalized = true;
    info!("保存图像到文件: {}", self.path.display());
    Ok(self.path.clone())
  }
}

/// 把写入端接受的帧转为 `RgbImage`
pub(crate) fn rgb_image(frame: &FrameBuffer, spec: &SinkSpec) -> Result<RgbImage, OutputError> {
  let data = canonical_bytes(frame, spec)?;
  RgbImage::from_raw(spec.width as u32, spec.height as u32, data.to_vec()).ok_or(
    OutputError::NonCanonicalFrame {
      width: frame.width(),
      height: frame.height(),
      layout: frame.layout(),
      encoding: frame.encoding(),
      expected_width: spec.width,
      expected_height: spec.height,
    },
  )
}

impl Drop for SaveImageFileSink {
  fn drop(&mut self) {
    if self.written && !self.finalized {
      warn!(
        "图像输出未完成, 保留中间文件: {}",
        partial_path(&self.path).display()
      );
    }
  }
}
