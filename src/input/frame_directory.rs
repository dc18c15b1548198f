// 该文件是 Lvjing（滤镜）项目的一部分。
// src/input/frame_directory.rs - 图像序列目录输入
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

//! 把一个目录中的图像按文件名排序，当作视频帧序列读取。
//!
//! `folder:///path/to/frames?fps=30`

use std::{
  collections::VecDeque,
  path::{Path, PathBuf},
  time::Duration,
};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameBuffer, FrameError},
  input::{FrameSource, InputError, SourceMetadata, frame_from_image},
};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Error, Debug)]
pub enum FrameDirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数错误: {0}")]
  InvalidParameter(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误 {path}: {source}")]
  ImageError {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

pub struct FrameDirectoryInput {
  pending: VecDeque<PathBuf>,
  total: usize,
  fps: Option<f64>,
}

impl FromUrlWithScheme for FrameDirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for FrameDirectoryInput {
  type Error = FrameDirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(FrameDirectoryInputError::SchemeMismatch);
    }

    let fps = match url.query_pairs().find(|(k, _)| k == "fps") {
      Some((_, v)) => {
        let fps = v
          .parse::<f64>()
          .map_err(|e| FrameDirectoryInputError::InvalidParameter(format!("fps={}: {}", v, e)))?;
        if !(fps.is_finite() && fps > 0.0) {
          return Err(FrameDirectoryInputError::InvalidParameter(format!(
            "fps 必须为正数: {}",
            fps
          )));
        }
        Some(fps)
      }
      None => None,
    };

    let mut input = Self::open(url.path())?;
    input.fps = fps;
    Ok(input)
  }
}

impl FrameDirectoryInput {
  pub fn open(directory: impl AsRef<Path>) -> Result<Self, FrameDirectoryInputError> {
    let mut files = std::fs::read_dir(directory.as_ref())?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image(path))
      .collect::<Vec<_>>();
    files.sort();

    info!(
      "图像序列目录 {}: {} 帧",
      directory.as_ref().display(),
      files.len()
    );

    Ok(FrameDirectoryInput {
      total: files.len(),
      pending: files.into(),
      fps: None,
    })
  }

  pub fn with_fps(mut self, fps: f64) -> Self {
    self.fps = Some(fps);
    self
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .is_some_and(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
}

impl FrameSource for FrameDirectoryInput {
  fn next_frame(&mut self) -> Result<Option<FrameBuffer>, InputError> {
    let Some(path) = self.pending.pop_front() else {
      return Ok(None);
    };

    debug!("读取帧 {}", path.display());
    let image = ImageReader::open(&path)
      .map_err(FrameDirectoryInputError::IoError)?
      .decode()
      .map_err(|source| FrameDirectoryInputError::ImageError {
        path: path.clone(),
        source,
      })?;
    let frame = frame_from_image(image).map_err(FrameDirectoryInputError::FrameError)?;
    Ok(Some(frame))
  }

  fn metadata(&self) -> SourceMetadata {
    let duration = self
      .fps
      .map(|fps| Duration::from_secs_f64(self.total as f64 / fps));
    SourceMetadata {
      fps: self.fps,
      duration,
      frame_count: Some(self.total as u64),
    }
  }
}
