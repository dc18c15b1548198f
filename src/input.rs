// 该文件是 Lvjing（滤镜）项目的一部分。
// src/input.rs - 视频/图像输入
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

use std::time::Duration;

use thiserror::Error;

use crate::{FromUrl, frame::FrameBuffer};

/// 输入源元数据，只用于确定批处理和输出的时间参数
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceMetadata {
  pub fps: Option<f64>,
  pub duration: Option<Duration>,
  pub frame_count: Option<u64>,
}

/// 帧解码器
///
/// `Ok(None)` 表示输入结束，这不是错误。
pub trait FrameSource {
  fn next_frame(&mut self) -> Result<Option<FrameBuffer>, InputError>;
  fn metadata(&self) -> SourceMetadata;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn next_frame(&mut self) -> Result<Option<FrameBuffer>, InputError> {
    (**self).next_frame()
  }

  fn metadata(&self) -> SourceMetadata {
    (**self).metadata()
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, frame_from_image};

#[cfg(feature = "read_image_file")]
mod frame_directory;
#[cfg(feature = "read_image_file")]
pub use self::frame_directory::{FrameDirectoryInput, FrameDirectoryInputError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "read_image_file")]
  #[error("帧目录输入错误: {0}")]
  FrameDirectoryInputError(#[from] FrameDirectoryInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer 输入错误: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("帧错误: {0}")]
  Frame(#[from] crate::frame::FrameError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "read_image_file")]
  FrameDirectory(FrameDirectoryInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerInput::SCHEME {
        let input = GStreamerInput::from_url(url)?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
      if url.scheme() == FrameDirectoryInput::SCHEME {
        let input = FrameDirectoryInput::from_url(url)?;
        return Ok(InputWrapper::FrameDirectory(input));
      }
    }
    let _ = url;
    Err(InputError::SchemeMismatch)
  }
}

impl FrameSource for InputWrapper {
  fn next_frame(&mut self) -> Result<Option<FrameBuffer>, InputError> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next_frame(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::FrameDirectory(input) => input.next_frame(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next_frame(),
      #[allow(unreachable_patterns)]
      _ => Ok(None),
    }
  }

  fn metadata(&self) -> SourceMetadata {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.metadata(),
      #[cfg(feature = "read_image_file")]
      InputWrapper::FrameDirectory(input) => input.metadata(),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.metadata(),
      #[allow(unreachable_patterns)]
      _ => SourceMetadata::default(),
    }
  }
}
