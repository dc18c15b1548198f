// 该文件是 Lvjing（滤镜）项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::path::Path;

use image::{DynamicImage, ImageReader};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ColorLayout, FrameBuffer, FrameError, PixelEncoding, Samples},
  input::{FrameSource, InputError, SourceMetadata},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemaMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

/// 单张图片，作为只有一帧的输入
pub struct ImageFileInput {
  frame: Option<FrameBuffer>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let image = ImageReader::open(path.as_ref())?.decode()?;
    let frame = frame_from_image(image)?;
    debug!(
      "读取图像 {}: {}x{} {:?}",
      path.as_ref().display(),
      frame.width(),
      frame.height(),
      frame.layout()
    );
    Ok(ImageFileInput { frame: Some(frame) })
  }
}

impl FrameSource for ImageFileInput {
  fn next_frame(&mut self) -> Result<Option<FrameBuffer>, InputError> {
    Ok(self.frame.take())
  }

  fn metadata(&self) -> SourceMetadata {
    SourceMetadata {
      frame_count: Some(1),
      ..SourceMetadata::default()
    }
  }
}

/// 把解码后的图像转为帧，尽量保留原始的存储格式
pub fn frame_from_image(image: DynamicImage) -> Result<FrameBuffer, FrameError> {
  let (width, height) = (image.width() as usize, image.height() as usize);
  match image {
    DynamicImage::ImageLuma8(buf) => FrameBuffer::new(
      width,
      height,
      ColorLayout::Gray,
      PixelEncoding::Byte255,
      Samples::Byte(buf.into_raw()),
    ),
    DynamicImage::ImageRgb8(buf) => FrameBuffer::rgb8(width, height, buf.into_raw()),
    DynamicImage::ImageRgba8(buf) => FrameBuffer::new(
      width,
      height,
      ColorLayout::Rgba,
      PixelEncoding::Byte255,
      Samples::Byte(buf.into_raw()),
    ),
    DynamicImage::ImageRgb32F(buf) => FrameBuffer::new(
      width,
      height,
      ColorLayout::Rgb,
      PixelEncoding::Float01,
      Samples::Float(buf.into_raw()),
    ),
    DynamicImage::ImageRgba32F(buf) => FrameBuffer::new(
      width,
      height,
      ColorLayout::Rgba,
      PixelEncoding::Float01,
      Samples::Float(buf.into_raw()),
    ),
    other => FrameBuffer::new(
      width,
      height,
      ColorLayout::Rgba,
      PixelEncoding::Byte255,
      Samples::Byte(other.to_rgba8().into_raw()),
    ),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, Luma, Rgb, RgbImage};

  #[test]
  fn gray_image_keeps_single_channel() {
    let image = GrayImage::from_pixel(3, 2, Luma([7]));
    let frame = frame_from_image(DynamicImage::ImageLuma8(image)).unwrap();
    assert_eq!(frame.layout(), ColorLayout::Gray);
    assert_eq!(frame.samples(), &Samples::Byte(vec![7; 6]));
  }

  #[test]
  fn image_input_yields_one_frame() {
    let path = std::env::temp_dir().join(format!("lvjing-input-{}.png", std::process::id()));
    RgbImage::from_pixel(4, 2, Rgb([1, 2, 3])).save(&path).unwrap();

    let mut input = ImageFileInput::open(&path).unwrap();
    let frame = input.next_frame().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (4, 2));
    assert!(input.next_frame().unwrap().is_none());

    std::fs::remove_file(&path).unwrap();
  }
}
