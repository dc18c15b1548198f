// 该文件是 Lvjing（滤镜）项目的一部分。
// src/normalize.rs - 帧格式规范化
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

//! 把任意 [`FrameBuffer`] 转成推理引擎要求的规范格式。
//!
//! 三条规则依次执行：方向 -> 通道布局 -> 数值范围。后面的规则假设前面的已经成立。
//! 无法识别的编码/存储组合直接返回 [`NormalizeError::UnsupportedFrameFormat`]，
//! 不做任何静默转换。

use thiserror::Error;
use tracing::trace;

use crate::frame::{
  ColorLayout, FrameBuffer, NormalizedFrame, Orientation, PixelEncoding, RGB_CHANNELS,
  SampleStorage, Samples,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
  #[error("不支持的帧格式: 编码 {encoding:?}, 布局 {layout:?}, 存储 {storage:?}")]
  UnsupportedFrameFormat {
    encoding: PixelEncoding,
    layout: ColorLayout,
    storage: SampleStorage,
  },
}

/// 4 通道输入的 alpha 处理方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlphaPolicy {
  /// 直接丢弃 alpha
  #[default]
  Drop,
  /// 以黑色为底合成
  Premultiply,
}

#[derive(Debug, Clone, Default)]
pub struct FormatNormalizer {
  alpha: AlphaPolicy,
}

impl FormatNormalizer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_alpha_policy(mut self, alpha: AlphaPolicy) -> Self {
    self.alpha = alpha;
    self
  }

  pub fn alpha_policy(&self) -> AlphaPolicy {
    self.alpha
  }

  /// 消耗输入帧，返回新分配的规范帧
  pub fn normalize(&self, frame: FrameBuffer) -> Result<NormalizedFrame, NormalizeError> {
    let encoding = frame.encoding();
    let layout = frame.layout();
    let storage = frame.samples().storage();
    if !storage_matches(encoding, storage) {
      return Err(NormalizeError::UnsupportedFrameFormat {
        encoding,
        layout,
        storage,
      });
    }

    // 1. 方向
    let frame = match frame.orientation() {
      Orientation::Portrait => {
        trace!("竖屏帧 {}x{}，顺时针旋转", frame.width(), frame.height());
        frame.rotated_clockwise()
      }
      Orientation::Landscape => frame,
    };
    let (width, height) = (frame.width(), frame.height());

    // 2. 通道布局
    let rgb = match frame.into_samples() {
      Samples::Byte(data) => Samples::Byte(to_rgb(&data, layout, self.alpha, |c, a| {
        ((c as u16 * a as u16 + 127) / 255) as u8
      })),
      Samples::Float(data) => {
        let alpha_scale = match encoding {
          PixelEncoding::Float255 => 1.0 / 255.0,
          _ => 1.0,
        };
        Samples::Float(to_rgb(&data, layout, self.alpha, |c, a| {
          c * a * alpha_scale
        }))
      }
    };

    // 3. 数值范围
    let data = match (encoding, rgb) {
      (PixelEncoding::Byte255, Samples::Byte(data)) => {
        data.into_iter().map(|v| v as f32 / 255.0).collect()
      }
      (PixelEncoding::Float255, Samples::Float(data)) => {
        data.into_iter().map(|v| v / 255.0).collect()
      }
      (PixelEncoding::Float01, Samples::Float(data)) => data,
      (_, rgb) => {
        return Err(NormalizeError::UnsupportedFrameFormat {
          encoding,
          layout,
          storage: rgb.storage(),
        });
      }
    };

    Ok(NormalizedFrame::from_parts(width, height, data))
  }
}

fn storage_matches(encoding: PixelEncoding, storage: SampleStorage) -> bool {
  matches!(
    (encoding, storage),
    (PixelEncoding::Byte255, SampleStorage::Byte)
      | (PixelEncoding::Float01, SampleStorage::Float)
      | (PixelEncoding::Float255, SampleStorage::Float)
  )
}

fn to_rgb<T: Copy>(
  data: &[T],
  layout: ColorLayout,
  alpha: AlphaPolicy,
  premultiply: impl Fn(T, T) -> T,
) -> Vec<T> {
  let channels = layout.channels();
  let pixels = data.len() / channels;
  let mut out = Vec::with_capacity(pixels * RGB_CHANNELS);

  for px in data.chunks_exact(channels) {
    let [r, g, b] = match layout {
      ColorLayout::Gray => [px[0], px[0], px[0]],
      ColorLayout::Rgb | ColorLayout::Rgba => [px[0], px[1], px[2]],
      ColorLayout::Bgr | ColorLayout::Bgra => [px[2], px[1], px[0]],
    };
    match (layout, alpha) {
      (ColorLayout::Rgba | ColorLayout::Bgra, AlphaPolicy::Premultiply) => {
        let a = px[3];
        out.extend_from_slice(&[premultiply(r, a), premultiply(g, a), premultiply(b, a)]);
      }
      _ => out.extend_from_slice(&[r, g, b]),
    }
  }

  out
}
