// 该文件是 Lvjing（滤镜）项目的一部分。
// tests/normalize_tests.rs - 帧格式规范化测试
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

use lvjing::{
  frame::{ColorLayout, FrameBuffer, PixelEncoding, Samples},
  normalize::{AlphaPolicy, FormatNormalizer, NormalizeError},
};

fn approx(actual: &[f32], expected: &[f32]) {
  assert_eq!(actual.len(), expected.len());
  for (a, e) in actual.iter().zip(expected) {
    assert!((a - e).abs() < 1e-6, "{:?} != {:?}", actual, expected);
  }
}

#[test]
fn byte_rgb_is_scaled_to_unit_range() {
  let frame = FrameBuffer::rgb8(2, 1, vec![0, 255, 51, 255, 0, 102]).unwrap();
  let normalized = FormatNormalizer::new().normalize(frame).unwrap();

  assert_eq!(normalized.shape(), (2, 1));
  assert_eq!(normalized.channels(), 3);
  approx(normalized.as_hwc(), &[0.0, 1.0, 0.2, 1.0, 0.0, 0.4]);
}

#[test]
fn every_supported_combination_yields_landscape_rgb_unit_floats() {
  use ColorLayout::*;
  use PixelEncoding::*;
  let cases = vec![
    FrameBuffer::new(4, 2, Gray, Byte255, Samples::Byte(vec![255; 8])),
    FrameBuffer::new(4, 2, Bgr, Byte255, Samples::Byte(vec![255; 24])),
    FrameBuffer::new(4, 2, Rgba, Byte255, Samples::Byte(vec![255; 32])),
    FrameBuffer::new(4, 2, Bgra, Float255, Samples::Float(vec![255.0; 32])),
    FrameBuffer::new(4, 2, Rgb, Float01, Samples::Float(vec![1.0; 24])),
    FrameBuffer::new(2, 4, Gray, Float01, Samples::Float(vec![1.0; 8])),
  ];

  for alpha in [AlphaPolicy::Drop, AlphaPolicy::Premultiply] {
    let normalizer = FormatNormalizer::new().with_alpha_policy(alpha);
    for frame in cases.iter().cloned() {
      let normalized = normalizer.normalize(frame.unwrap()).unwrap();
      assert_eq!(normalized.shape(), (4, 2));
      approx(normalized.as_hwc(), &[1.0; 24]);
    }
  }
}

#[test]
fn bgr_channels_are_reordered() {
  let frame = FrameBuffer::new(
    2,
    1,
    ColorLayout::Bgr,
    PixelEncoding::Float255,
    Samples::Float(vec![0.0, 0.0, 255.0, 255.0, 0.0, 0.0]),
  )
  .unwrap();
  let normalized = FormatNormalizer::new().normalize(frame).unwrap();
  approx(normalized.as_hwc(), &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn alpha_is_dropped_or_composited_on_black() {
  let frame = || {
    FrameBuffer::new(
      2,
      1,
      ColorLayout::Rgba,
      PixelEncoding::Float01,
      Samples::Float(vec![1.0, 0.5, 0.0, 0.5, 1.0, 1.0, 1.0, 0.0]),
    )
    .unwrap()
  };

  let dropped = FormatNormalizer::new().normalize(frame()).unwrap();
  approx(dropped.as_hwc(), &[1.0, 0.5, 0.0, 1.0, 1.0, 1.0]);

  let composited = FormatNormalizer::new()
    .with_alpha_policy(AlphaPolicy::Premultiply)
    .normalize(frame())
    .unwrap();
  approx(composited.as_hwc(), &[0.5, 0.25, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn portrait_frame_is_rotated_clockwise() {
  // 1x2 竖屏：上 0，下 255
  let frame = FrameBuffer::new(
    1,
    2,
    ColorLayout::Gray,
    PixelEncoding::Byte255,
    Samples::Byte(vec![0, 255]),
  )
  .unwrap();
  let normalized = FormatNormalizer::new().normalize(frame).unwrap();

  // 顺时针旋转后底部像素转到左侧
  assert_eq!(normalized.shape(), (2, 1));
  approx(normalized.as_hwc(), &[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn encoding_that_disagrees_with_storage_is_unsupported() {
  let byte_as_float = FrameBuffer::new(
    1,
    1,
    ColorLayout::Rgb,
    PixelEncoding::Byte255,
    Samples::Float(vec![1.0, 1.0, 1.0]),
  )
  .unwrap();
  let float_as_byte = FrameBuffer::new(
    1,
    1,
    ColorLayout::Rgb,
    PixelEncoding::Float01,
    Samples::Byte(vec![1, 1, 1]),
  )
  .unwrap();

  for frame in [byte_as_float, float_as_byte] {
    let err = FormatNormalizer::new().normalize(frame).unwrap_err();
    assert!(matches!(err, NormalizeError::UnsupportedFrameFormat { .. }));
  }
}
