// 该文件是 Lvjing（滤镜）项目的一部分。
// tests/live_tests.rs - 实时滤镜测试
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
  live::LiveFilter,
  model::{EchoModel, Role},
  pipeline::{ErrorKind, PipelineError},
};

#[test]
fn each_frame_keeps_its_own_orientation() {
  let mut filter = LiveFilter::new(EchoModel::default()).unwrap();

  let landscape = FrameBuffer::rgb8(3, 2, (0..18).collect()).unwrap();
  let portrait = FrameBuffer::rgb8(2, 3, (100..118).collect()).unwrap();

  let out = filter.filter_frame(landscape.clone()).unwrap();
  assert_eq!(out, vec![(Role::new("filtered"), landscape)]);

  let out = filter.filter_frame(portrait.clone()).unwrap();
  assert_eq!(out, vec![(Role::new("filtered"), portrait)]);

  assert_eq!(filter.frames(), 2);
}

#[test]
fn every_role_is_returned_in_model_order() {
  let model = EchoModel::default()
    .with_roles(vec![Role::new("denoised"), Role::new("segmented")])
    .with_scale(0.5);
  let mut filter = LiveFilter::new(model).unwrap();
  assert_eq!(filter.roles().len(), 2);

  let frame = FrameBuffer::new(
    2,
    2,
    ColorLayout::Gray,
    PixelEncoding::Byte255,
    Samples::Byte(vec![255; 4]),
  )
  .unwrap();
  let out = filter.filter_frame(frame).unwrap();

  let roles: Vec<&str> = out.iter().map(|(role, _)| role.as_str()).collect();
  assert_eq!(roles, vec!["denoised", "segmented"]);
  for (_, frame) in out {
    assert_eq!(frame.layout(), ColorLayout::Rgb);
    assert_eq!(frame.samples(), &Samples::Byte(vec![128; 12]));
  }
}

#[test]
fn unsupported_frame_does_not_count() {
  let mut filter = LiveFilter::new(EchoModel::default()).unwrap();
  let frame = FrameBuffer::new(
    1,
    1,
    ColorLayout::Rgb,
    PixelEncoding::Byte255,
    Samples::Float(vec![0.0; 3]),
  )
  .unwrap();

  let err = filter.filter_frame(frame).unwrap_err();
  assert!(matches!(err, PipelineError::UnsupportedFrameFormat { index: 0, .. }));
  assert_eq!(filter.frames(), 0);
}

#[test]
fn model_without_roles_is_unavailable() {
  let err = LiveFilter::new(EchoModel::default().with_roles(Vec::new()))
    .err()
    .unwrap();
  assert_eq!(err.kind(), ErrorKind::InferenceUnavailable);
}
