// 该文件是 Lvjing（滤镜）项目的一部分。
// tests/output_tests.rs - 文件输出测试
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

#![cfg(all(feature = "save_image_file", feature = "read_image_file"))]

mod common;

use std::path::{Path, PathBuf};

use lvjing::{
  FromUrl,
  frame::FrameBuffer,
  input::{FrameDirectoryInput, FrameSource},
  model::{EchoModel, Role},
  output::{
    FrameDirectoryOutput, FrameSink, OutputError, OutputWrapper, SaveImageFileSink, SinkFactory,
    SinkSpec, partial_path,
  },
  pipeline::{BatchPipeline, CancelToken, ErrorKind, PipelineConfig},
};
use url::Url;

use common::{StubLoader, VecSource, numbered_frames};

fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("lvjing_{}_{}", name, std::process::id()));
  let _ = std::fs::remove_dir_all(&dir);
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

fn png_count(dir: &Path) -> usize {
  std::fs::read_dir(dir)
    .unwrap()
    .filter_map(|e| e.ok())
    .filter(|e| e.path().extension().is_some_and(|ext| ext == "png"))
    .count()
}

#[test]
fn folder_output_is_renamed_on_finalize() {
  let dir = scratch_dir("folder_finalize");
  let target = dir.join("frames");
  let factory = FrameDirectoryOutput::new(&target);
  let mut source = VecSource::new(numbered_frames(5, 4, 2));

  let report = BatchPipeline::new(EchoModel::default(), PipelineConfig::default())
    .run(&mut source, &factory)
    .unwrap();

  assert_eq!(report.artifacts.len(), 1);
  assert_eq!(report.artifacts[0].path, target);
  assert_eq!(png_count(&target), 5);
  assert!(!partial_path(&target).exists());

  // 写出的帧可以再次作为输入读回
  let mut input = FrameDirectoryInput::open(&target).unwrap();
  assert_eq!(input.metadata().frame_count, Some(5));
  let mut values = Vec::new();
  while let Some(frame) = input.next_frame().unwrap() {
    assert_eq!((frame.width(), frame.height()), (4, 2));
    values.push(common::bytes(&frame)[0]);
  }
  assert_eq!(values, vec![0, 1, 2, 3, 4]);

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn cancelled_run_leaves_only_partial_output() {
  let dir = scratch_dir("folder_cancel");
  let target = dir.join("frames");
  let factory = FrameDirectoryOutput::new(&target);
  let token = CancelToken::new();
  let loader = StubLoader {
    cancel_on: Some((1, token.clone())),
    ..StubLoader::default()
  };
  let mut source = VecSource::new(numbered_frames(6, 4, 2));

  let failure = BatchPipeline::new(loader, PipelineConfig::default().with_batch_size(2))
    .with_cancel_token(token)
    .run(&mut source, &factory)
    .unwrap_err();

  assert_eq!(failure.kind(), ErrorKind::Cancelled);
  assert!(!target.exists());
  assert_eq!(png_count(&partial_path(&target)), 2);

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn multi_role_folders_are_suffixed() {
  let dir = scratch_dir("folder_roles");
  let url = Url::parse(&format!("folder://{}", dir.join("out").display())).unwrap();
  let factory = OutputWrapper::from_url(&url).unwrap();
  let model = EchoModel::default().with_roles(vec![Role::new("denoised"), Role::new("segmented")]);
  let mut source = VecSource::new(numbered_frames(3, 4, 2));

  BatchPipeline::new(model, PipelineConfig::default())
    .run(&mut source, &factory)
    .unwrap();

  assert_eq!(png_count(&dir.join("out-denoised")), 3);
  assert_eq!(png_count(&dir.join("out-segmented")), 3);

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn image_sink_writes_partial_until_finalized() {
  let dir = scratch_dir("image_sink");
  let path = dir.join("still.png");
  let spec = SinkSpec {
    width: 4,
    height: 2,
    fps: 30.0,
  };
  let mut sink = SaveImageFileSink::new(path.clone(), spec);

  sink
    .write_frame(&FrameBuffer::rgb8(4, 2, vec![7; 24]).unwrap())
    .unwrap();
  assert!(partial_path(&path).exists());
  assert!(!path.exists());

  assert_eq!(sink.finalize().unwrap(), path);
  assert!(path.exists());
  assert!(!partial_path(&path).exists());
  assert!(matches!(
    sink.write_frame(&FrameBuffer::rgb8(4, 2, vec![7; 24]).unwrap()),
    Err(OutputError::AlreadyFinalized)
  ));

  std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn sink_rejects_frames_of_another_size() {
  let dir = scratch_dir("folder_size");
  let factory = FrameDirectoryOutput::new(dir.join("frames"));
  let spec = SinkSpec {
    width: 4,
    height: 2,
    fps: 30.0,
  };
  let mut sink = factory
    .create_sink(&Role::new("filtered"), false, &spec)
    .unwrap();

  let err = sink
    .write_frame(&FrameBuffer::rgb8(2, 4, vec![0; 24]).unwrap())
    .unwrap_err();
  assert!(matches!(err, OutputError::NonCanonicalFrame { .. }));

  drop(sink);
  std::fs::remove_dir_all(&dir).unwrap();
}
