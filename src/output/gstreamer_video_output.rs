// 该文件是 Lvjing（滤镜）项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出
//!
//! 通过 appsrc 把输出帧编码为视频文件。编码过程中写入 `<名称>.partial.<扩展名>`，
//! 收到 EOS 并完成封装后才改名为最终文件。
//!
//! 编码尺寸补齐到偶数（H.264 的 I420 要求），补齐部分在右侧和底部填黑，
//! 与 `video://` 输出的 ffmpeg `pad` 滤镜一致。
//!
//! ## 支持的格式
//!
//! - **MP4** (H.264)，默认
//! - **MKV** (Matroska)
//! - **WebM** (VP8)
//!
//! ## URL 格式
//!
//! `gstvideo:///output.mp4?fps=30`，省略 `fps` 时使用输入源的帧率。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameBuffer, RGB_CHANNELS},
  model::Role,
  output::{
    FrameSink, OutputError, SinkFactory, SinkSpec, canonical_bytes, ensure_parent,
    fps_from_query, partial_path, role_output_path,
  },
};

const EOS_TIMEOUT_SECONDS: u64 = 30;

#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("参数错误: {0}")]
  InvalidParameter(String),
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 调用失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsrc 元素")]
  AppSrcNotFound,
  #[error("无法转换为 appsrc 元素")]
  AppSrcConversionFailed,
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("数据流错误: {0:?}")]
  FlowError(gst::FlowError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub struct GStreamerVideoOutput {
  path: PathBuf,
  fps: Option<f64>,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gstvideo";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    let fps = fps_from_query(url).map_err(GStreamerVideoOutputError::InvalidParameter)?;
    Ok(GStreamerVideoOutput {
      path: PathBuf::from(url.path()),
      fps,
    })
  }
}

impl SinkFactory for GStreamerVideoOutput {
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
    Ok(Box::new(GStreamerVideoSink::create(path, spec)?))
  }
}

fn encoder_description(path: &Path) -> &'static str {
  match path.extension().and_then(|ext| ext.to_str()) {
    Some("mkv") => {
      "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux"
    }
    Some("webm") => "videoconvert ! vp8enc ! webmmux",
    _ => {
      "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux"
    }
  }
}

/// 帧率转为 GStreamer 分数，保留三位小数
fn fps_fraction(fps: f64) -> gst::Fraction {
  gst::Fraction::new((fps * 1000.0).round() as i32, 1000)
}

fn round_up_even(n: usize) -> usize {
  n + n % 2
}

/// appsrc 缓冲区的内存布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BufferLayout {
  width: usize,
  height: usize,
  /// 每行字节数，由 GStreamer 按 4 字节对齐
  stride: usize,
  /// 整帧字节数，包含补齐的行
  size: usize,
}

impl BufferLayout {
  /// 按补齐后的编码尺寸生成布局与对应的 caps
  fn negotiate(spec: &SinkSpec) -> Result<(Self, gst::Caps), GStreamerVideoOutputError> {
    let info = gst_video::VideoInfo::builder(
      gst_video::VideoFormat::Rgb,
      round_up_even(spec.width) as u32,
      round_up_even(spec.height) as u32,
    )
    .fps(fps_fraction(spec.fps))
    .build()?;

    let layout = BufferLayout {
      width: spec.width,
      height: spec.height,
      stride: info.stride()[0] as usize,
      size: info.size(),
    };
    Ok((layout, info.to_caps()?))
  }

  /// 把紧密排列的 RGB 行逐行复制到带步长的缓冲区，补齐部分为黑色
  fn pack(&self, data: &[u8]) -> Vec<u8> {
    let row_len = self.width * RGB_CHANNELS;
    let mut packed = vec![0u8; self.size];
    for (src, dst) in data
      .chunks_exact(row_len)
      .take(self.height)
      .zip(packed.chunks_mut(self.stride))
    {
      dst[..row_len].copy_from_slice(src);
    }
    packed
  }
}

pub struct GStreamerVideoSink {
  path: PathBuf,
  partial: PathBuf,
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  spec: SinkSpec,
  layout: BufferLayout,
  frame_count: u64,
  finalized: bool,
}

impl GStreamerVideoSink {
  pub fn create(path: PathBuf, spec: SinkSpec) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;
    ensure_parent(&path)?;

    let partial = partial_path(&path);
    let description = format!(
      "appsrc name=src ! {} ! filesink location=\"{}\"",
      encoder_description(&path),
      partial.display()
    );
    info!("创建视频输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("无法创建管道".to_string()))?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let (layout, caps) = BufferLayout::negotiate(&spec)?;
    debug!("视频输出 caps: {}, 行步长 {}", caps, layout.stride);
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!(
      "视频输出初始化完成: {}x{} @ {} fps -> {}",
      spec.width,
      spec.height,
      spec.fps,
      partial.display()
    );

    Ok(GStreamerVideoSink {
      path,
      partial,
      pipeline,
      appsrc,
      spec,
      layout,
      frame_count: 0,
      finalized: false,
    })
  }

  fn push_frame(&mut self, data: &[u8]) -> Result<(), GStreamerVideoOutputError> {
    let frame_ns = (1_000_000_000.0 / self.spec.fps) as u64;
    let mut buffer = gst::Buffer::from_slice(self.layout.pack(data));
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or_else(|| GStreamerVideoOutputError::PipelineError("缓冲区不可写".to_string()))?;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(self.frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(GStreamerVideoOutputError::FlowError)?;
    self.frame_count += 1;
    Ok(())
  }

  fn wait_for_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("管道没有消息总线".to_string()))?;
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match message.as_ref().map(|msg| msg.view()) {
      Some(gst::MessageView::Eos(_)) => Ok(()),
      Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(
        format!("{} ({:?})", err.error(), err.debug()),
      )),
      _ => Err(GStreamerVideoOutputError::PipelineError(
        "等待 EOS 超时".to_string(),
      )),
    }
  }
}

impl FrameSink for GStreamerVideoSink {
  fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    let data = canonical_bytes(frame, &self.spec)?;
    self.push_frame(data)?;
    debug!("写入视频帧 #{}", self.frame_count);
    Ok(())
  }

  fn finalize(&mut self) -> Result<PathBuf, OutputError> {
    if self.finalized {
      return Err(OutputError::AlreadyFinalized);
    }
    self
      .appsrc
      .end_of_stream()
      .map_err(GStreamerVideoOutputError::FlowError)?;
    let eos = self.wait_for_eos();
    self
      .pipeline
      .set_state(gst::State::Null)
      .map_err(GStreamerVideoOutputError::StateChangeError)?;
    eos?;

    std::fs::rename(&self.partial, &self.path).map_err(GStreamerVideoOutputError::IoError)?;
    self.finalized = true;
    info!(
      "视频输出完成: 共 {} 帧 -> {}",
      self.frame_count,
      self.path.display()
    );
    Ok(self.path.clone())
  }
}

impl Drop for GStreamerVideoSink {
  fn drop(&mut self) {
    if self.finalized {
      return;
    }
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 视频输出管道: {}", e);
    }
    warn!(
      "视频输出未完成, {} 帧保留在 {}",
      self.frame_count,
      self.partial.display()
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn odd_sizes_round_up() {
    assert_eq!(round_up_even(3), 4);
    assert_eq!(round_up_even(854), 854);
    assert_eq!(round_up_even(1), 2);
  }

  #[test]
  fn rows_are_copied_at_stride_and_padding_is_black() {
    // 3x1 帧编码为 4x2，每行 12 字节
    let layout = BufferLayout {
      width: 3,
      height: 1,
      stride: 12,
      size: 24,
    };
    let data: Vec<u8> = (1..=9).collect();
    let packed = layout.pack(&data);

    assert_eq!(packed.len(), 24);
    assert_eq!(&packed[..9], data.as_slice());
    assert!(packed[9..].iter().all(|&v| v == 0));
  }

  #[test]
  fn second_row_starts_at_stride() {
    let layout = BufferLayout {
      width: 3,
      height: 2,
      stride: 12,
      size: 24,
    };
    let data: Vec<u8> = (1..=18).collect();
    let packed = layout.pack(&data);

    assert_eq!(&packed[12..21], &data[9..18]);
    assert!(packed[9..12].iter().all(|&v| v == 0));
  }

  #[test]
  fn negotiated_stride_is_word_aligned() {
    gst::init().unwrap();
    let spec = SinkSpec {
      width: 3,
      height: 3,
      fps: 30.0,
    };
    let (layout, caps) = BufferLayout::negotiate(&spec).unwrap();

    assert_eq!(layout.stride, 12);
    assert_eq!(layout.size, 48);
    let structure = caps.structure(0).unwrap();
    assert_eq!(structure.get::<i32>("width").unwrap(), 4);
    assert_eq!(structure.get::<i32>("height").unwrap(), 4);
  }
}
