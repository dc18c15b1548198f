// 该文件是 Lvjing（滤镜）项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频解码输入
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

//! # GStreamer 视频输入
//!
//! 用 `decodebin` 解码视频文件，逐帧交给流水线。
//!
//! ## URL 格式
//!
//! - `gst://file/path/to/video.mp4` - 以原始格式（RGB 或 BGR）读取
//! - `gst://file/path/to/video.mp4?format=BGR` - 指定解码输出格式
//!
//! ## 系统依赖
//!
//! 需要 GStreamer 开发库：
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! appsink 不丢帧也不按时钟同步，解码速度由流水线的消费速度决定。

use std::time::Duration;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ColorLayout, FrameBuffer, FrameError, PixelEncoding, Samples},
  input::{FrameSource, InputError, SourceMetadata},
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 调用失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("找不到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法转换为 appsink 元素")]
  AppSinkConversionFailed,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0}")]
  UnsupportedFormat(String),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不符: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换错误: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
}

pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  metadata: SourceMetadata,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME || url.host_str() != Some("file") {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let format = url
      .query_pairs()
      .find(|(k, _)| k == "format")
      .map(|(_, v)| v.to_uppercase())
      .unwrap_or_else(|| "RGB".to_string());
    if format != "RGB" && format != "BGR" {
      return Err(GStreamerInputError::UnsupportedFormat(format));
    }

    Self::open(url.path(), &format)
  }
}

impl GStreamerInput {
  pub fn open(path: &str, format: &str) -> Result<Self, GStreamerInputError> {
    gst::init()?;

    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format={} ! \
       appsink name=sink max-buffers=4 drop=false sync=false",
      path, format
    );
    info!("GStreamer 输入管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    // 预滚到 Paused 以便读取 caps 和时长
    pipeline.set_state(gst::State::Paused)?;
    let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(10));
    result?;

    let mut metadata = SourceMetadata::default();
    if let Some(caps) = appsink.static_pad("sink").and_then(|pad| pad.current_caps())
      && let Ok(info) = gst_video::VideoInfo::from_caps(&caps)
    {
      let fps = info.fps();
      if fps.denom() != 0 && fps.numer() > 0 {
        metadata.fps = Some(fps.numer() as f64 / fps.denom() as f64);
      }
    }
    metadata.duration = pipeline
      .query_duration::<gst::ClockTime>()
      .map(|d| Duration::from_nanos(d.nseconds()));
    if let (Some(fps), Some(duration)) = (metadata.fps, metadata.duration) {
      metadata.frame_count = Some((duration.as_secs_f64() * fps).round() as u64);
    }
    debug!("视频元数据: {:?}", metadata);

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      metadata,
    })
  }

  fn check_bus(&self) -> Result<(), GStreamerInputError> {
    let Some(bus) = self.pipeline.bus() else {
      return Ok(());
    };
    while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
      if let gst::MessageView::Error(err) = msg.view() {
        return Err(GStreamerInputError::PipelineError(format!(
          "{} ({:?})",
          err.error(),
          err.debug()
        )));
      }
    }
    Ok(())
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl FrameSource for GStreamerInput {
  fn next_frame(&mut self) -> Result<Option<FrameBuffer>, InputError> {
    match self.appsink.pull_sample() {
      Ok(sample) => Ok(Some(convert_sample(sample)?)),
      Err(_) if self.appsink.is_eos() => {
        debug!("GStreamer 输入结束");
        Ok(None)
      }
      Err(e) => {
        self.check_bus()?;
        Err(GStreamerInputError::GStreamerBoolError(e).into())
      }
    }
  }

  fn metadata(&self) -> SourceMetadata {
    self.metadata
  }
}

fn convert_sample(sample: gst::Sample) -> Result<FrameBuffer, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;
  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let layout = match video_info.format() {
    gst_video::VideoFormat::Rgb => ColorLayout::Rgb,
    gst_video::VideoFormat::Bgr => ColorLayout::Bgr,
    other => return Err(GStreamerInputError::UnsupportedFormat(format!("{:?}", other))),
  };

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  if width == 0 || height == 0 {
    return Err(FrameError::ZeroSized { width, height }.into());
  }
  let row_len = width * layout.channels();
  let stride = (video_info.stride()[0] as usize).max(row_len);

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e))
  })?;
  let data = map.as_slice();

  let expected = stride * (height - 1) + row_len;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  // 行尾可能有对齐填充
  let mut samples = Vec::with_capacity(row_len * height);
  for row in data.chunks(stride).take(height) {
    samples.extend_from_slice(&row[..row_len]);
  }

  Ok(FrameBuffer::new(
    width,
    height,
    layout,
    PixelEncoding::Byte255,
    Samples::Byte(samples),
  )?)
}
