// 该文件是 Lvjing（滤镜）项目的一部分。
// src/output.rs - 滤镜结果输出
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

use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;

use crate::{
  FromUrl,
  frame::{ColorLayout, FrameBuffer, PixelEncoding, Samples},
  model::Role,
};

/// 源没有给出帧率时使用的输出帧率
pub const DEFAULT_FPS: f64 = 30.0;

/// 写入端的固定参数，在收到第一批输出时确定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SinkSpec {
  pub width: usize,
  pub height: usize,
  pub fps: f64,
}

/// 视频写入端
///
/// 只接受 3 通道字节 RGB 帧，且分辨率固定为 [`SinkSpec`] 给出的值。
/// 没有调用 `finalize` 就被 drop 的写入端只会留下未完成的中间产物。
pub trait FrameSink {
  fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), OutputError>;
  /// 完成输出，返回最终产物的路径
  fn finalize(&mut self) -> Result<PathBuf, OutputError>;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn write_frame(&mut self, frame: &FrameBuffer) -> Result<(), OutputError> {
    (**self).write_frame(frame)
  }

  fn finalize(&mut self) -> Result<PathBuf, OutputError> {
    (**self).finalize()
  }
}

/// 为模型的每个输出角色创建一个写入端
pub trait SinkFactory {
  fn create_sink(
    &self,
    role: &Role,
    multi_role: bool,
    spec: &SinkSpec,
  ) -> Result<Box<dyn FrameSink>, OutputError>;
}

impl<F: SinkFactory + ?Sized> SinkFactory for &F {
  fn create_sink(
    &self,
    role: &Role,
    multi_role: bool,
    spec: &SinkSpec,
  ) -> Result<Box<dyn FrameSink>, OutputError> {
    (**self).create_sink(role, multi_role, spec)
  }
}

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput, SaveImageFileSink};

#[cfg(feature = "save_image_file")]
mod frame_directory;
#[cfg(feature = "save_image_file")]
pub use self::frame_directory::{FrameDirectoryError, FrameDirectoryOutput, FrameDirectorySink};

#[cfg(feature = "save_image_file")]
mod save_video_file;
#[cfg(feature = "save_image_file")]
pub use self::save_video_file::{SaveVideoFileError, SaveVideoFileOutput, SaveVideoFileSink};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{
  GStreamerVideoOutput, GStreamerVideoOutputError, GStreamerVideoSink,
};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "save_image_file")]
  #[error("帧目录输出错误: {0}")]
  FrameDirectoryError(#[from] FrameDirectoryError),
  #[cfg(feature = "save_image_file")]
  #[error("保存视频文件错误: {0}")]
  SaveVideoFileError(#[from] SaveVideoFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[error(
    "帧格式不符合输出要求: {width}x{height} {layout:?} {encoding:?}, 期望 {expected_width}x{expected_height} Rgb Byte255"
  )]
  NonCanonicalFrame {
    width: usize,
    height: usize,
    layout: ColorLayout,
    encoding: PixelEncoding,
    expected_width: usize,
    expected_height: usize,
  },
  #[error("输出已完成, 不能继续写入")]
  AlreadyFinalized,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 校验帧是否为写入端接受的格式，返回其字节数据
pub(crate) fn canonical_bytes<'a>(
  frame: &'a FrameBuffer,
  spec: &SinkSpec,
) -> Result<&'a [u8], OutputError> {
  match frame.samples() {
    Samples::Byte(data)
      if frame.layout() == ColorLayout::Rgb
        && frame.encoding() == PixelEncoding::Byte255
        && frame.width() == spec.width
        && frame.height() == spec.height =>
    {
      Ok(data)
    }
    _ => Err(OutputError::NonCanonicalFrame {
      width: frame.width(),
      height: frame.height(),
      layout: frame.layout(),
      encoding: frame.encoding(),
      expected_width: spec.width,
      expected_height: spec.height,
    }),
  }
}

/// 多角色模型在扩展名前插入 `-<角色>`，单角色模型直接使用基础路径
///
/// `out.mp4` -> `out-denoised.mp4`
pub fn role_output_path(base: &Path, role: &Role, multi_role: bool) -> PathBuf {
  if !multi_role {
    return base.to_path_buf();
  }
  insert_before_extension(base, &format!("-{}", role))
}

/// 未完成产物的位置：`out.mp4` -> `out.partial.mp4`，`frames` -> `frames.partial`
pub fn partial_path(path: &Path) -> PathBuf {
  insert_before_extension(path, ".partial")
}

fn insert_before_extension(path: &Path, infix: &str) -> PathBuf {
  let stem = path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or_default();
  let name = match path.extension() {
    Some(ext) => format!("{}{}.{}", stem, infix, ext.to_string_lossy()),
    None => format!("{}{}", stem, infix),
  };
  path.with_file_name(name)
}

/// 没有指定输出时的默认文件名：`video_<毫秒时间戳>.mp4`
pub fn default_output_name() -> String {
  format!("video_{}.mp4", Utc::now().timestamp_millis())
}

pub(crate) fn fps_from_query(url: &url::Url) -> Result<Option<f64>, String> {
  match url.query_pairs().find(|(k, _)| k == "fps") {
    Some((_, v)) => {
      let fps = v.parse::<f64>().map_err(|e| format!("fps={}: {}", v, e))?;
      if !(fps.is_finite() && fps > 0.0) {
        return Err(format!("fps 必须为正数: {}", fps));
      }
      Ok(Some(fps))
    }
    None => Ok(None),
  }
}

pub(crate) fn ensure_parent(path: &Path) -> std::io::Result<()> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  Ok(())
}

/// 按 URL 方案选择的输出
pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFile(SaveImageFileOutput),
  #[cfg(feature = "save_image_file")]
  FrameDirectory(FrameDirectoryOutput),
  #[cfg(feature = "save_image_file")]
  SaveVideoFile(SaveVideoFileOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideo(GStreamerVideoOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == SaveImageFileOutput::SCHEME {
        return Ok(OutputWrapper::SaveImageFile(SaveImageFileOutput::from_url(
          url,
        )?));
      }
      if url.scheme() == FrameDirectoryOutput::SCHEME {
        return Ok(OutputWrapper::FrameDirectory(
          FrameDirectoryOutput::from_url(url)?,
        ));
      }
      if url.scheme() == SaveVideoFileOutput::SCHEME {
        return Ok(OutputWrapper::SaveVideoFile(SaveVideoFileOutput::from_url(
          url,
        )?));
      }
    }
    #[cfg(feature = "gstreamer_output")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerVideoOutput::SCHEME {
        return Ok(OutputWrapper::GStreamerVideo(
          GStreamerVideoOutput::from_url(url)?,
        ));
      }
    }
    Err(OutputError::SchemeMismatch(format!(
      "不支持的输出方案 '{}'",
      url.scheme()
    )))
  }
}

impl SinkFactory for OutputWrapper {
  fn create_sink(
    &self,
    role: &Role,
    multi_role: bool,
    spec: &SinkSpec,
  ) -> Result<Box<dyn FrameSink>, OutputError> {
    let _ = (role, multi_role, spec);
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFile(output) => output.create_sink(role, multi_role, spec),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::FrameDirectory(output) => output.create_sink(role, multi_role, spec),
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveVideoFile(output) => output.create_sink(role, multi_role, spec),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideo(output) => output.create_sink(role, multi_role, spec),
      #[allow(unreachable_patterns)]
      _ => Err(OutputError::SchemeMismatch("没有可用的输出".to_string())),
    }
  }
}
