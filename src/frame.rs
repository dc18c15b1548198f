// 该文件是 Lvjing（滤镜）项目的一部分。
// src/frame.rs - 帧缓冲与批次定义
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

use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

/// 每个采样值的数值编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelEncoding {
  /// 字节，取值 0-255
  Byte255,
  /// 浮点，取值 0-1
  Float01,
  /// 浮点，取值 0-255
  Float255,
}

/// 通道排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorLayout {
  Rgb,
  Rgba,
  Bgr,
  Bgra,
  Gray,
}

impl ColorLayout {
  pub fn channels(&self) -> usize {
    match self {
      ColorLayout::Gray => 1,
      ColorLayout::Rgb | ColorLayout::Bgr => 3,
      ColorLayout::Rgba | ColorLayout::Bgra => 4,
    }
  }

  pub fn from_channels(channels: usize) -> Option<Self> {
    match channels {
      1 => Some(ColorLayout::Gray),
      3 => Some(ColorLayout::Rgb),
      4 => Some(ColorLayout::Rgba),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
  Landscape,
  Portrait,
}

impl Orientation {
  /// 高度不小于宽度即视为竖屏（正方形也会被旋转）
  pub fn of(width: usize, height: usize) -> Self {
    if height >= width {
      Orientation::Portrait
    } else {
      Orientation::Landscape
    }
  }
}

/// 采样存储类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleStorage {
  Byte,
  Float,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
  Byte(Vec<u8>),
  Float(Vec<f32>),
}

impl Samples {
  pub fn len(&self) -> usize {
    match self {
      Samples::Byte(data) => data.len(),
      Samples::Float(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn storage(&self) -> SampleStorage {
    match self {
      Samples::Byte(_) => SampleStorage::Byte,
      Samples::Float(_) => SampleStorage::Float,
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FrameError {
  #[error("帧尺寸无效: {width}x{height}")]
  ZeroSized { width: usize, height: usize },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("批次已满: 容量 {capacity}")]
  BatchFull { capacity: usize },
  #[error("批次尺寸不一致: 期望 {expected:?}, 实际 {actual:?}")]
  BatchShapeMismatch {
    expected: (usize, usize),
    actual: (usize, usize),
  },
  #[error("批次容量必须大于 0")]
  ZeroCapacity,
}

/// 一帧解码后的图像
///
/// 数据按行优先、通道交错（HWC）存放，长度恒为 `width * height * channels`。
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
  width: usize,
  height: usize,
  layout: ColorLayout,
  encoding: PixelEncoding,
  samples: Samples,
}

impl FrameBuffer {
  pub fn new(
    width: usize,
    height: usize,
    layout: ColorLayout,
    encoding: PixelEncoding,
    samples: Samples,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::ZeroSized { width, height });
    }

    let expected = width
      .checked_mul(height)
      .and_then(|n| n.checked_mul(layout.channels()))
      .ok_or(FrameError::ZeroSized { width, height })?;
    if samples.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: samples.len(),
      });
    }

    Ok(Self {
      width,
      height,
      layout,
      encoding,
      samples,
    })
  }

  /// 3 通道字节帧，这是写入端接受的唯一格式
  pub fn rgb8(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
    Self::new(
      width,
      height,
      ColorLayout::Rgb,
      PixelEncoding::Byte255,
      Samples::Byte(data),
    )
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    self.layout.channels()
  }

  pub fn layout(&self) -> ColorLayout {
    self.layout
  }

  pub fn encoding(&self) -> PixelEncoding {
    self.encoding
  }

  pub fn orientation(&self) -> Orientation {
    Orientation::of(self.width, self.height)
  }

  pub fn samples(&self) -> &Samples {
    &self.samples
  }

  pub fn into_samples(self) -> Samples {
    self.samples
  }

  /// 顺时针旋转 90°，宽高互换
  pub fn rotated_clockwise(&self) -> FrameBuffer {
    let channels = self.channels();
    let samples = match &self.samples {
      Samples::Byte(data) => {
        Samples::Byte(rotate_clockwise(data, self.width, self.height, channels))
      }
      Samples::Float(data) => {
        Samples::Float(rotate_clockwise(data, self.width, self.height, channels))
      }
    };
    FrameBuffer {
      width: self.height,
      height: self.width,
      layout: self.layout,
      encoding: self.encoding,
      samples,
    }
  }

  /// 逆时针旋转 90°，是 [`FrameBuffer::rotated_clockwise`] 的逆操作
  pub fn rotated_counter_clockwise(&self) -> FrameBuffer {
    let channels = self.channels();
    let samples = match &self.samples {
      Samples::Byte(data) => Samples::Byte(rotate_counter_clockwise(
        data,
        self.width,
        self.height,
        channels,
      )),
      Samples::Float(data) => Samples::Float(rotate_counter_clockwise(
        data,
        self.width,
        self.height,
        channels,
      )),
    };
    FrameBuffer {
      width: self.height,
      height: self.width,
      layout: self.layout,
      encoding: self.encoding,
      samples,
    }
  }

  /// 把推理输出恢复到原视频的方向
  pub fn restore_orientation(self, original: Orientation) -> FrameBuffer {
    match original {
      Orientation::Landscape => self,
      Orientation::Portrait => self.rotated_counter_clockwise(),
    }
  }

  /// 灰度帧广播为 3 通道，其他布局原样返回
  pub fn into_rgb(self) -> FrameBuffer {
    if self.layout != ColorLayout::Gray {
      return self;
    }
    let samples = match self.samples {
      Samples::Byte(data) => Samples::Byte(broadcast_gray(&data)),
      Samples::Float(data) => Samples::Float(broadcast_gray(&data)),
    };
    FrameBuffer {
      layout: ColorLayout::Rgb,
      samples,
      ..self
    }
  }
}

pub(crate) fn rotate_clockwise<T: Copy>(
  data: &[T],
  width: usize,
  height: usize,
  channels: usize,
) -> Vec<T> {
  // 目标尺寸为 height x width
  let mut out = Vec::with_capacity(data.len());
  let dst_width = height;
  let dst_height = width;
  for y in 0..dst_height {
    for x in 0..dst_width {
      let src_x = y;
      let src_y = height - 1 - x;
      let src = (src_y * width + src_x) * channels;
      out.extend_from_slice(&data[src..src + channels]);
    }
  }
  out
}

pub(crate) fn rotate_counter_clockwise<T: Copy>(
  data: &[T],
  width: usize,
  height: usize,
  channels: usize,
) -> Vec<T> {
  let mut out = Vec::with_capacity(data.len());
  let dst_width = height;
  let dst_height = width;
  for y in 0..dst_height {
    for x in 0..dst_width {
      let src_x = width - 1 - y;
      let src_y = x;
      let src = (src_y * width + src_x) * channels;
      out.extend_from_slice(&data[src..src + channels]);
    }
  }
  out
}

pub(crate) fn broadcast_gray<T: Copy>(data: &[T]) -> Vec<T> {
  let mut out = Vec::with_capacity(data.len() * RGB_CHANNELS);
  for &luma in data {
    out.extend_from_slice(&[luma, luma, luma]);
  }
  out
}

/// [0, 1] 浮点到字节，四舍五入并饱和（0.5 -> 128）
pub fn unit_to_byte(value: f32) -> u8 {
  (value * 255.0).round().clamp(0.0, 255.0) as u8
}

/// 推理引擎要求的规范帧：横屏、3 通道、[0, 1] 浮点
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFrame {
  width: usize,
  height: usize,
  data: Box<[f32]>,
}

impl NormalizedFrame {
  pub(crate) fn from_parts(width: usize, height: usize, data: Vec<f32>) -> Self {
    debug_assert_eq!(data.len(), width * height * RGB_CHANNELS);
    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn shape(&self) -> (usize, usize) {
    (self.width, self.height)
  }

  pub fn as_hwc(&self) -> &[f32] {
    &self.data
  }

  pub fn into_frame_buffer(self) -> FrameBuffer {
    FrameBuffer {
      width: self.width,
      height: self.height,
      layout: ColorLayout::Rgb,
      encoding: PixelEncoding::Float01,
      samples: Samples::Float(self.data.into_vec()),
    }
  }
}

/// 一次推理调用的帧组，成员尺寸一致且数量不超过容量
#[derive(Debug, Clone)]
pub struct FrameBatch {
  capacity: usize,
  frames: Vec<NormalizedFrame>,
}

impl FrameBatch {
  pub fn with_capacity(capacity: usize) -> Result<Self, FrameError> {
    if capacity == 0 {
      return Err(FrameError::ZeroCapacity);
    }
    Ok(Self {
      capacity,
      frames: Vec::with_capacity(capacity),
    })
  }

  pub fn push(&mut self, frame: NormalizedFrame) -> Result<(), FrameError> {
    if self.frames.len() >= self.capacity {
      return Err(FrameError::BatchFull {
        capacity: self.capacity,
      });
    }
    if let Some(first) = self.frames.first()
      && first.shape() != frame.shape()
    {
      return Err(FrameError::BatchShapeMismatch {
        expected: first.shape(),
        actual: frame.shape(),
      });
    }
    self.frames.push(frame);
    Ok(())
  }

  /// 用最后一帧的副本把批次补满，返回补入的帧数
  pub fn pad_with_last(&mut self) -> usize {
    let Some(last) = self.frames.last().cloned() else {
      return 0;
    };
    let missing = self.capacity - self.frames.len();
    self.frames.extend(std::iter::repeat_n(last, missing));
    missing
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.frames.len()
  }

  pub fn is_empty(&self) -> bool {
    self.frames.is_empty()
  }

  pub fn is_full(&self) -> bool {
    self.frames.len() == self.capacity
  }

  /// 批次共享的 (宽, 高)
  pub fn shape(&self) -> Option<(usize, usize)> {
    self.frames.first().map(NormalizedFrame::shape)
  }

  pub fn frames(&self) -> &[NormalizedFrame] {
    &self.frames
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn numbered(width: usize, height: usize) -> FrameBuffer {
    let data = (0..width * height * 3).map(|v| v as u8).collect();
    FrameBuffer::rgb8(width, height, data).unwrap()
  }

  #[test]
  fn rejects_length_mismatch() {
    let result = FrameBuffer::rgb8(2, 2, vec![0; 11]);
    assert_eq!(
      result,
      Err(FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      })
    );
  }

  #[test]
  fn rejects_zero_sized() {
    assert!(matches!(
      FrameBuffer::rgb8(0, 4, vec![]),
      Err(FrameError::ZeroSized { .. })
    ));
  }

  #[test]
  fn clockwise_moves_top_left_to_top_right() {
    // 2 宽 3 高，每像素一个灰度值
    let frame = FrameBuffer::new(
      2,
      3,
      ColorLayout::Gray,
      PixelEncoding::Byte255,
      Samples::Byte(vec![1, 2, 3, 4, 5, 6]),
    )
    .unwrap();
    let rotated = frame.rotated_clockwise();
    assert_eq!((rotated.width(), rotated.height()), (3, 2));
    assert_eq!(rotated.samples(), &Samples::Byte(vec![5, 3, 1, 6, 4, 2]));
  }

  #[test]
  fn rotation_is_self_inverse() {
    let frame = numbered(3, 5);
    let restored = frame.rotated_clockwise().rotated_counter_clockwise();
    assert_eq!(restored, frame);

    let square = numbered(4, 4);
    assert_eq!(square.rotated_clockwise().rotated_counter_clockwise(), square);
  }

  #[test]
  fn restore_keeps_landscape() {
    let frame = numbered(5, 3);
    assert_eq!(frame.clone().restore_orientation(Orientation::Landscape), frame);
  }

  #[test]
  fn square_counts_as_portrait() {
    assert_eq!(Orientation::of(4, 4), Orientation::Portrait);
    assert_eq!(Orientation::of(5, 4), Orientation::Landscape);
  }

  #[test]
  fn unit_to_byte_rounds_half_up_and_saturates() {
    assert_eq!(unit_to_byte(0.5), 128);
    assert_eq!(unit_to_byte(1.0), 255);
    assert_eq!(unit_to_byte(1.7), 255);
    assert_eq!(unit_to_byte(-0.2), 0);
  }

  #[test]
  fn batch_enforces_capacity_and_shape() {
    let mut batch = FrameBatch::with_capacity(2).unwrap();
    batch
      .push(NormalizedFrame::from_parts(2, 1, vec![0.0; 6]))
      .unwrap();
    assert!(matches!(
      batch.push(NormalizedFrame::from_parts(1, 2, vec![0.0; 6])),
      Err(FrameError::BatchShapeMismatch { .. })
    ));
    batch
      .push(NormalizedFrame::from_parts(2, 1, vec![1.0; 6]))
      .unwrap();
    assert!(matches!(
      batch.push(NormalizedFrame::from_parts(2, 1, vec![0.0; 6])),
      Err(FrameError::BatchFull { capacity: 2 })
    ));
  }

  #[test]
  fn pad_duplicates_last_frame() {
    let mut batch = FrameBatch::with_capacity(4).unwrap();
    batch
      .push(NormalizedFrame::from_parts(1, 1, vec![0.1, 0.2, 0.3]))
      .unwrap();
    batch
      .push(NormalizedFrame::from_parts(1, 1, vec![0.4, 0.5, 0.6]))
      .unwrap();
    assert_eq!(batch.pad_with_last(), 2);
    assert!(batch.is_full());
    assert_eq!(batch.frames()[3].as_hwc(), &[0.4, 0.5, 0.6]);
  }
}
