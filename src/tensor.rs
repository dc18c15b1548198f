// 该文件是 Lvjing（滤镜）项目的一部分。
// src/tensor.rs - 张量编组
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

//! 规范帧批次与推理引擎平铺张量之间的转换。
//!
//! 布局固定为 NHWC：`index = ((b * H + row) * W + col) * C + channel`。
//! 任何转置都会得到结构合法、语义错乱的张量，所以两个方向都必须严格遵守这个顺序。

use std::fmt;

use thiserror::Error;

use crate::frame::{
  ColorLayout, FrameBatch, FrameBuffer, FrameError, PixelEncoding, Samples, unit_to_byte,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
  pub batch: usize,
  pub height: usize,
  pub width: usize,
  pub channels: usize,
}

impl TensorShape {
  pub fn new(batch: usize, height: usize, width: usize, channels: usize) -> Self {
    Self {
      batch,
      height,
      width,
      channels,
    }
  }

  /// 元素总数，溢出时返回 None
  pub fn len(&self) -> Option<usize> {
    self.frame_len()?.checked_mul(self.batch)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == Some(0)
  }

  /// 单帧元素数
  pub fn frame_len(&self) -> Option<usize> {
    self
      .height
      .checked_mul(self.width)?
      .checked_mul(self.channels)
  }

  pub fn dims(&self) -> [usize; 4] {
    [self.batch, self.height, self.width, self.channels]
  }
}

impl fmt::Display for TensorShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}, {}, {}, {}]",
      self.batch, self.height, self.width, self.channels
    )
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarshalError {
  #[error("张量形状不匹配: 形状 {shape} 需要 {expected} 个元素, 实际 {actual} 个")]
  TensorShapeMismatch {
    shape: TensorShape,
    expected: usize,
    actual: usize,
  },
  #[error("张量形状不一致: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch {
    expected: TensorShape,
    actual: TensorShape,
  },
  #[error("张量形状溢出: {0}")]
  ShapeOverflow(TensorShape),
  #[error("空批次无法编组")]
  EmptyBatch,
  #[error("不支持的输出通道数: {0}")]
  UnsupportedChannels(usize),
  #[error("帧错误: {0}")]
  Frame(#[from] FrameError),
}

/// 平铺的 f32 缓冲区加 NHWC 形状描述
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: TensorShape,
  data: Vec<f32>,
}

impl Tensor {
  pub fn new(shape: TensorShape, data: Vec<f32>) -> Result<Self, MarshalError> {
    check_len(&shape, data.len())?;
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> TensorShape {
    self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_data(self) -> Vec<f32> {
    self.data
  }

  /// 对每个元素应用函数，形状不变
  pub fn map(mut self, f: impl Fn(f32) -> f32) -> Self {
    self.data.iter_mut().for_each(|v| *v = f(*v));
    self
  }
}

fn check_len(shape: &TensorShape, actual: usize) -> Result<(), MarshalError> {
  let expected = shape.len().ok_or(MarshalError::ShapeOverflow(*shape))?;
  if expected != actual {
    return Err(MarshalError::TensorShapeMismatch {
      shape: *shape,
      expected,
      actual,
    });
  }
  Ok(())
}

/// 反编组时输出帧的数值范围
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputRange {
  /// 浮点 [0, 1]，原样输出
  Unit,
  /// 浮点 [0, 255]，乘以 255
  Float255,
  /// 字节 [0, 255]，乘以 255 后四舍五入并饱和
  #[default]
  Byte,
}

/// 把批次编组为单个张量
pub fn to_tensor(batch: &FrameBatch) -> Result<Tensor, MarshalError> {
  let (width, height) = batch.shape().ok_or(MarshalError::EmptyBatch)?;
  let first = &batch.frames()[0];
  let shape = TensorShape::new(batch.len(), height, width, first.channels());
  let total = shape.len().ok_or(MarshalError::ShapeOverflow(shape))?;

  // 规范帧本身就是 HWC 交错存放，按批次顺序拼接即满足上面的下标公式
  let mut data = Vec::with_capacity(total);
  for frame in batch.frames() {
    data.extend_from_slice(frame.as_hwc());
  }

  Tensor::new(shape, data)
}

/// 按声明的形状把张量拆回逐帧图像
///
/// 先校验长度再做任何下标访问。返回的帧都是横屏方向，方向恢复由调用方负责。
pub fn from_tensor(
  tensor: &Tensor,
  shape: &TensorShape,
  range: OutputRange,
) -> Result<Vec<FrameBuffer>, MarshalError> {
  check_len(shape, tensor.data().len())?;
  let layout = ColorLayout::from_channels(shape.channels)
    .ok_or(MarshalError::UnsupportedChannels(shape.channels))?;
  let frame_len = shape.frame_len().ok_or(MarshalError::ShapeOverflow(*shape))?;

  let mut frames = Vec::with_capacity(shape.batch);
  for b in 0..shape.batch {
    let start = b * frame_len;
    let slice = &tensor.data()[start..start + frame_len];
    let (encoding, samples) = match range {
      OutputRange::Unit => (PixelEncoding::Float01, Samples::Float(slice.to_vec())),
      OutputRange::Float255 => (
        PixelEncoding::Float255,
        Samples::Float(slice.iter().map(|v| v * 255.0).collect()),
      ),
      OutputRange::Byte => (
        PixelEncoding::Byte255,
        Samples::Byte(slice.iter().copied().map(unit_to_byte).collect()),
      ),
    };
    frames.push(FrameBuffer::new(
      shape.width,
      shape.height,
      layout,
      encoding,
      samples,
    )?);
  }

  Ok(frames)
}
