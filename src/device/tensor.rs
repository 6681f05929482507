// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device/tensor.rs - 张量视图
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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  device::{Buffer, DataFormat, DataType, Device},
  status::{Error, Result},
};

/// 图像形状
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatDesc {
  pub data_type: DataType,
  pub height: usize,
  pub width: usize,
  pub channel: usize,
}

/// 张量形状
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorDesc {
  pub data_type: DataType,
  pub data_format: DataFormat,
  pub shape: Vec<usize>,
}

impl TensorDesc {
  pub fn new(data_type: DataType, data_format: DataFormat, shape: Vec<usize>) -> Self {
    Self {
      data_type,
      data_format,
      shape,
    }
  }

  /// 溢出时饱和到 `usize::MAX`，[`TensorDesc::validate`] 会拒绝这样的形状
  pub fn element_count(&self) -> usize {
    self
      .shape
      .iter()
      .fold(1usize, |count, &dim| count.saturating_mul(dim))
  }

  pub fn bytes(&self) -> usize {
    self.element_count().saturating_mul(self.data_type.size())
  }

  pub fn validate(&self) -> Result<()> {
    if self.shape.len() != self.data_format.rank() {
      return Err(Error::invalid(format!(
        "形状 {:?} 与格式 {:?} 的维数不符",
        self.shape, self.data_format
      )));
    }
    if self.shape.contains(&0) {
      return Err(Error::invalid(format!("形状 {:?} 含有零维", self.shape)));
    }
    self
      .shape
      .iter()
      .try_fold(self.data_type.size(), |bytes, &dim| bytes.checked_mul(dim))
      .ok_or_else(|| Error::invalid(format!("形状 {:?} 的字节数溢出", self.shape)))?;
    Ok(())
  }
}

/// 缓冲区上带类型、形状和名字的视图，不拥有内存
///
/// 视图由 `(offset, desc.bytes())` 描述，构造时校验不超出缓冲区。
#[derive(Debug, Clone)]
pub struct Tensor {
  name: String,
  desc: TensorDesc,
  buffer: Buffer,
  offset: usize,
}

impl Tensor {
  pub fn new(name: &str, desc: TensorDesc, buffer: Buffer, offset: usize) -> Result<Self> {
    desc.validate()?;
    let end = offset
      .checked_add(desc.bytes())
      .ok_or_else(|| Error::invalid("张量视图偏移溢出"))?;
    if end > buffer.size() {
      return Err(Error::invalid(format!(
        "张量 {} 需要 {} 字节（偏移 {}），缓冲区只有 {} 字节",
        name,
        desc.bytes(),
        offset,
        buffer.size()
      )));
    }
    Ok(Self {
      name: name.to_string(),
      desc,
      buffer,
      offset,
    })
  }

  /// 在 `device` 上按其布局规则分配一个新张量
  pub fn allocate(device: &dyn Device, name: &str, desc: TensorDesc) -> Result<Self> {
    desc.validate()?;
    let buffer_desc = device.tensor_buffer_desc(&desc, &[])?;
    let buffer = device.allocate_desc(&buffer_desc)?;
    debug!(
      "为张量 {} 在 {} 上分配 {} 字节",
      name,
      device.device_type(),
      buffer.size()
    );
    Self::new(name, desc, buffer, 0)
  }

  pub fn from_f32(device: &dyn Device, name: &str, desc: TensorDesc, data: &[f32]) -> Result<Self> {
    let tensor = Self::allocate(device, name, desc)?;
    tensor.write_f32(data)?;
    Ok(tensor)
  }

  pub fn from_u8(device: &dyn Device, name: &str, desc: TensorDesc, data: &[u8]) -> Result<Self> {
    let tensor = Self::allocate(device, name, desc)?;
    tensor.write_u8(data)?;
    Ok(tensor)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn desc(&self) -> &TensorDesc {
    &self.desc
  }

  pub fn buffer(&self) -> &Buffer {
    &self.buffer
  }

  pub fn offset(&self) -> usize {
    self.offset
  }

  pub fn shape(&self) -> &[usize] {
    &self.desc.shape
  }

  pub fn data_format(&self) -> DataFormat {
    self.desc.data_format
  }

  pub fn data_type(&self) -> DataType {
    self.desc.data_type
  }

  pub fn batch(&self) -> usize {
    self.desc.shape[0]
  }

  pub fn channel(&self) -> usize {
    match self.desc.data_format {
      DataFormat::N => 1,
      DataFormat::Nc | DataFormat::Ncl | DataFormat::Nchw => self.desc.shape[1],
      DataFormat::Nlc => self.desc.shape[2],
      DataFormat::Nhwc => self.desc.shape[3],
    }
  }

  pub fn height(&self) -> usize {
    match self.desc.data_format {
      DataFormat::Nchw => self.desc.shape[2],
      DataFormat::Nhwc => self.desc.shape[1],
      _ => 1,
    }
  }

  /// 宽度；对 `Ncl`/`Nlc` 而言是序列长度
  pub fn width(&self) -> usize {
    match self.desc.data_format {
      DataFormat::N | DataFormat::Nc => 1,
      DataFormat::Ncl => self.desc.shape[2],
      DataFormat::Nlc => self.desc.shape[1],
      DataFormat::Nchw => self.desc.shape[3],
      DataFormat::Nhwc => self.desc.shape[2],
    }
  }

  pub fn is_valid(&self) -> bool {
    self.buffer.is_valid()
  }

  fn expect_type(&self, data_type: DataType) -> Result<()> {
    if self.desc.data_type != data_type {
      return Err(Error::invalid(format!(
        "张量 {} 的元素类型为 {:?}，期望 {:?}",
        self.name, self.desc.data_type, data_type
      )));
    }
    Ok(())
  }

  fn expect_len(&self, len: usize) -> Result<()> {
    if len != self.desc.element_count() {
      return Err(Error::SizeMismatch {
        src: len * self.desc.data_type.size(),
        dst: self.desc.bytes(),
      });
    }
    Ok(())
  }

  pub fn to_f32_vec(&self) -> Result<Vec<f32>> {
    self.expect_type(DataType::F32)?;
    let bytes = self.buffer.read_bytes(self.offset, self.desc.bytes())?;
    Ok(
      bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect(),
    )
  }

  pub fn write_f32(&self, data: &[f32]) -> Result<()> {
    self.expect_type(DataType::F32)?;
    self.expect_len(data.len())?;
    let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
    self.buffer.write_bytes(self.offset, &bytes)
  }

  pub fn to_u8_vec(&self) -> Result<Vec<u8>> {
    self.expect_type(DataType::U8)?;
    self.buffer.read_bytes(self.offset, self.desc.bytes())
  }

  pub fn write_u8(&self, data: &[u8]) -> Result<()> {
    self.expect_type(DataType::U8)?;
    self.expect_len(data.len())?;
    self.buffer.write_bytes(self.offset, data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    device::{DeviceType, HostArchitecture, Architecture},
    status::StatusCode,
  };

  #[test]
  fn view_must_fit_buffer() {
    let arch = HostArchitecture::cpu();
    let device = arch.get_device(0).unwrap();
    let buffer = device.allocate(64).unwrap();
    let desc = TensorDesc::new(DataType::F32, DataFormat::Nc, vec![2, 8]);

    Tensor::new("ok", desc.clone(), buffer.clone(), 0).unwrap();
    let err = Tensor::new("tail", desc, buffer, 4).unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidValue);
  }

  #[test]
  fn aliasing_views_share_memory() {
    let arch = HostArchitecture::cpu();
    let device = arch.get_device(0).unwrap();
    let buffer = device.allocate(32).unwrap();
    let whole = Tensor::new(
      "whole",
      TensorDesc::new(DataType::F32, DataFormat::Nc, vec![1, 8]),
      buffer.clone(),
      0,
    )
    .unwrap();
    let tail = Tensor::new(
      "tail",
      TensorDesc::new(DataType::F32, DataFormat::Nc, vec![1, 4]),
      buffer,
      16,
    )
    .unwrap();

    whole
      .write_f32(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0])
      .unwrap();
    assert_eq!(tail.offset(), 16);
    assert_eq!(tail.to_f32_vec().unwrap(), vec![4.0, 5.0, 6.0, 7.0]);
  }

  #[test]
  fn dims_follow_format() {
    let arch = HostArchitecture::cpu();
    let device = arch.get_device(0).unwrap();
    assert_eq!(device.device_type(), DeviceType::cpu());

    let nhwc = Tensor::allocate(
      device.as_ref(),
      "image",
      TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![2, 4, 6, 3]),
    )
    .unwrap();
    assert_eq!(
      (nhwc.batch(), nhwc.height(), nhwc.width(), nhwc.channel()),
      (2, 4, 6, 3)
    );

    let ncl = Tensor::allocate(
      device.as_ref(),
      "output",
      TensorDesc::new(DataType::F32, DataFormat::Ncl, vec![1, 84, 100]),
    )
    .unwrap();
    assert_eq!((ncl.channel(), ncl.width()), (84, 100));
  }

  #[test]
  fn rank_and_type_are_checked() {
    let arch = HostArchitecture::cpu();
    let device = arch.get_device(0).unwrap();
    let err = Tensor::allocate(
      device.as_ref(),
      "bad",
      TensorDesc::new(DataType::F32, DataFormat::Nchw, vec![1, 3, 4]),
    )
    .unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidValue);

    let tensor = Tensor::allocate(
      device.as_ref(),
      "u8",
      TensorDesc::new(DataType::U8, DataFormat::Nc, vec![1, 4]),
    )
    .unwrap();
    assert_eq!(
      tensor.to_f32_vec().unwrap_err().code(),
      StatusCode::InvalidValue
    );
    assert_eq!(
      tensor.write_u8(&[1, 2, 3]).unwrap_err().code(),
      StatusCode::SizeMismatch
    );
  }

  #[test]
  fn oversized_shape_is_rejected() {
    let desc = TensorDesc::new(DataType::F32, DataFormat::Nc, vec![usize::MAX / 2, 3]);
    assert_eq!(desc.element_count(), usize::MAX);
    assert_eq!(desc.bytes(), usize::MAX);
    assert_eq!(desc.validate().unwrap_err().code(), StatusCode::InvalidValue);

    let arch = HostArchitecture::cpu();
    let device = arch.get_device(0).unwrap();
    let err = Tensor::allocate(device.as_ref(), "huge", desc).unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidValue);
  }
}
