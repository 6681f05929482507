// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device.rs - 设备抽象
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

use std::{fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::status::{Error, Result};

mod architecture;
mod arm;
mod buffer;
mod cpu;
mod host;
mod registry;
mod tensor;

pub use self::architecture::{Architecture, DeviceCapabilities, DeviceInfo};
pub use self::buffer::{Buffer, BufferDesc, BufferId};
pub use self::host::{HostArchitecture, HostDevice, HostLayout};
pub use self::registry::DeviceRegistry;
pub use self::tensor::{MatDesc, Tensor, TensorDesc};

/// 硬件家族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceTypeCode {
  Cpu,
  X86,
  Arm,
  Cuda,
  OpenCl,
  Npu,
}

impl DeviceTypeCode {
  pub const ALL: [DeviceTypeCode; 6] = [
    DeviceTypeCode::Cpu,
    DeviceTypeCode::X86,
    DeviceTypeCode::Arm,
    DeviceTypeCode::Cuda,
    DeviceTypeCode::OpenCl,
    DeviceTypeCode::Npu,
  ];

  /// 该家族的内存是否可以被主机直接访问
  pub fn is_host(&self) -> bool {
    matches!(
      self,
      DeviceTypeCode::Cpu | DeviceTypeCode::X86 | DeviceTypeCode::Arm
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      DeviceTypeCode::Cpu => "cpu",
      DeviceTypeCode::X86 => "x86",
      DeviceTypeCode::Arm => "arm",
      DeviceTypeCode::Cuda => "cuda",
      DeviceTypeCode::OpenCl => "opencl",
      DeviceTypeCode::Npu => "npu",
    }
  }
}

impl fmt::Display for DeviceTypeCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DeviceTypeCode {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    DeviceTypeCode::ALL
      .into_iter()
      .find(|code| code.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| Error::invalid(format!("未知的设备家族: {}", s)))
  }
}

/// 设备类型：家族 + 编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceType {
  pub code: DeviceTypeCode,
  pub device_id: i32,
}

impl DeviceType {
  pub fn new(code: DeviceTypeCode, device_id: i32) -> Self {
    Self { code, device_id }
  }

  pub fn cpu() -> Self {
    Self::new(DeviceTypeCode::Cpu, 0)
  }
}

impl Default for DeviceType {
  fn default() -> Self {
    Self::cpu()
  }
}

impl fmt::Display for DeviceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.code, self.device_id)
  }
}

impl FromStr for DeviceType {
  type Err = Error;

  // 格式为 "<家族>[:<编号>]"
  fn from_str(s: &str) -> Result<Self> {
    let (code, id) = match s.split_once(':') {
      Some((code, id)) => {
        let id = id
          .trim()
          .parse::<i32>()
          .map_err(|_| Error::invalid(format!("设备编号无法解析: {}", s)))?;
        (code, id)
      }
      None => (s, 0),
    };
    Ok(Self::new(code.trim().parse()?, id))
  }
}

/// 元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
  U8,
  I8,
  I32,
  F16,
  F32,
}

impl DataType {
  pub fn size(&self) -> usize {
    match self {
      DataType::U8 | DataType::I8 => 1,
      DataType::F16 => 2,
      DataType::I32 | DataType::F32 => 4,
    }
  }
}

/// 张量维度顺序
///
/// `Ncl` 为 `[batch, channel, length]`，`Nlc` 为 `[batch, length, channel]`；
/// 检测模型的输出中 length 对应锚框，channel 对应特征。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
  N,
  Nc,
  Ncl,
  Nlc,
  Nchw,
  Nhwc,
}

impl DataFormat {
  pub fn rank(&self) -> usize {
    match self {
      DataFormat::N => 1,
      DataFormat::Nc => 2,
      DataFormat::Ncl | DataFormat::Nlc => 3,
      DataFormat::Nchw | DataFormat::Nhwc => 4,
    }
  }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelType {
  Gray,
  Rgb,
  Bgr,
  Rgba,
  Bgra,
}

impl PixelType {
  pub fn channels(&self) -> usize {
    match self {
      PixelType::Gray => 1,
      PixelType::Rgb | PixelType::Bgr => 3,
      PixelType::Rgba | PixelType::Bgra => 4,
    }
  }

  /// 红、绿、蓝三个通道在像素中的下标
  pub fn rgb_indices(&self) -> Option<[usize; 3]> {
    match self {
      PixelType::Gray => None,
      PixelType::Rgb | PixelType::Rgba => Some([0, 1, 2]),
      PixelType::Bgr | PixelType::Bgra => Some([2, 1, 0]),
    }
  }
}

/// 不透明的命令队列句柄，同步后端为 `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandQueue(pub u64);

/// 单个硬件执行上下文
///
/// 由所属 [`Architecture`] 创建并持有，所有 [`Buffer`] 只对分配它的设备有效。
/// `copy`/`upload`/`download` 在返回前必须保证数据对目标可见。
pub trait Device: Send + Sync + fmt::Debug {
  fn device_type(&self) -> DeviceType;
  fn command_queue(&self) -> Option<CommandQueue>;
  fn library_path(&self) -> Option<&Path>;

  /// 图像形状到物理布局的转换
  fn mat_buffer_desc(&self, desc: &MatDesc, config: &[i32]) -> Result<BufferDesc>;
  /// 张量形状到物理布局的转换
  fn tensor_buffer_desc(&self, desc: &TensorDesc, config: &[i32]) -> Result<BufferDesc>;

  fn allocate(&self, size: usize) -> Result<Buffer>;
  fn allocate_desc(&self, desc: &BufferDesc) -> Result<Buffer>;
  fn deallocate(&self, buffer: &Buffer) -> Result<()>;

  /// 设备内拷贝
  fn copy(&self, src: &Buffer, dst: &Buffer) -> Result<()>;
  /// 设备到主机
  fn download(&self, src: &Buffer, dst: &Buffer) -> Result<()>;
  /// 主机到设备
  fn upload(&self, src: &Buffer, dst: &Buffer) -> Result<()>;

  fn init(&self) -> Result<()>;
  fn deinit(&self) -> Result<()>;
}
