// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device/architecture.rs - 硬件家族抽象
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

use std::{path::Path, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
  device::{CommandQueue, Device, DeviceType, DeviceTypeCode},
  status::Result,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
  /// 主机可直接访问设备内存
  pub host_accessible: bool,
  /// 命令队列为异步
  pub async_queue: bool,
  pub fp16: bool,
}

/// 设备描述信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
  pub device_type: DeviceType,
  pub name: String,
  /// 内存大小（字节）
  pub memory_size: u64,
  pub capabilities: DeviceCapabilities,
}

/// 硬件家族
///
/// 每个 [`DeviceTypeCode`] 在注册表中只有一个实例。同一编号的设备在其
/// 生命周期内只会被构造一次，[`Architecture::get_device`] 总是返回同一个对象。
pub trait Architecture: Send + Sync {
  fn device_type_code(&self) -> DeviceTypeCode;

  /// 检查设备编号是否可用，失败时返回 `InvalidDeviceId` 或 `BackendUnavailable`
  fn check_device(
    &self,
    device_id: i32,
    command_queue: Option<CommandQueue>,
    library_path: Option<&Path>,
  ) -> Result<()>;

  /// 一次性的后端初始化，构造并初始化对应设备
  fn enable_device(
    &self,
    device_id: i32,
    command_queue: Option<CommandQueue>,
    library_path: Option<&Path>,
  ) -> Result<()>;

  /// 获取设备单例，首次调用时构造
  fn get_device(&self, device_id: i32) -> Result<Arc<dyn Device>>;

  /// 枚举物理存在的设备，与是否已启用无关
  fn get_device_info(&self, library_path: Option<&Path>) -> Result<Vec<DeviceInfo>>;

  /// 反初始化所有已构造的设备，释放其上所有未释放的缓冲区
  fn shutdown(&self) -> Result<()>;
}
