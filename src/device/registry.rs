// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device/registry.rs - 设备注册表
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

use std::{
  collections::BTreeMap,
  path::Path,
  sync::{Arc, RwLock},
};

use tracing::{info, warn};

use crate::{
  device::{
    Architecture, CommandQueue, Device, DeviceInfo, DeviceType, DeviceTypeCode, HostArchitecture,
  },
  status::{Error, Result},
};

/// 以 [`DeviceTypeCode`] 为键的硬件家族注册表
///
/// 由应用显式创建并持有；设备在首次使用时构造，[`DeviceRegistry::shutdown`]
/// 反初始化所有设备，并先释放它们上面尚未释放的缓冲区。
#[derive(Default)]
pub struct DeviceRegistry {
  architectures: RwLock<BTreeMap<DeviceTypeCode, Arc<dyn Architecture>>>,
}

impl DeviceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册当前平台上的主机家族：CPU 总是注册，X86/ARM 按目标平台注册
  pub fn with_host_architectures() -> Self {
    let registry = Self::new();
    for arch in [
      HostArchitecture::cpu(),
      HostArchitecture::x86(),
      HostArchitecture::arm(),
    ] {
      if !arch.is_available() {
        continue;
      }
      let code = arch.device_type_code();
      if let Err(e) = registry.register(Arc::new(arch)) {
        warn!("注册 {} 家族失败: {}", code, e);
      }
    }
    registry
  }

  /// 注册一个家族，同一家族只能注册一次
  pub fn register(&self, architecture: Arc<dyn Architecture>) -> Result<()> {
    let code = architecture.device_type_code();
    let mut architectures = self.architectures.write()?;
    if architectures.contains_key(&code) {
      return Err(Error::invalid(format!("{} 家族已注册", code)));
    }
    architectures.insert(code, architecture);
    info!("注册 {} 家族", code);
    Ok(())
  }

  pub fn architecture(&self, code: DeviceTypeCode) -> Result<Arc<dyn Architecture>> {
    self
      .architectures
      .read()?
      .get(&code)
      .cloned()
      .ok_or_else(|| Error::unavailable(format!("{} 家族未注册", code)))
  }

  pub fn codes(&self) -> Result<Vec<DeviceTypeCode>> {
    Ok(self.architectures.read()?.keys().copied().collect())
  }

  pub fn check_device(
    &self,
    device_type: DeviceType,
    command_queue: Option<CommandQueue>,
    library_path: Option<&Path>,
  ) -> Result<()> {
    self
      .architecture(device_type.code)?
      .check_device(device_type.device_id, command_queue, library_path)
  }

  pub fn enable_device(
    &self,
    device_type: DeviceType,
    command_queue: Option<CommandQueue>,
    library_path: Option<&Path>,
  ) -> Result<()> {
    self
      .architecture(device_type.code)?
      .enable_device(device_type.device_id, command_queue, library_path)
  }

  pub fn get_device(&self, device_type: DeviceType) -> Result<Arc<dyn Device>> {
    self
      .architecture(device_type.code)?
      .get_device(device_type.device_id)
  }

  pub fn get_device_info(
    &self,
    code: DeviceTypeCode,
    library_path: Option<&Path>,
  ) -> Result<Vec<DeviceInfo>> {
    self.architecture(code)?.get_device_info(library_path)
  }

  /// 关闭所有家族，返回遇到的第一个错误
  pub fn shutdown(&self) -> Result<()> {
    let architectures: Vec<_> = self.architectures.read()?.values().cloned().collect();
    let mut first_error = None;
    for arch in architectures {
      if let Err(e) = arch.shutdown() {
        warn!("关闭 {} 家族失败: {}", arch.device_type_code(), e);
        first_error.get_or_insert(e);
      }
    }
    info!("设备注册表已关闭");
    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
