// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/runtime.rs - 进程级运行时状态
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

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
  device::{Device, DeviceRegistry, DeviceType},
  model::{
    ModelKind, PipelineArgs, PipelineRegistry,
    infer::{Inference, InferenceRegistry, InferenceType},
  },
  pipeline::Pipeline,
  status::Result,
};

/// 设备、推理引擎与流水线工厂的集合
///
/// 由应用创建并持有，退出前调用 [`Runtime::shutdown`]。
pub struct Runtime {
  devices: DeviceRegistry,
  inferences: Arc<InferenceRegistry>,
  pipelines: PipelineRegistry,
}

impl Default for Runtime {
  fn default() -> Self {
    Self::new()
  }
}

impl Runtime {
  /// 注册主机设备家族与内置模型
  pub fn new() -> Self {
    Self::with_registries(
      DeviceRegistry::with_host_architectures(),
      PipelineRegistry::with_builtin(),
    )
  }

  pub fn with_registries(devices: DeviceRegistry, pipelines: PipelineRegistry) -> Self {
    info!("创建运行时");
    Self {
      devices,
      inferences: Arc::new(InferenceRegistry::new()),
      pipelines,
    }
  }

  pub fn devices(&self) -> &DeviceRegistry {
    &self.devices
  }

  pub fn inferences(&self) -> &Arc<InferenceRegistry> {
    &self.inferences
  }

  pub fn pipelines(&self) -> &PipelineRegistry {
    &self.pipelines
  }

  pub fn register_inference<F>(&self, inference_type: InferenceType, creator: F) -> Result<()>
  where
    F: Fn() -> Result<Box<dyn Inference>> + Send + Sync + 'static,
  {
    self.inferences.register(inference_type, creator)
  }

  /// 流水线分配输出张量所用的主机设备
  ///
  /// `device_type` 属于主机家族时直接使用，否则回退到 `cpu:0`。
  pub fn host_device(&self, device_type: DeviceType) -> Result<Arc<dyn Device>> {
    if device_type.code.is_host() {
      self.devices.get_device(device_type)
    } else {
      debug!("{} 不是主机设备，流水线使用 cpu:0", device_type);
      self.devices.get_device(DeviceType::cpu())
    }
  }

  pub fn create_pipeline(&self, kind: ModelKind, args: PipelineArgs) -> Result<Pipeline> {
    self.pipelines.create(kind, self, args)
  }

  pub fn shutdown(&self) -> Result<()> {
    info!("关闭运行时");
    self.devices.shutdown()
  }
}
