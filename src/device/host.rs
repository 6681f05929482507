// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device/host.rs - 主机内存设备
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
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use sysinfo::System;
use tracing::{debug, info, warn};

use crate::{
  device::{
    Architecture, Buffer, BufferDesc, BufferId, CommandQueue, Device, DeviceCapabilities,
    DeviceInfo, DeviceType, DeviceTypeCode, MatDesc, TensorDesc, buffer::Memory,
  },
  status::{Error, Result},
};

/// 主机内存家族的布局规则
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLayout {
  /// 分配粒度，也是张量的默认对齐
  pub alignment: usize,
  /// 图像行对齐
  pub row_alignment: usize,
}

fn round_up(value: usize, alignment: usize) -> Option<usize> {
  value.div_ceil(alignment).checked_mul(alignment)
}

/// `config[0]` 可覆盖对齐，必须是 2 的幂
fn alignment_hint(config: &[i32], default: usize) -> Result<usize> {
  match config.first() {
    Some(&hint) if hint > 0 => {
      let hint = hint as usize;
      if !hint.is_power_of_two() {
        return Err(Error::invalid(format!("对齐 {} 不是 2 的幂", hint)));
      }
      Ok(hint)
    }
    Some(&hint) if hint < 0 => Err(Error::invalid(format!("对齐 {} 为负数", hint))),
    _ => Ok(default),
  }
}

#[derive(Debug, Default)]
struct HostState {
  buffers: HashMap<BufferId, Arc<Memory>>,
  allocated: usize,
  initialized: bool,
}

impl HostState {
  fn owns(&self, buffer: &Buffer) -> bool {
    self
      .buffers
      .get(&buffer.id())
      .is_some_and(|memory| Arc::ptr_eq(memory, buffer.memory()))
  }
}

/// 内存位于主机的设备，CPU、X86、ARM 家族共用
///
/// 所有状态修改都在 `state` 锁内完成，多个流水线可以并发调用同一个设备。
#[derive(Debug)]
pub struct HostDevice {
  device_type: DeviceType,
  command_queue: Option<CommandQueue>,
  library_path: Option<PathBuf>,
  layout: HostLayout,
  memory_limit: Option<usize>,
  state: Mutex<HostState>,
}

impl HostDevice {
  fn new(
    device_type: DeviceType,
    command_queue: Option<CommandQueue>,
    library_path: Option<PathBuf>,
    layout: HostLayout,
    memory_limit: Option<usize>,
  ) -> Self {
    Self {
      device_type,
      command_queue,
      library_path,
      layout,
      memory_limit,
      state: Mutex::new(HostState::default()),
    }
  }

  pub fn layout(&self) -> HostLayout {
    self.layout
  }

  /// 当前已分配的字节数
  pub fn allocated(&self) -> Result<usize> {
    Ok(self.state.lock()?.allocated)
  }

  /// 当前存活的缓冲区数量
  pub fn live_buffers(&self) -> Result<usize> {
    Ok(self.state.lock()?.buffers.len())
  }

  fn check_owned(&self, state: &HostState, buffer: &Buffer, role: &str) -> Result<()> {
    if !state.owns(buffer) {
      return Err(Error::invalid(format!(
        "{}缓冲区已释放或不属于设备 {}",
        role, self.device_type
      )));
    }
    Ok(())
  }

  fn check_host_source(&self, buffer: &Buffer, role: &str) -> Result<()> {
    if !buffer.device_type().code.is_host() {
      return Err(Error::invalid(format!(
        "{}缓冲区必须位于主机内存，实际位于 {}",
        role,
        buffer.device_type()
      )));
    }
    if !buffer.is_valid() {
      return Err(Error::invalid(format!("{}缓冲区已释放", role)));
    }
    Ok(())
  }

  // 在校验全部通过之后才写入，失败时目标保持不变
  fn transfer(&self, src: &Buffer, dst: &Buffer) -> Result<()> {
    if src.len() != dst.len() {
      return Err(Error::SizeMismatch {
        src: src.len(),
        dst: dst.len(),
      });
    }
    if src.same_memory(dst) {
      return Ok(());
    }
    let len = src.len();
    let data = src.memory().read(|bytes| bytes[..len].to_vec())?;
    dst
      .memory()
      .write(|bytes| bytes[..len].copy_from_slice(&data))?;
    self.synchronize()
  }

  // 主机内存的拷贝是同步完成的
  fn synchronize(&self) -> Result<()> {
    Ok(())
  }
}

impl Device for HostDevice {
  fn device_type(&self) -> DeviceType {
    self.device_type
  }

  fn command_queue(&self) -> Option<CommandQueue> {
    self.command_queue
  }

  fn library_path(&self) -> Option<&Path> {
    self.library_path.as_deref()
  }

  fn mat_buffer_desc(&self, desc: &MatDesc, config: &[i32]) -> Result<BufferDesc> {
    if desc.height == 0 || desc.width == 0 || desc.channel == 0 {
      return Err(Error::invalid(format!("图像形状含有零维: {:?}", desc)));
    }
    let row_alignment = alignment_hint(config, self.layout.row_alignment)?;
    let elem = desc.data_type.size();
    let pixel = desc
      .channel
      .checked_mul(elem)
      .ok_or(Error::OutOfMemory { requested: usize::MAX })?;
    let row = desc
      .width
      .checked_mul(pixel)
      .ok_or(Error::OutOfMemory { requested: usize::MAX })?;
    let row_stride =
      round_up(row, row_alignment).ok_or(Error::OutOfMemory { requested: usize::MAX })?;
    let size = desc
      .height
      .checked_mul(row_stride)
      .ok_or(Error::OutOfMemory { requested: usize::MAX })?;
    Ok(BufferDesc {
      len: size,
      size,
      strides: vec![row_stride, pixel, elem],
      config: config.to_vec(),
    })
  }

  fn tensor_buffer_desc(&self, desc: &TensorDesc, config: &[i32]) -> Result<BufferDesc> {
    desc.validate()?;
    let alignment = alignment_hint(config, self.layout.alignment)?;
    let elem = desc.data_type.size();
    let len = desc.bytes();
    let size = round_up(len, alignment).ok_or(Error::OutOfMemory { requested: len })?;

    let mut strides = vec![0; desc.shape.len()];
    let mut stride = elem;
    for (slot, dim) in strides.iter_mut().zip(desc.shape.iter()).rev() {
      *slot = stride;
      stride = stride
        .checked_mul(*dim)
        .ok_or(Error::OutOfMemory { requested: usize::MAX })?;
    }

    Ok(BufferDesc {
      len,
      size,
      strides,
      config: config.to_vec(),
    })
  }

  fn allocate(&self, size: usize) -> Result<Buffer> {
    self.allocate_desc(&BufferDesc::from_size(size))
  }

  fn allocate_desc(&self, desc: &BufferDesc) -> Result<Buffer> {
    if desc.size < desc.len {
      return Err(Error::invalid(format!(
        "物理大小 {} 小于逻辑大小 {}",
        desc.size, desc.len
      )));
    }
    let size = round_up(desc.size, self.layout.alignment)
      .ok_or(Error::OutOfMemory { requested: desc.size })?;

    let mut state = self.state.lock()?;
    if !state.initialized {
      return Err(Error::invalid(format!("设备 {} 未初始化", self.device_type)));
    }
    if let Some(limit) = self.memory_limit
      && state.allocated.saturating_add(size) > limit
    {
      warn!(
        "设备 {} 内存不足: 已分配 {} 字节, 申请 {} 字节, 上限 {} 字节",
        self.device_type, state.allocated, size, limit
      );
      return Err(Error::OutOfMemory { requested: size });
    }

    let mut bytes = Vec::new();
    bytes
      .try_reserve_exact(size)
      .map_err(|_| Error::OutOfMemory { requested: size })?;
    bytes.resize(size, 0u8);

    let memory = Arc::new(Memory::new(bytes.into_boxed_slice()));
    let buffer = Buffer::new(
      self.device_type,
      BufferDesc {
        size,
        ..desc.clone()
      },
      memory.clone(),
    );
    state.buffers.insert(buffer.id(), memory);
    state.allocated += size;
    debug!(
      "设备 {} 分配 {:?}: {} 字节",
      self.device_type,
      buffer.id(),
      size
    );
    Ok(buffer)
  }

  fn deallocate(&self, buffer: &Buffer) -> Result<()> {
    let mut state = self.state.lock()?;
    if buffer.device_type() != self.device_type {
      return Err(Error::invalid(format!(
        "缓冲区属于 {}，不能在 {} 上释放",
        buffer.device_type(),
        self.device_type
      )));
    }
    self.check_owned(&state, buffer, "待释放")?;
    if let Some(memory) = state.buffers.remove(&buffer.id()) {
      let freed = memory.release()?.unwrap_or(0);
      state.allocated = state.allocated.saturating_sub(freed);
      debug!(
        "设备 {} 释放 {:?}: {} 字节",
        self.device_type,
        buffer.id(),
        freed
      );
    }
    Ok(())
  }

  fn copy(&self, src: &Buffer, dst: &Buffer) -> Result<()> {
    let state = self.state.lock()?;
    self.check_owned(&state, src, "源")?;
    self.check_owned(&state, dst, "目标")?;
    self.transfer(src, dst)
  }

  fn download(&self, src: &Buffer, dst: &Buffer) -> Result<()> {
    let state = self.state.lock()?;
    self.check_owned(&state, src, "源")?;
    self.check_host_source(dst, "目标")?;
    self.transfer(src, dst)
  }

  fn upload(&self, src: &Buffer, dst: &Buffer) -> Result<()> {
    let state = self.state.lock()?;
    self.check_host_source(src, "源")?;
    self.check_owned(&state, dst, "目标")?;
    self.transfer(src, dst)
  }

  fn init(&self) -> Result<()> {
    let mut state = self.state.lock()?;
    if !state.initialized {
      state.initialized = true;
      info!("设备 {} 初始化完成", self.device_type);
    }
    Ok(())
  }

  fn deinit(&self) -> Result<()> {
    let mut state = self.state.lock()?;
    let outstanding = state.buffers.len();
    for (_, memory) in state.buffers.drain() {
      memory.release()?;
    }
    if outstanding > 0 {
      warn!(
        "设备 {} 反初始化时释放了 {} 个未释放的缓冲区",
        self.device_type, outstanding
      );
    }
    state.allocated = 0;
    state.initialized = false;
    info!("设备 {} 已反初始化", self.device_type);
    Ok(())
  }
}

/// 主机内存家族的 [`Architecture`] 实现
pub struct HostArchitecture {
  code: DeviceTypeCode,
  layout: HostLayout,
  available: bool,
  device_count: i32,
  memory_limit: Option<usize>,
  devices: Mutex<HashMap<i32, Arc<HostDevice>>>,
}

impl HostArchitecture {
  pub fn new(code: DeviceTypeCode, layout: HostLayout, available: bool) -> Self {
    Self {
      code,
      layout,
      available,
      device_count: 1,
      memory_limit: None,
      devices: Mutex::new(HashMap::new()),
    }
  }

  /// 限制每个设备可分配的总字节数
  pub fn with_memory_limit(mut self, limit: usize) -> Self {
    self.memory_limit = Some(limit);
    self
  }

  pub fn layout(&self) -> HostLayout {
    self.layout
  }

  pub fn is_available(&self) -> bool {
    self.available
  }

  /// 与 [`Architecture::get_device`] 返回同一个设备，保留具体类型
  pub fn host_device(&self, device_id: i32) -> Result<Arc<HostDevice>> {
    self.check_device(device_id, None, None)?;
    let mut devices = self.devices.lock()?;
    let device = match devices.get(&device_id) {
      Some(device) => device.clone(),
      None => {
        let device = self.create_device(device_id, None, None)?;
        devices.insert(device_id, device.clone());
        device
      }
    };
    Ok(device)
  }

  fn create_device(
    &self,
    device_id: i32,
    command_queue: Option<CommandQueue>,
    library_path: Option<&Path>,
  ) -> Result<Arc<HostDevice>> {
    let device = Arc::new(HostDevice::new(
      DeviceType::new(self.code, device_id),
      command_queue,
      library_path.map(Path::to_path_buf),
      self.layout,
      self.memory_limit,
    ));
    device.init()?;
    Ok(device)
  }
}

impl Architecture for HostArchitecture {
  fn device_type_code(&self) -> DeviceTypeCode {
    self.code
  }

  fn check_device(
    &self,
    device_id: i32,
    _command_queue: Option<CommandQueue>,
    library_path: Option<&Path>,
  ) -> Result<()> {
    if !self.available {
      return Err(Error::unavailable(format!(
        "{} 后端在当前平台 ({}) 不可用",
        self.code,
        std::env::consts::ARCH
      )));
    }
    if device_id < 0 || device_id >= self.device_count {
      return Err(Error::InvalidDeviceId(format!(
        "{}:{}",
        self.code, device_id
      )));
    }
    if let Some(path) = library_path
      && !path.exists()
    {
      return Err(Error::unavailable(format!(
        "{} 后端库不存在: {}",
        self.code,
        path.display()
      )));
    }
    Ok(())
  }

  fn enable_device(
    &self,
    device_id: i32,
    command_queue: Option<CommandQueue>,
    library_path: Option<&Path>,
  ) -> Result<()> {
    self.check_device(device_id, command_queue, library_path)?;
    let mut devices = self.devices.lock()?;
    if devices.contains_key(&device_id) {
      debug!("设备 {}:{} 已启用", self.code, device_id);
      return Ok(());
    }
    let device = self.create_device(device_id, command_queue, library_path)?;
    devices.insert(device_id, device);
    info!("启用设备 {}:{}", self.code, device_id);
    Ok(())
  }

  fn get_device(&self, device_id: i32) -> Result<Arc<dyn Device>> {
    let device: Arc<dyn Device> = self.host_device(device_id)?;
    Ok(device)
  }

  fn get_device_info(&self, library_path: Option<&Path>) -> Result<Vec<DeviceInfo>> {
    if !self.available {
      return Ok(Vec::new());
    }
    if let Some(path) = library_path
      && !path.exists()
    {
      return Err(Error::unavailable(format!(
        "{} 后端库不存在: {}",
        self.code,
        path.display()
      )));
    }

    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu_all();
    let name = sys
      .cpus()
      .first()
      .map(|cpu| cpu.brand().trim().to_string())
      .filter(|brand| !brand.is_empty())
      .unwrap_or_else(|| format!("{} host", std::env::consts::ARCH));
    let memory_size = self
      .memory_limit
      .map(|limit| limit as u64)
      .unwrap_or_else(|| sys.total_memory());

    Ok(
      (0..self.device_count)
        .map(|device_id| DeviceInfo {
          device_type: DeviceType::new(self.code, device_id),
          name: name.clone(),
          memory_size,
          capabilities: DeviceCapabilities {
            host_accessible: true,
            async_queue: false,
            fp16: self.code == DeviceTypeCode::Arm,
          },
        })
        .collect(),
    )
  }

  fn shutdown(&self) -> Result<()> {
    let mut devices = self.devices.lock()?;
    let mut first_error = None;
    for (_, device) in devices.drain() {
      if let Err(e) = device.deinit() {
        warn!("设备 {} 反初始化失败: {}", device.device_type(), e);
        first_error.get_or_insert(e);
      }
    }
    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }
}
