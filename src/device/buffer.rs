// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device/buffer.rs - 内存描述与缓冲区句柄
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

use std::sync::{
  Arc, RwLock,
  atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{
  device::DeviceType,
  status::{Error, Result},
};

/// 与后端无关的内存区域描述
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferDesc {
  /// 逻辑字节数
  pub len: usize,
  /// 物理字节数，包含对齐填充，不小于 `len`
  pub size: usize,
  /// 各维度的字节步长，原始字节缓冲区为空
  pub strides: Vec<usize>,
  /// 后端配置，如对齐提示
  pub config: Vec<i32>,
}

impl BufferDesc {
  pub fn from_size(size: usize) -> Self {
    Self {
      len: size,
      size,
      strides: Vec::new(),
      config: Vec::new(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u64);

impl BufferId {
  fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

/// 一块已分配的主机内存，释放后变为 `None`
#[derive(Debug)]
pub(crate) struct Memory {
  bytes: RwLock<Option<Box<[u8]>>>,
}

impl Memory {
  pub(crate) fn new(bytes: Box<[u8]>) -> Self {
    Self {
      bytes: RwLock::new(Some(bytes)),
    }
  }

  /// 释放内存，返回释放的字节数；已释放时返回 `None`
  pub(crate) fn release(&self) -> Result<Option<usize>> {
    let mut guard = self.bytes.write()?;
    Ok(guard.take().map(|bytes| bytes.len()))
  }

  pub(crate) fn is_live(&self) -> bool {
    self.bytes.read().map(|guard| guard.is_some()).unwrap_or(false)
  }

  pub(crate) fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
    let guard = self.bytes.read()?;
    let bytes = guard
      .as_deref()
      .ok_or_else(|| Error::invalid("缓冲区已释放"))?;
    Ok(f(bytes))
  }

  pub(crate) fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
    let mut guard = self.bytes.write()?;
    let bytes = guard
      .as_deref_mut()
      .ok_or_else(|| Error::invalid("缓冲区已释放"))?;
    Ok(f(bytes))
  }
}

/// 缓冲区句柄
///
/// 克隆只复制句柄，内存始终归分配它的设备所有，只能通过同一设备的
/// [`Device::deallocate`](crate::device::Device::deallocate) 释放。释放之后，
/// 所有句柄上的访问都会返回 `InvalidValue`。
#[derive(Debug, Clone)]
pub struct Buffer {
  id: BufferId,
  device_type: DeviceType,
  desc: BufferDesc,
  memory: Arc<Memory>,
}

impl Buffer {
  pub(crate) fn new(device_type: DeviceType, desc: BufferDesc, memory: Arc<Memory>) -> Self {
    Self {
      id: BufferId::next(),
      device_type,
      desc,
      memory,
    }
  }

  pub fn id(&self) -> BufferId {
    self.id
  }

  pub fn device_type(&self) -> DeviceType {
    self.device_type
  }

  pub fn desc(&self) -> &BufferDesc {
    &self.desc
  }

  /// 逻辑字节数
  pub fn len(&self) -> usize {
    self.desc.len
  }

  pub fn is_empty(&self) -> bool {
    self.desc.len == 0
  }

  /// 实际分配的字节数
  pub fn size(&self) -> usize {
    self.desc.size
  }

  pub fn is_valid(&self) -> bool {
    self.memory.is_live()
  }

  pub(crate) fn memory(&self) -> &Arc<Memory> {
    &self.memory
  }

  pub(crate) fn same_memory(&self, other: &Buffer) -> bool {
    Arc::ptr_eq(&self.memory, &other.memory)
  }

  fn check_host(&self) -> Result<()> {
    if !self.device_type.code.is_host() {
      return Err(Error::invalid(format!(
        "缓冲区位于 {}，主机无法直接访问",
        self.device_type
      )));
    }
    Ok(())
  }

  fn check_range(&self, offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
      Some(end) if end <= self.desc.size => Ok(()),
      _ => Err(Error::invalid(format!(
        "访问越界: 偏移 {} 长度 {}, 缓冲区大小 {}",
        offset, len, self.desc.size
      ))),
    }
  }

  /// 读取 `[offset, offset + len)`，仅限主机内存
  pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
    self.check_host()?;
    self.check_range(offset, len)?;
    self.memory.read(|bytes| bytes[offset..offset + len].to_vec())
  }

  /// 写入 `data` 到 `offset` 处，仅限主机内存
  pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
    self.check_host()?;
    self.check_range(offset, data.len())?;
    self
      .memory
      .write(|bytes| bytes[offset..offset + data.len()].copy_from_slice(data))
  }
}
