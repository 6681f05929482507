// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/pipeline/packet.rs - 流水线数据槽
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

use std::sync::RwLock;

use crate::{
  device::Tensor,
  model::detect::DetectResult,
  status::{Error, Result},
};

/// 数据槽中的负载，同一时刻只有一种
#[derive(Debug, Clone, Default)]
pub enum Payload {
  #[default]
  Empty,
  Tensor(Tensor),
  Detect(DetectResult),
}

impl Payload {
  fn kind(&self) -> &'static str {
    match self {
      Payload::Empty => "空",
      Payload::Tensor(_) => "张量",
      Payload::Detect(_) => "检测结果",
    }
  }
}

/// 流水线图中带名字的边
#[derive(Debug)]
pub struct Packet {
  name: String,
  payload: RwLock<Payload>,
}

impl Packet {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      payload: RwLock::new(Payload::Empty),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(matches!(*self.payload.read()?, Payload::Empty))
  }

  pub fn payload(&self) -> Result<Payload> {
    Ok(self.payload.read()?.clone())
  }

  pub fn set_payload(&self, payload: Payload) -> Result<()> {
    *self.payload.write()? = payload;
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    self.set_payload(Payload::Empty)
  }

  /// 取出张量句柄，不复制数据
  pub fn tensor(&self) -> Result<Tensor> {
    match &*self.payload.read()? {
      Payload::Tensor(tensor) => Ok(tensor.clone()),
      other => Err(Error::invalid(format!(
        "数据槽 {} 中是{}，期望张量",
        self.name,
        other.kind()
      ))),
    }
  }

  /// 取出张量句柄，没有张量时返回 `None`
  pub fn try_tensor(&self) -> Result<Option<Tensor>> {
    match &*self.payload.read()? {
      Payload::Tensor(tensor) => Ok(Some(tensor.clone())),
      _ => Ok(None),
    }
  }

  pub fn set_tensor(&self, tensor: Tensor) -> Result<()> {
    self.set_payload(Payload::Tensor(tensor))
  }

  pub fn detect_result(&self) -> Result<DetectResult> {
    match &*self.payload.read()? {
      Payload::Detect(result) => Ok(result.clone()),
      other => Err(Error::invalid(format!(
        "数据槽 {} 中是{}，期望检测结果",
        self.name,
        other.kind()
      ))),
    }
  }

  pub fn set_detect_result(&self, result: DetectResult) -> Result<()> {
    self.set_payload(Payload::Detect(result))
  }
}
