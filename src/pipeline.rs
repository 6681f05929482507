// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/pipeline.rs - 推理流水线
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

use std::{sync::Arc, time::Instant};

use tracing::{debug, info, warn};

use crate::{
  device::Device,
  model::infer::{Infer, InferParam, InferenceRegistry, InferenceType},
  status::{Error, ErrorContext, Result},
  task::{Task, TaskIo, TaskKind},
};

mod packet;
pub use self::packet::{Packet, Payload};

/// 有序的阶段与连接它们的数据槽
///
/// 阶段按创建顺序执行，不根据数据槽推导依赖关系。
pub struct Pipeline {
  io: TaskIo,
  device: Arc<dyn Device>,
  packets: Vec<Arc<Packet>>,
  tasks: Vec<Box<dyn Task>>,
  initialized: bool,
}

impl Pipeline {
  /// `device` 为阶段分配输出张量所用的设备
  pub fn new(name: &str, device: Arc<dyn Device>, input: Arc<Packet>, output: Arc<Packet>) -> Self {
    info!("创建流水线 {}", name);
    Self {
      io: TaskIo::single(name, input, output),
      device,
      packets: Vec::new(),
      tasks: Vec::new(),
      initialized: false,
    }
  }

  pub fn device(&self) -> &Arc<dyn Device> {
    &self.device
  }

  pub fn input(&self) -> &Arc<Packet> {
    &self.io.inputs()[0]
  }

  pub fn output(&self) -> &Arc<Packet> {
    &self.io.outputs()[0]
  }

  /// 内部数据槽，按创建顺序
  pub fn packets(&self) -> &[Arc<Packet>] {
    &self.packets
  }

  pub fn tasks(&self) -> impl Iterator<Item = &dyn Task> {
    self.tasks.iter().map(|task| task.as_ref())
  }

  pub fn task(&self, name: &str) -> Option<&dyn Task> {
    self.tasks().find(|task| task.name() == name)
  }

  fn all_packets(&self) -> impl Iterator<Item = &Arc<Packet>> {
    self
      .io
      .inputs()
      .iter()
      .chain(self.io.outputs())
      .chain(self.packets.iter())
  }

  fn owns_packet(&self, packet: &Arc<Packet>) -> bool {
    self.all_packets().any(|own| Arc::ptr_eq(own, packet))
  }

  pub fn create_packet(&mut self, name: &str) -> Result<Arc<Packet>> {
    if self.all_packets().any(|packet| packet.name() == name) {
      return Err(Error::invalid(format!(
        "流水线 {} 中已存在数据槽 {}",
        self.io.name(),
        name
      )));
    }
    let packet = Arc::new(Packet::new(name));
    self.packets.push(packet.clone());
    debug!("流水线 {} 创建数据槽 {}", self.io.name(), name);
    Ok(packet)
  }

  /// 加入一个阶段，检查名字唯一以及数据槽属于本流水线
  pub fn add_task(&mut self, task: Box<dyn Task>) -> Result<()> {
    if self.task(task.name()).is_some() {
      return Err(Error::invalid(format!(
        "流水线 {} 中已存在阶段 {}",
        self.io.name(),
        task.name()
      )));
    }
    if let Some(foreign) = task
      .inputs()
      .iter()
      .chain(task.outputs())
      .find(|packet| !self.owns_packet(packet))
    {
      return Err(Error::invalid(format!(
        "数据槽 {} 不属于流水线 {}",
        foreign.name(),
        self.io.name()
      )));
    }
    debug!("流水线 {} 加入阶段 {}", self.io.name(), task.name());
    self.tasks.push(task);
    Ok(())
  }

  pub fn create_task<T: TaskKind + 'static>(
    &mut self,
    name: &str,
    input: &Arc<Packet>,
    output: &Arc<Packet>,
    param: T::Param,
  ) -> Result<()> {
    self.create_task_with::<T>(name, vec![input.clone()], vec![output.clone()], param)
  }

  pub fn create_task_with<T: TaskKind + 'static>(
    &mut self,
    name: &str,
    inputs: Vec<Arc<Packet>>,
    outputs: Vec<Arc<Packet>>,
    param: T::Param,
  ) -> Result<()> {
    let task = T::construct(name, inputs, outputs, param, self.device.clone())?;
    self.add_task(Box::new(task))
  }

  pub fn create_infer(
    &mut self,
    name: &str,
    inference_type: InferenceType,
    input: &Arc<Packet>,
    output: &Arc<Packet>,
    param: InferParam,
    inferences: Arc<InferenceRegistry>,
  ) -> Result<()> {
    let param = InferParam {
      inference_type,
      ..param
    };
    let infer = Infer::new(
      name,
      vec![input.clone()],
      vec![output.clone()],
      param,
      inferences,
    )?;
    self.add_task(Box::new(infer))
  }
}

impl Task for Pipeline {
  fn name(&self) -> &str {
    self.io.name()
  }

  fn inputs(&self) -> &[Arc<Packet>] {
    self.io.inputs()
  }

  fn outputs(&self) -> &[Arc<Packet>] {
    self.io.outputs()
  }

  fn init(&mut self) -> Result<()> {
    if self.initialized {
      return Ok(());
    }
    for task in self.tasks.iter_mut() {
      let result = task.init();
      result.context(format!("初始化阶段 {}", task.name()))?;
    }
    self.initialized = true;
    info!("流水线 {} 初始化完成", self.io.name());
    Ok(())
  }

  fn deinit(&mut self) -> Result<()> {
    let mut first_error = None;
    for task in self.tasks.iter_mut().rev() {
      if let Err(e) = task.deinit() {
        warn!("阶段 {} 反初始化失败: {}", task.name(), e);
        first_error.get_or_insert(e);
      }
    }
    self.initialized = false;
    match first_error {
      Some(e) => Err(e),
      None => Ok(()),
    }
  }

  fn run(&mut self) -> Result<()> {
    if !self.initialized {
      self.init()?;
    }
    let started = Instant::now();
    for task in self.tasks.iter_mut() {
      let now = Instant::now();
      let result = task.run();
      result.context(format!("阶段 {}", task.name()))?;
      debug!("阶段 {} 完成，耗时: {:.2?}", task.name(), now.elapsed());
    }
    debug!(
      "流水线 {} 完成，耗时: {:.2?}",
      self.io.name(),
      started.elapsed()
    );
    Ok(())
  }
}
