// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/task.rs - 流水线阶段
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

use crate::{
  device::Device,
  model::{infer::InferParam, preprocess::CvtColorResizeParam},
  pipeline::Packet,
  status::{Error, Result},
};

#[cfg(feature = "model_yolo")]
use crate::model::detect::yolo::YoloPostParam;

/// 各类阶段参数的只读视图
#[derive(Debug, Clone, Copy)]
pub enum ParamRef<'a> {
  None,
  CvtColorResize(&'a CvtColorResizeParam),
  Infer(&'a InferParam),
  #[cfg(feature = "model_yolo")]
  YoloPost(&'a YoloPostParam),
}

impl ParamRef<'_> {
  pub fn to_json(&self) -> Result<serde_json::Value> {
    let value = match self {
      ParamRef::None => Ok(serde_json::Value::Null),
      ParamRef::CvtColorResize(param) => serde_json::to_value(param),
      ParamRef::Infer(param) => serde_json::to_value(param),
      #[cfg(feature = "model_yolo")]
      ParamRef::YoloPost(param) => serde_json::to_value(param),
    };
    value.map_err(|e| Error::Failed(format!("参数序列化失败: {}", e)))
  }
}

/// 流水线中的一个阶段
///
/// `run` 只读取声明的输入数据槽，只写入声明的输出数据槽，
/// 只使用自己的参数。
pub trait Task: Send {
  fn name(&self) -> &str;
  fn inputs(&self) -> &[Arc<Packet>];
  fn outputs(&self) -> &[Arc<Packet>];

  fn param(&self) -> ParamRef<'_> {
    ParamRef::None
  }

  fn init(&mut self) -> Result<()> {
    Ok(())
  }

  fn deinit(&mut self) -> Result<()> {
    Ok(())
  }

  fn run(&mut self) -> Result<()>;
}

/// 可由 [`Pipeline::create_task`](crate::pipeline::Pipeline::create_task) 构造的阶段
pub trait TaskKind: Task + Sized {
  type Param;

  fn construct(
    name: &str,
    inputs: Vec<Arc<Packet>>,
    outputs: Vec<Arc<Packet>>,
    param: Self::Param,
    device: Arc<dyn Device>,
  ) -> Result<Self>;
}

/// 阶段的名字与输入输出数据槽
#[derive(Debug, Clone)]
pub struct TaskIo {
  name: String,
  inputs: Vec<Arc<Packet>>,
  outputs: Vec<Arc<Packet>>,
}

impl TaskIo {
  /// 检查输入输出数量
  pub fn new(
    name: &str,
    inputs: Vec<Arc<Packet>>,
    outputs: Vec<Arc<Packet>>,
    expected_inputs: usize,
    expected_outputs: usize,
  ) -> Result<Self> {
    if inputs.len() != expected_inputs || outputs.len() != expected_outputs {
      return Err(Error::invalid(format!(
        "阶段 {} 需要 {} 个输入、{} 个输出，实际为 {} 个输入、{} 个输出",
        name,
        expected_inputs,
        expected_outputs,
        inputs.len(),
        outputs.len()
      )));
    }
    Ok(Self {
      name: name.to_string(),
      inputs,
      outputs,
    })
  }

  /// 一进一出
  pub fn single(name: &str, input: Arc<Packet>, output: Arc<Packet>) -> Self {
    Self {
      name: name.to_string(),
      inputs: vec![input],
      outputs: vec![output],
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn inputs(&self) -> &[Arc<Packet>] {
    &self.inputs
  }

  pub fn outputs(&self) -> &[Arc<Packet>] {
    &self.outputs
  }

  pub fn input(&self) -> &Packet {
    &self.inputs[0]
  }

  pub fn output(&self) -> &Packet {
    &self.outputs[0]
  }
}
