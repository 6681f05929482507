// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/model/infer.rs - 推理阶段与推理后端注册表
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
  fmt,
  str::FromStr,
  sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
  device::{DeviceType, Tensor},
  model::ModelFormat,
  pipeline::Packet,
  status::{Error, Result},
  task::{ParamRef, Task, TaskIo},
};

/// 推理引擎种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceType {
  #[default]
  Default,
  OnnxRuntime,
  Mnn,
  Tnn,
  Rknn,
  OpenVino,
  TensorRt,
}

impl InferenceType {
  pub const ALL: [InferenceType; 7] = [
    InferenceType::Default,
    InferenceType::OnnxRuntime,
    InferenceType::Mnn,
    InferenceType::Tnn,
    InferenceType::Rknn,
    InferenceType::OpenVino,
    InferenceType::TensorRt,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      InferenceType::Default => "default",
      InferenceType::OnnxRuntime => "onnxruntime",
      InferenceType::Mnn => "mnn",
      InferenceType::Tnn => "tnn",
      InferenceType::Rknn => "rknn",
      InferenceType::OpenVino => "openvino",
      InferenceType::TensorRt => "tensorrt",
    }
  }
}

impl fmt::Display for InferenceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for InferenceType {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let lower = s.to_ascii_lowercase();
    Self::ALL
      .into_iter()
      .find(|ty| ty.as_str() == lower)
      .ok_or_else(|| Error::invalid(format!("未知的推理引擎: {}", s)))
  }
}

/// 推理阶段参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferParam {
  pub inference_type: InferenceType,
  pub device_type: DeviceType,
  pub model_type: ModelFormat,
  /// `true` 时 `model_value` 为文件路径，否则为模型内容
  pub is_path: bool,
  pub model_value: Vec<String>,
}

impl Default for InferParam {
  fn default() -> Self {
    Self {
      inference_type: InferenceType::Default,
      device_type: DeviceType::cpu(),
      model_type: ModelFormat::default(),
      is_path: true,
      model_value: Vec::new(),
    }
  }
}

/// 外部推理引擎
pub trait Inference: Send {
  fn init(&mut self, param: &InferParam) -> Result<()>;

  /// 返回的张量归引擎所有，由引擎负责复用或释放，[`Infer`] 只做转发
  fn run(&mut self, input: &Tensor) -> Result<Tensor>;

  fn deinit(&mut self) -> Result<()> {
    Ok(())
  }
}

type InferenceCreator = Box<dyn Fn() -> Result<Box<dyn Inference>> + Send + Sync>;

/// [`InferenceType`] 到推理引擎构造函数的映射
#[derive(Default)]
pub struct InferenceRegistry {
  creators: RwLock<HashMap<InferenceType, InferenceCreator>>,
}

impl InferenceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register<F>(&self, inference_type: InferenceType, creator: F) -> Result<()>
  where
    F: Fn() -> Result<Box<dyn Inference>> + Send + Sync + 'static,
  {
    let mut creators = self.creators.write()?;
    if creators.contains_key(&inference_type) {
      return Err(Error::invalid(format!(
        "推理引擎 {} 已注册",
        inference_type
      )));
    }
    creators.insert(inference_type, Box::new(creator));
    info!("注册推理引擎 {}", inference_type);
    Ok(())
  }

  pub fn contains(&self, inference_type: InferenceType) -> Result<bool> {
    Ok(self.creators.read()?.contains_key(&inference_type))
  }

  pub fn create(&self, inference_type: InferenceType) -> Result<Box<dyn Inference>> {
    let creators = self.creators.read()?;
    let creator = creators
      .get(&inference_type)
      .ok_or_else(|| Error::unavailable(format!("推理引擎 {} 未注册", inference_type)))?;
    creator()
  }
}

/// 委托给外部推理引擎的阶段
pub struct Infer {
  io: TaskIo,
  param: InferParam,
  inferences: Arc<InferenceRegistry>,
  backend: Option<Box<dyn Inference>>,
}

impl Infer {
  pub fn new(
    name: &str,
    inputs: Vec<Arc<Packet>>,
    outputs: Vec<Arc<Packet>>,
    param: InferParam,
    inferences: Arc<InferenceRegistry>,
  ) -> Result<Self> {
    Ok(Self {
      io: TaskIo::new(name, inputs, outputs, 1, 1)?,
      param,
      inferences,
      backend: None,
    })
  }

  pub fn param_mut(&mut self) -> &mut InferParam {
    &mut self.param
  }
}

impl Task for Infer {
  fn name(&self) -> &str {
    self.io.name()
  }

  fn inputs(&self) -> &[Arc<Packet>] {
    self.io.inputs()
  }

  fn outputs(&self) -> &[Arc<Packet>] {
    self.io.outputs()
  }

  fn param(&self) -> ParamRef<'_> {
    ParamRef::Infer(&self.param)
  }

  fn init(&mut self) -> Result<()> {
    if self.backend.is_some() {
      return Ok(());
    }
    let mut backend = self.inferences.create(self.param.inference_type)?;
    backend.init(&self.param)?;
    info!(
      "阶段 {} 使用推理引擎 {}，设备 {}",
      self.io.name(),
      self.param.inference_type,
      self.param.device_type
    );
    self.backend = Some(backend);
    Ok(())
  }

  fn deinit(&mut self) -> Result<()> {
    match self.backend.take() {
      Some(mut backend) => backend.deinit(),
      None => Ok(()),
    }
  }

  fn run(&mut self) -> Result<()> {
    let backend = self
      .backend
      .as_mut()
      .ok_or_else(|| Error::Failed(format!("阶段 {} 未初始化", self.io.name())))?;
    let input = self.io.input().tensor()?;
    let output = backend.run(&input)?;
    debug!(
      "推理 {}: {:?} -> {:?}",
      self.io.name(),
      input.shape(),
      output.shape()
    );
    self.io.output().set_tensor(output)
  }
}
