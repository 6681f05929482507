// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/model.rs - 模型与流水线工厂
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
use url::Url;

use crate::{
  FromUrl,
  device::DeviceType,
  model::infer::InferenceType,
  pipeline::{Packet, Pipeline},
  runtime::Runtime,
  status::{Error, Result},
};

pub mod detect;
pub mod infer;
pub mod preprocess;

/// 内置的模型族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
  YoloV5,
  YoloV6,
  YoloV8,
}

impl ModelKind {
  pub const ALL: [ModelKind; 3] = [ModelKind::YoloV5, ModelKind::YoloV6, ModelKind::YoloV8];

  pub fn as_str(&self) -> &'static str {
    match self {
      ModelKind::YoloV5 => "yolov5",
      ModelKind::YoloV6 => "yolov6",
      ModelKind::YoloV8 => "yolov8",
    }
  }
}

impl fmt::Display for ModelKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModelKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let lower = s.to_ascii_lowercase();
    Self::ALL
      .into_iter()
      .find(|kind| kind.as_str() == lower)
      .ok_or_else(|| Error::invalid(format!("未知的模型: {}", s)))
  }
}

/// 模型文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
  #[default]
  Onnx,
  Mnn,
  Tnn,
  Rknn,
  OpenVino,
  TensorRt,
}

impl ModelFormat {
  pub const ALL: [ModelFormat; 6] = [
    ModelFormat::Onnx,
    ModelFormat::Mnn,
    ModelFormat::Tnn,
    ModelFormat::Rknn,
    ModelFormat::OpenVino,
    ModelFormat::TensorRt,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ModelFormat::Onnx => "onnx",
      ModelFormat::Mnn => "mnn",
      ModelFormat::Tnn => "tnn",
      ModelFormat::Rknn => "rknn",
      ModelFormat::OpenVino => "openvino",
      ModelFormat::TensorRt => "tensorrt",
    }
  }
}

impl fmt::Display for ModelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModelFormat {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let lower = s.to_ascii_lowercase();
    Self::ALL
      .into_iter()
      .find(|format| format.as_str() == lower)
      .ok_or_else(|| Error::invalid(format!("未知的模型格式: {}", s)))
  }
}

/// 模型来源
///
/// `is_path` 为 `true` 时 `value` 是模型文件路径，否则是已读入内存的模型内容。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelSource {
  pub format: ModelFormat,
  pub is_path: bool,
  pub value: Vec<String>,
}

impl ModelSource {
  pub fn from_path(format: ModelFormat, path: &str) -> Self {
    Self {
      format,
      is_path: true,
      value: vec![path.to_string()],
    }
  }

  pub fn from_buffer(format: ModelFormat, content: Vec<String>) -> Self {
    Self {
      format,
      is_path: false,
      value: content,
    }
  }
}

/// 形如 `onnx:///path/yolov5s.onnx`，多个文件以 `,` 分隔，
/// 带 `?buffer` 时读入文件内容
impl FromUrl for ModelSource {
  type Error = Error;

  fn from_url(url: &Url) -> Result<Self> {
    let format: ModelFormat = url.scheme().parse()?;
    let paths: Vec<String> = url
      .path()
      .split(',')
      .filter(|path| !path.is_empty())
      .map(str::to_string)
      .collect();
    if paths.is_empty() {
      return Err(Error::invalid(format!("模型地址 {} 缺少路径", url)));
    }

    let buffer = url.query_pairs().any(|(key, _)| key == "buffer");
    if !buffer {
      return Ok(Self {
        format,
        is_path: true,
        value: paths,
      });
    }

    let mut content = Vec::with_capacity(paths.len());
    for path in &paths {
      info!("读取模型文件: {}", path);
      let text = std::fs::read_to_string(path)
        .map_err(|e| Error::invalid(format!("读取模型文件 {} 失败: {}", path, e)))?;
      debug!(
        "模型文件大小: {:.2} MB",
        text.len() as f64 / (1024.0 * 1024.0)
      );
      content.push(text);
    }
    Ok(Self::from_buffer(format, content))
  }
}

/// 流水线工厂的参数
#[derive(Debug, Clone)]
pub struct PipelineArgs {
  pub name: String,
  pub inference_type: InferenceType,
  pub device_type: DeviceType,
  pub input: Arc<Packet>,
  pub output: Arc<Packet>,
  pub model: ModelSource,
}

impl PipelineArgs {
  /// 默认在 CPU 上推理，输入输出数据槽名为 `input`/`output`
  pub fn new(name: &str, model: ModelSource) -> Self {
    Self {
      name: name.to_string(),
      inference_type: InferenceType::Default,
      device_type: DeviceType::cpu(),
      input: Arc::new(Packet::new("input")),
      output: Arc::new(Packet::new("output")),
      model,
    }
  }

  pub fn inference_type(mut self, inference_type: InferenceType) -> Self {
    self.inference_type = inference_type;
    self
  }

  pub fn device_type(mut self, device_type: DeviceType) -> Self {
    self.device_type = device_type;
    self
  }

  pub fn packets(mut self, input: Arc<Packet>, output: Arc<Packet>) -> Self {
    self.input = input;
    self.output = output;
    self
  }
}

pub type PipelineCreator = fn(&Runtime, PipelineArgs) -> Result<Pipeline>;

/// [`ModelKind`] 到流水线工厂的映射
#[derive(Default)]
pub struct PipelineRegistry {
  creators: RwLock<HashMap<ModelKind, PipelineCreator>>,
}

impl PipelineRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册启用的内置模型
  pub fn with_builtin() -> Self {
    let registry = Self::new();
    #[cfg(feature = "model_yolo")]
    {
      use self::detect::yolo;
      let builtin: [(ModelKind, PipelineCreator); 3] = [
        (ModelKind::YoloV5, yolo::create_yolo_v5_pipeline),
        (ModelKind::YoloV6, yolo::create_yolo_v6_pipeline),
        (ModelKind::YoloV8, yolo::create_yolo_v8_pipeline),
      ];
      if let Ok(mut creators) = registry.creators.write() {
        creators.extend(builtin);
      }
    }
    registry
  }

  pub fn register(&self, kind: ModelKind, creator: PipelineCreator) -> Result<()> {
    let mut creators = self.creators.write()?;
    if creators.contains_key(&kind) {
      return Err(Error::invalid(format!("模型 {} 已注册", kind)));
    }
    creators.insert(kind, creator);
    info!("注册模型 {}", kind);
    Ok(())
  }

  pub fn kinds(&self) -> Result<Vec<ModelKind>> {
    let mut kinds: Vec<ModelKind> = self.creators.read()?.keys().copied().collect();
    kinds.sort_by_key(|kind| kind.as_str());
    Ok(kinds)
  }

  pub fn create(&self, kind: ModelKind, runtime: &Runtime, args: PipelineArgs) -> Result<Pipeline> {
    let creator = self
      .creators
      .read()?
      .get(&kind)
      .copied()
      .ok_or_else(|| Error::invalid(format!("模型 {} 未注册", kind)))?;
    creator(runtime, args)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::status::StatusCode;

  #[test]
  fn model_source_from_url() {
    let url = Url::parse("mnn:///models/yolov8n.mnn").unwrap();
    let source = ModelSource::from_url(&url).unwrap();
    assert_eq!(source, ModelSource::from_path(ModelFormat::Mnn, "/models/yolov8n.mnn"));

    let url = Url::parse("openvino:///m/yolo.xml,/m/yolo.bin").unwrap();
    let source = ModelSource::from_url(&url).unwrap();
    assert_eq!(source.format, ModelFormat::OpenVino);
    assert_eq!(source.value, vec!["/m/yolo.xml", "/m/yolo.bin"]);

    let url = Url::parse("caffe:///m/yolo.caffemodel").unwrap();
    assert_eq!(
      ModelSource::from_url(&url).unwrap_err().code(),
      StatusCode::InvalidValue
    );
  }

  #[test]
  fn buffer_mode_reads_content() {
    let path = std::env::temp_dir().join(format!("shanan-deploy-{}.xml", std::process::id()));
    std::fs::write(&path, "<net/>").unwrap();
    let url = Url::parse(&format!("openvino://{}?buffer", path.display())).unwrap();
    let source = ModelSource::from_url(&url).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert!(!source.is_path);
    assert_eq!(source.value, vec!["<net/>"]);
  }

  #[test]
  fn parse_model_kind() {
    assert_eq!("YOLOv8".parse::<ModelKind>().unwrap(), ModelKind::YoloV8);
    assert!("yolov7".parse::<ModelKind>().is_err());
  }

  #[cfg(feature = "model_yolo")]
  #[test]
  fn builtin_models_are_registered() {
    let registry = PipelineRegistry::with_builtin();
    assert_eq!(registry.kinds().unwrap(), ModelKind::ALL.to_vec());
    let err = registry
      .register(ModelKind::YoloV5, |_, _| Err(Error::Failed("重复".to_string())))
      .unwrap_err();
    assert_eq!(err.code(), StatusCode::InvalidValue);
  }
}
