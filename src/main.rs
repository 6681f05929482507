// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use serde_json::{Map, Value, json};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use args::{Args, Command};
use shanan_deploy::{
  FromUrl, Runtime,
  device::{DeviceType, DeviceTypeCode},
  model::{ModelKind, ModelSource, PipelineArgs, infer::InferenceType},
  task::Task,
};

fn devices(runtime: &Runtime, family: Option<DeviceTypeCode>) -> Result<Value> {
  let codes = match family {
    Some(code) => vec![code],
    None => runtime.devices().codes()?,
  };
  let mut out = Map::new();
  for code in codes {
    let infos = runtime.devices().get_device_info(code, None)?;
    out.insert(code.to_string(), serde_json::to_value(infos)?);
  }
  Ok(Value::Object(out))
}

fn describe(
  runtime: &Runtime,
  kind: ModelKind,
  model: &Url,
  device: DeviceType,
  inference: InferenceType,
) -> Result<Value> {
  let source = ModelSource::from_url(model)?;
  let args = PipelineArgs::new(kind.as_str(), source)
    .inference_type(inference)
    .device_type(device);
  let pipeline = runtime.create_pipeline(kind, args)?;

  let mut tasks = Vec::new();
  for task in pipeline.tasks() {
    tasks.push(json!({
      "name": task.name(),
      "inputs": task.inputs().iter().map(|p| p.name()).collect::<Vec<_>>(),
      "outputs": task.outputs().iter().map(|p| p.name()).collect::<Vec<_>>(),
      "param": task.param().to_json()?,
    }));
  }
  Ok(json!({
    "name": pipeline.name(),
    "device": pipeline.device().device_type().to_string(),
    "packets": pipeline.packets().iter().map(|p| p.name()).collect::<Vec<_>>(),
    "tasks": tasks,
  }))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();
  let runtime = Runtime::new();

  let result = match &args.command {
    Command::Devices { family } => devices(&runtime, *family),
    Command::Describe {
      kind,
      model,
      device,
      inference,
    } => {
      info!("模型地址: {}", model);
      describe(&runtime, *kind, model, *device, *inference)
    }
  };

  runtime.shutdown()?;
  println!("{}", serde_json::to_string_pretty(&result?)?);
  Ok(())
}
