// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, Subcommand};
use url::Url;

use shanan_deploy::{
  device::{DeviceType, DeviceTypeCode},
  model::{ModelKind, infer::InferenceType},
};

/// Shanan Deploy 命令行
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 以 JSON 列出已注册家族的设备信息
  Devices {
    /// 只列出该家族，例如 cpu、arm
    #[arg(long, value_name = "FAMILY")]
    family: Option<DeviceTypeCode>,
  },
  /// 构造流水线并以 JSON 打印各阶段参数
  Describe {
    /// 模型族: yolov5、yolov6、yolov8
    #[arg(long, value_name = "KIND")]
    kind: ModelKind,
    /// 模型地址，例如 onnx:///models/yolov5s.onnx
    #[arg(long, value_name = "MODEL")]
    model: Url,
    /// 推理设备，例如 cpu:0
    #[arg(long, default_value = "cpu:0", value_name = "DEVICE")]
    device: DeviceType,
    /// 推理引擎
    #[arg(long, default_value = "default", value_name = "INFERENCE")]
    inference: InferenceType,
  },
}
