// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// tests/yolo_pipeline.rs - YOLO 流水线端到端测试
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

#![cfg(feature = "model_yolo")]

use std::sync::Arc;

use shanan_deploy::{
  Error, Result, Runtime, StatusCode,
  device::{
    Architecture, DataFormat, DataType, DeviceType, DeviceTypeCode, HostArchitecture, Tensor,
    TensorDesc,
  },
  model::{
    ModelFormat, ModelKind, ModelSource, PipelineArgs,
    infer::{InferParam, Inference, InferenceType},
    preprocess::InterpType,
  },
  task::{ParamRef, Task},
};

/// 检查输入形状，返回预先写好的 YOLOv5 输出
struct Scripted;

impl Inference for Scripted {
  fn init(&mut self, param: &InferParam) -> Result<()> {
    if param.model_value.is_empty() {
      return Err(Error::invalid("缺少模型"));
    }
    Ok(())
  }

  fn run(&mut self, input: &Tensor) -> Result<Tensor> {
    if input.shape() != [1, 3, 640, 640] || input.data_format() != DataFormat::Nchw {
      return Err(Error::invalid(format!("输入形状错误: {:?}", input.shape())));
    }
    let mut rows = vec![0.0f32; 2 * 85];
    rows[..5].copy_from_slice(&[100.0, 100.0, 40.0, 40.0, 1.0]);
    rows[5] = 0.9;
    rows[6] = 0.1;
    // 第二个锚点低于阈值
    rows[85..90].copy_from_slice(&[300.0, 300.0, 20.0, 20.0, 0.2]);
    rows[90 + 2] = 0.9;

    let device = HostArchitecture::cpu().get_device(0)?;
    Tensor::from_f32(
      device.as_ref(),
      "infer_output",
      TensorDesc::new(DataType::F32, DataFormat::Nlc, vec![1, 2, 85]),
      &rows,
    )
  }
}

fn model() -> ModelSource {
  ModelSource::from_path(ModelFormat::Onnx, "/models/yolov5s.onnx")
}

#[test]
fn yolov5_pipeline_end_to_end() {
  let runtime = Runtime::new();
  runtime
    .register_inference(InferenceType::OnnxRuntime, || {
      Ok(Box::new(Scripted) as Box<dyn Inference>)
    })
    .unwrap();

  let args = PipelineArgs::new("yolov5", model()).inference_type(InferenceType::OnnxRuntime);
  let input = args.input.clone();
  let output = args.output.clone();
  let mut pipeline = runtime.create_pipeline(ModelKind::YoloV5, args).unwrap();

  let device = runtime.devices().get_device(DeviceType::cpu()).unwrap();
  let image = Tensor::from_u8(
    device.as_ref(),
    "image",
    TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![1, 48, 64, 3]),
    &vec![128; 48 * 64 * 3],
  )
  .unwrap();
  input.set_tensor(image).unwrap();

  pipeline.run().unwrap();
  let result = output.detect_result().unwrap();
  assert_eq!(result.len(), 1);
  assert_eq!(result.bboxs[0].label(), Some("person"));
  assert_eq!(result.bboxs[0].score, 0.9);
  assert_eq!(result.bboxs[0].bbox, [0.125, 0.125, 0.1875, 0.1875]);

  // 再次运行覆盖而不是追加
  pipeline.run().unwrap();
  assert_eq!(output.detect_result().unwrap().len(), 1);

  pipeline.deinit().unwrap();
  runtime.shutdown().unwrap();
}

#[test]
fn factories_populate_defaults() {
  let runtime = Runtime::new();
  for (kind, version) in [
    (ModelKind::YoloV5, 5),
    (ModelKind::YoloV6, 6),
    (ModelKind::YoloV8, 8),
  ] {
    let args = PipelineArgs::new(kind.as_str(), model())
      .inference_type(InferenceType::Mnn)
      .device_type(DeviceType::new(DeviceTypeCode::Npu, 0));
    let pipeline = runtime.create_pipeline(kind, args).unwrap();

    let names: Vec<&str> = pipeline.tasks().map(|task| task.name()).collect();
    assert_eq!(names, vec!["preprocess", "infer", "postprocess"]);
    let packets: Vec<&str> = pipeline.packets().iter().map(|p| p.name()).collect();
    assert_eq!(packets, vec!["infer_input", "infer_output"]);
    // 非主机设备只用于推理，流水线本身在 cpu:0 上分配
    assert_eq!(pipeline.device().device_type(), DeviceType::cpu());

    match pipeline.task("preprocess").map(|task| task.param()) {
      Some(ParamRef::CvtColorResize(param)) => {
        assert_eq!((param.h, param.w), (640, 640));
        assert_eq!(param.interp_type, InterpType::Linear);
      }
      other => panic!("预处理参数错误: {:?}", other),
    }
    match pipeline.task("infer").map(|task| task.param()) {
      Some(ParamRef::Infer(param)) => {
        assert_eq!(param.inference_type, InferenceType::Mnn);
        assert_eq!(param.device_type, DeviceType::new(DeviceTypeCode::Npu, 0));
        assert!(param.is_path);
        assert_eq!(param.model_value, vec!["/models/yolov5s.onnx"]);
      }
      other => panic!("推理参数错误: {:?}", other),
    }
    match pipeline.task("postprocess").map(|task| task.param()) {
      Some(ParamRef::YoloPost(param)) => {
        assert_eq!(param.score_threshold, 0.5);
        assert_eq!(param.nms_threshold, 0.45);
        assert_eq!(param.num_classes, 80);
        assert_eq!((param.model_h, param.model_w), (640, 640));
        assert_eq!(param.version, version);
      }
      other => panic!("后处理参数错误: {:?}", other),
    }
  }
}

#[test]
fn unregistered_inference_fails_at_first_run() {
  let runtime = Runtime::new();
  let args = PipelineArgs::new("yolov8", model()).inference_type(InferenceType::Rknn);
  let mut pipeline = runtime.create_pipeline(ModelKind::YoloV8, args).unwrap();
  let err = pipeline.run().unwrap_err();
  assert_eq!(err.code(), StatusCode::BackendUnavailable);
}

#[test]
fn shared_packets_and_shutdown() {
  let runtime = Runtime::new();
  runtime
    .register_inference(InferenceType::Default, || {
      Ok(Box::new(Scripted) as Box<dyn Inference>)
    })
    .unwrap();

  let input = Arc::new(shanan_deploy::pipeline::Packet::new("camera"));
  let output = Arc::new(shanan_deploy::pipeline::Packet::new("boxes"));
  let args = PipelineArgs::new("yolov5", model()).packets(input.clone(), output.clone());
  let mut pipeline = runtime.create_pipeline(ModelKind::YoloV5, args).unwrap();
  assert!(Arc::ptr_eq(pipeline.input(), &input));

  let device = runtime.devices().get_device(DeviceType::cpu()).unwrap();
  let image = Tensor::from_u8(
    device.as_ref(),
    "image",
    TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![1, 640, 640, 3]),
    &vec![0; 640 * 640 * 3],
  )
  .unwrap();
  input.set_tensor(image.clone()).unwrap();
  pipeline.run().unwrap();
  assert_eq!(output.detect_result().unwrap().len(), 1);

  let preprocessed = pipeline.packets()[0].tensor().unwrap();
  assert!(preprocessed.is_valid());
  runtime.shutdown().unwrap();
  assert!(!preprocessed.is_valid());
  assert!(!image.is_valid());
}
