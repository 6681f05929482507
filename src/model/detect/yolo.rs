// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/model/detect/yolo.rs - YOLO 后处理与流水线
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

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
  device::{DataFormat, DataType, Device, PixelType, Tensor},
  model::{
    PipelineArgs,
    detect::{DetectBBoxResult, DetectResult, compute_nms},
    infer::InferParam,
    preprocess::{CvtColorResize, CvtColorResizeParam, InterpType},
  },
  pipeline::{Packet, Pipeline},
  runtime::Runtime,
  status::{Error, Result},
  task::{ParamRef, Task, TaskIo, TaskKind},
};

const YOLO_INPUT_H: usize = 640;
const YOLO_INPUT_W: usize = 640;
const YOLO_CLASS_NUM: usize = 80;
const YOLO_SCORE_THRESH: f32 = 0.5;
const YOLO_NMS_THRESH: f32 = 0.45;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoloPostParam {
  pub score_threshold: f32,
  pub nms_threshold: f32,
  pub num_classes: usize,
  pub model_h: usize,
  pub model_w: usize,
  /// 5、6 或 8
  pub version: i32,
}

impl Default for YoloPostParam {
  fn default() -> Self {
    Self {
      score_threshold: YOLO_SCORE_THRESH,
      nms_threshold: YOLO_NMS_THRESH,
      num_classes: YOLO_CLASS_NUM,
      model_h: YOLO_INPUT_H,
      model_w: YOLO_INPUT_W,
      version: 5,
    }
  }
}

/// 输出张量的排布
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum YoloLayout {
  /// `[batch, anchor, feature]`，特征为 `[xc, yc, w, h, obj, cls..]`
  AnchorMajor,
  /// `[batch, feature, anchor]`，特征为 `[xc, yc, w, h, cls..]`
  FeatureMajor,
}

impl YoloLayout {
  fn from_version(version: i32) -> Result<Self> {
    match version {
      5 | 6 => Ok(YoloLayout::AnchorMajor),
      8 => Ok(YoloLayout::FeatureMajor),
      other => Err(Error::UnsupportedVersion(other)),
    }
  }

  fn data_format(&self) -> DataFormat {
    match self {
      YoloLayout::AnchorMajor => DataFormat::Nlc,
      YoloLayout::FeatureMajor => DataFormat::Ncl,
    }
  }

  /// 类别得分在特征中的起始位置
  fn class_offset(&self) -> usize {
    match self {
      YoloLayout::AnchorMajor => 5,
      YoloLayout::FeatureMajor => 4,
    }
  }

  /// 返回 (anchor, feature)
  fn dims(&self, shape: &[usize]) -> (usize, usize) {
    match self {
      YoloLayout::AnchorMajor => (shape[1], shape[2]),
      YoloLayout::FeatureMajor => (shape[2], shape[1]),
    }
  }
}

fn transpose(data: &[f32], rows: usize, cols: usize) -> Vec<f32> {
  let mut out = vec![0.0; data.len()];
  for r in 0..rows {
    for c in 0..cols {
      out[c * rows + r] = data[r * cols + c];
    }
  }
  out
}

/// 解码一个批次，返回未经 NMS 的候选框
fn decode_batch(
  rows: &[f32],
  features: usize,
  batch: usize,
  layout: YoloLayout,
  param: &YoloPostParam,
) -> Vec<DetectBBoxResult> {
  let model_w = param.model_w as f32;
  let model_h = param.model_h as f32;
  let offset = layout.class_offset();
  let mut candidates = Vec::new();

  for row in rows.chunks_exact(features) {
    let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
    let bbox = [
      (xc - w * 0.5).max(0.0),
      (yc - h * 0.5).max(0.0),
      (xc + w * 0.5).min(model_w),
      (yc + h * 0.5).min(model_h),
    ];
    let objectness = match layout {
      YoloLayout::AnchorMajor => Some(row[4]),
      YoloLayout::FeatureMajor => None,
    };

    for (label_id, &class_score) in row[offset..offset + param.num_classes].iter().enumerate() {
      let score = objectness.map_or(class_score, |obj| obj * class_score);
      if score > param.score_threshold {
        candidates.push(DetectBBoxResult {
          index: batch,
          label_id,
          score,
          bbox,
        });
      }
    }
  }
  candidates
}

/// 将模型原始输出解码为归一化的检测框
///
/// 每个批次独立做 NMS，保留框按保留顺序追加，坐标除以模型输入尺寸。
pub fn decode(tensor: &Tensor, param: &YoloPostParam) -> Result<DetectResult> {
  let layout = YoloLayout::from_version(param.version)?;
  if tensor.data_type() != DataType::F32 {
    return Err(Error::invalid(format!(
      "张量 {} 的元素类型为 {:?}，期望 F32",
      tensor.name(),
      tensor.data_type()
    )));
  }
  if tensor.data_format() != layout.data_format() {
    return Err(Error::invalid(format!(
      "YOLO v{} 输出需要 {:?} 排布，张量 {} 为 {:?}",
      param.version,
      layout.data_format(),
      tensor.name(),
      tensor.data_format()
    )));
  }
  if param.num_classes == 0 || param.model_h == 0 || param.model_w == 0 {
    return Err(Error::invalid(format!("后处理参数无效: {:?}", param)));
  }

  let shape = tensor.shape();
  let batch = shape[0];
  let (anchors, features) = layout.dims(shape);
  let needed = layout
    .class_offset()
    .checked_add(param.num_classes)
    .ok_or_else(|| Error::invalid(format!("类别数 {} 过大", param.num_classes)))?;
  if features < needed {
    return Err(Error::invalid(format!(
      "特征维度 {} 不足以容纳 {} 个类别",
      features, param.num_classes
    )));
  }

  let data = tensor.to_f32_vec()?;
  let mut result = DetectResult::default();
  for (b, batch_data) in data.chunks_exact(anchors * features).enumerate() {
    let candidates = match layout {
      YoloLayout::AnchorMajor => decode_batch(batch_data, features, b, layout, param),
      YoloLayout::FeatureMajor => {
        let rows = transpose(batch_data, features, anchors);
        decode_batch(&rows, features, b, layout, param)
      }
    };
    let keep = compute_nms(&candidates, param.nms_threshold);
    debug!(
      "批次 {}: {} 个候选框，保留 {} 个",
      b,
      candidates.len(),
      keep.len()
    );
    for i in keep {
      let mut bbox = candidates[i].clone();
      bbox.bbox[0] /= param.model_w as f32;
      bbox.bbox[1] /= param.model_h as f32;
      bbox.bbox[2] /= param.model_w as f32;
      bbox.bbox[3] /= param.model_h as f32;
      result.bboxs.push(bbox);
    }
  }
  debug!("批次数 {}，检测框总数 {}", batch, result.len());
  Ok(result)
}

/// YOLO 解码与非极大值抑制
pub struct YoloPostProcess {
  io: TaskIo,
  param: YoloPostParam,
}

impl YoloPostProcess {
  pub fn param_mut(&mut self) -> &mut YoloPostParam {
    &mut self.param
  }
}

impl TaskKind for YoloPostProcess {
  type Param = YoloPostParam;

  fn construct(
    name: &str,
    inputs: Vec<Arc<Packet>>,
    outputs: Vec<Arc<Packet>>,
    param: Self::Param,
    _device: Arc<dyn Device>,
  ) -> Result<Self> {
    Ok(Self {
      io: TaskIo::new(name, inputs, outputs, 1, 1)?,
      param,
    })
  }
}

impl Task for YoloPostProcess {
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
    ParamRef::YoloPost(&self.param)
  }

  fn run(&mut self) -> Result<()> {
    if let Err(e) = YoloLayout::from_version(self.param.version) {
      error!("不支持的 YOLO 版本: {}", self.param.version);
      return Err(e);
    }
    let tensor = self.io.input().tensor()?;
    let result = decode(&tensor, &self.param)?;
    self.io.output().set_detect_result(result)
  }
}

fn create_yolo_pipeline(runtime: &Runtime, args: PipelineArgs, version: i32) -> Result<Pipeline> {
  let device = runtime.host_device(args.device_type)?;
  let mut pipeline = Pipeline::new(&args.name, device, args.input.clone(), args.output.clone());
  let infer_input = pipeline.create_packet("infer_input")?;
  let infer_output = pipeline.create_packet("infer_output")?;

  pipeline.create_task::<CvtColorResize>(
    "preprocess",
    &args.input,
    &infer_input,
    CvtColorResizeParam {
      src_pixel_type: PixelType::Bgr,
      dst_pixel_type: PixelType::Rgb,
      interp_type: InterpType::Linear,
      h: YOLO_INPUT_H,
      w: YOLO_INPUT_W,
      ..Default::default()
    },
  )?;

  pipeline.create_infer(
    "infer",
    args.inference_type,
    &infer_input,
    &infer_output,
    InferParam {
      device_type: args.device_type,
      model_type: args.model.format,
      is_path: args.model.is_path,
      model_value: args.model.value.clone(),
      ..Default::default()
    },
    runtime.inferences().clone(),
  )?;

  pipeline.create_task::<YoloPostProcess>(
    "postprocess",
    &infer_output,
    &args.output,
    YoloPostParam {
      score_threshold: YOLO_SCORE_THRESH,
      nms_threshold: YOLO_NMS_THRESH,
      num_classes: YOLO_CLASS_NUM,
      model_h: YOLO_INPUT_H,
      model_w: YOLO_INPUT_W,
      version,
    },
  )?;

  info!("创建 YOLOv{} 流水线 {}", version, args.name);
  Ok(pipeline)
}

pub fn create_yolo_v5_pipeline(runtime: &Runtime, args: PipelineArgs) -> Result<Pipeline> {
  create_yolo_pipeline(runtime, args, 5)
}

pub fn create_yolo_v6_pipeline(runtime: &Runtime, args: PipelineArgs) -> Result<Pipeline> {
  create_yolo_pipeline(runtime, args, 6)
}

pub fn create_yolo_v8_pipeline(runtime: &Runtime, args: PipelineArgs) -> Result<Pipeline> {
  create_yolo_pipeline(runtime, args, 8)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    device::{Architecture, HostArchitecture, TensorDesc},
    status::StatusCode,
  };

  fn device() -> Arc<dyn Device> {
    HostArchitecture::cpu().get_device(0).unwrap()
  }

  fn param(version: i32, num_classes: usize) -> YoloPostParam {
    YoloPostParam {
      num_classes,
      version,
      ..Default::default()
    }
  }

  /// `[1, anchors, 5 + classes]`
  fn v5_tensor(rows: &[Vec<f32>]) -> Tensor {
    let features = rows[0].len();
    let data: Vec<f32> = rows.iter().flatten().copied().collect();
    Tensor::from_f32(
      device().as_ref(),
      "output",
      TensorDesc::new(DataType::F32, DataFormat::Nlc, vec![1, rows.len(), features]),
      &data,
    )
    .unwrap()
  }

  /// 按 `[1, feature, anchor]` 排布写入
  fn v8_tensor(rows: &[Vec<f32>]) -> Tensor {
    let features = rows[0].len();
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    let data = transpose(&flat, rows.len(), features);
    Tensor::from_f32(
      device().as_ref(),
      "output",
      TensorDesc::new(DataType::F32, DataFormat::Ncl, vec![1, features, rows.len()]),
      &data,
    )
    .unwrap()
  }

  fn v5_row(bbox: [f32; 4], obj: f32, scores: &[f32]) -> Vec<f32> {
    let mut row = bbox.to_vec();
    row.push(obj);
    row.extend_from_slice(scores);
    row
  }

  fn v8_row(bbox: [f32; 4], scores: &[f32]) -> Vec<f32> {
    let mut row = bbox.to_vec();
    row.extend_from_slice(scores);
    row
  }

  #[test]
  fn decode_v5_single_anchor() {
    let mut scores = vec![0.0; 80];
    scores[0] = 0.9;
    scores[1] = 0.1;
    let tensor = v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &scores)]);

    let result = decode(&tensor, &param(5, 80)).unwrap();
    assert_eq!(result.len(), 1);
    let bbox = &result.bboxs[0];
    assert_eq!(bbox.index, 0);
    assert_eq!(bbox.label_id, 0);
    assert_eq!(bbox.score, 0.9);
    assert_eq!(bbox.bbox, [0.125, 0.125, 0.1875, 0.1875]);
    assert_eq!(bbox.label(), Some("person"));
  }

  #[test]
  fn objectness_scales_v5_scores() {
    let tensor = v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 0.5, &[0.9, 0.2])]);
    // 0.5 * 0.9 = 0.45 低于阈值
    assert!(decode(&tensor, &param(6, 2)).unwrap().is_empty());
  }

  #[test]
  fn decode_v8_has_no_objectness() {
    let tensor = v8_tensor(&[
      v8_row([100.0, 100.0, 40.0, 40.0], &[0.9, 0.1]),
      v8_row([400.0, 400.0, 20.0, 20.0], &[0.2, 0.7]),
    ]);

    let result = decode(&tensor, &param(8, 2)).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.bboxs[0].score, 0.9);
    assert_eq!(result.bboxs[0].label_id, 0);
    assert_eq!(result.bboxs[0].bbox, [0.125, 0.125, 0.1875, 0.1875]);
    assert_eq!(result.bboxs[1].score, 0.7);
    assert_eq!(result.bboxs[1].label_id, 1);
  }

  #[test]
  fn corners_are_clamped() {
    let tensor = v5_tensor(&[v5_row([10.0, 630.0, 40.0, 40.0], 1.0, &[0.8])]);
    let param = YoloPostParam {
      model_w: 640,
      model_h: 640,
      ..param(5, 1)
    };
    let result = decode(&tensor, &param).unwrap();
    assert_eq!(result.bboxs[0].bbox, [0.0, 0.953125, 0.046875, 1.0]);
  }

  #[test]
  fn one_anchor_fires_for_several_classes() {
    let tensor = v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.9, 0.8, 0.3])]);
    let result = decode(&tensor, &param(5, 3)).unwrap();
    // 同一位置的两个类别互相抑制
    assert_eq!(result.len(), 1);
    assert_eq!(result.bboxs[0].label_id, 0);
  }

  #[test]
  fn overlapping_boxes_are_suppressed() {
    let tensor = v5_tensor(&[
      v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.6]),
      v5_row([102.0, 100.0, 40.0, 40.0], 1.0, &[0.9]),
      v5_row([300.0, 300.0, 40.0, 40.0], 1.0, &[0.7]),
    ]);
    let result = decode(&tensor, &param(5, 1)).unwrap();
    let scores: Vec<f32> = result.bboxs.iter().map(|b| b.score).collect();
    assert_eq!(scores, vec![0.9, 0.7]);
  }

  #[test]
  fn batches_are_decoded_independently() {
    let row = v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.9]);
    let data: Vec<f32> = row.iter().chain(row.iter()).copied().collect();
    let tensor = Tensor::from_f32(
      device().as_ref(),
      "output",
      TensorDesc::new(DataType::F32, DataFormat::Nlc, vec![2, 1, 6]),
      &data,
    )
    .unwrap();

    let result = decode(&tensor, &param(5, 1)).unwrap();
    let indices: Vec<usize> = result.bboxs.iter().map(|b| b.index).collect();
    assert_eq!(indices, vec![0, 1]);
  }

  #[test]
  fn layout_must_match_version() {
    let tensor = v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.9])]);
    assert_eq!(
      decode(&tensor, &param(8, 1)).unwrap_err().code(),
      StatusCode::InvalidValue
    );
    assert_eq!(
      decode(&tensor, &param(5, 4)).unwrap_err().code(),
      StatusCode::InvalidValue
    );
  }

  #[test]
  fn oversized_class_count_is_rejected() {
    let tensor = v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.9])]);
    assert_eq!(
      decode(&tensor, &param(5, usize::MAX)).unwrap_err().code(),
      StatusCode::InvalidValue
    );
  }

  #[test]
  fn unsupported_version_keeps_previous_result() {
    let input = Arc::new(Packet::new("infer_output"));
    let output = Arc::new(Packet::new("output"));
    let mut post = YoloPostProcess::construct(
      "postprocess",
      vec![input.clone()],
      vec![output.clone()],
      param(5, 1),
      device(),
    )
    .unwrap();

    input
      .set_tensor(v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.9])]))
      .unwrap();
    post.run().unwrap();
    let previous = output.detect_result().unwrap();
    assert_eq!(previous.len(), 1);

    post.param_mut().version = 7;
    let err = post.run().unwrap_err();
    assert_eq!(err.code(), StatusCode::UnsupportedVersion);
    assert_eq!(output.detect_result().unwrap(), previous);
  }

  #[test]
  fn result_is_replaced_on_every_run() {
    let input = Arc::new(Packet::new("infer_output"));
    let output = Arc::new(Packet::new("output"));
    let mut post = YoloPostProcess::construct(
      "postprocess",
      vec![input.clone()],
      vec![output.clone()],
      param(5, 1),
      device(),
    )
    .unwrap();

    input
      .set_tensor(v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.9])]))
      .unwrap();
    post.run().unwrap();
    input
      .set_tensor(v5_tensor(&[v5_row([100.0, 100.0, 40.0, 40.0], 1.0, &[0.1])]))
      .unwrap();
    post.run().unwrap();
    assert!(output.detect_result().unwrap().is_empty());
  }
}
