// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/model/detect.rs - 检测结果与非极大值抑制
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

use serde::{Deserialize, Serialize};

#[cfg(feature = "model_yolo")]
pub mod yolo;

/// 单个检测框
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectBBoxResult {
  /// 批次下标
  pub index: usize,
  pub label_id: usize,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

impl DetectBBoxResult {
  pub fn label(&self) -> Option<&'static str> {
    coco_label(self.label_id)
  }
}

/// 一次推理的全部检测框
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectResult {
  pub bboxs: Vec<DetectBBoxResult>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.bboxs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bboxs.is_empty()
  }

  pub fn clear(&mut self) {
    self.bboxs.clear();
  }
}

fn area(bbox: &[f32; 4]) -> f32 {
  (bbox[2] - bbox[0]).max(0.0) * (bbox[3] - bbox[1]).max(0.0)
}

/// 轴对齐框的交并比，任意一方面积为零时为 0
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let area_a = area(a);
  let area_b = area(b);
  if area_a <= 0.0 || area_b <= 0.0 {
    return 0.0;
  }

  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);
  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心非极大值抑制
///
/// 按得分降序（同分保持输入顺序）遍历，与任一已保留框的 IoU 超过
/// `nms_threshold` 的框被丢弃。返回保留框的下标，顺序即保留顺序。
pub fn compute_nms(bboxs: &[DetectBBoxResult], nms_threshold: f32) -> Vec<usize> {
  let mut order: Vec<usize> = (0..bboxs.len()).collect();
  order.sort_by(|&a, &b| bboxs[b].score.total_cmp(&bboxs[a].score));

  let mut keep: Vec<usize> = Vec::with_capacity(order.len());
  for candidate in order {
    let suppressed = keep
      .iter()
      .any(|&kept| iou(&bboxs[kept].bbox, &bboxs[candidate].bbox) > nms_threshold);
    if !suppressed {
      keep.push(candidate);
    }
  }
  keep
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub fn coco_label(label_id: usize) -> Option<&'static str> {
  COCO_CLASSES.get(label_id).copied()
}
