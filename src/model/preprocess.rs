// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/model/preprocess.rs - 颜色转换与缩放预处理
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

use image::{RgbImage, imageops::FilterType};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  device::{DataFormat, DataType, Device, PixelType, Tensor, TensorDesc},
  pipeline::Packet,
  status::{Error, Result, StatusCode},
  task::{ParamRef, Task, TaskIo, TaskKind},
};

/// 插值方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpType {
  Nearest,
  #[default]
  Linear,
  Cubic,
}

impl InterpType {
  fn filter(&self) -> FilterType {
    match self {
      InterpType::Nearest => FilterType::Nearest,
      InterpType::Linear => FilterType::Triangle,
      InterpType::Cubic => FilterType::CatmullRom,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvtColorResizeParam {
  pub src_pixel_type: PixelType,
  pub dst_pixel_type: PixelType,
  pub interp_type: InterpType,
  pub h: usize,
  pub w: usize,
  /// 按输出通道顺序
  pub scale: [f32; 4],
  pub mean: [f32; 4],
  pub std: [f32; 4],
}

impl Default for CvtColorResizeParam {
  fn default() -> Self {
    Self {
      src_pixel_type: PixelType::Bgr,
      dst_pixel_type: PixelType::Rgb,
      interp_type: InterpType::Linear,
      h: 640,
      w: 640,
      scale: [1.0 / 255.0; 4],
      mean: [0.0; 4],
      std: [1.0; 4],
    }
  }
}

impl CvtColorResizeParam {
  fn validate(&self) -> Result<()> {
    if self.h == 0 || self.w == 0 {
      return Err(Error::invalid(format!(
        "目标尺寸 {}x{} 无效",
        self.w, self.h
      )));
    }
    if self.src_pixel_type.rgb_indices().is_none() {
      return Err(Error::invalid(format!(
        "不支持的输入像素格式 {:?}",
        self.src_pixel_type
      )));
    }
    if self.dst_pixel_type.channels() != 3 {
      return Err(Error::invalid(format!(
        "输出像素格式必须为三通道，实际为 {:?}",
        self.dst_pixel_type
      )));
    }
    if self.std[..3].contains(&0.0) {
      return Err(Error::invalid("标准差不能为 0"));
    }
    self
      .h
      .checked_mul(self.w)
      .and_then(|plane| plane.checked_mul(3 * std::mem::size_of::<f32>()))
      .ok_or_else(|| Error::invalid(format!("目标尺寸 {}x{} 过大", self.w, self.h)))?;
    Ok(())
  }
}

/// 将 NHWC 的 U8 图像转换为模型输入的 NCHW 浮点张量
pub struct CvtColorResize {
  io: TaskIo,
  param: CvtColorResizeParam,
  device: Arc<dyn Device>,
}

impl CvtColorResize {
  pub fn param_mut(&mut self) -> &mut CvtColorResizeParam {
    &mut self.param
  }

  /// 形状不变时复用上一次的输出，否则先释放旧缓冲区再分配
  fn output_tensor(&self, desc: TensorDesc) -> Result<Tensor> {
    if let Some(previous) = self.io.output().try_tensor()? {
      if previous.desc() == &desc && previous.is_valid() {
        return Ok(previous);
      }
      self.release(&previous)?;
    }
    Tensor::allocate(self.device.as_ref(), self.io.output().name(), desc)
  }

  // 只释放本设备分配、且仍然存活的缓冲区
  fn release(&self, tensor: &Tensor) -> Result<()> {
    if !tensor.is_valid() || tensor.buffer().device_type() != self.device.device_type() {
      return Ok(());
    }
    self.io.output().clear()?;
    match self.device.deallocate(tensor.buffer()) {
      Ok(()) => {
        debug!("预处理 {} 释放旧输出 {:?}", self.io.name(), tensor.shape());
        Ok(())
      }
      // 同家族的其他设备实例分配的缓冲区，交给其所有者
      Err(e) if e.code() == StatusCode::InvalidValue => {
        debug!("预处理 {} 不持有旧输出: {}", self.io.name(), e);
        Ok(())
      }
      Err(e) => Err(e),
    }
  }
}

impl TaskKind for CvtColorResize {
  type Param = CvtColorResizeParam;

  fn construct(
    name: &str,
    inputs: Vec<Arc<Packet>>,
    outputs: Vec<Arc<Packet>>,
    param: Self::Param,
    device: Arc<dyn Device>,
  ) -> Result<Self> {
    Ok(Self {
      io: TaskIo::new(name, inputs, outputs, 1, 1)?,
      param,
      device,
    })
  }
}

impl Task for CvtColorResize {
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
    ParamRef::CvtColorResize(&self.param)
  }

  fn init(&mut self) -> Result<()> {
    self.param.validate()
  }

  fn run(&mut self) -> Result<()> {
    let param = &self.param;
    param.validate()?;
    let input = self.io.input().tensor()?;
    if input.data_type() != DataType::U8 || input.data_format() != DataFormat::Nhwc {
      return Err(Error::invalid(format!(
        "预处理输入 {} 必须为 U8 NHWC，实际为 {:?} {:?}",
        input.name(),
        input.data_type(),
        input.data_format()
      )));
    }
    let channels = param.src_pixel_type.channels();
    if input.channel() != channels {
      return Err(Error::invalid(format!(
        "输入通道数 {} 与像素格式 {:?} 不符",
        input.channel(),
        param.src_pixel_type
      )));
    }
    let (src_index, dst_index) = match (
      param.src_pixel_type.rgb_indices(),
      param.dst_pixel_type.rgb_indices(),
    ) {
      (Some(src), Some(dst)) => (src, dst),
      _ => return Err(Error::invalid("像素格式缺少 RGB 通道")),
    };

    let (batch, in_h, in_w) = (input.batch(), input.height(), input.width());
    let (out_h, out_w) = (param.h, param.w);
    let data = input.to_u8_vec()?;
    let plane = out_h * out_w;
    let total = batch
      .checked_mul(3 * plane)
      .ok_or_else(|| Error::invalid(format!("批次 {} 的输出过大", batch)))?;
    let mut out = vec![0.0f32; total];

    for (b, image) in data.chunks_exact(in_h * in_w * channels).enumerate() {
      let rgb: Vec<u8> = image
        .chunks_exact(channels)
        .flat_map(|px| src_index.map(|i| px[i]))
        .collect();
      let rgb = RgbImage::from_raw(in_w as u32, in_h as u32, rgb)
        .ok_or_else(|| Error::Failed("构造图像失败".to_string()))?;
      let resized = if (in_h, in_w) == (out_h, out_w) {
        rgb
      } else {
        image::imageops::resize(&rgb, out_w as u32, out_h as u32, param.interp_type.filter())
      };

      let base = b * 3 * plane;
      for (i, px) in resized.as_raw().chunks_exact(3).enumerate() {
        for (component, &value) in px.iter().enumerate() {
          let ch = dst_index[component];
          out[base + ch * plane + i] =
            (value as f32 * param.scale[ch] - param.mean[ch]) / param.std[ch];
        }
      }
    }

    let desc = TensorDesc::new(
      DataType::F32,
      DataFormat::Nchw,
      vec![batch, 3, out_h, out_w],
    );
    let output = self.output_tensor(desc)?;
    output.write_f32(&out)?;
    debug!(
      "预处理 {}: {}x{} -> {}x{}，批次 {}",
      self.io.name(),
      in_w,
      in_h,
      out_w,
      out_h,
      batch
    );
    self.io.output().set_tensor(output)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::{Architecture, HostArchitecture};

  type Fixture = (CvtColorResize, Arc<Packet>, Arc<Packet>, Arc<dyn Device>);

  fn task_on(device: Arc<dyn Device>, param: CvtColorResizeParam) -> Fixture {
    let input = Arc::new(Packet::new("image"));
    let output = Arc::new(Packet::new("input"));
    let task = CvtColorResize::construct(
      "preprocess",
      vec![input.clone()],
      vec![output.clone()],
      param,
      device.clone(),
    )
    .unwrap();
    (task, input, output, device)
  }

  fn task(param: CvtColorResizeParam) -> Fixture {
    task_on(HostArchitecture::cpu().get_device(0).unwrap(), param)
  }

  #[test]
  fn bgr_to_rgb_planar_without_resize() {
    let param = CvtColorResizeParam {
      h: 1,
      w: 2,
      scale: [1.0; 4],
      ..Default::default()
    };
    let (mut task, input, output, device) = task(param);
    // 两个 BGR 像素
    let image = Tensor::from_u8(
      device.as_ref(),
      "image",
      TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![1, 1, 2, 3]),
      &[1, 2, 3, 4, 5, 6],
    )
    .unwrap();
    input.set_tensor(image).unwrap();

    task.run().unwrap();
    let tensor = output.tensor().unwrap();
    assert_eq!(tensor.shape(), &[1, 3, 1, 2]);
    assert_eq!(tensor.data_format(), DataFormat::Nchw);
    assert_eq!(
      tensor.to_f32_vec().unwrap(),
      vec![3.0, 6.0, 2.0, 5.0, 1.0, 4.0]
    );
  }

  #[test]
  fn normalizes_and_resizes() {
    let param = CvtColorResizeParam {
      src_pixel_type: PixelType::Rgba,
      dst_pixel_type: PixelType::Rgb,
      interp_type: InterpType::Nearest,
      h: 4,
      w: 4,
      mean: [0.5; 4],
      std: [0.5; 4],
      ..Default::default()
    };
    let (mut task, input, output, device) = task(param);
    let pixels: Vec<u8> = (0..4).flat_map(|_| [255, 0, 255, 7]).collect();
    let image = Tensor::from_u8(
      device.as_ref(),
      "image",
      TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![1, 2, 2, 4]),
      &pixels,
    )
    .unwrap();
    input.set_tensor(image).unwrap();

    task.run().unwrap();
    let values = output.tensor().unwrap().to_f32_vec().unwrap();
    assert_eq!(values.len(), 3 * 16);
    assert!(values[..16].iter().all(|v| (v - 1.0).abs() < 1e-6));
    assert!(values[16..32].iter().all(|v| (v + 1.0).abs() < 1e-6));
    assert!(values[32..].iter().all(|v| (v - 1.0).abs() < 1e-6));
  }

  #[test]
  fn output_tensor_is_reused() {
    let param = CvtColorResizeParam {
      h: 2,
      w: 2,
      ..Default::default()
    };
    let (mut task, input, output, device) = task(param);
    let image = Tensor::from_u8(
      device.as_ref(),
      "image",
      TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![1, 2, 2, 3]),
      &[0; 12],
    )
    .unwrap();
    input.set_tensor(image).unwrap();

    task.run().unwrap();
    let first = output.tensor().unwrap();
    task.run().unwrap();
    let second = output.tensor().unwrap();
    assert_eq!(first.buffer().id(), second.buffer().id());
  }

  #[test]
  fn replaced_output_is_released() {
    let arch = HostArchitecture::cpu().with_memory_limit(64 << 20);
    let host = arch.host_device(0).unwrap();
    let (mut task, input, output, device) = task_on(host.clone(), CvtColorResizeParam::default());

    for round in 0..12 {
      let batch = if round % 2 == 0 { 1 } else { 2 };
      let image = Tensor::from_u8(
        device.as_ref(),
        "image",
        TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![batch, 2, 2, 3]),
        &vec![0; batch * 12],
      )
      .unwrap();
      input.set_tensor(image.clone()).unwrap();
      task.run().unwrap();
      input.clear().unwrap();
      device.deallocate(image.buffer()).unwrap();
      assert_eq!(output.tensor().unwrap().batch(), batch);
    }

    // 只剩最后一次的输出 [2, 3, 640, 640]
    assert_eq!(host.live_buffers().unwrap(), 1);
    assert_eq!(host.allocated().unwrap(), 2 * 3 * 640 * 640 * 4);
  }

  #[test]
  fn oversized_target_is_rejected() {
    let (mut task, _input, _output, _device) = task(CvtColorResizeParam {
      h: usize::MAX / 2,
      w: 4,
      ..Default::default()
    });
    assert_eq!(task.init().unwrap_err().code(), StatusCode::InvalidValue);
  }

  #[test]
  fn rejects_wrong_input() {
    let (mut task, input, _output, device) = task(CvtColorResizeParam::default());
    assert_eq!(task.run().unwrap_err().code(), StatusCode::InvalidValue);

    let image = Tensor::from_u8(
      device.as_ref(),
      "image",
      TensorDesc::new(DataType::U8, DataFormat::Nhwc, vec![1, 2, 2, 4]),
      &[0; 16],
    )
    .unwrap();
    input.set_tensor(image).unwrap();
    assert_eq!(task.run().unwrap_err().code(), StatusCode::InvalidValue);

    task.param_mut().dst_pixel_type = PixelType::Gray;
    assert_eq!(task.init().unwrap_err().code(), StatusCode::InvalidValue);
  }
}
