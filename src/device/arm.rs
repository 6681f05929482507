// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device/arm.rs - ARM 家族
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

use crate::device::{DeviceTypeCode, HostArchitecture, HostLayout};

// NEON 寄存器宽度
const ARM_ALIGNMENT: usize = 16;
const ARM_ROW_ALIGNMENT: usize = 16;

const ARM_LAYOUT: HostLayout = HostLayout {
  alignment: ARM_ALIGNMENT,
  row_alignment: ARM_ROW_ALIGNMENT,
};

impl HostArchitecture {
  /// ARM 家族，仅在 arm/aarch64 目标上可用
  pub fn arm() -> Self {
    HostArchitecture::new(
      DeviceTypeCode::Arm,
      ARM_LAYOUT,
      cfg!(any(target_arch = "arm", target_arch = "aarch64")),
    )
  }

  /// 在任意平台上按 ARM 布局规则工作的 ARM 家族
  ///
  /// 内存仍在主机上，适合在开发机上检查 ARM 的布局行为。
  pub fn arm_emulated() -> Self {
    HostArchitecture::new(DeviceTypeCode::Arm, ARM_LAYOUT, true)
  }
}
