// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/device/cpu.rs - 通用 CPU 与 X86 家族
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

// 缓存行大小
const CPU_ALIGNMENT: usize = 64;
const CPU_ROW_ALIGNMENT: usize = 1;

// AVX 寄存器宽度
const X86_ALIGNMENT: usize = 64;
const X86_ROW_ALIGNMENT: usize = 32;

impl HostArchitecture {
  /// 通用 CPU，任何平台都可用
  pub fn cpu() -> Self {
    HostArchitecture::new(
      DeviceTypeCode::Cpu,
      HostLayout {
        alignment: CPU_ALIGNMENT,
        row_alignment: CPU_ROW_ALIGNMENT,
      },
      true,
    )
  }

  /// X86 家族，仅在 x86/x86_64 目标上可用
  pub fn x86() -> Self {
    HostArchitecture::new(
      DeviceTypeCode::X86,
      HostLayout {
        alignment: X86_ALIGNMENT,
        row_alignment: X86_ROW_ALIGNMENT,
      },
      cfg!(any(target_arch = "x86", target_arch = "x86_64")),
    )
  }
}
