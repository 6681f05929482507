// 该文件是 Shanan Deploy （山南部署） 项目的一部分。
// src/status.rs - 状态码与错误定义
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

use std::sync::PoisonError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 封闭的状态码集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
  Ok,
  InvalidValue,
  InvalidDeviceId,
  OutOfMemory,
  SizeMismatch,
  BackendUnavailable,
  UnsupportedVersion,
  Failed,
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("无效参数: {0}")]
  InvalidValue(String),
  #[error("无效设备编号: {0}")]
  InvalidDeviceId(String),
  #[error("内存不足: 申请 {requested} 字节")]
  OutOfMemory { requested: usize },
  #[error("大小不匹配: 源 {src} 字节, 目标 {dst} 字节")]
  SizeMismatch { src: usize, dst: usize },
  #[error("后端不可用: {0}")]
  BackendUnavailable(String),
  #[error("不支持的版本: {0}")]
  UnsupportedVersion(i32),
  #[error("后端错误: {0}")]
  Failed(String),
  #[error("{context}: {source}")]
  Context {
    context: String,
    #[source]
    source: Box<Error>,
  },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub fn invalid(msg: impl Into<String>) -> Self {
    Error::InvalidValue(msg.into())
  }

  pub fn unavailable(msg: impl Into<String>) -> Self {
    Error::BackendUnavailable(msg.into())
  }

  /// 状态码，包装过的错误返回最内层的状态码
  pub fn code(&self) -> StatusCode {
    match self {
      Error::InvalidValue(_) => StatusCode::InvalidValue,
      Error::InvalidDeviceId(_) => StatusCode::InvalidDeviceId,
      Error::OutOfMemory { .. } => StatusCode::OutOfMemory,
      Error::SizeMismatch { .. } => StatusCode::SizeMismatch,
      Error::BackendUnavailable(_) => StatusCode::BackendUnavailable,
      Error::UnsupportedVersion(_) => StatusCode::UnsupportedVersion,
      Error::Failed(_) => StatusCode::Failed,
      Error::Context { source, .. } => source.code(),
    }
  }
}

impl<T> From<PoisonError<T>> for Error {
  fn from(err: PoisonError<T>) -> Self {
    Error::Failed(format!("锁已中毒: {}", err))
  }
}

pub trait ErrorContext<T> {
  fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
  fn context(self, context: impl Into<String>) -> Result<T> {
    self.map_err(|source| Error::Context {
      context: context.into(),
      source: Box::new(source),
    })
  }
}

/// 将结果折叠为状态码
pub fn status_of<T>(result: &Result<T>) -> StatusCode {
  match result {
    Ok(_) => StatusCode::Ok,
    Err(e) => e.code(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn context_keeps_inner_code() {
    let result: Result<()> = Err(Error::SizeMismatch { src: 4, dst: 8 });
    let wrapped = result.context("上传").context("任务 preprocess");
    assert_eq!(status_of(&wrapped), StatusCode::SizeMismatch);
    let message = wrapped.unwrap_err().to_string();
    assert!(message.starts_with("任务 preprocess: 上传"));
  }

  #[test]
  fn ok_status() {
    let result: Result<u32> = Ok(1);
    assert_eq!(status_of(&result), StatusCode::Ok);
  }
}
