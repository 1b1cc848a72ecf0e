// 该文件是 Kanjian （看见） 项目的一部分。
// src/server/error.rs - 上传接口错误
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Kanjian 项目贡献者

use axum::{
  Json,
  extract::multipart::MultipartError,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::detect::DetectError;

/// 上传检测失败的原因
///
/// 对客户端不区分种类：一律返回 400 和错误的文本描述。
#[derive(Error, Debug)]
pub enum UploadError {
  #[error("{0}")]
  Multipart(#[from] MultipartError),
  #[error("{0}")]
  Read(#[from] std::io::Error),
  #[error("{0}")]
  Decode(#[from] image::ImageError),
  #[error("{0}")]
  Detect(#[from] DetectError),
  #[error("{0}")]
  Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
  error: String,
}

impl IntoResponse for UploadError {
  fn into_response(self) -> Response {
    warn!("上传检测失败: {:?}", self);
    let body = ErrorBody {
      error: self.to_string(),
    };
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn maps_to_bad_request_json() {
    let response = UploadError::Detect(DetectError::UnknownClass(99)).into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!({"error": "unknown class index 99"}));
  }
}
