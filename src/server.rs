// 该文件是 Kanjian （看见） 项目的一部分。
// src/server.rs - HTTP 服务
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

use std::{convert::Infallible, fmt::Display, io::Cursor, sync::Arc};

use axum::{
  Json, Router,
  body::{Body, Bytes},
  extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartRejection},
  http::header,
  response::{Html, IntoResponse, Response},
  routing::{any, get},
};
use image::{ImageReader, RgbImage};
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::{
  detect::{Detection, DetectionReport, detect},
  input::CaptureOpener,
  model::{DetectResult, Model, ModelHandle},
  output::{
    Draw,
    mjpeg::{self, DEFAULT_JPEG_QUALITY},
  },
  task::{DEFAULT_STREAM_BUFFER, LiveStreamTask},
};

mod error;
pub use self::error::UploadError;

mod pages;

/// 上传表单中的文件字段名
pub const IMAGE_FIELD: &str = "image";
pub const DEFAULT_UPLOAD_LIMIT: usize = 32 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ServerConfig {
  /// 直播流 JPEG 质量 (1-100)
  pub jpeg_quality: u8,
  /// 生产者与响应体之间缓冲的分片数
  pub stream_buffer: usize,
  /// 上传请求体大小上限（字节）
  pub upload_limit: usize,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      stream_buffer: DEFAULT_STREAM_BUFFER,
      upload_limit: DEFAULT_UPLOAD_LIMIT,
    }
  }
}

/// 所有请求共享的应用状态；模型在启动时加载一次，之后只被克隆句柄
pub struct AppState<M> {
  pub model: ModelHandle<M>,
  pub draw: Arc<Draw>,
  pub opener: Arc<dyn CaptureOpener>,
  pub config: ServerConfig,
}

impl<M> Clone for AppState<M> {
  fn clone(&self) -> Self {
    Self {
      model: self.model.clone(),
      draw: self.draw.clone(),
      opener: self.opener.clone(),
      config: self.config.clone(),
    }
  }
}

impl<M> AppState<M> {
  pub fn new(
    model: ModelHandle<M>,
    draw: Arc<Draw>,
    opener: Arc<dyn CaptureOpener>,
    config: ServerConfig,
  ) -> Self {
    Self {
      model,
      draw,
      opener,
      config,
    }
  }
}

pub fn router<M>(state: AppState<M>) -> Router
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: Display,
{
  let upload_limit = state.config.upload_limit;

  Router::new()
    .route("/", get(home))
    // 非 POST 请求（以及没有文件的 POST）显示上传表单
    .route("/upload", any(upload_form).post(upload::<M>))
    .route("/stream", get(stream::<M>))
    .layer(DefaultBodyLimit::max(upload_limit))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

async fn home() -> Html<&'static str> {
  Html(pages::HOME)
}

async fn upload_form() -> Html<&'static str> {
  Html(pages::UPLOAD_FORM)
}

async fn upload<M>(
  State(state): State<AppState<M>>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Response
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: Display,
{
  let Ok(mut multipart) = multipart else {
    debug!("请求不是 multipart 表单，返回上传页面");
    return upload_form().await.into_response();
  };

  let bytes = match read_image_field(&mut multipart).await {
    Ok(Some(bytes)) => bytes,
    Ok(None) => {
      debug!("请求中没有 {} 文件，返回上传页面", IMAGE_FIELD);
      return upload_form().await.into_response();
    }
    Err(e) => return e.into_response(),
  };

  match detect_upload(state.model.clone(), bytes).await {
    Ok(detections) => {
      info!("上传图像检测完成: {} 个目标", detections.len());
      Json(DetectionReport { detections }).into_response()
    }
    Err(e) => e.into_response(),
  }
}

/// 读取第一个名为 `image` 且带文件名的字段
async fn read_image_field(multipart: &mut Multipart) -> Result<Option<Bytes>, UploadError> {
  while let Some(field) = multipart.next_field().await? {
    if field.name() != Some(IMAGE_FIELD) {
      continue;
    }
    if field.file_name().is_none_or(str::is_empty) {
      continue;
    }
    return Ok(Some(field.bytes().await?));
  }
  Ok(None)
}

/// 解码与推理都是阻塞操作，放到阻塞线程池执行
async fn detect_upload<M>(model: ModelHandle<M>, bytes: Bytes) -> Result<Vec<Detection>, UploadError>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: Display,
{
  tokio::task::spawn_blocking(move || -> Result<Vec<Detection>, UploadError> {
    let image = decode_image(&bytes)?;
    debug!("上传图像尺寸: {}x{}", image.width(), image.height());
    Ok(detect(&*model, &image)?)
  })
  .await?
}

fn decode_image(bytes: &[u8]) -> Result<RgbImage, UploadError> {
  let image = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()?
    .decode()?;
  Ok(image.to_rgb8())
}

async fn stream<M>(State(state): State<AppState<M>>) -> Response
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: Display,
{
  info!("新的直播请求");
  let parts = LiveStreamTask::new(state.model.clone(), state.draw.clone(), state.opener.clone())
    .with_jpeg_quality(state.config.jpeg_quality)
    .with_buffer(state.config.stream_buffer)
    .spawn();

  (
    [
      (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
      (header::CACHE_CONTROL, "no-cache"),
    ],
    Body::from_stream(parts.map(Ok::<Bytes, Infallible>)),
  )
    .into_response()
}
