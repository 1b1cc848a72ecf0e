// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频采集
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

//! # GStreamer 视频采集
//!
//! 通过 GStreamer 管道读取摄像头或视频文件，作为直播接口的帧源。
//!
//! - 摄像头: `gst://camera/dev/video0?width=640&height=480&fps=30&format=YUY2`
//! - 视频文件: `gst://file/path/to/video.mp4`
//!
//! 可选参数 `rotate=90|180|270` 会在管道中插入 `videoflip`。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 在 `Cargo.toml` 中启用 `gstreamer_input` 特性。
//!
//! ## 安全性注意
//!
//! 管道描述由 URL 拼接而成后直接交给解析器，不应接受不可信的 URL。

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameClock},
  input::{Capture, CaptureError},
};

#[derive(Error, Debug)]
pub enum GStreamerCaptureError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("Unknown GStreamer source '{0}', expected camera or file")]
  UnknownSource(String),
  #[error("Invalid query parameter {0}={1}")]
  InvalidQuery(String, String),
  #[error("GStreamer error: {0}")]
  GStreamer(#[from] gst::glib::Error),
  #[error("Pipeline state change failed: {0}")]
  StateChange(#[from] gst::StateChangeError),
  #[error("Pipeline has no appsink named 'sink'")]
  MissingAppSink,
  #[error("Malformed sample: {0}")]
  Sample(String),
  #[error("Unsupported video format: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;
const DEFAULT_CAMERA_FORMAT: &str = "YUY2";

/// 管道中的一段
#[derive(Debug, Clone, PartialEq)]
enum Stage {
  File(String),
  Camera(CameraSource),
  Rotate(Rotation),
  ConvertToRgb,
}

#[derive(Debug, Clone, PartialEq)]
struct CameraSource {
  device: String,
  /// v4l2src 的 io-mode，缺省时由 GStreamer 决定
  io_mode: Option<u32>,
  format: String,
  width: u32,
  height: u32,
  fps: u32,
}

/// 顺时针旋转角度，对应 videoflip 的 video-direction
#[derive(Debug, Clone, Copy, PartialEq)]
enum Rotation {
  Clockwise,
  Half,
  CounterClockwise,
}

impl Rotation {
  fn parse(value: &str) -> Option<Option<Self>> {
    match value {
      "0" => Some(None),
      "90" => Some(Some(Rotation::Clockwise)),
      "180" => Some(Some(Rotation::Half)),
      "270" => Some(Some(Rotation::CounterClockwise)),
      _ => None,
    }
  }

  fn video_direction(self) -> u32 {
    match self {
      Rotation::Clockwise => 1,
      Rotation::Half => 2,
      Rotation::CounterClockwise => 3,
    }
  }
}

impl Stage {
  fn describe(&self) -> String {
    match self {
      Stage::File(path) => format!("filesrc location={} ! decodebin", path),
      Stage::Camera(camera) => {
        let io_mode = camera
          .io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera.device, io_mode, camera.format, camera.width, camera.height, camera.fps
        )
      }
      Stage::Rotate(rotation) => format!("videoflip video-direction={}", rotation.video_direction()),
      Stage::ConvertToRgb => "videoconvert ! video/x-raw,format=RGB".to_string(),
    }
  }
}

/// 由 `gst://` URL 得到的采集管道描述
#[derive(Debug)]
pub struct GStreamerCapturePipelineBuilder {
  stages: Vec<Stage>,
}

impl FromUrlWithScheme for GStreamerCapturePipelineBuilder {
  const SCHEME: &'static str = "gst";
}

fn query_number(
  query: &HashMap<String, String>,
  key: &str,
  default: u32,
) -> Result<u32, GStreamerCaptureError> {
  match query.get(key) {
    Some(value) => value
      .parse::<u32>()
      .ok()
      .filter(|n| *n > 0 || key == "io-mode")
      .ok_or_else(|| GStreamerCaptureError::InvalidQuery(key.to_string(), value.clone())),
    None => Ok(default),
  }
}

impl GStreamerCapturePipelineBuilder {
  fn camera_source(
    device: &str,
    query: &HashMap<String, String>,
  ) -> Result<CameraSource, GStreamerCaptureError> {
    let io_mode = match query.get("io-mode") {
      Some(_) => Some(query_number(query, "io-mode", 0)?),
      None => None,
    };
    Ok(CameraSource {
      device: device.to_string(),
      io_mode,
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CAMERA_FORMAT.to_string()),
      width: query_number(query, "width", DEFAULT_WIDTH)?,
      height: query_number(query, "height", DEFAULT_HEIGHT)?,
      fps: query_number(query, "fps", DEFAULT_FPS)?,
    })
  }

  fn rotation(query: &HashMap<String, String>) -> Result<Option<Rotation>, GStreamerCaptureError> {
    match query.get("rotate") {
      Some(value) => Rotation::parse(value)
        .ok_or_else(|| GStreamerCaptureError::InvalidQuery("rotate".to_string(), value.clone())),
      None => Ok(None),
    }
  }

  /// 完整的管道描述
  pub fn description(&self) -> String {
    let stages = self
      .stages
      .iter()
      .map(Stage::describe)
      .collect::<Vec<String>>()
      .join(" ! ");
    format!("{} ! appsink max-buffers=2 drop=true name=sink", stages)
  }

  pub fn build(self) -> Result<GStreamerCapture, GStreamerCaptureError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 管道描述: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerCaptureError::MissingAppSink)?;

    let appsink = pipeline
      .by_name("sink")
      .and_then(|sink| sink.downcast::<gst_app::AppSink>().ok())
      .ok_or(GStreamerCaptureError::MissingAppSink)?;

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerCapture {
      pipeline: Some(pipeline),
      appsink,
      clock: FrameClock::default(),
    })
  }
}

impl FromUrl for GStreamerCapturePipelineBuilder {
  type Error = GStreamerCaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerCaptureError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let source = match url.host_str() {
      Some("camera") => Stage::Camera(Self::camera_source(url.path(), &query)?),
      Some("file") => Stage::File(url.path().to_string()),
      other => {
        return Err(GStreamerCaptureError::UnknownSource(
          other.unwrap_or_default().to_string(),
        ));
      }
    };

    let mut stages = vec![source];
    stages.extend(Self::rotation(&query)?.map(Stage::Rotate));
    stages.push(Stage::ConvertToRgb);
    Ok(Self { stages })
  }
}

/// GStreamer 视频采集
///
/// 管理 GStreamer 管道和 appsink；释放时把管道切换到 Null 状态。
pub struct GStreamerCapture {
  pipeline: Option<gst::Pipeline>,
  appsink: gst_app::AppSink,
  clock: FrameClock,
}

impl Capture for GStreamerCapture {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    if self.pipeline.is_none() {
      return Err(CaptureError::Released);
    }
    let sample = self.appsink.pull_sample().map_err(|e| {
      debug!("无法拉取样本: {}", e);
      CaptureError::EndOfStream
    })?;
    let image = convert_sample_to_rgb(&sample)?;
    Ok(self.clock.stamp(image))
  }

  fn release(&mut self) {
    if let Some(pipeline) = self.pipeline.take()
      && let Err(e) = pipeline.set_state(gst::State::Null)
    {
      warn!("无法停止 GStreamer 管道: {}", e);
    }
  }
}

impl Drop for GStreamerCapture {
  fn drop(&mut self) {
    self.release();
  }
}

fn convert_sample_to_rgb(sample: &gst::Sample) -> Result<RgbImage, GStreamerCaptureError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerCaptureError::Sample("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerCaptureError::Sample("样本中没有 caps".to_string()))?;

  let video_info = gst_video::VideoInfo::from_caps(caps)
    .map_err(|e| GStreamerCaptureError::Sample(format!("无法解析视频信息: {}", e)))?;

  let width = video_info.width();
  let height = video_info.height();
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerCaptureError::Sample(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let row_bytes = width as usize * 3;
  let expected_size = stride * (height as usize).saturating_sub(1) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerCaptureError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let swap = match video_info.format() {
    gst_video::VideoFormat::Rgb => false,
    gst_video::VideoFormat::Bgr => true,
    other => return Err(GStreamerCaptureError::UnsupportedFormat(other)),
  };

  let mut rgb = Vec::with_capacity(row_bytes * height as usize);
  for row in data.chunks(stride).take(height as usize) {
    for pixel in row[..row_bytes].chunks_exact(3) {
      if swap {
        rgb.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
      } else {
        rgb.extend_from_slice(pixel);
      }
    }
  }

  RgbImage::from_raw(width, height, rgb).ok_or(GStreamerCaptureError::BufferSizeMismatch {
    expected: expected_size,
    actual: data.len(),
  })
}
