// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头采集
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

use std::pin::Pin;

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture as _;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameClock},
  input::{Capture, CaptureError},
};

#[derive(Error, Debug)]
pub enum V4lCaptureError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid query parameter {0}={1}")]
  InvalidQuery(String, String),
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("V4L error: {0}")]
  V4lError(String),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
  #[error("Frame decode error: {0}")]
  DecodeError(image::ImageError),
  #[error("Captured buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

impl From<std::io::Error> for V4lCaptureError {
  fn from(err: std::io::Error) -> Self {
    V4lCaptureError::IoError(err)
  }
}

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const BUFFER_COUNT: u32 = 4;

/// V4L2 摄像头采集
///
/// `v4l:///dev/video0?width=640&height=480&fourcc=MJPG`
///
/// 由于 v4l 库的 Stream 需要引用 Device，我们使用 Pin<Box<Device>> 来保证
/// Device 的内存地址稳定，从而可以安全地创建引用它的 Stream。
pub struct V4lCapture {
  device_path: String,
  /// 捕获流（生命周期与 device 关联，必须先于 device 释放）
  stream: Option<Stream<'static>>,
  device: Option<Pin<Box<Device>>>,
  fourcc: FourCC,
  width: u32,
  height: u32,
  clock: FrameClock,
}

impl FromUrlWithScheme for V4lCapture {
  const SCHEME: &'static str = "v4l";
}

/// 从 URL 解析出的设备参数，解析时不会访问设备
#[derive(Debug, Clone, PartialEq)]
pub struct V4lCaptureConfig {
  pub device_path: String,
  pub width: u32,
  pub height: u32,
  pub fourcc: FourCC,
}

impl FromUrlWithScheme for V4lCaptureConfig {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lCaptureConfig {
  type Error = V4lCaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lCaptureError::SchemaMismatch);
    }

    // v4l:///dev/video0 或 v4l://localhost/dev/video0
    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE.to_string()
    } else {
      url.path().to_string()
    };

    let mut config = Self {
      device_path,
      width: DEFAULT_WIDTH,
      height: DEFAULT_HEIGHT,
      fourcc: FourCC::new(b"MJPG"),
    };
    for (key, value) in url.query_pairs() {
      let invalid = || V4lCaptureError::InvalidQuery(key.to_string(), value.to_string());
      match key.as_ref() {
        "width" => config.width = value.parse().map_err(|_| invalid())?,
        "height" => config.height = value.parse().map_err(|_| invalid())?,
        "fourcc" => {
          let code: [u8; 4] = value.as_bytes().try_into().map_err(|_| invalid())?;
          config.fourcc = FourCC::new(&code);
        }
        other => warn!("忽略未知的 V4L 参数: {}", other),
      }
    }
    if config.width == 0 || config.height == 0 {
      return Err(V4lCaptureError::InvalidQuery(
        "size".to_string(),
        format!("{}x{}", config.width, config.height),
      ));
    }

    Ok(config)
  }
}

impl FromUrl for V4lCapture {
  type Error = V4lCaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let config = V4lCaptureConfig::from_url(url)?;
    Self::open(&config.device_path, config.width, config.height, config.fourcc)
  }
}

impl V4lCapture {
  /// 打开设备并开始采集
  pub fn open(
    device_path: &str,
    width: u32,
    height: u32,
    fourcc: FourCC,
  ) -> Result<Self, V4lCaptureError> {
    let device = Box::pin(
      Device::with_path(device_path)
        .map_err(|e| V4lCaptureError::V4lError(format!("无法打开设备 {}: {}", device_path, e)))?,
    );

    // 设置视频格式，驱动可能会回退到其它格式
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = fourcc;
    let format = device.set_format(&format)?;
    info!(
      "V4L2 设备 {} 已打开: {}x{} {}",
      device_path, format.width, format.height, format.fourcc
    );

    let mut capture = Self {
      device_path: device_path.to_string(),
      stream: None,
      device: Some(device),
      fourcc: format.fourcc,
      width: format.width,
      height: format.height,
      clock: FrameClock::default(),
    };

    let Some(device) = capture.device.as_ref() else {
      return Err(V4lCaptureError::V4lError("设备不可用".to_string()));
    };
    let device_ref: &Device = device;
    // SAFETY: device 被 Pin<Box> 固定在堆上，不会移动；
    // stream 与 device 存储在同一个结构体中，release 与 drop 都先释放 stream
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, BUFFER_COUNT)
        .map_err(|e| V4lCaptureError::V4lError(format!("无法创建捕获流: {}", e)))?
    };
    capture.stream = Some(stream);

    Ok(capture)
  }

  fn decode(&self, data: &[u8]) -> Result<RgbImage, V4lCaptureError> {
    match &self.fourcc.repr {
      b"MJPG" | b"JPEG" => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map(|image| image.to_rgb8())
        .map_err(V4lCaptureError::DecodeError),
      b"YUYV" => {
        let expected = (self.width * self.height * 2) as usize;
        if data.len() < expected {
          return Err(V4lCaptureError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          });
        }
        let rgb = yuyv_to_rgb(&data[..expected]);
        RgbImage::from_raw(self.width, self.height, rgb).ok_or(
          V4lCaptureError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          },
        )
      }
      b"RGB3" => {
        let expected = (self.width * self.height * 3) as usize;
        if data.len() < expected {
          return Err(V4lCaptureError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          });
        }
        RgbImage::from_raw(self.width, self.height, data[..expected].to_vec()).ok_or(
          V4lCaptureError::BufferSizeMismatch {
            expected,
            actual: data.len(),
          },
        )
      }
      _ => Err(V4lCaptureError::UnsupportedPixelFormat(
        self.fourcc.to_string(),
      )),
    }
  }
}

/// 将 YUYV 格式转换为 RGB
fn yuyv_to_rgb(yuyv: &[u8]) -> Vec<u8> {
  let mut rgb = Vec::with_capacity(yuyv.len() / 2 * 3);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

impl Capture for V4lCapture {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    let stream = self.stream.as_mut().ok_or(CaptureError::Released)?;
    let (buffer, meta) = stream
      .next()
      .map_err(|e| V4lCaptureError::V4lError(format!("无法捕获帧: {}", e)))?;

    // MJPEG 帧长度可变，只取有效部分
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used == 0 { buffer } else { &buffer[..used] };
    let data = data.to_vec();

    let image = self.decode(&data)?;
    Ok(self.clock.stamp(image))
  }

  fn release(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
    if self.device.take().is_some() {
      debug!("V4L2 设备 {} 已关闭", self.device_path);
    }
  }
}

impl Drop for V4lCapture {
  fn drop(&mut self) {
    self.release();
  }
}
