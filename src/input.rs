// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 采集资源抽象
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

//! 采集资源：每个直播请求独占打开一个摄像头（或其它帧源），
//! 由 [`CaptureGuard`] 保证在任何退出路径上恰好释放一次。

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, frame::Frame};

#[cfg(not(any(
  feature = "read_image_file",
  feature = "v4l_input",
  feature = "gstreamer_input"
)))]
compile_error!("至少需要启用一个采集后端特性: read_image_file、v4l_input 或 gstreamer_input");

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileCapture, ImageFileCaptureError};

#[cfg(feature = "v4l_input")]
mod v4l2_source;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_source::{V4lCapture, V4lCaptureConfig, V4lCaptureError};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerCapture, GStreamerCaptureError, GStreamerCapturePipelineBuilder,
};

#[derive(Error, Debug)]
pub enum CaptureError {
  #[cfg(feature = "read_image_file")]
  #[error("Image file capture error: {0}")]
  ImageFile(#[from] ImageFileCaptureError),
  #[cfg(feature = "v4l_input")]
  #[error("V4L capture error: {0}")]
  V4l(#[from] V4lCaptureError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer capture error: {0}")]
  GStreamer(#[from] GStreamerCaptureError),
  #[error("Device error: {0}")]
  Device(String),
  #[error("End of stream")]
  EndOfStream,
  #[error("Capture already released")]
  Released,
  #[error("URI scheme mismatch: {0}")]
  SchemeMismatch(String),
}

/// 一个可以逐帧读取的采集资源
pub trait Capture {
  /// 阻塞读取一帧；失败即表示该采集不再可用
  fn read_frame(&mut self) -> Result<Frame, CaptureError>;

  /// 释放底层设备
  fn release(&mut self);
}

impl<C: Capture + ?Sized> Capture for Box<C> {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    (**self).read_frame()
  }

  fn release(&mut self) {
    (**self).release()
  }
}

/// 采集资源的作用域守卫
///
/// `release` 只会转发一次：显式调用或在 drop 时（客户端断开、panic 展开等）。
pub struct CaptureGuard<C: Capture> {
  inner: C,
  released: bool,
}

impl<C: Capture> CaptureGuard<C> {
  pub fn new(inner: C) -> Self {
    Self {
      inner,
      released: false,
    }
  }

  pub fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    if self.released {
      return Err(CaptureError::Released);
    }
    self.inner.read_frame()
  }

  pub fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    self.inner.release();
    info!("采集设备已释放");
  }

  pub fn is_released(&self) -> bool {
    self.released
  }
}

impl<C: Capture> Drop for CaptureGuard<C> {
  fn drop(&mut self) {
    self.release();
  }
}

/// 为每个直播请求打开一个新的采集资源
///
/// 打开动作发生在生产者线程上，所以返回的采集对象不要求 `Send`。
pub trait CaptureOpener: Send + Sync {
  fn open(&self) -> Result<Box<dyn Capture>, CaptureError>;
}

/// 根据 URL 方案打开采集后端
#[derive(Debug, Clone)]
pub struct UrlCaptureOpener {
  url: Url,
}

impl UrlCaptureOpener {
  pub fn new(url: Url) -> Self {
    Self { url }
  }
}

impl CaptureOpener for UrlCaptureOpener {
  fn open(&self) -> Result<Box<dyn Capture>, CaptureError> {
    debug!("打开采集源: {}", self.url);
    let capture = CaptureWrapper::from_url(&self.url)?;
    Ok(Box::new(capture))
  }
}

pub enum CaptureWrapper {
  #[cfg(feature = "read_image_file")]
  ImageFile(ImageFileCapture),
  #[cfg(feature = "v4l_input")]
  V4l(V4lCapture),
  #[cfg(feature = "gstreamer_input")]
  GStreamer(GStreamerCapture),
}

impl FromUrl for CaptureWrapper {
  type Error = CaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileCapture::SCHEME {
        return Ok(CaptureWrapper::ImageFile(ImageFileCapture::from_url(url)?));
      }
    }
    #[cfg(feature = "v4l_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4lCapture::SCHEME {
        return Ok(CaptureWrapper::V4l(V4lCapture::from_url(url)?));
      }
    }
    #[cfg(feature = "gstreamer_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == GStreamerCapturePipelineBuilder::SCHEME {
        let capture = GStreamerCapturePipelineBuilder::from_url(url)?.build()?;
        return Ok(CaptureWrapper::GStreamer(capture));
      }
    }
    Err(CaptureError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Capture for CaptureWrapper {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    match self {
      #[cfg(feature = "read_image_file")]
      CaptureWrapper::ImageFile(capture) => capture.read_frame(),
      #[cfg(feature = "v4l_input")]
      CaptureWrapper::V4l(capture) => capture.read_frame(),
      #[cfg(feature = "gstreamer_input")]
      CaptureWrapper::GStreamer(capture) => capture.read_frame(),
    }
  }

  fn release(&mut self) {
    match self {
      #[cfg(feature = "read_image_file")]
      CaptureWrapper::ImageFile(capture) => capture.release(),
      #[cfg(feature = "v4l_input")]
      CaptureWrapper::V4l(capture) => capture.release(),
      #[cfg(feature = "gstreamer_input")]
      CaptureWrapper::GStreamer(capture) => capture.release(),
    }
  }
}
