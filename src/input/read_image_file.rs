// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 静态图片帧源
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, FrameClock},
  input::{Capture, CaptureError},
};

#[derive(Error, Debug)]
pub enum ImageFileCaptureError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(image::ImageError),
  #[error("Invalid query parameter '{0}': {1}")]
  InvalidQuery(String, String),
}

impl From<std::io::Error> for ImageFileCaptureError {
  fn from(err: std::io::Error) -> Self {
    ImageFileCaptureError::IoError(err)
  }
}

impl From<image::ImageError> for ImageFileCaptureError {
  fn from(err: image::ImageError) -> Self {
    ImageFileCaptureError::ImageLoadError(err)
  }
}

/// 反复回放同一张图片的帧源，用于没有摄像头的主机和演示
///
/// `image:///path/picture.jpg?repeat=N`，`repeat=0` 表示无限回放，默认 1 次。
pub struct ImageFileCapture {
  image: Option<RgbImage>,
  repeat: u64,
  served: u64,
  clock: FrameClock,
}

impl FromUrlWithScheme for ImageFileCapture {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileCapture {
  type Error = ImageFileCaptureError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileCaptureError::SchemaMismatch);
    }

    let mut repeat = 1;
    for (key, value) in url.query_pairs() {
      if key == "repeat" {
        repeat = value
          .parse::<u64>()
          .map_err(|e| ImageFileCaptureError::InvalidQuery(key.to_string(), e.to_string()))?;
      }
    }

    let path = url.path();
    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .to_rgb8();
    debug!(
      "载入图片帧源: {} ({}x{}), 回放 {} 次",
      path,
      image.width(),
      image.height(),
      repeat
    );

    Ok(Self::from_image(image, repeat))
  }
}

impl ImageFileCapture {
  pub fn from_image(image: RgbImage, repeat: u64) -> Self {
    Self {
      image: Some(image),
      repeat,
      served: 0,
      clock: FrameClock::default(),
    }
  }
}

impl Capture for ImageFileCapture {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    if self.repeat != 0 && self.served >= self.repeat {
      return Err(CaptureError::EndOfStream);
    }
    let image = self.image.as_ref().ok_or(CaptureError::Released)?.clone();
    self.served += 1;
    Ok(self.clock.stamp(image))
  }

  fn release(&mut self) {
    self.image.take();
  }
}
