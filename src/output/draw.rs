// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 检测结果绘制
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

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{debug, warn};

use crate::detect::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 10; // 文本基线位于边框左上角上方
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色

/// 未指定字体时依次尝试的系统字体
const SYSTEM_FONTS: &[&str] = &[
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
  "/Library/Fonts/Arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {0}: {1}")]
  FontIo(PathBuf, std::io::Error),
  #[error("无效的字体文件 {0}")]
  InvalidFont(PathBuf),
}

/// 检测结果绘制器：固定颜色的 2 像素边框加 `"{name} {confidence:.2}"` 标签
#[derive(Clone)]
pub struct Draw {
  font: Option<FontArc>,
  font_scale: PxScale,
  color: Rgb<u8>,
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    if font.is_none() {
      warn!("没有可用的字体，检测标签将不会被绘制");
    }
    Self {
      font,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      color: Rgb(BOX_COLOR),
    }
  }

  /// 从指定的字体文件加载；未指定时在常见系统路径中查找
  pub fn from_font_path(path: Option<&Path>) -> Result<Self, DrawError> {
    let font = match path {
      Some(path) => Some(load_font(path)?),
      None => SYSTEM_FONTS
        .iter()
        .map(Path::new)
        .filter(|path| path.exists())
        .find_map(|path| match load_font(path) {
          Ok(font) => Some(font),
          Err(e) => {
            debug!("跳过系统字体: {}", e);
            None
          }
        }),
    };
    Ok(Self::new(font))
  }

  /// 在图像上原地绘制检测结果；没有检测结果时图像保持不变
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_detection(image, detection);
    }
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    if image.width() == 0 || image.height() == 0 {
      return;
    }
    let max_x = i32::try_from(image.width() - 1).unwrap_or(i32::MAX);
    let max_y = i32::try_from(image.height() - 1).unwrap_or(i32::MAX);

    // 坐标先裁剪到图像范围内，超出部分的边框落在图像边缘
    let x = detection.x1.clamp(0, max_x);
    let y = detection.y1.clamp(0, max_y);
    let width = detection.x2.clamp(0, max_x) - x;
    let height = detection.y2.clamp(0, max_y) - y;

    if width > 0 && height > 0 {
      let rect = Rect::at(x, y).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, self.color);

      // 第二个边框加粗
      if width > 1 && height > 1 {
        let inner = Rect::at(x + 1, y + 1).of_size(width as u32 - 1, height as u32 - 1);
        draw_hollow_rect_mut(image, inner, self.color);
      }
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };
    let label = format!("{} {:.2}", detection.name, detection.confidence);
    let ascent = font.as_scaled(self.font_scale).ascent().ceil() as i32;
    let text_y = y.saturating_sub(LABEL_OFFSET).saturating_sub(ascent).max(0);

    draw_text_mut(image, self.color, x, text_y, self.font_scale, font, &label);
    draw_text_mut(image, self.color, x + 1, text_y, self.font_scale, font, &label);
  }
}

fn load_font(path: &Path) -> Result<FontArc, DrawError> {
  let data = std::fs::read(path).map_err(|e| DrawError::FontIo(path.to_path_buf(), e))?;
  let font = FontArc::try_from_vec(data).map_err(|_| DrawError::InvalidFont(path.to_path_buf()))?;
  debug!("已加载字体: {}", path.display());
  Ok(font)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
    Detection {
      x1,
      y1,
      x2,
      y2,
      confidence: 0.9,
      class_id: 0,
      name: "person".to_string(),
    }
  }

  fn noisy_image() -> RgbImage {
    RgbImage::from_fn(48, 32, |x, y| Rgb([(x * 5) as u8, (y * 7) as u8, (x ^ y) as u8]))
  }

  #[test]
  fn empty_detections_leave_image_untouched() {
    let draw = Draw::from_font_path(None).unwrap();
    let original = noisy_image();
    let mut image = original.clone();
    draw.draw_detections(&mut image, &[]);
    assert_eq!(image, original);
  }

  #[test]
  fn draws_a_two_pixel_green_box() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(40, 40);
    draw.draw_detections(&mut image, &[detection(5, 5, 20, 30)]);

    let green = Rgb(BOX_COLOR);
    assert_eq!(*image.get_pixel(5, 5), green);
    assert_eq!(*image.get_pixel(6, 6), green);
    assert_eq!(*image.get_pixel(20, 30), green);
    assert_eq!(*image.get_pixel(19, 29), green);
    assert_eq!(*image.get_pixel(12, 5), green);
    // 边框内部与外部不变
    assert_eq!(*image.get_pixel(12, 15), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(25, 15), Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_outside_the_image_are_clipped() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(10, 10);
    draw.draw_detections(&mut image, &[detection(-5, -5, 50, 50), detection(3, 3, 3, 8)]);
    assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn extreme_coordinates_do_not_overflow() {
    let draw = Draw::new(None);
    let mut image = RgbImage::new(10, 10);
    draw.draw_detections(
      &mut image,
      &[
        detection(i32::MIN, i32::MIN, 5, 5),
        detection(i32::MIN, i32::MIN, i32::MAX, i32::MAX),
        detection(i32::MAX, i32::MAX, i32::MIN, i32::MIN),
        detection(6, i32::MIN, i32::MAX, 5),
      ],
    );
    let green = Rgb(BOX_COLOR);
    assert_eq!(*image.get_pixel(0, 0), green);
    assert_eq!(*image.get_pixel(5, 5), green);
    assert_eq!(*image.get_pixel(9, 9), green);
    assert_eq!(*image.get_pixel(3, 3), Rgb([0, 0, 0]));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    let result = Draw::from_font_path(Some(Path::new("/no/such/font.ttf")));
    assert!(matches!(result, Err(DrawError::FontIo(_, _))));
  }
}
