// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use std::time::Instant;

use image::RgbImage;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒，相对于采集开始）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn into_image(self) -> RgbImage {
    self.image
  }
}

/// 帧计数器，为采集后端生成连续的帧索引与时间戳
#[derive(Debug)]
pub struct FrameClock {
  next_index: u64,
  start_time: Instant,
}

impl Default for FrameClock {
  fn default() -> Self {
    Self {
      next_index: 0,
      start_time: Instant::now(),
    }
  }
}

impl FrameClock {
  pub fn stamp(&mut self, image: RgbImage) -> Frame {
    let frame = Frame {
      image,
      index: self.next_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };
    self.next_index += 1;
    frame
  }
}
