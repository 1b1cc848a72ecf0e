// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 直播推理任务
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

use std::{fmt::Display, sync::Arc, thread};

use bytes::Bytes;
use image::RgbImage;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::{
  detect::{DetectError, detect},
  input::{Capture, CaptureError, CaptureGuard, CaptureOpener},
  model::{DetectResult, Model, ModelHandle},
  output::{
    Draw,
    mjpeg::{self, DEFAULT_JPEG_QUALITY},
  },
};

pub const DEFAULT_STREAM_BUFFER: usize = 2;

#[derive(Error, Debug)]
pub enum StreamError {
  #[error("采集失败: {0}")]
  Capture(#[from] CaptureError),
  #[error("检测失败: {0}")]
  Detect(#[from] DetectError),
  #[error("JPEG 编码失败: {0}")]
  Encode(#[from] image::ImageError),
}

/// 按需拉取的 multipart 分片序列
///
/// 每次 `next` 读取一帧、检测、绘制、编码并封装为一个分片。
/// 任何一步失败都会结束序列并立即释放采集设备，之后始终返回 `None`。
pub struct FrameParts<C: Capture, M> {
  capture: CaptureGuard<C>,
  model: ModelHandle<M>,
  draw: Arc<Draw>,
  jpeg_quality: u8,
  emitted: u64,
}

impl<C, M> FrameParts<C, M>
where
  C: Capture,
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: Display,
{
  pub fn new(capture: CaptureGuard<C>, model: ModelHandle<M>, draw: Arc<Draw>) -> Self {
    Self {
      capture,
      model,
      draw,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      emitted: 0,
    }
  }

  pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
    self.jpeg_quality = quality;
    self
  }

  pub fn emitted(&self) -> u64 {
    self.emitted
  }

  fn render_next(&mut self) -> Result<Bytes, StreamError> {
    let frame = self.capture.read_frame()?;
    let index = frame.index;
    let mut image = frame.into_image();

    let now = std::time::Instant::now();
    let detections = detect(&*self.model, &image)?;
    let elapsed = now.elapsed();
    self.draw.draw_detections(&mut image, &detections);
    let jpeg = mjpeg::encode_jpeg(&image, self.jpeg_quality)?;
    debug!(
      "第 {} 帧: {} 个目标，推理耗时 {:.2?}，JPEG {} 字节",
      index,
      detections.len(),
      elapsed,
      jpeg.len()
    );

    Ok(mjpeg::multipart_part(&jpeg))
  }
}

impl<C, M> Iterator for FrameParts<C, M>
where
  C: Capture,
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: Display,
{
  type Item = Bytes;

  fn next(&mut self) -> Option<Self::Item> {
    if self.capture.is_released() {
      return None;
    }
    match self.render_next() {
      Ok(part) => {
        self.emitted += 1;
        Some(part)
      }
      Err(StreamError::Capture(CaptureError::EndOfStream)) => {
        info!("采集结束，共输出 {} 帧", self.emitted);
        self.capture.release();
        None
      }
      Err(e) => {
        warn!("直播流终止: {}", e);
        self.capture.release();
        None
      }
    }
  }
}

impl<C, M> std::iter::FusedIterator for FrameParts<C, M>
where
  C: Capture,
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: Display,
{
}

/// 为一个直播请求启动生产者线程
///
/// 采集设备在线程内打开，分片经由有界通道交给响应体。
/// 接收端被丢弃（客户端断开）后，下一次发送失败，循环退出并释放设备。
pub struct LiveStreamTask<M> {
  model: ModelHandle<M>,
  draw: Arc<Draw>,
  opener: Arc<dyn CaptureOpener>,
  jpeg_quality: u8,
  buffer: usize,
}

impl<M> LiveStreamTask<M>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: Display,
{
  pub fn new(model: ModelHandle<M>, draw: Arc<Draw>, opener: Arc<dyn CaptureOpener>) -> Self {
    Self {
      model,
      draw,
      opener,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      buffer: DEFAULT_STREAM_BUFFER,
    }
  }

  pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
    self.jpeg_quality = quality;
    self
  }

  pub fn with_buffer(mut self, buffer: usize) -> Self {
    self.buffer = buffer.max(1);
    self
  }

  pub fn spawn(self) -> ReceiverStream<Bytes> {
    let (tx, rx) = mpsc::channel(self.buffer);
    let spawned = thread::Builder::new()
      .name("kanjian-stream".to_string())
      .spawn(move || self.run(tx));
    if let Err(e) = spawned {
      // 发送端随闭包一起被丢弃，响应体会立即结束
      error!("无法启动直播线程: {}", e);
    }
    ReceiverStream::new(rx)
  }

  fn run(self, tx: mpsc::Sender<Bytes>) {
    info!("开始直播任务...");
    let capture = match self.opener.open() {
      Ok(capture) => capture,
      Err(e) => {
        warn!("无法打开采集设备: {}", e);
        return;
      }
    };

    let mut parts = FrameParts::new(CaptureGuard::new(capture), self.model, self.draw)
      .with_jpeg_quality(self.jpeg_quality);
    for part in parts.by_ref() {
      if tx.blocking_send(part).is_err() {
        info!("客户端已断开，停止直播");
        break;
      }
    }
    info!("直播任务结束，共输出 {} 帧", parts.emitted());
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::{
    frame::{Frame, FrameClock},
    model::{DetectItem, Labels},
  };

  struct OneBox(Labels);

  impl Model for OneBox {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
      Ok(
        vec![DetectItem {
          class_id: 0,
          score: 0.75,
          bbox: [1.0, 1.0, 6.0, 6.0],
        }]
        .into(),
      )
    }

    fn labels(&self) -> &Labels {
      &self.0
    }
  }

  struct Failing;

  impl Model for Failing {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
      Err("bad input".to_string())
    }

    fn labels(&self) -> &Labels {
      unreachable!()
    }
  }

  struct Frames {
    left: usize,
    clock: FrameClock,
    releases: Arc<AtomicUsize>,
  }

  impl Capture for Frames {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
      if self.left == 0 {
        return Err(CaptureError::Device("unplugged".to_string()));
      }
      self.left -= 1;
      Ok(self.clock.stamp(RgbImage::new(8, 8)))
    }

    fn release(&mut self) {
      self.releases.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn frames(left: usize) -> (CaptureGuard<Frames>, Arc<AtomicUsize>) {
    let releases = Arc::new(AtomicUsize::new(0));
    let capture = Frames {
      left,
      clock: FrameClock::default(),
      releases: releases.clone(),
    };
    (CaptureGuard::new(capture), releases)
  }

  #[test]
  fn read_failure_ends_sequence_and_releases() {
    let (guard, releases) = frames(2);
    let mut parts = FrameParts::new(
      guard,
      ModelHandle::new(OneBox(Labels::coco())),
      Arc::new(Draw::new(None)),
    );

    assert!(parts.next().is_some());
    assert!(parts.next().is_some());
    assert_eq!(releases.load(Ordering::SeqCst), 0);
    assert!(parts.next().is_none());
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(parts.next().is_none());
    drop(parts);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn inference_failure_ends_sequence() {
    let (guard, releases) = frames(5);
    let mut parts = FrameParts::new(guard, ModelHandle::new(Failing), Arc::new(Draw::new(None)));

    assert!(parts.next().is_none());
    assert_eq!(parts.emitted(), 0);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn parts_carry_annotated_jpeg() {
    let (guard, _) = frames(1);
    let mut parts = FrameParts::new(
      guard,
      ModelHandle::new(OneBox(Labels::coco())),
      Arc::new(Draw::new(None)),
    );
    let part = parts.next().unwrap();
    let header = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
    assert!(part.starts_with(header));
    assert_eq!(&part[header.len()..header.len() + 2], &[0xFF, 0xD8]);
    assert!(part.ends_with(b"\r\n"));
  }
}
