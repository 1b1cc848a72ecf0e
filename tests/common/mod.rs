// 该文件是 Kanjian （看见） 项目的一部分。
// tests/common/mod.rs - 集成测试公共工具
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

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{
  Arc, Mutex,
  atomic::{AtomicUsize, Ordering},
  mpsc,
};

use axum::Router;
use image::{ImageFormat, Rgb, RgbImage};

use kanjian::{
  frame::{Frame, FrameClock},
  input::{Capture, CaptureError, CaptureOpener},
  model::{DetectItem, DetectResult, Labels, Model, ModelHandle},
  output::Draw,
  server::{AppState, ServerConfig, router},
};

/// 返回固定检测结果的模型
pub struct FakeModel {
  items: Vec<DetectItem>,
  labels: Labels,
  pub calls: AtomicUsize,
}

impl FakeModel {
  pub fn new(items: Vec<DetectItem>) -> Self {
    Self {
      items,
      labels: Labels::coco(),
      calls: AtomicUsize::new(0),
    }
  }

  pub fn empty() -> Self {
    Self::new(Vec::new())
  }
}

impl Model for FakeModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = String;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(self.items.clone().into())
  }

  fn labels(&self) -> &Labels {
    &self.labels
  }
}

pub fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
  DetectItem {
    class_id,
    score,
    bbox,
  }
}

/// 释放记录：计数并通知等待者
#[derive(Clone)]
pub struct Releases {
  count: Arc<AtomicUsize>,
  notify: Arc<Mutex<mpsc::Sender<()>>>,
}

impl Releases {
  pub fn new() -> (Self, mpsc::Receiver<()>) {
    let (tx, rx) = mpsc::channel();
    let releases = Self {
      count: Arc::new(AtomicUsize::new(0)),
      notify: Arc::new(Mutex::new(tx)),
    };
    (releases, rx)
  }

  pub fn count(&self) -> usize {
    self.count.load(Ordering::SeqCst)
  }

  fn record(&self) {
    self.count.fetch_add(1, Ordering::SeqCst);
    if let Ok(tx) = self.notify.lock() {
      let _ = tx.send(());
    }
  }
}

/// 输出 `frames` 帧（`None` 表示无限）后读取失败的采集设备
pub struct ScriptedCapture {
  frames: Option<usize>,
  clock: FrameClock,
  releases: Releases,
}

impl Capture for ScriptedCapture {
  fn read_frame(&mut self) -> Result<Frame, CaptureError> {
    match self.frames.as_mut() {
      Some(0) => return Err(CaptureError::Device("read failed".to_string())),
      Some(left) => *left -= 1,
      None => {}
    }
    Ok(self.clock.stamp(RgbImage::from_pixel(32, 24, Rgb([40, 80, 120]))))
  }

  fn release(&mut self) {
    self.releases.record();
  }
}

pub struct ScriptedOpener {
  frames: Option<usize>,
  pub releases: Releases,
  pub opens: AtomicUsize,
}

impl ScriptedOpener {
  pub fn new(frames: Option<usize>) -> (Arc<Self>, mpsc::Receiver<()>) {
    let (releases, rx) = Releases::new();
    let opener = Self {
      frames,
      releases,
      opens: AtomicUsize::new(0),
    };
    (Arc::new(opener), rx)
  }
}

impl CaptureOpener for ScriptedOpener {
  fn open(&self) -> Result<Box<dyn Capture>, CaptureError> {
    self.opens.fetch_add(1, Ordering::SeqCst);
    Ok(Box::new(ScriptedCapture {
      frames: self.frames,
      clock: FrameClock::default(),
      releases: self.releases.clone(),
    }))
  }
}

/// 打不开设备的采集来源
pub struct UnavailableOpener;

impl CaptureOpener for UnavailableOpener {
  fn open(&self) -> Result<Box<dyn Capture>, CaptureError> {
    Err(CaptureError::Device("no camera".to_string()))
  }
}

pub fn app(model: FakeModel, opener: Arc<dyn CaptureOpener>) -> Router {
  let state = AppState::new(
    ModelHandle::new(model),
    Arc::new(Draw::new(None)),
    opener,
    ServerConfig::default(),
  );
  router(state)
}

pub const BOUNDARY: &str = "kanjian-test-boundary";

pub fn multipart_content_type() -> String {
  format!("multipart/form-data; boundary={}", BOUNDARY)
}

/// 构造只含一个文件字段的 multipart 请求体
pub fn multipart_file(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
  let mut body = Vec::new();
  body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
  body.extend_from_slice(
    format!(
      "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
      field, filename
    )
    .as_bytes(),
  );
  body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
  body.extend_from_slice(content);
  body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
  body
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 128]));
  let mut png = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
    .unwrap();
  png
}
