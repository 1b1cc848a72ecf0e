// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 ONNX 模型
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

use std::sync::Mutex;

use image::{Rgb, RgbImage, imageops::FilterType};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, Labels, Model},
};

const YOLOV8_SCHEME: &str = "yolov8";
const YOLOV8_PAD_VALUE: u8 = 114;
const YOLOV8_BOX_CHANNELS: usize = 4;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("无效的模型参数 '{0}': {1}")]
  InvalidParam(String, String),
  #[error("输入图像尺寸无效: {0}x{1}")]
  EmptyImage(u32, u32),
  #[error("模型输出形状无效: {0:?}")]
  OutputShape(Vec<i64>),
  #[error("推理会话已损坏")]
  SessionPoisoned,
}

/// 推理参数，默认值与 Ultralytics 的 predict 一致
#[derive(Debug, Clone, PartialEq)]
pub struct Yolov8Params {
  /// 网络输入边长
  pub imgsz: u32,
  /// 置信度阈值
  pub conf: f32,
  /// NMS IoU 阈值
  pub iou: f32,
  /// 每张图最多保留的检测数
  pub max_det: usize,
  /// ONNX Runtime 的 intra-op 线程数
  pub threads: usize,
}

impl Default for Yolov8Params {
  fn default() -> Self {
    Self {
      imgsz: 640,
      conf: 0.25,
      iou: 0.7,
      max_det: 300,
      threads: 4,
    }
  }
}

/// YOLOv8 检测器
///
/// ONNX Runtime 的会话每次运行都需要独占访问，所以放在互斥锁中；
/// 多个请求共享同一个模型时推理是串行的。
pub struct Yolov8 {
  session: Mutex<Session>,
  labels: Labels,
  params: Yolov8Params,
}

pub struct Yolov8Builder {
  model_path: String,
  params: Yolov8Params,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = YOLOV8_SCHEME;
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  /// `yolov8:yolov8s.onnx` 或 `yolov8:///opt/models/yolov8s.onnx?conf=0.4&imgsz=640`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != YOLOV8_SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        YOLOV8_SCHEME
      )));
    }

    let model_path = url.path().to_string();
    if model_path.is_empty() || model_path == "/" {
      return Err(Yolov8Error::ModelPathError("缺少模型文件路径".to_string()));
    }

    let mut params = Yolov8Params::default();
    for (key, value) in url.query_pairs() {
      let invalid = |e: &dyn std::fmt::Display| Yolov8Error::InvalidParam(key.to_string(), e.to_string());
      match key.as_ref() {
        "imgsz" => params.imgsz = value.parse().map_err(|e| invalid(&e))?,
        "conf" => params.conf = value.parse().map_err(|e| invalid(&e))?,
        "iou" => params.iou = value.parse().map_err(|e| invalid(&e))?,
        "max_det" => params.max_det = value.parse().map_err(|e| invalid(&e))?,
        "threads" => params.threads = value.parse().map_err(|e| invalid(&e))?,
        other => warn!("忽略未知的模型参数: {}", other),
      }
    }
    if params.imgsz == 0 || params.imgsz % 32 != 0 {
      return Err(Yolov8Error::InvalidParam(
        "imgsz".to_string(),
        format!("{} 不是 32 的正整数倍", params.imgsz),
      ));
    }

    Ok(Yolov8Builder { model_path, params })
  }
}

impl Yolov8Builder {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      params: Yolov8Params::default(),
    }
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(self.params.threads)?
      .commit_from_memory(&model_data)?;

    let labels = match session.metadata().and_then(|meta| meta.custom("names")) {
      Ok(Some(names)) => match Labels::parse_metadata(&names) {
        Ok(labels) => labels,
        Err(e) => {
          warn!("模型元数据中的类别表无法解析 ({}), 使用 COCO 类别表", e);
          Labels::coco()
        }
      },
      Ok(None) => {
        debug!("模型未携带类别表, 使用 COCO 类别表");
        Labels::coco()
      }
      Err(e) => {
        warn!("无法读取模型元数据 ({}), 使用 COCO 类别表", e);
        Labels::coco()
      }
    };
    info!("模型类别数: {}", labels.len());

    Ok(Yolov8 {
      session: Mutex::new(session),
      labels,
      params: self.params,
    })
  }
}

impl Model for Yolov8 {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (width, height) = input.dimensions();
    if width == 0 || height == 0 {
      return Err(Yolov8Error::EmptyImage(width, height));
    }

    debug!("预处理输入图像 {}x{}", width, height);
    let (data, letterbox) = letterbox(input, self.params.imgsz);
    let size = self.params.imgsz as usize;
    let tensor = Tensor::from_array(([1usize, 3, size, size], data))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| Yolov8Error::SessionPoisoned)?;
    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![tensor])?;
    let (shape, output) = outputs[0].try_extract_tensor::<f32>()?;
    let shape: Vec<i64> = shape.iter().copied().collect();

    let items = postprocess(
      &shape,
      output,
      &letterbox,
      &self.params,
      self.labels.len(),
      (width, height),
    )?;
    debug!("检测到 {} 个物体", items.len());

    Ok(items.into())
  }

  fn labels(&self) -> &Labels {
    &self.labels
  }
}

/// 图像缩放到网络输入后的几何变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
}

impl Letterbox {
  /// 网络输入坐标 → 原图坐标
  fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
    ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
  }
}

/// 保持宽高比缩放并居中填充灰色，输出 NCHW、归一化到 [0, 1] 的张量数据
pub(crate) fn letterbox(image: &RgbImage, size: u32) -> (Vec<f32>, Letterbox) {
  let (width, height) = image.dimensions();
  let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
  let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
  let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);

  let left = ((size - new_w) as f32 / 2.0 - 0.1).round().max(0.0) as u32;
  let top = ((size - new_h) as f32 / 2.0 - 0.1).round().max(0.0) as u32;

  let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLOV8_PAD_VALUE; 3]));
  if (new_w, new_h) == (width, height) {
    image::imageops::replace(&mut canvas, image, left as i64, top as i64);
  } else {
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    image::imageops::replace(&mut canvas, &resized, left as i64, top as i64);
  }

  let plane = (size * size) as usize;
  let mut data = vec![0.0f32; 3 * plane];
  for (idx, pixel) in canvas.pixels().enumerate() {
    for c in 0..3 {
      data[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }

  (
    data,
    Letterbox {
      scale,
      pad_x: left as f32,
      pad_y: top as f32,
    },
  )
}

/// 解码 `[1, 4 + nc, N]`（或转置的 `[1, N, 4 + nc]`）输出，
/// 过滤低置信度候选、按类别做 NMS，并映射回原图坐标
pub(crate) fn postprocess(
  shape: &[i64],
  output: &[f32],
  letterbox: &Letterbox,
  params: &Yolov8Params,
  num_classes: usize,
  (width, height): (u32, u32),
) -> Result<Vec<DetectItem>, Yolov8Error> {
  if shape.len() != 3 || shape[0] != 1 || shape[1] <= 0 || shape[2] <= 0 {
    return Err(Yolov8Error::OutputShape(shape.to_vec()));
  }

  let (dim1, dim2) = (shape[1] as usize, shape[2] as usize);
  let expected = YOLOV8_BOX_CHANNELS + num_classes;
  let (channels, anchors, transposed) = if dim1 == expected {
    (dim1, dim2, false)
  } else if dim2 == expected {
    (dim2, dim1, true)
  } else {
    // 类别表与模型输出不一致时，按锚点数多于通道数推断布局
    warn!(
      "模型输出形状 {:?} 与类别数 {} 不一致",
      shape, num_classes
    );
    if dim1 <= dim2 {
      (dim1, dim2, false)
    } else {
      (dim2, dim1, true)
    }
  };
  if channels <= YOLOV8_BOX_CHANNELS || output.len() < channels * anchors {
    return Err(Yolov8Error::OutputShape(shape.to_vec()));
  }
  let num_classes = channels - YOLOV8_BOX_CHANNELS;

  let at = |c: usize, i: usize| {
    if transposed {
      output[i * channels + c]
    } else {
      output[c * anchors + i]
    }
  };

  let (max_x, max_y) = (width as f32, height as f32);
  let mut candidates = Vec::new();
  for i in 0..anchors {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(YOLOV8_BOX_CHANNELS + c, i)))
      .fold((0usize, f32::MIN), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if !(score > params.conf) {
      continue;
    }

    let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
    let (x_min, y_min) = letterbox.unmap(cx - w / 2.0, cy - h / 2.0);
    let (x_max, y_max) = letterbox.unmap(cx + w / 2.0, cy + h / 2.0);

    candidates.push(DetectItem {
      class_id: class_id as u32,
      score: score.min(1.0),
      bbox: [
        x_min.clamp(0.0, max_x),
        y_min.clamp(0.0, max_y),
        x_max.clamp(0.0, max_x),
        y_max.clamp(0.0, max_y),
      ],
    });
  }

  debug!("置信度过滤后剩余 {} 个候选框", candidates.len());
  Ok(nms(candidates, params.iou, params.max_det))
}

/// 按类别的非极大值抑制，结果按置信度降序
fn nms(mut items: Vec<DetectItem>, iou_threshold: f32, max_det: usize) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut keep: Vec<DetectItem> = Vec::new();
  for item in items {
    if keep.len() >= max_det {
      break;
    }
    let suppressed = keep
      .iter()
      .any(|kept| kept.class_id == item.class_id && iou(&kept.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      keep.push(item);
    }
  }
  keep
}

/// 计算两个边界框的 IoU
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
