// 该文件是 Kanjian （看见） 项目的一部分。
// src/detect.rs - 检测结果适配
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

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;

use crate::model::{DetectResult, Labels, Model};

/// 一条检测记录，坐标为输入图像的整数像素坐标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
  pub confidence: f32,
  #[serde(rename = "class")]
  pub class_id: u32,
  pub name: String,
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("{0}")]
  Inference(String),
  #[error("unknown class index {0}")]
  UnknownClass(u32),
}

/// 上传接口与命令行工具返回的 JSON 文档
#[derive(Debug, Serialize)]
pub struct DetectionReport {
  pub detections: Vec<Detection>,
}

/// 对一张图像执行一次推理，并按模型原始顺序转换为检测记录
pub fn detect<M>(model: &M, image: &RgbImage) -> Result<Vec<Detection>, DetectError>
where
  M: Model<Input = RgbImage, Output = DetectResult> + ?Sized,
  M::Error: std::fmt::Display,
{
  if image.width() == 0 || image.height() == 0 {
    return Ok(Vec::new());
  }
  let result = model
    .infer(image)
    .map_err(|e| DetectError::Inference(e.to_string()))?;
  from_result(&result, model.labels())
}

/// 不做过滤与排序；坐标向零截断
pub fn from_result(result: &DetectResult, labels: &Labels) -> Result<Vec<Detection>, DetectError> {
  result
    .items
    .iter()
    .map(|item| {
      let name = labels
        .get(item.class_id)
        .ok_or(DetectError::UnknownClass(item.class_id))?;
      Ok(Detection {
        x1: item.bbox[0] as i32,
        y1: item.bbox[1] as i32,
        x2: item.bbox[2] as i32,
        y2: item.bbox[3] as i32,
        confidence: item.score,
        class_id: item.class_id,
        name: name.to_string(),
      })
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  struct Fixed(Vec<DetectItem>, Labels);

  impl Model for Fixed {
    type Input = RgbImage;
    type Output = DetectResult;
    type Error = String;

    fn infer(&self, _input: &RgbImage) -> Result<DetectResult, String> {
      Ok(self.0.clone().into())
    }

    fn labels(&self) -> &Labels {
      &self.1
    }
  }

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn truncates_coordinates_and_keeps_order() {
    let model = Fixed(
      vec![
        item(2, 0.31, [10.9, 20.2, 30.99, 40.5]),
        item(0, 0.88, [0.4, 1.6, 2.5, 3.7]),
      ],
      Labels::coco(),
    );
    let detections = detect(&model, &RgbImage::new(64, 64)).unwrap();

    assert_eq!(detections.len(), 2);
    assert_eq!(
      (detections[0].x1, detections[0].y1, detections[0].x2, detections[0].y2),
      (10, 20, 30, 40)
    );
    assert_eq!(detections[0].name, "car");
    assert_eq!(detections[1].class_id, 0);
    assert_eq!(detections[1].name, "person");
  }

  #[test]
  fn empty_image_yields_no_detections() {
    let model = Fixed(vec![item(0, 0.9, [0.0; 4])], Labels::coco());
    assert!(detect(&model, &RgbImage::new(0, 0)).unwrap().is_empty());
  }

  #[test]
  fn unknown_class_is_an_error() {
    let labels = Labels::new(vec!["cat".to_string()]);
    let result = DetectResult::from(vec![item(3, 0.5, [0.0; 4])]);
    assert!(matches!(
      from_result(&result, &labels),
      Err(DetectError::UnknownClass(3))
    ));
  }

  #[test]
  fn serializes_with_class_key() {
    let report = DetectionReport {
      detections: vec![Detection {
        x1: 1,
        y1: 2,
        x2: 3,
        y2: 4,
        confidence: 0.5,
        class_id: 16,
        name: "dog".to_string(),
      }],
    };
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(
      value,
      serde_json::json!({
        "detections": [
          {"x1": 1, "y1": 2, "x2": 3, "y2": 4, "confidence": 0.5, "class": 16, "name": "dog"}
        ]
      })
    );
  }
}
