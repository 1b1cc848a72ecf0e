// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/labels.rs - 类别表
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

use thiserror::Error;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Error, Debug, PartialEq)]
pub enum LabelsError {
  #[error("类别表格式错误，位置 {0}: {1}")]
  Malformed(usize, &'static str),
  #[error("类别索引不连续: 期望 {expected}, 实际 {actual}")]
  NonContiguous { expected: usize, actual: usize },
  #[error("类别表为空")]
  Empty,
}

/// 固定的 索引 → 名称 类别表
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
  names: Vec<String>,
}

impl Labels {
  pub fn new(names: Vec<String>) -> Self {
    Self { names }
  }

  pub fn coco() -> Self {
    Self::new(COCO_CLASSES.iter().map(|name| name.to_string()).collect())
  }

  pub fn get(&self, class_id: u32) -> Option<&str> {
    self.names.get(class_id as usize).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 解析 Ultralytics 导出时写入模型元数据的 `names` 字段，
  /// 形如 `{0: 'person', 1: 'bicycle'}`
  pub fn parse_metadata(text: &str) -> Result<Self, LabelsError> {
    let bytes = text.as_bytes();
    let mut pos = skip_ws(bytes, 0);
    if bytes.get(pos) != Some(&b'{') {
      return Err(LabelsError::Malformed(pos, "缺少 '{'"));
    }
    pos += 1;

    let mut names = Vec::new();
    loop {
      pos = skip_ws(bytes, pos);
      match bytes.get(pos) {
        Some(b'}') => break,
        Some(b',') => {
          pos += 1;
          continue;
        }
        Some(b) if b.is_ascii_digit() => {}
        _ => return Err(LabelsError::Malformed(pos, "期望类别索引")),
      }

      let start = pos;
      while bytes.get(pos).is_some_and(u8::is_ascii_digit) {
        pos += 1;
      }
      let index: usize = text[start..pos]
        .parse()
        .map_err(|_| LabelsError::Malformed(start, "类别索引溢出"))?;
      if index != names.len() {
        return Err(LabelsError::NonContiguous {
          expected: names.len(),
          actual: index,
        });
      }

      pos = skip_ws(bytes, pos);
      if bytes.get(pos) != Some(&b':') {
        return Err(LabelsError::Malformed(pos, "缺少 ':'"));
      }
      pos = skip_ws(bytes, pos + 1);

      let quote = match bytes.get(pos) {
        Some(&q @ (b'\'' | b'"')) => q,
        _ => return Err(LabelsError::Malformed(pos, "类别名称缺少引号")),
      };
      let name_start = pos + 1;
      let name_len = bytes[name_start..]
        .iter()
        .position(|&b| b == quote)
        .ok_or(LabelsError::Malformed(name_start, "类别名称未闭合"))?;
      names.push(text[name_start..name_start + name_len].to_string());
      pos = name_start + name_len + 1;
    }

    if names.is_empty() {
      return Err(LabelsError::Empty);
    }
    Ok(Self::new(names))
  }
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
  while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
    pos += 1;
  }
  pos
}
