// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 检测模型抽象
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

use std::{ops::Deref, sync::Arc};

use tracing::info;

mod labels;
pub use self::labels::{COCO_CLASSES, Labels, LabelsError};

mod yolov8;
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error, Yolov8Params};

pub trait Model {
  type Input;
  type Output;
  type Error;

  /// 执行一次推理；推理不修改模型状态
  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 模型自带的类别表
  fn labels(&self) -> &Labels;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，输入图像的像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

/// 进程级模型句柄
///
/// 启动时构造一次，之后以克隆的方式注入到每个请求处理器中，不会按请求重建。
#[derive(Debug)]
pub struct ModelHandle<M> {
  inner: Arc<M>,
}

impl<M> Clone for ModelHandle<M> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<M> ModelHandle<M> {
  pub fn new(model: M) -> Self {
    Self {
      inner: Arc::new(model),
    }
  }

  /// 通过构建函数加载模型，并记录加载耗时
  pub fn load<E>(build: impl FnOnce() -> Result<M, E>) -> Result<Self, E> {
    let now = std::time::Instant::now();
    let model = build()?;
    info!("模型加载完成，耗时: {:.2?}", now.elapsed());
    Ok(Self::new(model))
  }
}

impl<M> Deref for ModelHandle<M> {
  type Target = M;

  fn deref(&self) -> &Self::Target {
    &self.inner
  }
}
