// 该文件是 Kanjian （看见） 项目的一部分。
// src/bin/detect_image.rs - 单张图像检测工具
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use kanjian::{
  FromUrl,
  detect::{DetectionReport, detect},
  model::{ModelHandle, Yolov8Builder},
  output::Draw,
};

/// 对一张图像执行检测并输出 JSON
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolov8:yolov8s.onnx
  #[arg(long, default_value = "yolov8:yolov8s.onnx", value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,
  /// 保存绘制了检测结果的图像
  #[arg(long, value_name = "FILE")]
  pub output: Option<PathBuf>,
  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());

  let model = ModelHandle::load(|| Yolov8Builder::from_url(&args.model)?.build())?;
  let mut image = image::open(&args.input)
    .with_context(|| format!("无法读取图像 {}", args.input.display()))?
    .to_rgb8();

  info!("开始推理...");
  let now = std::time::Instant::now();
  let detections = detect(&*model, &image)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  if let Some(output) = args.output.as_ref() {
    let draw = Draw::from_font_path(args.font.as_deref())?;
    draw.draw_detections(&mut image, &detections);
    image
      .save(output)
      .with_context(|| format!("无法保存图像 {}", output.display()))?;
    info!("已保存: {}", output.display());
  }

  println!(
    "{}",
    serde_json::to_string_pretty(&DetectionReport { detections })?
  );

  Ok(())
}
