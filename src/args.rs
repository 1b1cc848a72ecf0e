// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use url::Url;

use kanjian::{
  output::mjpeg::DEFAULT_JPEG_QUALITY,
  server::{DEFAULT_UPLOAD_LIMIT, ServerConfig},
  task::DEFAULT_STREAM_BUFFER,
};

/// Kanjian 目标检测 Web 服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, default_value = "127.0.0.1:8000", value_name = "ADDR")]
  pub bind: SocketAddr,

  /// 模型地址
  /// 例如:
  /// - yolov8:yolov8s.onnx
  /// - yolov8:///opt/models/yolov8s.onnx?conf=0.4&imgsz=640
  #[arg(long, default_value = "yolov8:yolov8s.onnx", value_name = "MODEL")]
  pub model: Url,

  /// 直播采集来源
  /// 支持格式:
  /// - V4L2: v4l:///dev/video0?width=640&height=480
  /// - GStreamer: gst://camera/dev/video0 或 gst://file/path/video.mp4
  /// - 图片: image:///path/picture.jpg?repeat=0
  #[arg(long, default_value = "v4l:///dev/video0", value_name = "SOURCE")]
  pub camera: Url,

  /// 标签字体文件（TrueType），不指定时查找系统字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 直播流 JPEG 质量 (1 - 100)
  #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100), value_name = "QUALITY")]
  pub jpeg_quality: u8,

  /// 直播流缓冲的帧数
  #[arg(long, default_value_t = DEFAULT_STREAM_BUFFER, value_name = "FRAMES")]
  pub stream_buffer: usize,

  /// 上传图像大小上限（字节）
  #[arg(long, default_value_t = DEFAULT_UPLOAD_LIMIT, value_name = "BYTES")]
  pub upload_limit: usize,
}

impl Args {
  pub fn server_config(&self) -> ServerConfig {
    ServerConfig {
      jpeg_quality: self.jpeg_quality,
      stream_buffer: self.stream_buffer.max(1),
      upload_limit: self.upload_limit,
    }
  }
}
