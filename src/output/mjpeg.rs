// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/mjpeg.rs - JPEG 编码与 multipart 分片
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

//! `multipart/x-mixed-replace` 直播流的分片格式。
//!
//! 每个分片为 `--frame\r\nContent-Type: image/jpeg\r\n\r\n<jpeg>\r\n`。

use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Vec<u8>> {
  let mut buffer = Vec::with_capacity((image.width() * image.height()) as usize / 4);
  let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
  encoder.encode_image(image)?;
  Ok(buffer)
}

pub fn multipart_part(jpeg: &[u8]) -> Bytes {
  let mut part = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
  part.put_slice(PART_HEADER);
  part.put_slice(jpeg);
  part.put_slice(PART_TRAILER);
  part.freeze()
}
