// 该文件是 Kanjian （看见） 项目的一部分。
// tests/live_stream.rs - 直播流测试
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

mod common;

use std::{sync::Arc, sync::atomic::Ordering, time::Duration};

use axum::{
  body::Body,
  http::{Request, StatusCode, header},
};
use bytes::Bytes;
use tokio_stream::StreamExt;
use tower::ServiceExt;
use url::Url;

use kanjian::{
  input::UrlCaptureOpener,
  model::ModelHandle,
  output::Draw,
  task::LiveStreamTask,
};

use common::{FakeModel, ScriptedOpener, UnavailableOpener, app, item};

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

fn stream_request() -> Request<Body> {
  Request::builder().uri("/stream").body(Body::empty()).unwrap()
}

fn assert_jpeg_part(part: &[u8]) {
  assert!(part.starts_with(PART_HEADER));
  let jpeg = &part[PART_HEADER.len()..part.len() - 2];
  assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
  assert!(part.ends_with(b"\r\n"));
}

/// 按分隔标记切分完整的响应体
fn split_parts(body: &[u8]) -> Vec<Vec<u8>> {
  let mut starts: Vec<usize> = body
    .windows(PART_HEADER.len())
    .enumerate()
    .filter(|(_, window)| *window == PART_HEADER)
    .map(|(idx, _)| idx)
    .collect();
  starts.push(body.len());
  starts
    .windows(2)
    .map(|range| body[range[0]..range[1]].to_vec())
    .collect()
}

#[tokio::test]
async fn stream_emits_one_part_per_frame_until_read_fails() {
  const FRAMES: usize = 4;
  let (opener, _released) = ScriptedOpener::new(Some(FRAMES));
  let model = FakeModel::new(vec![item(0, 0.8, [2.0, 2.0, 20.0, 18.0])]);

  let response = app(model, opener.clone())
    .oneshot(stream_request())
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    response.headers()[header::CONTENT_TYPE],
    "multipart/x-mixed-replace; boundary=frame"
  );
  assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  let parts = split_parts(&body);
  assert_eq!(parts.len(), FRAMES);
  for part in &parts {
    assert_jpeg_part(part);
  }

  assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
  assert_eq!(opener.releases.count(), 1);
}

#[tokio::test]
async fn early_disconnect_releases_the_capture_once() {
  let (opener, released) = ScriptedOpener::new(None);

  let response = app(FakeModel::empty(), opener.clone())
    .oneshot(stream_request())
    .await
    .unwrap();
  let mut parts = response.into_body().into_data_stream();

  for _ in 0..3 {
    let part = parts.next().await.unwrap().unwrap();
    assert_jpeg_part(&part);
  }
  assert_eq!(opener.releases.count(), 0);
  drop(parts);

  released.recv_timeout(RELEASE_TIMEOUT).unwrap();
  // 之后不会再次释放
  assert!(released.recv_timeout(Duration::from_millis(200)).is_err());
  assert_eq!(opener.releases.count(), 1);
}

#[tokio::test]
async fn every_request_opens_its_own_capture() {
  let (opener, _released) = ScriptedOpener::new(Some(1));
  let router = app(FakeModel::empty(), opener.clone());

  for _ in 0..2 {
    let response = router.clone().oneshot(stream_request()).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
      .await
      .unwrap();
    assert_eq!(split_parts(&body).len(), 1);
  }

  assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
  assert_eq!(opener.releases.count(), 2);
}

#[tokio::test]
async fn unavailable_camera_ends_the_stream_immediately() {
  let response = app(FakeModel::empty(), Arc::new(UnavailableOpener))
    .oneshot(stream_request())
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  assert!(body.is_empty());
}

#[tokio::test]
async fn dropping_the_receiver_stops_the_producer() {
  let (opener, released) = ScriptedOpener::new(None);
  let stream = LiveStreamTask::new(
    ModelHandle::new(FakeModel::empty()),
    Arc::new(Draw::new(None)),
    opener.clone(),
  )
  .with_buffer(1)
  .spawn();
  drop(stream);

  released.recv_timeout(RELEASE_TIMEOUT).unwrap();
  assert_eq!(opener.releases.count(), 1);
}

#[tokio::test]
async fn still_image_source_replays_then_ends() {
  let path = std::env::temp_dir().join(format!("kanjian-stream-{}.png", std::process::id()));
  std::fs::write(&path, common::png_bytes(20, 10)).unwrap();
  let url = Url::parse(&format!("image://{}?repeat=3", path.display())).unwrap();

  let model = ModelHandle::new(FakeModel::new(vec![item(1, 0.5, [1.0, 1.0, 9.0, 9.0])]));
  let parts: Vec<Bytes> = LiveStreamTask::new(
    model.clone(),
    Arc::new(Draw::new(None)),
    Arc::new(UrlCaptureOpener::new(url)),
  )
  .spawn()
  .collect()
  .await;

  std::fs::remove_file(&path).ok();
  assert_eq!(parts.len(), 3);
  for part in &parts {
    assert_jpeg_part(part);
  }
  assert_eq!(model.calls.load(Ordering::SeqCst), 3);
}
