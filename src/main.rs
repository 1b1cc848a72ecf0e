// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{sync::Arc, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kanjian::{
  FromUrl,
  input::UrlCaptureOpener,
  model::{ModelHandle, Yolov8Builder},
  output::Draw,
  server::{AppState, router},
};

/// 收到中断信号后等待连接关闭的最长时间；直播连接不会自行结束
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();

  info!("Kanjian 目标检测服务");
  info!("模型地址: {}", args.model);
  info!("直播来源: {}", args.camera);
  info!("监听地址: {}", args.bind);

  let model = ModelHandle::load(|| Yolov8Builder::from_url(&args.model)?.build())?;
  let draw = Draw::from_font_path(args.font.as_deref())?;
  let opener = UrlCaptureOpener::new(args.camera.clone());

  let state = AppState::new(
    model,
    Arc::new(draw),
    Arc::new(opener),
    args.server_config(),
  );
  let app = router(state);

  let (tx, rx) = oneshot::channel::<()>();
  let mut tx = Some(tx);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    if let Some(tx) = tx.take() {
      let _ = tx.send(());
    }
    thread::spawn(|| {
      thread::sleep(SHUTDOWN_GRACE);
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  let listener = tokio::net::TcpListener::bind(args.bind).await?;
  info!("服务已启动: http://{}", listener.local_addr()?);
  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = rx.await;
    })
    .await?;

  info!("服务已退出");
  Ok(())
}
