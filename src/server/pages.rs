// 该文件是 Kanjian （看见） 项目的一部分。
// src/server/pages.rs - 页面模板
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

pub const HOME: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Kanjian object detection</title>
  <style>
    body { font-family: sans-serif; margin: 2em auto; max-width: 960px; }
    nav a { margin-right: 1em; }
  </style>
</head>
<body>
  <h1>Kanjian object detection</h1>
  <nav>
    <a href="/upload">Detect objects in an image</a>
    <a href="/stream">Live camera stream</a>
  </nav>
  <p>The live stream opens the camera for as long as it is watched.</p>
</body>
</html>
"#;

pub const UPLOAD_FORM: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Upload an image</title>
  <style>
    body { font-family: sans-serif; margin: 2em auto; max-width: 960px; }
    pre { background: #f4f4f4; padding: 1em; overflow-x: auto; }
  </style>
</head>
<body>
  <h1>Upload an image for detection</h1>
  <form id="upload" action="/upload" method="post" enctype="multipart/form-data">
    <input type="file" name="image" accept="image/*" required>
    <button type="submit">Detect</button>
  </form>
  <pre id="result"></pre>
  <p><a href="/">Back</a></p>
  <script>
    document.getElementById("upload").addEventListener("submit", async (event) => {
      event.preventDefault();
      const response = await fetch("/upload", { method: "POST", body: new FormData(event.target) });
      const text = await response.text();
      try {
        document.getElementById("result").textContent = JSON.stringify(JSON.parse(text), null, 2);
      } catch (_) {
        document.getElementById("result").textContent = text;
      }
    });
  </script>
</body>
</html>
"#;
