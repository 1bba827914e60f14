// 该文件是 Fudian （浮点） 项目的一部分。
// src/input/youtube.rs - YouTube 视频输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Fudian Contributors

//! YouTube 视频先通过 `yt-dlp` 解析出可直接播放的地址，再交给 GStreamer 解码。

use url::Url;

#[cfg(feature = "gstreamer_input")]
use std::process::Command;
#[cfg(feature = "gstreamer_input")]
use tracing::{error, info};

#[cfg(feature = "gstreamer_input")]
use crate::{
  frame::Frame,
  input::{FrameSource, GStreamerInput, GStreamerInputPipelineBuilder, ReadError, StreamError},
  settings::SourceKind,
};

const YOUTUBE_HOSTS: [&str; 4] = ["youtube.com", "www.youtube.com", "m.youtube.com", "youtu.be"];

/// 判断是否为 YouTube 视频地址
pub fn is_youtube_url(url: &Url) -> bool {
  if !matches!(url.scheme(), "http" | "https") {
    return false;
  }
  let Some(host) = url.host_str() else {
    return false;
  };
  if !YOUTUBE_HOSTS.contains(&host) {
    return false;
  }
  if host == "youtu.be" {
    return url.path().len() > 1;
  }
  url.path().starts_with("/shorts/")
    || url.path().starts_with("/live/")
    || url.query_pairs().any(|(key, value)| key == "v" && !value.is_empty())
}

/// 调用 `yt-dlp -g` 获取播放地址
#[cfg(feature = "gstreamer_input")]
pub fn resolve_stream_url(url: &Url, format: &str) -> Result<String, StreamError> {
  info!("解析 YouTube 地址: {}", url);
  let output = Command::new("yt-dlp")
    .args(["--no-playlist", "-f", format, "-g"])
    .arg(url.as_str())
    .output()
    .map_err(|e| StreamError::new(SourceKind::YouTube, format!("无法运行 yt-dlp: {}", e)))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(StreamError::new(
      SourceKind::YouTube,
      format!("yt-dlp 解析失败: {}", stderr.trim()),
    ));
  }

  String::from_utf8_lossy(&output.stdout)
    .lines()
    .map(str::trim)
    .find(|line| !line.is_empty())
    .map(str::to_string)
    .ok_or_else(|| StreamError::new(SourceKind::YouTube, "yt-dlp 没有返回播放地址"))
}

/// YouTube 视频，播放完毕后正常结束
#[cfg(feature = "gstreamer_input")]
pub struct YouTubeInput {
  url: Url,
  format: String,
  inner: Option<GStreamerInput>,
}

#[cfg(feature = "gstreamer_input")]
impl YouTubeInput {
  pub fn new(url: Url, format: &str) -> Self {
    Self {
      url,
      format: format.to_string(),
      inner: None,
    }
  }

  pub fn url(&self) -> &Url {
    &self.url
  }
}

#[cfg(feature = "gstreamer_input")]
impl FrameSource for YouTubeInput {
  fn kind(&self) -> SourceKind {
    SourceKind::YouTube
  }

  fn open(&mut self) -> Result<(), StreamError> {
    if self.inner.is_some() {
      return Ok(());
    }
    let stream_url = resolve_stream_url(&self.url, &self.format)
      .inspect_err(|e| error!("打开 YouTube 视频失败: {}", e))?;
    let mut inner = GStreamerInputPipelineBuilder::uri(&stream_url, SourceKind::YouTube).build();
    inner.open()?;
    self.inner = Some(inner);
    Ok(())
  }

  fn read_next_frame(&mut self) -> Result<Frame, ReadError> {
    match self.inner.as_mut() {
      Some(inner) => inner.read_next_frame(),
      None => Err(StreamError::new(SourceKind::YouTube, "视频未打开").into()),
    }
  }

  fn close(&mut self) {
    if let Some(mut inner) = self.inner.take() {
      inner.close();
    }
  }
}
