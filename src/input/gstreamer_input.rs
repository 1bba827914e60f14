// 该文件是 Fudian （浮点） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 本模块用 GStreamer 解码本地视频文件、RTSP 网络流以及解析后的
//! YouTube 播放地址，统一输出 RGB 帧。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev \
//!   gstreamer1.0-plugins-good gstreamer1.0-libav
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use fudian::input::{FrameSource, GStreamerInputPipelineBuilder, ReadError};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut input = GStreamerInputPipelineBuilder::file("videos/video_1.mp4").build();
//! input.open()?;
//! loop {
//!   match input.read_next_frame() {
//!     Ok(frame) => println!("帧 {}: {}x{}", frame.index, frame.width(), frame.height()),
//!     Err(ReadError::EndOfStream) => break,
//!     Err(e) => return Err(e.into()),
//!   }
//! }
//! input.close();
//! # Ok(())
//! # }
//! ```
//!
//! ## 读取语义
//!
//! - 文件与 YouTube：解码完最后一帧后返回 `EndOfStream`
//! - RTSP：连接断开等管道错误返回 `StreamError`
//!
//! 读取本身不设超时，只按固定间隔检查管道总线上的错误消息。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  frame::{Frame, rgb_from_strided},
  input::{FrameSource, ReadError, StreamError},
  settings::SourceKind,
};

/// 检查管道错误的间隔
const PULL_INTERVAL_MS: u64 = 200;
/// RTSP 抖动缓冲
const RTSP_LATENCY_MS: u32 = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum GStreamerInputBuilderItem {
  FileSource(String),
  RtspSource(String),
  UriSource(String),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::RtspSource(location) => {
        format!(
          "rtspsrc location=\"{}\" latency={} ! decodebin",
          location, RTSP_LATENCY_MS
        )
      }
      GStreamerInputBuilderItem::UriSource(uri) => format!("uridecodebin uri=\"{}\"", uri),
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
pub struct GStreamerInputPipelineBuilder {
  kind: SourceKind,
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl GStreamerInputPipelineBuilder {
  fn with_source(kind: SourceKind, source: GStreamerInputBuilderItem, live: bool) -> Self {
    Self {
      kind,
      items: vec![
        source,
        GStreamerInputBuilderItem::TargetFormat {
          format: String::from("RGB"),
        },
      ],
      live,
    }
  }

  /// 本地视频文件，按文件顺序读取每一帧
  pub fn file<P: AsRef<Path>>(path: P) -> Self {
    Self::with_source(
      SourceKind::Video,
      GStreamerInputBuilderItem::FileSource(path.as_ref().display().to_string()),
      false,
    )
  }

  /// RTSP 实时流，处理不过来时丢弃旧帧
  pub fn rtsp(url: &Url) -> Self {
    Self::with_source(
      SourceKind::Rtsp,
      GStreamerInputBuilderItem::RtspSource(url.to_string()),
      true,
    )
  }

  /// 任意可播放 URI
  pub fn uri(uri: &str, kind: SourceKind) -> Self {
    Self::with_source(kind, GStreamerInputBuilderItem::UriSource(uri.to_string()), false)
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    let sink = if self.live {
      "appsink name=sink sync=false max-buffers=2 drop=true"
    } else {
      "appsink name=sink sync=false max-buffers=4"
    };
    format!("{} ! {}", basic_pipeline, sink)
  }

  /// 构建输入，管道在 `open` 时才真正创建
  pub fn build(self) -> GStreamerInput {
    GStreamerInput {
      kind: self.kind,
      description: self.description(),
      running: None,
      frame_index: 0,
    }
  }
}

struct Running {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  kind: SourceKind,
  description: String,
  running: Option<Running>,
  frame_index: u64,
}

impl GStreamerInput {
  pub fn description(&self) -> &str {
    &self.description
  }

  fn stream_error(&self, message: impl Into<String>) -> StreamError {
    StreamError::new(self.kind, message)
  }

  fn launch(&self) -> Result<Running, StreamError> {
    gst::init().map_err(|e| self.stream_error(format!("GStreamer 初始化失败: {}", e)))?;

    info!("GStreamer pipeline description: {}", self.description);
    let pipeline = gst::parse::launch(&self.description)
      .map_err(|e| self.stream_error(format!("管道创建失败: {}", e)))?
      .downcast::<gst::Pipeline>()
      .map_err(|_| self.stream_error("管道创建失败"))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| self.stream_error("找不到 appsink 元素"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| self.stream_error("无法转换为 appsink"))?;

    let running = Running { pipeline, appsink };
    if let Err(e) = running.pipeline.set_state(gst::State::Playing) {
      let message = pop_bus_error(&running.pipeline).unwrap_or_else(|| e.to_string());
      let _ = running.pipeline.set_state(gst::State::Null);
      return Err(self.stream_error(message));
    }
    Ok(running)
  }
}

impl FrameSource for GStreamerInput {
  fn kind(&self) -> SourceKind {
    self.kind
  }

  fn open(&mut self) -> Result<(), StreamError> {
    if self.running.is_some() {
      return Ok(());
    }
    let running = self.launch().inspect_err(|e| error!("打开输入失败: {}", e))?;
    self.running = Some(running);
    self.frame_index = 0;
    Ok(())
  }

  fn read_next_frame(&mut self) -> Result<Frame, ReadError> {
    let kind = self.kind;
    let running = self
      .running
      .as_ref()
      .ok_or_else(|| StreamError::new(kind, "输入未打开"))?;

    loop {
      if let Some(sample) = running
        .appsink
        .try_pull_sample(gst::ClockTime::from_mseconds(PULL_INTERVAL_MS))
      {
        let frame = convert_sample(&sample, self.frame_index)
          .map_err(|message| StreamError::new(kind, message))?;
        self.frame_index += 1;
        return Ok(frame);
      }

      if let Some(message) = pop_bus_error(&running.pipeline) {
        error!("管道错误: {}", message);
        return Err(StreamError::new(kind, message).into());
      }

      if running.appsink.is_eos() {
        debug!("输入结束，共 {} 帧", self.frame_index);
        return Err(ReadError::EndOfStream);
      }
    }
  }

  fn close(&mut self) {
    if let Some(running) = self.running.take() {
      if let Err(e) = running.pipeline.set_state(gst::State::Null) {
        warn!("Failed to stop GStreamer pipeline: {}", e);
      }
      info!("{} 输入已关闭", self.kind);
    }
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    self.close();
  }
}

fn pop_bus_error(pipeline: &gst::Pipeline) -> Option<String> {
  let bus = pipeline.bus()?;
  let message = bus.pop_filtered(&[gst::MessageType::Error])?;
  match message.view() {
    gst::MessageView::Error(err) => Some(match err.debug() {
      Some(debug) => format!("{} ({})", err.error(), debug),
      None => err.error().to_string(),
    }),
    _ => None,
  }
}

fn convert_sample(sample: &gst::Sample, index: u64) -> Result<Frame, String> {
  let buffer = sample.buffer().ok_or("No buffer in sample")?;
  let caps = sample.caps().ok_or("No caps in sample")?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| "Failed to get video info from caps")?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(format!("Unsupported video format: {:?}", video_info.format()));
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer
    .map_readable()
    .map_err(|e| format!("Failed to map buffer for reading: {}", e))?;
  let image = rgb_from_strided(map.as_slice(), width, height, stride).ok_or_else(|| {
    format!(
      "Buffer size mismatch: expected {} bytes, got {} bytes",
      stride * height,
      map.size()
    )
  })?;

  let timestamp_ms = buffer.pts().map(|pts| pts.mseconds()).unwrap_or(0);
  Ok(Frame::new(image, index, timestamp_ms))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_pipeline_reads_every_frame() {
    let builder = GStreamerInputPipelineBuilder::file("videos/video 1.mp4");
    assert_eq!(
      builder.description(),
      "filesrc location=\"videos/video 1.mp4\" ! decodebin ! videoconvert ! \
       video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4"
    );
  }

  #[test]
  fn rtsp_pipeline_drops_late_frames() {
    let url = Url::parse("rtsp://10.0.0.2:8554/live").unwrap();
    let builder = GStreamerInputPipelineBuilder::rtsp(&url);
    let description = builder.description();
    assert!(description.starts_with("rtspsrc location=\"rtsp://10.0.0.2:8554/live\" latency=200"));
    assert!(description.ends_with("max-buffers=2 drop=true"));
  }

  #[test]
  fn unopened_input_reports_stream_error() {
    let mut input = GStreamerInputPipelineBuilder::file("videos/video_1.mp4").build();
    assert_eq!(input.kind(), SourceKind::Video);
    assert!(matches!(
      input.read_next_frame(),
      Err(ReadError::Stream(StreamError { kind: SourceKind::Video, .. }))
    ));
    input.close();
  }

  #[test]
  fn missing_file_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut input = GStreamerInputPipelineBuilder::file(dir.path().join("missing.mp4")).build();
    let err = input.open().unwrap_err();
    assert_eq!(err.kind, SourceKind::Video);
    input.close();
  }

  #[test]
  fn undecodable_file_is_stream_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.mp4");
    std::fs::write(&path, "not a video at all").unwrap();

    let mut input = GStreamerInputPipelineBuilder::file(&path).build();
    // 类型识别可能在打开时或第一次读取时失败
    let err = match input.open() {
      Err(e) => e,
      Ok(()) => match input.read_next_frame() {
        Err(ReadError::Stream(e)) => e,
        other => panic!("expected stream error, got {:?}", other.map(|frame| frame.index)),
      },
    };
    assert_eq!(err.kind, SourceKind::Video);
    input.close();
  }
}
