// 该文件是 Fudian （浮点） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 窗口与视频文件输出
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

//! # GStreamer 视频输出模块
//!
//! 将标注后的帧显示在窗口中，或编码保存为视频文件。
//!
//! ## URL Scheme
//!
//! - `gst://display` 使用 `autovideosink` 打开窗口
//! - `gst:///output.mp4?fps=30` 保存为视频文件
//!
//! ## 支持的文件格式
//!
//! - **MP4** (H.264)，扩展名无法识别时也使用 MP4
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)
//!
//! ## 基本用法
//!
//! ```no_run
//! use fudian::{FromUrl, output::GStreamerVideoOutput};
//! use url::Url;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let url = Url::parse("gst:///output.mp4?fps=25")?;
//! let output = GStreamerVideoOutput::from_url(&url)?;
//! # Ok(())
//! # }
//! ```
//!
//! 管道在收到第一帧时按帧尺寸创建，帧尺寸变化时重建。

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{Render, draw::Draw},
  url_path,
};

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// 既不是窗口也不是文件
  #[error("Unsupported video output target: {0}")]
  UnsupportedTarget(String),
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 缓冲区创建错误
  #[error("Buffer creation error")]
  BufferCreationError,
}

const DEFAULT_FPS: i32 = 30;

/// 输出目标
#[derive(Debug, Clone, PartialEq)]
pub enum VideoTarget {
  Display,
  File(PathBuf),
}

impl VideoTarget {
  fn sink_description(&self) -> String {
    match self {
      VideoTarget::Display => String::from("videoconvert ! autovideosink sync=false"),
      VideoTarget::File(path) => {
        let location = path.display();
        match path.extension().and_then(|ext| ext.to_str()) {
          Some("mkv") => format!(
            "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux ! filesink location=\"{}\"",
            location
          ),
          Some("avi") => format!(
            "videoconvert ! video/x-raw,format=I420 ! x264enc ! avimux ! filesink location=\"{}\"",
            location
          ),
          Some("webm") => format!(
            "videoconvert ! vp8enc ! webmmux ! filesink location=\"{}\"",
            location
          ),
          _ => format!(
            "videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux ! filesink location=\"{}\"",
            location
          ),
        }
      }
    }
  }
}

struct Running {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  frame_count: u64,
}

impl Running {
  fn finish(self) {
    // 发送 EOS 让封装器写完文件尾
    if let Err(e) = self.appsrc.end_of_stream() {
      warn!("Failed to send EOS to video output: {:?}", e);
    }
    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(2),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
    info!("Video output closed. Total frames written: {}", self.frame_count);
  }
}

/// GStreamer 窗口或视频文件输出
pub struct GStreamerVideoOutput {
  target: VideoTarget,
  fps: i32,
  draw: Draw,
  running: Mutex<Option<Running>>,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    let target = match url.host_str() {
      Some("display") => VideoTarget::Display,
      None | Some("") if url.path().len() > 1 => VideoTarget::File(url_path(url)),
      _ => return Err(GStreamerVideoOutputError::UnsupportedTarget(url.to_string())),
    };

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<i32>().ok())
      .filter(|fps| *fps > 0)
      .unwrap_or(DEFAULT_FPS);

    Ok(Self {
      target,
      fps,
      draw: Draw::default(),
      running: Mutex::new(None),
    })
  }
}

impl GStreamerVideoOutput {
  pub fn target(&self) -> &VideoTarget {
    &self.target
  }

  pub fn fps(&self) -> i32 {
    self.fps
  }

  pub fn set_draw(&mut self, draw: Draw) {
    self.draw = draw;
  }

  pub fn description(&self) -> String {
    format!("appsrc name=src ! {}", self.target.sink_description())
  }

  fn launch(&self, width: u32, height: u32) -> Result<Running, GStreamerVideoOutputError> {
    gst::init()?;

    if let VideoTarget::File(path) = &self.target {
      create_parent(path)?;
    }

    let description = self.description();
    info!("Creating video output pipeline: {}", description);
    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let caps = gst::Caps::builder("video/x-raw")
      .field("format", "RGB")
      .field("width", width as i32)
      .field("height", height as i32)
      .field("framerate", gst::Fraction::new(self.fps, 1))
      .build();
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;
    info!(
      "Video output initialized: {}x{} @ {} fps -> {:?}",
      width, height, self.fps, self.target
    );

    Ok(Running {
      pipeline,
      appsrc,
      width,
      height,
      frame_count: 0,
    })
  }

  fn push_frame(&self, image: &image::RgbImage) -> Result<(), GStreamerVideoOutputError> {
    let mut guard = self
      .running
      .lock()
      .map_err(|_| GStreamerVideoOutputError::PipelineError("output lock poisoned".to_string()))?;

    let (width, height) = image.dimensions();
    let size_changed = guard
      .as_ref()
      .is_some_and(|running| running.width != width || running.height != height);
    if size_changed && let Some(previous) = guard.take() {
      info!("Frame size changed to {}x{}, rebuilding pipeline", width, height);
      previous.finish();
    }
    if guard.is_none() {
      *guard = Some(self.launch(width, height)?);
    }
    let running = guard
      .as_mut()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("pipeline not running".to_string()))?;

    let data = image.as_raw();
    let mut buffer =
      gst::Buffer::with_size(data.len()).map_err(|_| GStreamerVideoOutputError::BufferCreationError)?;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      let frame_ns = 1_000_000_000 / self.fps as u64;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(running.frame_count * frame_ns));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_ns));
      let mut buffer_map = buffer_ref.map_writable().map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to map buffer".to_string())
      })?;
      buffer_map.copy_from_slice(data);
    }
    running.frame_count += 1;

    running.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }
}

fn create_parent(path: &Path) -> Result<(), GStreamerVideoOutputError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .map_err(|e| GStreamerVideoOutputError::PipelineError(format!("{}: {}", parent.display(), e)))?;
  }
  Ok(())
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Ok(mut guard) = self.running.lock()
      && let Some(running) = guard.take()
    {
      running.finish();
    }
  }
}

impl Render for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(&frame.image, result);
    self.push_frame(&image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn output(url: &str) -> Result<GStreamerVideoOutput, GStreamerVideoOutputError> {
    GStreamerVideoOutput::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn display_target() {
    let out = output("gst://display").unwrap();
    assert_eq!(out.target(), &VideoTarget::Display);
    assert_eq!(out.fps(), 30);
    assert_eq!(
      out.description(),
      "appsrc name=src ! videoconvert ! autovideosink sync=false"
    );
  }

  #[test]
  fn file_target_picks_muxer_by_extension() {
    let out = output("gst:///tmp/out.webm?fps=12").unwrap();
    assert_eq!(out.target(), &VideoTarget::File(PathBuf::from("/tmp/out.webm")));
    assert_eq!(out.fps(), 12);
    assert!(out.description().contains("webmmux"));

    let out = output("gst:///tmp/out.unknown").unwrap();
    assert!(out.description().contains("mp4mux"));
  }

  #[test]
  fn rejects_unknown_targets() {
    assert!(matches!(
      output("gst://projector"),
      Err(GStreamerVideoOutputError::UnsupportedTarget(_))
    ));
    assert!(matches!(
      output("image:///tmp/a.png"),
      Err(GStreamerVideoOutputError::SchemeMismatch)
    ));
  }
}
