// 该文件是 Fudian （浮点） 项目的一部分。
// src/input.rs - 视频/图像输入
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

//! 帧来源适配器。
//!
//! 所有视频来源都实现 [`FrameSource`]：`open` → `read_next_frame` → `close`。
//! 来源通过 URL 选择：
//!
//! - `file:///videos/video_1.mp4` 本地视频文件
//! - `webcam://0` 本地摄像头编号
//! - `rtsp://192.168.1.100:8554/stream` RTSP 网络流
//! - `https://www.youtube.com/watch?v=...` YouTube 视频

use std::path::PathBuf;

use thiserror::Error;
use tracing::error;
use url::Url;

use crate::{FromUrl, frame::Frame, settings::SourceKind};

mod image_file;
pub use self::image_file::{DecodeError, IMAGE_EXTENSIONS, decode_image_bytes, read_image_file};

mod v4l_input;
pub use self::v4l_input::V4lInput;

mod youtube;
pub use self::youtube::is_youtube_url;
#[cfg(feature = "gstreamer_input")]
pub use self::youtube::{YouTubeInput, resolve_stream_url};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{GStreamerInput, GStreamerInputPipelineBuilder};

/// 视频源读取失败，会终止当前播放但不影响会话
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} 视频源错误: {message}")]
pub struct StreamError {
  pub kind: SourceKind,
  pub message: String,
}

impl StreamError {
  pub fn new(kind: SourceKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
  /// 正常结束，不是错误
  #[error("视频流已结束")]
  EndOfStream,
  #[error(transparent)]
  Stream(#[from] StreamError),
}

/// 统一的帧来源接口
pub trait FrameSource {
  fn kind(&self) -> SourceKind;

  fn open(&mut self) -> Result<(), StreamError>;

  fn read_next_frame(&mut self) -> Result<Frame, ReadError>;

  /// 释放底层句柄，重复调用不会再次释放
  fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
  fn kind(&self) -> SourceKind {
    (**self).kind()
  }

  fn open(&mut self) -> Result<(), StreamError> {
    (**self).open()
  }

  fn read_next_frame(&mut self) -> Result<Frame, ReadError> {
    (**self).read_next_frame()
  }

  fn close(&mut self) {
    (**self).close()
  }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn kind(&self) -> SourceKind {
    (**self).kind()
  }

  fn open(&mut self) -> Result<(), StreamError> {
    (**self).open()
  }

  fn read_next_frame(&mut self) -> Result<Frame, ReadError> {
    (**self).read_next_frame()
  }

  fn close(&mut self) {
    (**self).close()
  }
}

#[derive(Error, Debug, PartialEq)]
pub enum InputError {
  #[error("不支持的输入来源: {0}")]
  UnsupportedScheme(String),
  #[error("无效的摄像头编号: {0}")]
  InvalidWebcam(String),
  #[error("不是 YouTube 视频地址: {0}")]
  NotYouTube(String),
  #[error("无效的文件路径: {0}")]
  InvalidPath(String),
  #[error("当前构建未启用 {0} 输入")]
  Disabled(SourceKind),
}

/// 视频来源描述
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
  Video(PathBuf),
  Webcam(usize),
  Rtsp(Url),
  YouTube(Url),
}

impl SourceSpec {
  pub fn kind(&self) -> SourceKind {
    match self {
      SourceSpec::Video(_) => SourceKind::Video,
      SourceSpec::Webcam(_) => SourceKind::Webcam,
      SourceSpec::Rtsp(_) => SourceKind::Rtsp,
      SourceSpec::YouTube(_) => SourceKind::YouTube,
    }
  }
}

impl FromUrl for SourceSpec {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "file" => url
        .to_file_path()
        .map(SourceSpec::Video)
        .map_err(|_| InputError::InvalidPath(url.to_string())),
      "webcam" => url
        .host_str()
        .and_then(|host| host.parse::<usize>().ok())
        .map(SourceSpec::Webcam)
        .ok_or_else(|| InputError::InvalidWebcam(url.to_string())),
      "rtsp" | "rtsps" => Ok(SourceSpec::Rtsp(url.clone())),
      "http" | "https" => {
        if is_youtube_url(url) {
          Ok(SourceSpec::YouTube(url.clone()))
        } else {
          Err(InputError::NotYouTube(url.to_string()))
        }
      }
      scheme => {
        error!("不支持的输入来源: {}", scheme);
        Err(InputError::UnsupportedScheme(scheme.to_string()))
      }
    }
  }
}

pub enum SourceWrapper {
  #[cfg(feature = "gstreamer_input")]
  Video(GStreamerInput),
  Webcam(V4lInput),
  #[cfg(feature = "gstreamer_input")]
  Rtsp(GStreamerInput),
  #[cfg(feature = "gstreamer_input")]
  YouTube(YouTubeInput),
}

impl SourceWrapper {
  /// 创建（尚未打开的）视频来源
  #[cfg_attr(not(feature = "gstreamer_input"), allow(unused_variables))]
  pub fn from_spec(spec: SourceSpec, youtube_format: &str) -> Result<Self, InputError> {
    match spec {
      #[cfg(feature = "gstreamer_input")]
      SourceSpec::Video(path) => Ok(SourceWrapper::Video(
        GStreamerInputPipelineBuilder::file(&path).build(),
      )),
      #[cfg(feature = "gstreamer_input")]
      SourceSpec::Rtsp(url) => Ok(SourceWrapper::Rtsp(
        GStreamerInputPipelineBuilder::rtsp(&url).build(),
      )),
      #[cfg(feature = "gstreamer_input")]
      SourceSpec::YouTube(url) => Ok(SourceWrapper::YouTube(YouTubeInput::new(
        url,
        youtube_format,
      ))),
      SourceSpec::Webcam(index) => Ok(SourceWrapper::Webcam(V4lInput::new(index))),
      #[allow(unreachable_patterns)]
      other => Err(InputError::Disabled(other.kind())),
    }
  }
}

impl FrameSource for SourceWrapper {
  fn kind(&self) -> SourceKind {
    match self {
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Video(input) => input.kind(),
      SourceWrapper::Webcam(input) => input.kind(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Rtsp(input) => input.kind(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::YouTube(input) => input.kind(),
    }
  }

  fn open(&mut self) -> Result<(), StreamError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Video(input) => input.open(),
      SourceWrapper::Webcam(input) => input.open(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Rtsp(input) => input.open(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::YouTube(input) => input.open(),
    }
  }

  fn read_next_frame(&mut self) -> Result<Frame, ReadError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Video(input) => input.read_next_frame(),
      SourceWrapper::Webcam(input) => input.read_next_frame(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Rtsp(input) => input.read_next_frame(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::YouTube(input) => input.read_next_frame(),
    }
  }

  fn close(&mut self) {
    match self {
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Video(input) => input.close(),
      SourceWrapper::Webcam(input) => input.close(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::Rtsp(input) => input.close(),
      #[cfg(feature = "gstreamer_input")]
      SourceWrapper::YouTube(input) => input.close(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn spec(url: &str) -> Result<SourceSpec, InputError> {
    SourceSpec::from_url(&Url::parse(url).unwrap())
  }

  #[test]
  fn file_url_is_video() {
    assert_eq!(
      spec("file:///videos/video_1.mp4").unwrap(),
      SourceSpec::Video(PathBuf::from("/videos/video_1.mp4"))
    );
  }

  #[test]
  fn webcam_url_carries_index() {
    assert_eq!(spec("webcam://2").unwrap(), SourceSpec::Webcam(2));
    assert!(matches!(
      spec("webcam://front"),
      Err(InputError::InvalidWebcam(_))
    ));
  }

  #[test]
  fn rtsp_and_youtube() {
    assert_eq!(spec("rtsp://10.0.0.2:8554/live").unwrap().kind(), SourceKind::Rtsp);
    assert_eq!(
      spec("https://youtu.be/dQw4w9WgXcQ").unwrap().kind(),
      SourceKind::YouTube
    );
    assert!(matches!(
      spec("https://example.com/video.mp4"),
      Err(InputError::NotYouTube(_))
    ));
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    assert_eq!(
      spec("ftp://host/video.mp4"),
      Err(InputError::UnsupportedScheme(String::from("ftp")))
    );
  }

  #[test]
  fn wrapper_keeps_source_kind() {
    let webcam = SourceWrapper::from_spec(SourceSpec::Webcam(1), "best").unwrap();
    assert_eq!(webcam.kind(), SourceKind::Webcam);

    let video = SourceWrapper::from_spec(SourceSpec::Video(PathBuf::from("a.mp4")), "best");
    let youtube = SourceWrapper::from_spec(spec("https://youtu.be/dQw4w9WgXcQ").unwrap(), "best");
    #[cfg(feature = "gstreamer_input")]
    {
      assert_eq!(video.unwrap().kind(), SourceKind::Video);
      assert_eq!(youtube.unwrap().kind(), SourceKind::YouTube);
    }
    #[cfg(not(feature = "gstreamer_input"))]
    {
      assert!(matches!(video, Err(InputError::Disabled(SourceKind::Video))));
      assert!(matches!(youtube, Err(InputError::Disabled(SourceKind::YouTube))));
    }
  }

  #[test]
  fn stream_error_message_names_source() {
    let err = ReadError::from(StreamError::new(SourceKind::Rtsp, "连接超时"));
    assert_eq!(err.to_string(), "RTSP 视频源错误: 连接超时");
  }
}
