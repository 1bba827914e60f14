// 该文件是 Fudian （浮点） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::time::Instant;

use image::RgbImage;
use tracing::{info, warn};
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{
  frame::{Frame, rgb_from_strided, rgb_from_yuyv},
  input::{FrameSource, ReadError, StreamError},
  settings::SourceKind,
};

const CAPTURE_BUFFERS: u32 = 4;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

/// 按优先顺序尝试的像素格式
const PREFERRED_FORMATS: [&[u8; 4]; 3] = [b"YUYV", b"MJPG", b"RGB3"];

struct Capturing {
  // stream 先于 device 释放
  stream: Stream<'static>,
  _device: Device,
  fourcc: FourCC,
  width: u32,
  height: u32,
  stride: u32,
}

/// 本地摄像头，按编号打开 `/dev/video<N>`
pub struct V4lInput {
  index: usize,
  capturing: Option<Capturing>,
  frame_index: u64,
  start_time: Instant,
}

impl V4lInput {
  pub fn new(index: usize) -> Self {
    Self {
      index,
      capturing: None,
      frame_index: 0,
      start_time: Instant::now(),
    }
  }

  pub fn index(&self) -> usize {
    self.index
  }

  fn stream_error(&self, message: impl Into<String>) -> StreamError {
    StreamError::new(SourceKind::Webcam, message)
  }

  fn start(&self) -> Result<Capturing, StreamError> {
    let device = Device::new(self.index)
      .map_err(|e| self.stream_error(format!("无法打开摄像头 {}: {}", self.index, e)))?;

    let mut negotiated = None;
    for fourcc in PREFERRED_FORMATS {
      let mut format = device
        .format()
        .map_err(|e| self.stream_error(format!("无法读取摄像头格式: {}", e)))?;
      format.width = DEFAULT_WIDTH;
      format.height = DEFAULT_HEIGHT;
      format.fourcc = FourCC::new(fourcc);
      match device.set_format(&format) {
        Ok(actual) if actual.fourcc == format.fourcc => {
          negotiated = Some(actual);
          break;
        }
        Ok(actual) => warn!("摄像头不支持 {}，实际为 {}", format.fourcc, actual.fourcc),
        Err(e) => warn!("设置摄像头格式 {} 失败: {}", format.fourcc, e),
      }
    }
    let format = negotiated.ok_or_else(|| self.stream_error("摄像头没有可用的像素格式"))?;
    info!(
      "摄像头 {} 格式: {} {}x{}",
      self.index, format.fourcc, format.width, format.height
    );

    let stream = Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS)
      .map_err(|e| self.stream_error(format!("无法创建捕获流: {}", e)))?;

    Ok(Capturing {
      stream,
      _device: device,
      fourcc: format.fourcc,
      width: format.width,
      height: format.height,
      stride: format.stride,
    })
  }
}

impl FrameSource for V4lInput {
  fn kind(&self) -> SourceKind {
    SourceKind::Webcam
  }

  fn open(&mut self) -> Result<(), StreamError> {
    if self.capturing.is_none() {
      self.capturing = Some(self.start()?);
      self.frame_index = 0;
      self.start_time = Instant::now();
    }
    Ok(())
  }

  fn read_next_frame(&mut self) -> Result<Frame, ReadError> {
    let capturing = self
      .capturing
      .as_mut()
      .ok_or_else(|| StreamError::new(SourceKind::Webcam, "摄像头未打开"))?;

    let (buffer, meta) = capturing
      .stream
      .next()
      .map_err(|e| StreamError::new(SourceKind::Webcam, format!("无法捕获帧: {}", e)))?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used == 0 { buffer } else { &buffer[..used] };

    let image = decode_buffer(
      &capturing.fourcc.repr,
      data,
      capturing.width,
      capturing.height,
      capturing.stride,
    )
    .map_err(|message| StreamError::new(SourceKind::Webcam, message))?;

    let frame = Frame::new(
      image,
      self.frame_index,
      self.start_time.elapsed().as_millis() as u64,
    );
    self.frame_index += 1;
    Ok(frame)
  }

  fn close(&mut self) {
    if self.capturing.take().is_some() {
      info!("摄像头 {} 已关闭", self.index);
    }
  }
}

/// 按摄像头像素格式解码一帧
pub(crate) fn decode_buffer(
  fourcc: &[u8; 4],
  data: &[u8],
  width: u32,
  height: u32,
  stride: u32,
) -> Result<RgbImage, String> {
  let (w, h) = (width as usize, height as usize);
  match fourcc {
    b"YUYV" => {
      let stride = if stride == 0 { w * 2 } else { stride as usize };
      rgb_from_yuyv(data, w, h, stride).ok_or_else(|| format!("YUYV 帧数据不完整: {} 字节", data.len()))
    }
    b"RGB3" => {
      let stride = if stride == 0 { w * 3 } else { stride as usize };
      rgb_from_strided(data, w, h, stride).ok_or_else(|| format!("RGB 帧数据不完整: {} 字节", data.len()))
    }
    b"MJPG" => image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
      .map(|image| image.to_rgb8())
      .map_err(|e| format!("MJPG 帧解码失败: {}", e)),
    other => Err(format!(
      "不支持的像素格式: {}",
      String::from_utf8_lossy(other)
    )),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn yuyv_buffer_uses_stride() {
    let data = [128, 128, 128, 128, 0, 0, 128, 128, 128, 128, 0, 0];
    let image = decode_buffer(b"YUYV", &data, 2, 2, 6).unwrap();
    assert_eq!(image.dimensions(), (2, 2));
    assert_eq!(image.get_pixel(1, 1), &Rgb([128, 128, 128]));
  }

  #[test]
  fn mjpg_buffer_is_decoded() {
    let mut bytes = Vec::new();
    RgbImage::from_pixel(8, 8, Rgb([200, 200, 200]))
      .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
      .unwrap();
    let image = decode_buffer(b"MJPG", &bytes, 8, 8, 0).unwrap();
    assert_eq!(image.dimensions(), (8, 8));
  }

  #[test]
  fn truncated_and_unknown_buffers_fail() {
    assert!(decode_buffer(b"RGB3", &[0; 5], 2, 1, 0).is_err());
    assert!(decode_buffer(b"NV12", &[0; 64], 4, 4, 0).is_err());
  }

  #[test]
  fn closed_webcam_does_not_read() {
    let mut input = V4lInput::new(9);
    assert_eq!(input.index(), 9);
    assert!(matches!(
      input.read_next_frame(),
      Err(ReadError::Stream(StreamError { kind: SourceKind::Webcam, .. }))
    ));
    input.close();
    input.close();
  }

  #[test]
  fn missing_device_is_stream_error() {
    let mut input = V4lInput::new(9999);
    let err = input.open().unwrap_err();
    assert_eq!(err.kind, SourceKind::Webcam);
    assert!(err.message.contains("9999"));
    assert!(matches!(input.read_next_frame(), Err(ReadError::Stream(_))));
    input.close();
  }
}
