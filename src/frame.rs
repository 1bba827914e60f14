// 该文件是 Fudian （浮点） 项目的一部分。
// src/frame.rs - 帧定义与像素格式转换
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

use image::RgbImage;

const RGB_CHANNELS: usize = 3;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: u64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  /// 单张静态图片
  pub fn still(image: RgbImage) -> Self {
    Self::new(image, 0, 0)
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::still(image)
  }
}

/// 从带行跨度的 RGB24 缓冲区构造图像，缓冲区不足时返回 None
pub fn rgb_from_strided(data: &[u8], width: usize, height: usize, stride: usize) -> Option<RgbImage> {
  let row_bytes = width * RGB_CHANNELS;
  if stride < row_bytes || height == 0 || data.len() < stride * (height - 1) + row_bytes {
    return None;
  }

  let mut packed = Vec::with_capacity(row_bytes * height);
  for row in data.chunks(stride).take(height) {
    packed.extend_from_slice(&row[..row_bytes]);
  }
  RgbImage::from_raw(width as u32, height as u32, packed)
}

/// YUYV (YUV 4:2:2) 转 RGB，常见于 UVC 摄像头
pub fn rgb_from_yuyv(data: &[u8], width: usize, height: usize, stride: usize) -> Option<RgbImage> {
  let row_bytes = width * 2;
  if width % 2 != 0 || stride < row_bytes || height == 0 {
    return None;
  }
  if data.len() < stride * (height - 1) + row_bytes {
    return None;
  }

  let mut packed = Vec::with_capacity(width * height * RGB_CHANNELS);
  for row in data.chunks(stride).take(height) {
    for quad in row[..row_bytes].chunks_exact(4) {
      let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
      packed.extend_from_slice(&yuv_to_rgb(y0, u, v));
      packed.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
  }
  RgbImage::from_raw(width as u32, height as u32, packed)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;
  let r = y + 1.402 * v;
  let g = y - 0.344_136 * u - 0.714_136 * v;
  let b = y + 1.772 * u;
  [
    r.round().clamp(0.0, 255.0) as u8,
    g.round().clamp(0.0, 255.0) as u8,
    b.round().clamp(0.0, 255.0) as u8,
  ]
}

/// 将 HWC 排列的 RGB 图像转为归一化到 [0, 1] 的 NCHW 浮点张量
pub fn to_nchw_f32(image: &RgbImage) -> Vec<f32> {
  let plane = (image.width() * image.height()) as usize;
  let mut tensor = vec![0f32; RGB_CHANNELS * plane];
  for (idx, pixel) in image.as_raw().chunks_exact(RGB_CHANNELS).enumerate() {
    tensor[idx] = pixel[0] as f32 / 255.0;
    tensor[plane + idx] = pixel[1] as f32 / 255.0;
    tensor[2 * plane + idx] = pixel[2] as f32 / 255.0;
  }
  tensor
}
