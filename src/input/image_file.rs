// 该文件是 Fudian （浮点） 项目的一部分。
// src/input/image_file.rs - 图像文件输入
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error};

/// 允许上传的图片类型
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("打开图片时出错 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解码图片: {0}")]
  Image(#[from] image::ImageError),
  #[error("不支持的图片类型: {0}")]
  UnsupportedType(String),
}

/// 解码上传的图片字节
pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
  let image = image::load_from_memory(bytes)?;
  debug!("图片尺寸: {}x{}", image.width(), image.height());
  Ok(image.to_rgb8())
}

/// 读取并解码图片文件，仅接受 [`IMAGE_EXTENSIONS`] 中的类型
pub fn read_image_file<P: AsRef<Path>>(path: P) -> Result<RgbImage, DecodeError> {
  let path = path.as_ref();
  let extension = path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_ascii_lowercase)
    .unwrap_or_default();
  if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
    error!("不支持的图片类型: {}", path.display());
    return Err(DecodeError::UnsupportedType(path.display().to_string()));
  }

  let bytes = std::fs::read(path).map_err(|source| DecodeError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  decode_image_bytes(&bytes)
}
