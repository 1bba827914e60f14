// 该文件是 Fudian （浮点） 项目的一部分。
// src/model.rs - 模型
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
use tracing::error;

use crate::session::Confidence;

mod labels;
pub use self::labels::{COCO_CLASSES, label_for};

#[cfg(feature = "model_onnx")]
mod yolov8;
#[cfg(feature = "model_onnx")]
pub use self::yolov8::{Yolov8, Yolov8Error};

/// 支持的模型文件扩展名
pub const MODEL_EXTENSION: &str = "onnx";

/// 预训练模型的统一推理接口
pub trait Model {
  type Error;

  fn predict(&self, image: &RgbImage, confidence: Confidence) -> Result<DetectResult, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Error = M::Error;

  fn predict(&self, image: &RgbImage, confidence: Confidence) -> Result<DetectResult, Self::Error> {
    (**self).predict(image, confidence)
  }
}

/// 分割掩码，只覆盖目标边框内的区域
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
  data: Vec<bool>,
}

impl Mask {
  pub fn new(x: u32, y: u32, width: u32, height: u32, data: Vec<bool>) -> Option<Self> {
    if data.len() != (width as usize) * (height as usize) {
      return None;
    }
    Some(Self {
      x,
      y,
      width,
      height,
      data,
    })
  }

  /// 图像坐标 (x, y) 是否属于目标
  pub fn contains(&self, x: u32, y: u32) -> bool {
    if x < self.x || y < self.y || x >= self.x + self.width || y >= self.y + self.height {
      return false;
    }
    let idx = (y - self.y) as usize * self.width as usize + (x - self.x) as usize;
    self.data[idx]
  }

  pub fn area(&self) -> usize {
    self.data.iter().filter(|v| **v).count()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
  pub mask: Option<Mask>,
}

impl DetectItem {
  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }

  /// 与另一个目标边框的交并比
  pub fn iou(&self, other: &DetectItem) -> f32 {
    let x1 = self.bbox[0].max(other.bbox[0]);
    let y1 = self.bbox[1].max(other.bbox[1]);
    let x2 = self.bbox[2].min(other.bbox[2]);
    let y2 = self.bbox[3].min(other.bbox[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.width() * self.height() + other.width() * other.height() - intersection;
    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Vec<DetectItem>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 丢弃低于阈值的目标（阈值本身保留）
  pub fn retain_confident(&mut self, confidence: Confidence) {
    self.items.retain(|item| confidence.accepts(item.score));
  }
}

impl AsRef<DetectItem> for DetectItem {
  fn as_ref(&self) -> &DetectItem {
    self
  }
}

/// 非极大值抑制，同类别内按置信度贪心保留
pub fn nms<T: AsRef<DetectItem>>(mut items: Vec<T>, iou_threshold: f32) -> Vec<T> {
  items.sort_by(|a, b| b.as_ref().score.total_cmp(&a.as_ref().score));

  let mut kept: Vec<T> = Vec::with_capacity(items.len());
  for item in items {
    let candidate = item.as_ref();
    let suppressed = kept.iter().any(|best| {
      let best = best.as_ref();
      best.class_id == candidate.class_id && best.iou(candidate) > iou_threshold
    });
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

#[derive(Error, Debug)]
pub enum LoadCause {
  #[error("文件不存在")]
  NotFound,
  #[error("不支持的模型格式: {0}")]
  UnsupportedFormat(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  Invalid(String),
  #[cfg(feature = "model_onnx")]
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
}

/// 模型加载失败，整个会话都无法继续
#[derive(Error, Debug)]
#[error("无法加载模型，请检查路径: {}: {cause}", .path.display())]
pub struct LoadError {
  pub path: PathBuf,
  #[source]
  pub cause: LoadCause,
}

impl LoadError {
  pub fn new(path: &Path, cause: impl Into<LoadCause>) -> Self {
    Self {
      path: path.to_path_buf(),
      cause: cause.into(),
    }
  }
}

/// 在交给推理运行时之前检查模型文件
pub fn check_model_path(path: &Path) -> Result<(), LoadError> {
  let metadata = match std::fs::metadata(path) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      error!("模型文件不存在: {}", path.display());
      return Err(LoadError::new(path, LoadCause::NotFound));
    }
    Err(e) => return Err(LoadError::new(path, e)),
  };

  if !metadata.is_file() {
    return Err(LoadError::new(
      path,
      LoadCause::UnsupportedFormat(String::from("不是普通文件")),
    ));
  }

  let extension = path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(str::to_ascii_lowercase);
  if extension.as_deref() != Some(MODEL_EXTENSION) {
    return Err(LoadError::new(
      path,
      LoadCause::UnsupportedFormat(format!(
        "期望 .{} 文件，实际为 {}",
        MODEL_EXTENSION,
        extension.unwrap_or_else(|| String::from("无扩展名"))
      )),
    ));
  }

  Ok(())
}

/// 加载模型文件，失败时不会产生部分可用的模型
#[cfg(feature = "model_onnx")]
pub fn load_model<P: AsRef<Path>>(path: P, nms_threshold: f32) -> Result<Yolov8, LoadError> {
  let path = path.as_ref();
  check_model_path(path)?;
  Yolov8::load(path, nms_threshold)
}
