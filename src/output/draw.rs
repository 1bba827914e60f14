// 该文件是 Fudian （浮点） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{DetectItem, DetectResult};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HORIZONTAL_PADDING: i32 = 4;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const MASK_ALPHA: f32 = 0.45;

static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件 {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("无效的字体文件: {0}")]
  Invalid(String),
}

/// 在帧上绘制边框、标签与分割掩码
#[derive(Clone)]
pub struct Draw {
  font_size: f32,
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    let font = match FontArc::try_from_slice(EMBEDDED_FONT) {
      Ok(font) => Some(font),
      Err(e) => {
        warn!("内置字体无效，只绘制边框: {}", e);
        None
      }
    };
    Self {
      font_size: LABEL_FONT_SIZE,
      font,
    }
  }
}

impl Draw {
  /// 用指定字体替换内置的标签字体
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, FontError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| FontError::Io {
      path: path.display().to_string(),
      source,
    })?;
    let font = FontArc::try_from_vec(data).map_err(|e| FontError::Invalid(e.to_string()))?;
    info!("加载标签字体: {}", path.display());
    Ok(Self {
      font_size: LABEL_FONT_SIZE,
      font: Some(font),
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 返回绘制了检测结果的新图像
  pub fn draw_detection(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut image = image.clone();
    self.draw_detections_on_image(&mut image, result);
    image
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, result: &DetectResult) {
    // 先画掩码，避免盖住边框和标签
    for item in result.items.iter() {
      if item.mask.is_some() {
        blend_mask(image, item, class_color(item.class_id));
      }
    }
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item, class_color(item.class_id));
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem, color: Rgb<u8>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * thickness;
      let height = y_max - y_min - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    let label = format!("{} {:.2}", item.label, item.score);
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, &label);
    let bar_width = text_width as i32 + 2 * LABEL_TEXT_HORIZONTAL_PADDING;
    let bar_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在边框上方，放不下时放进边框内
    let label_x = x_min;
    let label_y = if y_min >= bar_height { y_min - bar_height } else { y_min };
    let bar_width = bar_width.min(w - label_x);
    if bar_width <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(bar_width as u32, bar_height as u32);
    draw_filled_rect_mut(image, rect, color);
    draw_text_mut(
      image,
      text_color(color),
      label_x + LABEL_TEXT_HORIZONTAL_PADDING,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      scale,
      font,
      &label,
    );
  }
}

fn blend_mask(image: &mut RgbImage, item: &DetectItem, color: Rgb<u8>) {
  let Some(mask) = item.mask.as_ref() else {
    return;
  };
  let x_end = (mask.x + mask.width).min(image.width());
  let y_end = (mask.y + mask.height).min(image.height());
  for y in mask.y..y_end {
    for x in mask.x..x_end {
      if mask.contains(x, y) {
        let pixel = image.get_pixel_mut(x, y);
        for c in 0..3 {
          let blended = pixel[c] as f32 * (1.0 - MASK_ALPHA) + color[c] as f32 * MASK_ALPHA;
          pixel[c] = blended.round() as u8;
        }
      }
    }
  }
}

/// 每个类别固定的颜色，色相按黄金分割角度分布
pub fn class_color(class_id: u32) -> Rgb<u8> {
  let hue = (class_id as f32 * 137.508) % 360.0;
  hsv_to_rgb(hue, 0.85, 0.95)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;
  let (r, g, b) = match (h / 60.0) as u32 {
    0 => (c, x, 0.0),
    1 => (x, c, 0.0),
    2 => (0.0, c, x),
    3 => (0.0, x, c),
    4 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };
  Rgb([
    ((r + m) * 255.0).round() as u8,
    ((g + m) * 255.0).round() as u8,
    ((b + m) * 255.0).round() as u8,
  ])
}

/// 浅色背景用黑字，深色背景用白字
fn text_color(background: Rgb<u8>) -> Rgb<u8> {
  let luma = 0.299 * background[0] as f32 + 0.587 * background[1] as f32 + 0.114 * background[2] as f32;
  if luma > 150.0 {
    Rgb([0, 0, 0])
  } else {
    Rgb([255, 255, 255])
  }
}

/// 原始帧旁的文本记录
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines(&self, result: &DetectResult) -> Vec<String> {
    result
      .items
      .iter()
      .map(|item| {
        let name = if self.label_with_name {
          item.label.clone()
        } else {
          item.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          name, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
        )
      })
      .collect()
  }

  /// 写入与图片同名的 `.txt` 文件
  pub fn record(&self, result: &DetectResult, path: &Path) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension("txt"), self.lines(result).join("\n"))
  }
}
