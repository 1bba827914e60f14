// 该文件是 Fudian （浮点） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 检测/分割模型（ONNX Runtime）
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

use std::{path::Path, sync::Mutex};

use image::{Rgb, RgbImage, imageops::FilterType};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::to_nchw_f32,
  model::{DetectItem, DetectResult, LoadCause, LoadError, Mask, Model, label_for, nms},
  session::Confidence,
  settings::TaskKind,
};

const YOLOV8_INPUT_NAME: &str = "images";
const YOLOV8_OUTPUT_NAME: &str = "output0";
const YOLOV8_PROTO_NAME: &str = "output1";
const YOLOV8_INPUT_SIZE: u32 = 640;
const YOLOV8_PAD_VALUE: u8 = 114;
const YOLOV8_BOX_DIMS: usize = 4;
const YOLOV8_MASK_THRESH: f32 = 0.5;

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("ONNX Runtime 错误: {0}")]
  Runtime(#[from] ort::Error),
  #[error("推理会话已损坏")]
  SessionPoisoned,
  #[error("输出形状不符合预期: {0:?}")]
  UnexpectedShape(Vec<i64>),
}

/// YOLOv8 模型句柄，加载后只读
pub struct Yolov8 {
  session: Mutex<Session>,
  kind: TaskKind,
  input_size: u32,
  nms_threshold: f32,
}

impl Yolov8 {
  pub(crate) fn load(path: &Path, nms_threshold: f32) -> Result<Self, LoadError> {
    info!("加载模型文件: {}", path.display());
    let session = Session::builder()
      .and_then(|builder| builder.with_optimization_level(GraphOptimizationLevel::Level3))
      .and_then(|builder| builder.commit_from_file(path))
      .map_err(|e| {
        error!("创建推理会话失败: {}", e);
        LoadError::new(path, e)
      })?;

    let kind = match session.outputs.len() {
      1 => TaskKind::Detection,
      2 => TaskKind::Segmentation,
      n => {
        return Err(LoadError::new(
          path,
          LoadCause::Invalid(format!("预期 1 或 2 个输出，实际为 {}", n)),
        ));
      }
    };
    debug!("模型输出数量: {}", session.outputs.len());
    info!("模型加载完成: {}", kind);

    Ok(Self {
      session: Mutex::new(session),
      kind,
      input_size: YOLOV8_INPUT_SIZE,
      nms_threshold,
    })
  }

  pub fn kind(&self) -> TaskKind {
    self.kind
  }
}

impl Model for Yolov8 {
  type Error = Yolov8Error;

  fn predict(&self, image: &RgbImage, confidence: Confidence) -> Result<DetectResult, Self::Error> {
    let letterbox = Letterbox::new(image.width(), image.height(), self.input_size);
    let input = letterbox.apply(image);
    let size = self.input_size as usize;
    let tensor = Tensor::from_array((
      [1usize, 3, size, size],
      to_nchw_f32(&input).into_boxed_slice(),
    ))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| Yolov8Error::SessionPoisoned)?;
    debug!("执行模型推理");
    let outputs = session.run(ort::inputs![YOLOV8_INPUT_NAME => tensor])?;

    let (shape, data) = outputs[YOLOV8_OUTPUT_NAME].try_extract_tensor::<f32>()?;
    let dims: Vec<i64> = shape.iter().copied().collect();

    let items = match self.kind {
      TaskKind::Detection => {
        let candidates = decode(data, &dims, 0, &letterbox, confidence)?;
        nms(candidates, self.nms_threshold)
          .into_iter()
          .map(|candidate| candidate.item)
          .collect()
      }
      TaskKind::Segmentation => {
        let (proto_shape, protos) = outputs[YOLOV8_PROTO_NAME].try_extract_tensor::<f32>()?;
        let proto_dims = Protos::from_shape(proto_shape.iter().copied().collect())?;
        let candidates = decode(data, &dims, proto_dims.channels, &letterbox, confidence)?;
        nms(candidates, self.nms_threshold)
          .into_iter()
          .map(|candidate| {
            let mask = proto_dims.mask(&candidate, protos, &letterbox);
            DetectItem {
              mask,
              ..candidate.item
            }
          })
          .collect()
      }
    };

    let result = DetectResult { items };
    debug!("检测到 {} 个物体", result.len());
    Ok(result)
  }
}

/// 保持宽高比缩放并填充到模型输入尺寸
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: u32,
  pad_y: u32,
  resized_w: u32,
  resized_h: u32,
  src_w: u32,
  src_h: u32,
  size: u32,
}

impl Letterbox {
  fn new(src_w: u32, src_h: u32, size: u32) -> Self {
    let scale = (size as f32 / src_w.max(1) as f32).min(size as f32 / src_h.max(1) as f32);
    let resized_w = ((src_w as f32 * scale).round() as u32).clamp(1, size);
    let resized_h = ((src_h as f32 * scale).round() as u32).clamp(1, size);
    Self {
      scale,
      pad_x: (size - resized_w) / 2,
      pad_y: (size - resized_h) / 2,
      resized_w,
      resized_h,
      src_w,
      src_h,
      size,
    }
  }

  fn apply(&self, image: &RgbImage) -> RgbImage {
    let resized = image::imageops::resize(image, self.resized_w, self.resized_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(self.size, self.size, Rgb([YOLOV8_PAD_VALUE; 3]));
    image::imageops::replace(&mut canvas, &resized, self.pad_x as i64, self.pad_y as i64);
    canvas
  }

  /// 模型输入坐标映射回原图，并裁剪到图像范围内
  fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      ((x - self.pad_x as f32) / self.scale).clamp(0.0, self.src_w as f32),
      ((y - self.pad_y as f32) / self.scale).clamp(0.0, self.src_h as f32),
    )
  }

  fn to_input(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale + self.pad_x as f32,
      y * self.scale + self.pad_y as f32,
    )
  }
}

/// 候选目标及其掩码系数
#[derive(Debug, Clone)]
struct Candidate {
  item: DetectItem,
  coeffs: Vec<f32>,
}

impl AsRef<DetectItem> for Candidate {
  fn as_ref(&self) -> &DetectItem {
    &self.item
  }
}

/// 解码 `[1, 4 + nc + nm, N]` 形状的输出，只保留达到阈值的候选
fn decode(
  data: &[f32],
  dims: &[i64],
  num_masks: usize,
  letterbox: &Letterbox,
  confidence: Confidence,
) -> Result<Vec<Candidate>, Yolov8Error> {
  let (rows, proposals) = match dims {
    [1, rows, proposals] if *rows > 0 && *proposals > 0 => (*rows as usize, *proposals as usize),
    _ => return Err(Yolov8Error::UnexpectedShape(dims.to_vec())),
  };
  if rows <= YOLOV8_BOX_DIMS + num_masks || data.len() < rows * proposals {
    return Err(Yolov8Error::UnexpectedShape(dims.to_vec()));
  }
  let num_classes = rows - YOLOV8_BOX_DIMS - num_masks;
  let at = |row: usize, i: usize| data[row * proposals + i];

  let mut candidates = Vec::new();
  for i in 0..proposals {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(YOLOV8_BOX_DIMS + c, i)))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if !confidence.accepts(score) {
      continue;
    }

    let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
    let (x_min, y_min) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
    let (x_max, y_max) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);
    if x_max <= x_min || y_max <= y_min {
      continue;
    }

    let coeffs = (0..num_masks)
      .map(|m| at(YOLOV8_BOX_DIMS + num_classes + m, i))
      .collect();

    candidates.push(Candidate {
      item: DetectItem {
        class_id: class_id as u32,
        label: label_for(class_id as u32, num_classes),
        score,
        bbox: [x_min, y_min, x_max, y_max],
        mask: None,
      },
      coeffs,
    });
  }

  debug!("候选目标数量: {}", candidates.len());
  Ok(candidates)
}

/// 掩码原型 `[1, nm, mh, mw]`
#[derive(Debug, Clone, Copy)]
struct Protos {
  channels: usize,
  height: usize,
  width: usize,
}

impl Protos {
  fn from_shape(dims: Vec<i64>) -> Result<Self, Yolov8Error> {
    match dims.as_slice() {
      [1, c, h, w] if *c > 0 && *h > 0 && *w > 0 => Ok(Self {
        channels: *c as usize,
        height: *h as usize,
        width: *w as usize,
      }),
      _ => Err(Yolov8Error::UnexpectedShape(dims)),
    }
  }

  /// 在目标边框内逐像素合成掩码
  fn mask(&self, candidate: &Candidate, protos: &[f32], letterbox: &Letterbox) -> Option<Mask> {
    let plane = self.height * self.width;
    if candidate.coeffs.len() != self.channels || protos.len() < self.channels * plane {
      return None;
    }

    let [x_min, y_min, x_max, y_max] = candidate.item.bbox;
    let x0 = x_min.floor() as u32;
    let y0 = y_min.floor() as u32;
    let x1 = (x_max.ceil() as u32).min(letterbox.src_w);
    let y1 = (y_max.ceil() as u32).min(letterbox.src_h);
    if x1 <= x0 || y1 <= y0 {
      return None;
    }

    let scale_x = self.width as f32 / letterbox.size as f32;
    let scale_y = self.height as f32 / letterbox.size as f32;
    let mut data = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
    for y in y0..y1 {
      for x in x0..x1 {
        let (ix, iy) = letterbox.to_input(x as f32 + 0.5, y as f32 + 0.5);
        let mx = ((ix * scale_x) as usize).min(self.width - 1);
        let my = ((iy * scale_y) as usize).min(self.height - 1);
        let idx = my * self.width + mx;
        let logit: f32 = candidate
          .coeffs
          .iter()
          .enumerate()
          .map(|(k, coeff)| coeff * protos[k * plane + idx])
          .sum();
        data.push(sigmoid(logit) > YOLOV8_MASK_THRESH);
      }
    }

    Mask::new(x0, y0, x1 - x0, y1 - y0, data)
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn confidence(percent: u8) -> Confidence {
    Confidence::from_percent(percent).unwrap()
  }

  /// 按列存放的 `[1, rows, N]` 输出
  fn columns(proposals: &[Vec<f32>]) -> (Vec<f32>, Vec<i64>) {
    let rows = proposals[0].len();
    let n = proposals.len();
    let mut data = vec![0f32; rows * n];
    for (i, p) in proposals.iter().enumerate() {
      for (r, v) in p.iter().enumerate() {
        data[r * n + i] = *v;
      }
    }
    (data, vec![1, rows as i64, n as i64])
  }

  #[test]
  fn letterbox_wide_image_pads_vertically() {
    let lb = Letterbox::new(1280, 720, 640);
    assert_eq!(lb.scale, 0.5);
    assert_eq!((lb.resized_w, lb.resized_h), (640, 360));
    assert_eq!((lb.pad_x, lb.pad_y), (0, 140));
    assert_eq!(lb.to_source(320.0, 320.0), (640.0, 360.0));
    assert_eq!(lb.to_input(640.0, 360.0), (320.0, 320.0));
  }

  #[test]
  fn letterbox_output_is_square() {
    let image = RgbImage::from_pixel(100, 50, Rgb([255, 0, 0]));
    let lb = Letterbox::new(100, 50, 64);
    let out = lb.apply(&image);
    assert_eq!(out.dimensions(), (64, 64));
    assert_eq!(out.get_pixel(0, 0), &Rgb([YOLOV8_PAD_VALUE; 3]));
    assert_eq!(out.get_pixel(32, 32), &Rgb([255, 0, 0]));
  }

  #[test]
  fn decode_maps_boxes_to_source_pixels() {
    // 两个类别：第一个候选属于类别 1，第二个低于阈值
    let (data, dims) = columns(&[
      vec![320.0, 320.0, 100.0, 50.0, 0.1, 0.8],
      vec![100.0, 100.0, 10.0, 10.0, 0.2, 0.3],
    ]);
    let lb = Letterbox::new(1280, 720, 640);
    let candidates = decode(&data, &dims, 0, &lb, confidence(40)).unwrap();
    assert_eq!(candidates.len(), 1);
    let item = &candidates[0].item;
    assert_eq!(item.class_id, 1);
    assert_eq!(item.label, "class1");
    assert_eq!(item.score, 0.8);
    assert_eq!(item.bbox, [540.0, 310.0, 740.0, 410.0]);
  }

  #[test]
  fn decode_threshold_is_inclusive() {
    let (data, dims) = columns(&[vec![50.0, 50.0, 10.0, 10.0, 0.6]]);
    let lb = Letterbox::new(640, 640, 640);
    assert_eq!(decode(&data, &dims, 0, &lb, confidence(60)).unwrap().len(), 1);
    assert_eq!(decode(&data, &dims, 0, &lb, confidence(61)).unwrap().len(), 0);
  }

  #[test]
  fn decode_rejects_bad_shape() {
    let lb = Letterbox::new(640, 640, 640);
    let err = decode(&[0.0; 8], &[1, 4, 2], 0, &lb, confidence(25)).unwrap_err();
    assert!(matches!(err, Yolov8Error::UnexpectedShape(_)));
  }

  #[test]
  fn decode_collects_mask_coefficients() {
    let (data, dims) = columns(&[vec![50.0, 50.0, 10.0, 10.0, 0.9, 0.5, -0.5]]);
    let lb = Letterbox::new(640, 640, 640);
    let candidates = decode(&data, &dims, 2, &lb, confidence(25)).unwrap();
    assert_eq!(candidates[0].coeffs, vec![0.5, -0.5]);
    assert_eq!(candidates[0].item.label, "class0");
  }

  #[test]
  fn mask_follows_prototype_sign() {
    // 单通道 2x2 原型：左半正，右半负
    let protos = vec![4.0, -4.0, 4.0, -4.0];
    let proto = Protos::from_shape(vec![1, 1, 2, 2]).unwrap();
    let lb = Letterbox::new(640, 640, 640);
    let candidate = Candidate {
      item: DetectItem {
        class_id: 0,
        label: String::from("person"),
        score: 0.9,
        bbox: [0.0, 0.0, 640.0, 640.0],
        mask: None,
      },
      coeffs: vec![1.0],
    };
    let mask = proto.mask(&candidate, &protos, &lb).unwrap();
    assert!(mask.contains(100, 100));
    assert!(mask.contains(100, 600));
    assert!(!mask.contains(500, 100));
    assert_eq!(mask.area(), 320 * 640);
  }
}
