// 该文件是 Fudian （浮点） 项目的一部分。
// src/session.rs - 会话：模型与置信度阈值
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

use std::fmt;

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::model::{DetectResult, Model};

/// 置信度阈值允许的最小百分比
pub const MIN_CONFIDENCE_PERCENT: u8 = 25;
/// 置信度阈值允许的最大百分比
pub const MAX_CONFIDENCE_PERCENT: u8 = 100;
/// 默认置信度百分比
pub const DEFAULT_CONFIDENCE_PERCENT: u8 = 40;

#[derive(Error, Debug, PartialEq)]
pub enum ConfidenceError {
  #[error("置信度百分比必须在 25 到 100 之间，实际为 {0}")]
  PercentOutOfRange(u8),
  #[error("置信度必须在 0.25 到 1.0 之间，实际为 {0}")]
  OutOfRange(f32),
}

/// 置信度阈值，取值范围 [0.25, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Confidence(f32);

impl Confidence {
  pub fn from_percent(percent: u8) -> Result<Self, ConfidenceError> {
    if !(MIN_CONFIDENCE_PERCENT..=MAX_CONFIDENCE_PERCENT).contains(&percent) {
      return Err(ConfidenceError::PercentOutOfRange(percent));
    }
    Ok(Self(percent as f32 / 100.0))
  }

  pub fn new(value: f32) -> Result<Self, ConfidenceError> {
    let min = MIN_CONFIDENCE_PERCENT as f32 / 100.0;
    if !(min..=1.0).contains(&value) {
      return Err(ConfidenceError::OutOfRange(value));
    }
    Ok(Self(value))
  }

  pub fn value(&self) -> f32 {
    self.0
  }

  /// 阈值比较包含边界：`score >= threshold`
  pub fn accepts(&self, score: f32) -> bool {
    score >= self.0
  }
}

impl Default for Confidence {
  fn default() -> Self {
    Self(DEFAULT_CONFIDENCE_PERCENT as f32 / 100.0)
  }
}

impl fmt::Display for Confidence {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2}", self.0)
  }
}

/// 一次会话只有一个模型和一个置信度阈值，会话内所有推理都基于这一对
pub struct Session<M> {
  model: M,
  confidence: Confidence,
}

impl<M: Model> Session<M> {
  pub fn new(model: M, confidence: Confidence) -> Self {
    Self { model, confidence }
  }

  pub fn model(&self) -> &M {
    &self.model
  }

  pub fn confidence(&self) -> Confidence {
    self.confidence
  }

  /// 以会话阈值推理，并再次过滤掉低于阈值的目标
  pub fn predict(&self, image: &RgbImage) -> Result<DetectResult, M::Error> {
    let mut result = self.model.predict(image, self.confidence)?;
    let before = result.len();
    result.retain_confident(self.confidence);
    if result.len() != before {
      debug!("丢弃 {} 个低于阈值的目标", before - result.len());
    }
    Ok(result)
  }
}

/// 单个目标的文本明细
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectBreakdown {
  pub class_id: u32,
  pub label: String,
  pub confidence: f32,
  pub bbox: [f32; 4],
}

impl fmt::Display for ObjectBreakdown {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} ({}) {:.4} [{:.1}, {:.1}, {:.1}, {:.1}]",
      self.class_id,
      self.label,
      self.confidence,
      self.bbox[0],
      self.bbox[1],
      self.bbox[2],
      self.bbox[3]
    )
  }
}

/// 按模型返回的顺序生成明细
pub fn breakdown(result: &DetectResult) -> Vec<ObjectBreakdown> {
  result
    .items
    .iter()
    .map(|item| ObjectBreakdown {
      class_id: item.class_id,
      label: item.label.clone(),
      confidence: item.score,
      bbox: item.bbox,
    })
    .collect()
}
