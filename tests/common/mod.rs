// 该文件是 Fudian （浮点） 项目的一部分。
// tests/common/mod.rs - 集成测试用的模型、视频源与输出
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

#![allow(dead_code)]

use std::cell::{Cell, RefCell};

use image::{Rgb, RgbImage};
use thiserror::Error;

use fudian::{
  frame::Frame,
  input::{FrameSource, ReadError, StreamError},
  model::{DetectItem, DetectResult, Model},
  output::Render,
  session::Confidence,
  settings::SourceKind,
};

#[derive(Error, Debug)]
#[error("模拟推理失败")]
pub struct MockModelError;

/// 不理会阈值，每次都返回固定分数的目标
pub struct ScoreModel {
  pub scores: Vec<f32>,
  pub calls: Cell<usize>,
  pub fail_at: Option<usize>,
}

impl ScoreModel {
  pub fn new(scores: &[f32]) -> Self {
    Self {
      scores: scores.to_vec(),
      calls: Cell::new(0),
      fail_at: None,
    }
  }
}

impl Model for ScoreModel {
  type Error = MockModelError;

  fn predict(&self, image: &RgbImage, _: Confidence) -> Result<DetectResult, Self::Error> {
    let call = self.calls.get();
    self.calls.set(call + 1);
    if self.fail_at == Some(call) {
      return Err(MockModelError);
    }
    let (w, h) = (image.width() as f32, image.height() as f32);
    Ok(DetectResult {
      items: self
        .scores
        .iter()
        .enumerate()
        .map(|(i, score)| DetectItem {
          class_id: i as u32,
          label: format!("class{}", i),
          score: *score,
          bbox: [0.0, 0.0, w / 2.0, h / 2.0],
          mask: None,
        })
        .collect(),
    })
  }
}

/// 读取若干帧后结束或出错的视频源
pub struct MockSource {
  pub kind: SourceKind,
  pub frames: u64,
  pub fail_open: bool,
  pub fail_read_at: Option<u64>,
  pub opened: bool,
  pub reads: u64,
  pub releases: u32,
  pub close_calls: u32,
}

impl MockSource {
  pub fn new(kind: SourceKind, frames: u64) -> Self {
    Self {
      kind,
      frames,
      fail_open: false,
      fail_read_at: None,
      opened: false,
      reads: 0,
      releases: 0,
      close_calls: 0,
    }
  }

  pub fn failing_open(kind: SourceKind) -> Self {
    Self {
      fail_open: true,
      ..Self::new(kind, 0)
    }
  }

  pub fn failing_read_at(kind: SourceKind, at: u64) -> Self {
    Self {
      fail_read_at: Some(at),
      ..Self::new(kind, u64::MAX)
    }
  }
}

impl FrameSource for MockSource {
  fn kind(&self) -> SourceKind {
    self.kind
  }

  fn open(&mut self) -> Result<(), StreamError> {
    if self.fail_open {
      return Err(StreamError::new(self.kind, "设备不存在"));
    }
    self.opened = true;
    Ok(())
  }

  fn read_next_frame(&mut self) -> Result<Frame, ReadError> {
    assert!(self.opened, "读取前必须打开视频源");
    if self.fail_read_at == Some(self.reads) {
      return Err(StreamError::new(self.kind, "连接中断").into());
    }
    if self.reads >= self.frames {
      return Err(ReadError::EndOfStream);
    }
    let index = self.reads;
    self.reads += 1;
    Ok(Frame::new(
      RgbImage::from_pixel(8, 6, Rgb([index as u8, 0, 0])),
      index,
      index * 40,
    ))
  }

  fn close(&mut self) {
    self.close_calls += 1;
    if self.opened {
      self.opened = false;
      self.releases += 1;
    }
  }
}

/// 记录所有被渲染的帧和结果
#[derive(Default)]
pub struct RecordingOutput {
  pub rendered: RefCell<Vec<(Frame, DetectResult)>>,
}

impl RecordingOutput {
  pub fn scores(&self) -> Vec<f32> {
    self
      .rendered
      .borrow()
      .iter()
      .flat_map(|(_, result)| result.items.iter().map(|item| item.score))
      .collect()
  }

  pub fn count(&self) -> usize {
    self.rendered.borrow().len()
  }
}

impl Render for RecordingOutput {
  type Error = std::convert::Infallible;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    self.rendered.borrow_mut().push((frame.clone(), result.clone()));
    Ok(())
  }
}
