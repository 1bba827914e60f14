// 该文件是 Fudian （浮点） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU16, Ordering},
};

use chrono::{DateTime, Datelike, Local};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, Record},
  },
  url_path,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DrawWrapper {
  Draw(Box<Draw>),
  Record(Record),
}

impl DrawWrapper {
  pub fn save_result(
    &self,
    path: &Path,
    frame: &Frame,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      DrawWrapper::Draw(draw) => {
        draw.draw_detection(&frame.image, result).save(path)?;
      }
      DrawWrapper::Record(record) => {
        frame.image.save(path)?;
        record.record(result, path)?;
      }
    };

    Ok(())
  }

  pub fn with(kind: Option<&str>) -> Self {
    match kind {
      Some("id") => DrawWrapper::Record(Record {
        label_with_name: false,
      }),
      Some(_) => DrawWrapper::Record(Record {
        label_with_name: true,
      }),
      None => DrawWrapper::Draw(Box::default()),
    }
  }
}

/// 按日期分目录保存每一帧
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: DrawWrapper,
  frame_counter: AtomicU16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri
      .query_pairs()
      .find(|(k, _)| k == "record")
      .map(|(_, v)| v.into_owned());
    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: url_path(uri),
      draw: DrawWrapper::with(record.as_deref()),
      frame_counter: AtomicU16::new(0),
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 替换绘制方式，记录模式不受影响
  pub fn set_draw(&mut self, draw: Draw) {
    if let DrawWrapper::Draw(current) = &mut self.draw {
      **current = draw;
    }
  }

  fn frame_id(&self) -> u16 {
    self.frame_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn frame_path(&self, now: DateTime<Local>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }
    let path = self.frame_path(Local::now())?;
    self.draw.save_result(&path, frame, result)?;
    debug!("记录帧 {} 到 {}", frame.index, path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;
  use image::RgbImage;
  use url::Url;

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn saved_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
      for entry in std::fs::read_dir(current).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else {
          files.push(path);
        }
      }
    }
    files.sort();
    files
  }

  fn one_person() -> DetectResult {
    DetectResult {
      items: vec![DetectItem {
        class_id: 0,
        label: String::from("person"),
        score: 0.5,
        bbox: [1.0, 1.0, 3.0, 3.0],
        mask: None,
      }],
    }
  }

  #[test]
  fn empty_frames_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = Frame::still(RgbImage::new(4, 4));

    let skipping = output(dir.path(), "");
    skipping.render_result(&frame, &DetectResult::default()).unwrap();
    assert!(saved_files(dir.path()).is_empty());

    let always = output(dir.path(), "?always");
    always.render_result(&frame, &DetectResult::default()).unwrap();
    assert_eq!(saved_files(dir.path()).len(), 1);
  }

  #[test]
  fn record_mode_writes_text_beside_frame() {
    let dir = tempfile::tempdir().unwrap();
    let record = output(dir.path(), "?record=id");
    record
      .render_result(&Frame::still(RgbImage::new(4, 4)), &one_person())
      .unwrap();

    let files = saved_files(dir.path());
    assert_eq!(files.len(), 2);
    let text = files.iter().find(|p| p.extension().unwrap() == "txt").unwrap();
    assert_eq!(
      std::fs::read_to_string(text).unwrap(),
      "0, 0.5000, 1.0, 1.0, 3.0, 3.0"
    );
  }

  #[test]
  fn frame_paths_are_dated() {
    let dir = tempfile::tempdir().unwrap();
    let out = output(dir.path(), "");
    let now = Local::now();
    let path = out.frame_path(now).unwrap();
    let expected_dir = dir
      .path()
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    assert_eq!(path.parent().unwrap(), expected_dir.as_path());
    assert!(path.to_string_lossy().ends_with("-0001.png"));
  }
}
