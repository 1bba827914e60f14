// 该文件是 Fudian （浮点） 项目的一部分。
// tests/static_image.rs - 单张图片推理
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

mod common;

use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

use fudian::{
  session::{Confidence, Session},
  task::{ImageSource, ImageTask, ImageTaskError, NO_DETECTION_MESSAGE, Task},
};

use common::{RecordingOutput, ScoreModel};

fn write_png(dir: &Path, name: &str, color: [u8; 3]) -> PathBuf {
  let path = dir.join(name);
  RgbImage::from_pixel(12, 9, Rgb(color)).save(&path).unwrap();
  path
}

#[test]
fn default_image_shows_pre_rendered_result_without_inference() {
  let dir = tempfile::tempdir().unwrap();
  let image = write_png(dir.path(), "office_4.png", [10, 10, 10]);
  let detected = write_png(dir.path(), "office_4_detected.png", [200, 50, 50]);

  let model = ScoreModel::new(&[0.9]);
  let session = Session::new(&model, Confidence::from_percent(40).unwrap());
  let output = RecordingOutput::default();

  // 即使按下检测按钮，默认图片也不会推理
  let report = ImageTask::default()
    .with_detect(true)
    .run_task(ImageSource::Default { image, detected: detected.clone() }, &session, &output)
    .unwrap();

  assert_eq!(model.calls.get(), 0);
  assert!(!report.inferred);
  assert_eq!(report.breakdown_text(), NO_DETECTION_MESSAGE);
  assert_eq!(report.original.get_pixel(0, 0), &Rgb([10, 10, 10]));

  let expected = image::open(&detected).unwrap().to_rgb8();
  assert_eq!(report.shown, expected);
  let rendered = output.rendered.borrow();
  assert_eq!(rendered.len(), 1);
  assert_eq!(rendered[0].0.image, expected);
  assert!(rendered[0].1.is_empty());
}

#[test]
fn upload_without_detect_is_shown_as_is() {
  let dir = tempfile::tempdir().unwrap();
  let upload = write_png(dir.path(), "upload.png", [1, 2, 3]);

  let model = ScoreModel::new(&[0.9]);
  let session = Session::new(&model, Confidence::default());
  let output = RecordingOutput::default();

  let report = ImageTask::default()
    .run_task(ImageSource::Uploaded(upload), &session, &output)
    .unwrap();

  assert_eq!(model.calls.get(), 0);
  assert_eq!(report.breakdown_text(), NO_DETECTION_MESSAGE);
  assert_eq!(report.shown.get_pixel(5, 5), &Rgb([1, 2, 3]));
  assert_eq!(output.count(), 1);
}

#[test]
fn upload_with_detect_runs_inference_once() {
  let dir = tempfile::tempdir().unwrap();
  let upload = write_png(dir.path(), "upload.png", [1, 2, 3]);

  let model = ScoreModel::new(&[0.8, 0.3, 0.55]);
  let session = Session::new(&model, Confidence::from_percent(50).unwrap());
  let output = RecordingOutput::default();

  let report = ImageTask::default()
    .with_detect(true)
    .run_task(ImageSource::Uploaded(upload), &session, &output)
    .unwrap();

  assert_eq!(model.calls.get(), 1);
  assert!(report.inferred);
  let rows = report.breakdown.as_ref().unwrap();
  let scores: Vec<f32> = rows.iter().map(|row| row.confidence).collect();
  assert_eq!(scores, vec![0.8, 0.55]);
  assert_eq!(report.breakdown_text().lines().next(), Some("2"));
  assert_eq!(output.scores(), vec![0.8, 0.55]);
}

#[test]
fn unreadable_upload_is_decode_error() {
  let dir = tempfile::tempdir().unwrap();
  let upload = dir.path().join("broken.jpg");
  std::fs::write(&upload, b"not a jpeg").unwrap();

  let model = ScoreModel::new(&[0.9]);
  let session = Session::new(&model, Confidence::default());
  let output = RecordingOutput::default();

  let err = ImageTask::default()
    .with_detect(true)
    .run_task(ImageSource::Uploaded(upload), &session, &output)
    .unwrap_err();

  assert!(matches!(err, ImageTaskError::Decode(_)));
  assert_eq!(model.calls.get(), 0);
  assert_eq!(output.count(), 0);
}
