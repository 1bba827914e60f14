// 该文件是 Fudian （浮点） 项目的一部分。
// src/settings.rs - 全局配置
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

//! 进程启动时加载一次、此后只读的配置。
//!
//! 配置文件为 JSON，缺省字段使用 [`Settings::default`] 中的值：
//!
//! ```json
//! {
//!   "model_dir": "weights",
//!   "detection_models": ["yolov8n.onnx", "yolov8s.onnx"],
//!   "videos": { "video_1": "videos/video_1.mp4" },
//!   "webcam_index": 0
//! }
//! ```

use std::{
  collections::BTreeMap,
  fmt,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// 推理任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
  Detection,
  Segmentation,
}

impl fmt::Display for TaskKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskKind::Detection => write!(f, "Detection"),
      TaskKind::Segmentation => write!(f, "Segmentation"),
    }
  }
}

/// 输入来源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
  Image,
  Video,
  Webcam,
  Rtsp,
  #[value(name = "youtube")]
  YouTube,
}

impl fmt::Display for SourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceKind::Image => write!(f, "Image"),
      SourceKind::Video => write!(f, "Video"),
      SourceKind::Webcam => write!(f, "Webcam"),
      SourceKind::Rtsp => write!(f, "RTSP"),
      SourceKind::YouTube => write!(f, "YouTube"),
    }
  }
}

#[derive(Error, Debug)]
pub enum SettingsError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误 {path}: {source}")]
  Parse {
    path: PathBuf,
    source: serde_json::Error,
  },
  #[error("未知模型 '{select}'，可选: {available:?}")]
  UnknownModel {
    select: String,
    available: Vec<String>,
  },
  #[error("检测模型列表为空")]
  NoModels,
  #[error("未知视频 '{0}'")]
  UnknownVideo(String),
  #[error("未配置任何视频")]
  NoVideos,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// 检测模型所在目录
  pub model_dir: PathBuf,
  /// 可选的检测模型文件名（固定列表）
  pub detection_models: Vec<String>,
  /// 分割模型路径
  pub segmentation_model: PathBuf,
  /// 默认图片
  pub default_image: PathBuf,
  /// 默认图片预先渲染好的检测结果
  pub default_detect_image: PathBuf,
  /// 已存储视频，名称到路径
  pub videos: BTreeMap<String, PathBuf>,
  /// 默认摄像头编号
  pub webcam_index: usize,
  /// 默认 RTSP 地址
  pub rtsp_url: Option<String>,
  /// yt-dlp 格式选择表达式
  pub youtube_format: String,
  /// 标签字体文件（TTF/OTF），未配置时使用内置字体
  pub font: Option<PathBuf>,
  /// NMS IoU 阈值
  pub nms_threshold: f32,
}

impl Default for Settings {
  fn default() -> Self {
    let model_dir = PathBuf::from("weights");
    let videos = (1..=3)
      .map(|i| {
        (
          format!("video_{}", i),
          PathBuf::from(format!("videos/video_{}.mp4", i)),
        )
      })
      .collect();

    Self {
      segmentation_model: model_dir.join("yolov8n-seg.onnx"),
      model_dir,
      detection_models: ["yolov8n", "yolov8s", "yolov8m", "yolov8l", "yolov8x"]
        .iter()
        .map(|name| format!("{}.onnx", name))
        .collect(),
      default_image: PathBuf::from("images/office_4.jpg"),
      default_detect_image: PathBuf::from("images/office_4_detected.jpg"),
      videos,
      webcam_index: 0,
      rtsp_url: None,
      youtube_format: String::from("worst[ext=mp4]/worst"),
      font: None,
      nms_threshold: 0.7,
    }
  }
}

impl Settings {
  /// 从 JSON 文件加载配置
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
    let path = path.as_ref();
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let settings: Settings = serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    debug!("配置内容: {:?}", settings);
    Ok(settings)
  }

  /// 根据任务类型和模型选择得到模型文件路径
  ///
  /// 检测任务只能从固定列表中选择，未指定时使用列表第一项；
  /// 分割任务固定使用 `segmentation_model`。
  pub fn model_path(&self, kind: TaskKind, select: Option<&str>) -> Result<PathBuf, SettingsError> {
    match kind {
      TaskKind::Segmentation => Ok(self.segmentation_model.clone()),
      TaskKind::Detection => {
        let select = match select {
          Some(select) => self
            .detection_models
            .iter()
            .find(|name| name.as_str() == select)
            .ok_or_else(|| SettingsError::UnknownModel {
              select: select.to_string(),
              available: self.detection_models.clone(),
            })?,
          None => self
            .detection_models
            .first()
            .ok_or(SettingsError::NoModels)?,
        };
        Ok(self.model_dir.join(select))
      }
    }
  }

  /// 查找已存储视频，未指定名称时使用按名称排序的第一项
  pub fn video_path(&self, name: Option<&str>) -> Result<&Path, SettingsError> {
    match name {
      Some(name) => self
        .videos
        .get(name)
        .map(PathBuf::as_path)
        .ok_or_else(|| SettingsError::UnknownVideo(name.to_string())),
      None => self
        .videos
        .values()
        .next()
        .map(PathBuf::as_path)
        .ok_or(SettingsError::NoVideos),
    }
  }
}
