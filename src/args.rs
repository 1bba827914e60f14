// 该文件是 Fudian （浮点） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use url::Url;

use fudian::{
  FromUrl,
  input::SourceSpec,
  session::{DEFAULT_CONFIDENCE_PERCENT, MAX_CONFIDENCE_PERCENT, MIN_CONFIDENCE_PERCENT},
  settings::{Settings, SourceKind, TaskKind},
  task::ImageSource,
};

/// Fudian 目标检测与分割
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// JSON 配置文件，缺省时使用内置配置
  #[arg(long, value_name = "FILE")]
  pub settings: Option<PathBuf>,

  /// 任务类型
  #[arg(long, value_enum, default_value_t = TaskKind::Detection)]
  pub task: TaskKind,

  /// 检测模型，只能从配置的模型列表中选择
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,

  /// 置信度阈值（百分比）
  #[arg(
    long,
    value_name = "PERCENT",
    default_value_t = DEFAULT_CONFIDENCE_PERCENT,
    value_parser = clap::value_parser!(u8).range(MIN_CONFIDENCE_PERCENT as i64..=MAX_CONFIDENCE_PERCENT as i64)
  )]
  pub confidence: u8,

  /// 输入来源
  #[arg(long, value_enum, default_value_t = SourceKind::Image)]
  pub source: SourceKind,

  /// 上传的图片（jpg、jpeg、png、bmp、webp）
  #[arg(long, value_name = "IMAGE")]
  pub upload: Option<PathBuf>,

  /// 对上传的图片执行检测
  #[arg(long)]
  pub detect: bool,

  /// 已存储视频的名称或视频文件路径
  #[arg(long, value_name = "VIDEO")]
  pub video: Option<String>,

  /// 摄像头编号
  #[arg(long, value_name = "INDEX")]
  pub webcam: Option<usize>,

  /// RTSP 地址
  #[arg(long, value_name = "URL")]
  pub rtsp: Option<Url>,

  /// YouTube 视频地址
  #[arg(long, value_name = "URL")]
  pub youtube: Option<Url>,

  /// 输出方式：gst://display、gst:///out.mp4?fps=30、image:///out.png、folder:///dir
  #[arg(long, value_name = "OUTPUT", default_value = "gst://display")]
  pub output: Url,

  /// 最大处理帧数，0 表示不限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,
}

impl Args {
  pub fn frame_limit(&self) -> Option<u64> {
    (self.frame_number > 0).then_some(self.frame_number)
  }

  /// 单张图片显示在窗口中时，窗口保持到 Ctrl-C
  pub fn holds_display(&self) -> bool {
    self.source == SourceKind::Image && self.output.scheme() == "gst" && self.output.host_str() == Some("display")
  }

  /// 单张图片的来源，未上传时使用默认图片
  pub fn image_source(&self, settings: &Settings) -> ImageSource {
    match &self.upload {
      Some(path) => ImageSource::Uploaded(path.clone()),
      None => ImageSource::Default {
        image: settings.default_image.clone(),
        detected: settings.default_detect_image.clone(),
      },
    }
  }

  /// 视频类来源
  pub fn source_spec(&self, settings: &Settings) -> Result<SourceSpec> {
    let spec = match self.source {
      SourceKind::Image => bail!("图片来源不是视频流"),
      SourceKind::Video => {
        let path = match self.video.as_deref() {
          Some(name) if settings.videos.contains_key(name) => settings.video_path(Some(name))?.to_path_buf(),
          Some(path) => PathBuf::from(path),
          None => settings.video_path(None)?.to_path_buf(),
        };
        SourceSpec::Video(path)
      }
      SourceKind::Webcam => SourceSpec::Webcam(self.webcam.unwrap_or(settings.webcam_index)),
      SourceKind::Rtsp => {
        let url = match (&self.rtsp, &settings.rtsp_url) {
          (Some(url), _) => url.clone(),
          (None, Some(url)) => Url::parse(url)?,
          (None, None) => bail!("请通过 --rtsp 提供 RTSP 地址"),
        };
        SourceSpec::from_url(&url)?
      }
      SourceKind::YouTube => match &self.youtube {
        Some(url) => SourceSpec::from_url(url)?,
        None => bail!("请通过 --youtube 提供视频地址"),
      },
    };
    if spec.kind() != self.source {
      bail!("{} 地址不是 {} 来源", spec.kind(), self.source);
    }
    Ok(spec)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(args: &[&str]) -> Result<Args, clap::Error> {
    Args::try_parse_from(std::iter::once("fudian").chain(args.iter().copied()))
  }

  #[test]
  fn defaults() {
    let args = parse(&[]).unwrap();
    assert_eq!(args.task, TaskKind::Detection);
    assert_eq!(args.confidence, 40);
    assert_eq!(args.source, SourceKind::Image);
    assert_eq!(args.output.as_str(), "gst://display");
    assert_eq!(args.frame_limit(), None);
  }

  #[test]
  fn image_on_display_waits_for_interrupt() {
    assert!(parse(&[]).unwrap().holds_display());
    assert!(!parse(&["--output", "image:///tmp/out.png"]).unwrap().holds_display());
    assert!(!parse(&["--output", "gst:///tmp/out.mp4"]).unwrap().holds_display());
    assert!(!parse(&["--source", "webcam"]).unwrap().holds_display());
  }

  #[test]
  fn confidence_is_bounded() {
    assert!(parse(&["--confidence", "25"]).is_ok());
    assert!(parse(&["--confidence", "100"]).is_ok());
    assert!(parse(&["--confidence", "24"]).is_err());
    assert!(parse(&["--confidence", "101"]).is_err());
  }

  #[test]
  fn stored_video_name_or_path() {
    let settings = Settings::default();
    let args = parse(&["--source", "video", "--video", "video_2"]).unwrap();
    assert_eq!(
      args.source_spec(&settings).unwrap(),
      SourceSpec::Video(PathBuf::from("videos/video_2.mp4"))
    );

    let args = parse(&["--source", "video", "--video", "/data/clip.mkv"]).unwrap();
    assert_eq!(
      args.source_spec(&settings).unwrap(),
      SourceSpec::Video(PathBuf::from("/data/clip.mkv"))
    );
  }

  #[test]
  fn webcam_falls_back_to_settings() {
    let settings = Settings::default();
    let args = parse(&["--source", "webcam"]).unwrap();
    assert_eq!(args.source_spec(&settings).unwrap(), SourceSpec::Webcam(0));
  }

  #[test]
  fn rtsp_and_youtube_need_addresses() {
    let settings = Settings::default();
    assert!(parse(&["--source", "rtsp"]).unwrap().source_spec(&settings).is_err());
    assert!(parse(&["--source", "youtube"]).unwrap().source_spec(&settings).is_err());
    let args = parse(&["--source", "youtube", "--youtube", "https://example.com/v"]).unwrap();
    assert!(args.source_spec(&settings).is_err());
  }

  #[test]
  fn default_image_without_upload() {
    let settings = Settings::default();
    let args = parse(&[]).unwrap();
    assert_eq!(
      args.image_source(&settings),
      ImageSource::Default {
        image: settings.default_image.clone(),
        detected: settings.default_detect_image.clone(),
      }
    );
  }
}
