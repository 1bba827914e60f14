// 该文件是 Fudian （浮点） 项目的一部分。
// src/task.rs - 推理任务：视频循环与单张图片
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
  convert::Infallible,
  fmt,
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  input::{DecodeError, FrameSource, ReadError, read_image_file},
  model::{DetectResult, Model},
  output::Render,
  session::{ObjectBreakdown, Session, breakdown},
};

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, session: &Session<M>, output: O) -> Result<Self::Output, Self::Error>;
}

/// 播放状态，`Stopped`、`Finished`、`Errored` 为终止状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
  Idle,
  Streaming,
  Stopped,
  Finished,
  Errored(String),
}

impl PlaybackState {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      PlaybackState::Stopped | PlaybackState::Finished | PlaybackState::Errored(_)
    )
  }
}

impl fmt::Display for PlaybackState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PlaybackState::Idle => write!(f, "空闲"),
      PlaybackState::Streaming => write!(f, "播放中"),
      PlaybackState::Stopped => write!(f, "已停止"),
      PlaybackState::Finished => write!(f, "已结束"),
      PlaybackState::Errored(message) => write!(f, "出错: {}", message),
    }
  }
}

/// 停止标志，在每次循环开始时检查
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
  pub state: PlaybackState,
  pub frames: u64,
  pub detections: usize,
}

/// 逐帧读取、推理并渲染，直到视频结束、出错或被停止
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<u64>,
  stop: StopHandle,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<u64>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
    self.stop = stop;
    self
  }

  pub fn stop_handle(&self) -> StopHandle {
    self.stop.clone()
  }

  fn step<S, M, O>(
    &self,
    source: &mut S,
    session: &Session<M>,
    output: &O,
    report: &mut PlaybackReport,
  ) -> Option<PlaybackState>
  where
    S: FrameSource,
    M: Model,
    M::Error: fmt::Display,
    O: Render,
    O::Error: fmt::Display,
  {
    if self.stop.is_stopped() {
      warn!("收到停止请求，退出任务循环");
      return Some(PlaybackState::Stopped);
    }
    if self.frame_number.is_some_and(|n| report.frames >= n) {
      info!("达到指定帧数 {}, 退出任务循环", report.frames);
      return Some(PlaybackState::Stopped);
    }

    let frame = match source.read_next_frame() {
      Ok(frame) => frame,
      Err(ReadError::EndOfStream) => {
        info!("视频播放完毕");
        return Some(PlaybackState::Finished);
      }
      Err(ReadError::Stream(e)) => {
        error!("{}", e);
        return Some(PlaybackState::Errored(e.to_string()));
      }
    };

    let now = Instant::now();
    let result = match session.predict(&frame.image) {
      Ok(result) => result,
      Err(e) => {
        error!("推理失败: {}", e);
        return Some(PlaybackState::Errored(format!("推理失败: {}", e)));
      }
    };
    let elapsed_a = now.elapsed();
    if let Err(e) = output.render_result(&frame, &result) {
      error!("渲染失败: {}", e);
      return Some(PlaybackState::Errored(format!("渲染失败: {}", e)));
    }
    let elapsed_b = now.elapsed();

    report.frames += 1;
    report.detections += result.len();
    debug!(
      "第 {} 帧: {} 个目标，耗时: {:.2?} / {:.2?}",
      frame.index,
      result.len(),
      elapsed_a,
      elapsed_b
    );
    None
  }
}

impl<S, M, O> Task<S, M, O> for ContinuousTask
where
  S: FrameSource,
  M: Model,
  M::Error: fmt::Display,
  O: Render,
  O::Error: fmt::Display,
{
  type Output = PlaybackReport;
  type Error = Infallible;

  fn run_task(self, mut source: S, session: &Session<M>, output: O) -> Result<Self::Output, Self::Error> {
    let mut report = PlaybackReport {
      state: PlaybackState::Idle,
      frames: 0,
      detections: 0,
    };

    info!("打开 {} 视频源...", source.kind());
    if let Err(e) = source.open() {
      error!("{}", e);
      source.close();
      report.state = PlaybackState::Errored(e.to_string());
      return Ok(report);
    }

    report.state = PlaybackState::Streaming;
    info!("开始任务，置信度阈值: {}", session.confidence());
    let terminal = loop {
      if let Some(state) = self.step(&mut source, session, &output, &mut report) {
        break state;
      }
    };

    source.close();
    report.state = terminal;
    info!(
      "任务{}，共 {} 帧，{} 个目标",
      report.state, report.frames, report.detections
    );
    Ok(report)
  }
}

/// 未检测时明细的提示
pub const NO_DETECTION_MESSAGE: &str = "还没有检测结果！";

#[derive(Error, Debug)]
pub enum ImageTaskError {
  #[error("图片解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("渲染失败: {0}")]
  Render(String),
}

/// 单张图片来源
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
  /// 默认图片及预先渲染好的检测结果
  Default { image: PathBuf, detected: PathBuf },
  /// 用户上传的图片
  Uploaded(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageReport {
  /// 原图
  pub original: RgbImage,
  /// 交给输出的帧，检测结果由输出绘制
  pub shown: RgbImage,
  /// 是否执行了推理
  pub inferred: bool,
  /// 推理后的逐目标明细
  pub breakdown: Option<Vec<ObjectBreakdown>>,
}

impl ImageReport {
  /// 明细文本：目标数量，随后每行一个目标
  pub fn breakdown_text(&self) -> String {
    match &self.breakdown {
      None => NO_DETECTION_MESSAGE.to_string(),
      Some(rows) => std::iter::once(rows.len().to_string())
        .chain(rows.iter().map(ObjectBreakdown::to_string))
        .collect::<Vec<_>>()
        .join("\n"),
    }
  }
}

/// 单次图片推理，没有循环和状态机
#[derive(Default, Debug)]
pub struct ImageTask {
  detect: bool,
}

impl ImageTask {
  /// `detect` 对应“检测”按钮，未触发时上传的图片原样显示
  pub fn with_detect(mut self, detect: bool) -> Self {
    self.detect = detect;
    self
  }
}

impl<M, O> Task<ImageSource, M, O> for ImageTask
where
  M: Model,
  M::Error: fmt::Display,
  O: Render,
  O::Error: fmt::Display,
{
  type Output = ImageReport;
  type Error = ImageTaskError;

  fn run_task(self, input: ImageSource, session: &Session<M>, output: O) -> Result<Self::Output, Self::Error> {
    let empty = DetectResult::default();
    let render = |image: &RgbImage, result: &DetectResult| {
      output
        .render_result(&Frame::still(image.clone()), result)
        .map_err(|e| ImageTaskError::Render(e.to_string()))
    };

    match input {
      ImageSource::Default { image, detected } => {
        info!("未上传图片，显示默认图片");
        let original = read_image_file(&image)?;
        let shown = read_image_file(&detected)?;
        render(&shown, &empty)?;
        Ok(ImageReport {
          original,
          shown,
          inferred: false,
          breakdown: None,
        })
      }
      ImageSource::Uploaded(path) => {
        let original = read_image_file(&path)?;
        info!(
          "上传图片: {} ({}x{})",
          path.display(),
          original.width(),
          original.height()
        );

        if !self.detect {
          render(&original, &empty)?;
          return Ok(ImageReport {
            shown: original.clone(),
            original,
            inferred: false,
            breakdown: None,
          });
        }

        let now = Instant::now();
        let result = session
          .predict(&original)
          .map_err(|e| ImageTaskError::Inference(e.to_string()))?;
        info!("推理完成，耗时: {:.2?}，{} 个目标", now.elapsed(), result.len());
        render(&original, &result)?;

        Ok(ImageReport {
          shown: original.clone(),
          original,
          inferred: true,
          breakdown: Some(breakdown(&result)),
        })
      }
    }
  }
}
