// 该文件是 Fudian （浮点） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fudian::{
  FromUrl,
  input::SourceWrapper,
  model::load_model,
  output::{Draw, OutputWrapper},
  session::{Confidence, Session},
  settings::{Settings, SourceKind},
  task::{ContinuousTask, ImageTask, PlaybackState, StopHandle, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  run(args).inspect_err(|e| error!("{:#}", e))
}

fn run(args: args::Args) -> Result<()> {
  let settings = match &args.settings {
    Some(path) => Settings::load(path)?,
    None => Settings::default(),
  };

  let confidence = Confidence::from_percent(args.confidence)?;
  let model_path = settings.model_path(args.task, args.model.as_deref())?;
  info!("任务类型: {}", args.task);
  info!("模型文件路径: {}", model_path.display());
  info!("置信度阈值: {}", confidence);
  info!("输入来源: {}", args.source);
  info!("输出方式: {}", args.output);

  let model = load_model(&model_path, settings.nms_threshold)?;
  if model.kind() != args.task {
    warn!("模型输出为 {} 任务，与所选 {} 不一致", model.kind(), args.task);
  }
  let session = Session::new(model, confidence);

  let draw = match &settings.font {
    Some(font) => Draw::with_font_file(font)?,
    None => Draw::default(),
  };
  let output = OutputWrapper::from_url(&args.output)?.with_draw(draw);

  let stop = StopHandle::new();
  let handler_stop = stop.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    handler_stop.stop();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  if args.source == SourceKind::Image {
    let task = ImageTask::default().with_detect(args.detect);
    let report = task.run_task(args.image_source(&settings), &session, &output)?;
    if report.inferred {
      info!("检测结果:\n{}", report.breakdown_text());
    } else {
      info!("{}", report.breakdown_text());
    }
    if args.holds_display() {
      info!("按 Ctrl-C 关闭窗口");
      while !stop.is_stopped() {
        thread::sleep(Duration::from_millis(100));
      }
    }
    return Ok(());
  }

  let spec = args.source_spec(&settings)?;
  let source = SourceWrapper::from_spec(spec, &settings.youtube_format)?;

  let task = ContinuousTask::default()
    .with_frame_number(args.frame_limit())
    .with_stop_handle(stop);
  let report = match task.run_task(source, &session, output) {
    Ok(report) => report,
    Err(never) => match never {},
  };

  if let PlaybackState::Errored(message) = &report.state {
    error!("{} 播放出错: {}", args.source, message);
  }
  info!(
    "共处理 {} 帧，检测到 {} 个目标",
    report.frames, report.detections
  );
  Ok(())
}
