// 该文件是 Xunshan （巡山） 项目的一部分。
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
// Copyright (C) 2026 Wareless Group

mod args;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use xunshan::container::ContainerManager;
use xunshan::infer::ServingClient;
use xunshan::pipeline::{RecordRun, RunRecord};
use xunshan::writer::Overlay;
use xunshan::{ClassNames, JobQueue, RunConfig};

/// 默认的运行记录实现：真正的持久化由外部协作方完成，这里只记日志
struct LogRecorder;

impl RecordRun for LogRecorder {
  fn record_run(&self, record: &RunRecord) -> Result<()> {
    info!("运行记录: {}", serde_json::to_string(record)?);
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  println!("Xunshan 批量检测流水线");
  println!("======================");
  println!("模型名称: {}", args.model);
  println!("模型族: {}", args.family);
  println!("输入目录: {}", args.input.display());
  println!("输出目录: {}", args.output.display());
  println!("输出布局: {}", args.style);
  println!("置信度阈值: {}", args.confidence);
  println!("并发数量: {}", args.workers);
  println!();

  let labels = match &args.labels {
    Some(path) => ClassNames::from_json_file(path)?,
    None => ClassNames::default(),
  };
  println!("类别数量: {} (含空白类)", labels.len());

  let client = Arc::new(ServingClient::new(
    args.endpoint.clone(),
    Duration::from_secs(args.timeout),
  )?);
  let overlay = Overlay::new(args.font.as_deref());

  let container = if args.no_container {
    None
  } else {
    Some(Arc::new(ContainerManager::new()))
  };

  let mut queue = JobQueue::new(client, labels, overlay).with_recorder(Arc::new(LogRecorder));
  if let Some(container) = &container {
    queue = queue.with_container(Arc::clone(container));
  }

  let config = RunConfig::new(args.model, args.family)
    .with_threshold(args.confidence)
    .with_dirs(args.input, args.output.clone())
    .with_style(args.style)
    .with_workers(args.workers);

  println!("开始处理...");
  queue.start(config).await?;

  let mut ticker = tokio::time::interval(Duration::from_secs(1));
  let mut interrupted = false;
  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => {
        warn!("收到中断信号，清理任务队列...");
        queue.cleanup();
        interrupted = true;
        break;
      }
      _ = ticker.tick() => {
        let stats = queue.stats();
        let progress = queue.get_progress();
        println!(
          "进度: 待处理 {} / 处理中 {} / 已完成 {}",
          progress.not_started.len(),
          progress.in_progress.len(),
          progress.completed.len()
        );
        if stats.idle {
          break;
        }
      }
    }
  }

  queue.wait().await;

  if let Some(container) = &container {
    if let Err(e) = container.stop().await {
      warn!("停止推理容器失败: {}", e);
    }
  }

  let progress = queue.get_progress();
  let failed: Vec<_> = progress
    .completed
    .iter()
    .filter(|c| c.error.is_some())
    .collect();

  println!();
  if interrupted {
    println!("运行被中断，在途任务可能仍会写出文件");
  } else {
    println!("处理完成!");
  }
  println!("已完成: {}", progress.completed.len());
  println!("失败: {}", failed.len());
  for completed in &failed {
    println!(
      "  - {}: {}",
      completed.input_path.display(),
      completed.error.as_deref().unwrap_or("未知错误")
    );
  }
  println!("检测台账: {}", args.output.join("detections.csv").display());

  Ok(())
}
