// 该文件是 Xunshan （巡山） 项目的一部分。
// src/pipeline.rs - 批量检测任务队列
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

//! 有界并发的批量检测编排。
//!
//! 一次运行：枚举输入目录（不递归），把每个文件投入固定数量的工作
//! 任务，每个任务走 预测 → 解码 → 阈值 → 写图 → 记台账 的流程，
//! 进度随时可以通过快照轮询。派发顺序是枚举顺序的先进先出，
//! 完成顺序不做保证。
//!
//! `cleanup` 只丢弃跟踪状态，不取消已派发的任务：在途的网络调用和
//! 文件写入仍会完成，可能在调用方认为运行已结束之后落盘。

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::config::{ModelFamily, OutputStyle, RunConfig};
use crate::container::{ContainerError, ContainerManager};
use crate::decode::decode_predictions;
use crate::infer::{ImageTensor, InferError, Predict};
use crate::labels::ClassNames;
use crate::ledger::{DetectionLedger, LedgerError};
use crate::writer::{NOT_SAVED, Overlay, prepare_class_dirs, resolve_output_path, save_annotated};

/// 容器启动后等待服务就绪的上限
const READY_DEADLINE: Duration = Duration::from_secs(90);

/// 一条最终检测记录，创建之后不再修改。
/// 没有任何超过阈值的候选时，整张图会得到一条空白类记录。
#[derive(Debug, Clone)]
pub struct Detection {
  pub file_name: String,
  pub class_name: String,
  pub class_id: u32,
  pub confidence: f32,
  pub input_path: PathBuf,
  /// 实际写出路径，`none` 布局下为占位文本
  pub output_path: String,
  pub bbox: [f32; 4],
}

/// completed 桶里的一项
#[derive(Debug, Clone)]
pub struct CompletedFile {
  pub input_path: PathBuf,
  pub output_path: Option<PathBuf>,
  /// 该图像处理失败时的错误描述，成功为 None
  pub error: Option<String>,
}

/// 运行进度的三桶快照：任一时刻每个文件恰好处于一个桶中
#[derive(Debug, Clone, Default)]
pub struct RunnerState {
  pub not_started: Vec<String>,
  pub in_progress: Vec<String>,
  pub completed: Vec<CompletedFile>,
}

/// 队列状态概览
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
  pub idle: bool,
  pub length: usize,
}

#[derive(Error, Debug)]
pub enum RunError {
  #[error("已有任务正在运行")]
  AlreadyRunning,
  #[error("未找到模型镜像: {0}")]
  ImageMissing(String),
  #[error("容器错误: {0}")]
  Container(#[from] ContainerError),
  #[error("推理服务错误: {0}")]
  Infer(#[from] InferError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("台账错误: {0}")]
  Ledger(#[from] LedgerError),
}

/// 一次已接受运行的元数据，交给外部协作方持久化
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
  pub model_name: String,
  pub family: ModelFamily,
  pub confidence_threshold: f32,
  pub input_dir: PathBuf,
  pub output_dir: PathBuf,
  pub output_style: OutputStyle,
  pub started_at: DateTime<Utc>,
}

/// 运行元数据的持久化回调，存储引擎由外部协作方拥有
pub trait RecordRun: Send + Sync {
  fn record_run(&self, record: &RunRecord) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct FileTask {
  name: String,
  path: PathBuf,
}

// 三桶状态与运行标志。epoch 在 cleanup 时自增，
// 过期运行的任务对状态的更新会被忽略。
struct Shared {
  state: Mutex<RunnerState>,
  epoch: AtomicU64,
  preparing: AtomicBool,
  running: AtomicBool,
}

impl Shared {
  fn new() -> Self {
    Shared {
      state: Mutex::new(RunnerState::default()),
      epoch: AtomicU64::new(0),
      preparing: AtomicBool::new(false),
      running: AtomicBool::new(false),
    }
  }

  fn snapshot(&self) -> RunnerState {
    self.state.lock().unwrap().clone()
  }

  // 以给定 epoch 仍然有效为前提填充 not_started 桶。
  // 准备阶段遇到 cleanup 推进 epoch 时返回 false，调用方放弃本次运行。
  fn seed(&self, epoch: u64, names: Vec<String>) -> bool {
    let mut state = self.state.lock().unwrap();
    if self.epoch.load(Ordering::Acquire) != epoch {
      return false;
    }
    *state = RunnerState::default();
    state.not_started = names;
    true
  }

  fn begin_file(&self, epoch: u64, name: &str) {
    if self.epoch.load(Ordering::Acquire) != epoch {
      return;
    }
    let mut state = self.state.lock().unwrap();
    if let Some(pos) = state.not_started.iter().position(|n| n == name) {
      let name = state.not_started.remove(pos);
      state.in_progress.push(name);
    }
  }

  fn complete_file(&self, epoch: u64, name: &str, completed: CompletedFile) {
    if self.epoch.load(Ordering::Acquire) != epoch {
      return;
    }
    let mut state = self.state.lock().unwrap();
    if let Some(pos) = state.in_progress.iter().position(|n| n == name) {
      state.in_progress.remove(pos);
      state.completed.push(completed);
    }
  }
}

struct WorkerContext {
  shared: Arc<Shared>,
  epoch: u64,
  client: Arc<dyn Predict>,
  config: Arc<RunConfig>,
  labels: Arc<ClassNames>,
  overlay: Arc<Overlay>,
  ledger: Arc<DetectionLedger>,
}

impl Clone for WorkerContext {
  fn clone(&self) -> Self {
    WorkerContext {
      shared: Arc::clone(&self.shared),
      epoch: self.epoch,
      client: Arc::clone(&self.client),
      config: Arc::clone(&self.config),
      labels: Arc::clone(&self.labels),
      overlay: Arc::clone(&self.overlay),
      ledger: Arc::clone(&self.ledger),
    }
  }
}

/// 批量检测任务队列，同一实例同一时刻只允许一次运行
pub struct JobQueue {
  client: Arc<dyn Predict>,
  labels: Arc<ClassNames>,
  overlay: Arc<Overlay>,
  container: Option<Arc<ContainerManager>>,
  recorder: Option<Arc<dyn RecordRun>>,
  shared: Arc<Shared>,
  supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
  pub fn new(client: Arc<dyn Predict>, labels: ClassNames, overlay: Overlay) -> Self {
    JobQueue {
      client,
      labels: Arc::new(labels),
      overlay: Arc::new(overlay),
      container: None,
      recorder: None,
      shared: Arc::new(Shared::new()),
      supervisor: Mutex::new(None),
    }
  }

  /// 挂接容器管理器：运行开始时确保容器在线并等待服务就绪
  pub fn with_container(mut self, container: Arc<ContainerManager>) -> Self {
    self.container = Some(container);
    self
  }

  /// 挂接运行元数据回调
  pub fn with_recorder(mut self, recorder: Arc<dyn RecordRun>) -> Self {
    self.recorder = Some(recorder);
    self
  }

  /// 启动一次运行。已有运行在准备或进行中时立即失败，不重试。
  /// 返回时所有任务已经投入队列，用 [`JobQueue::wait`] 等待收尾。
  /// 准备阶段若被 [`JobQueue::cleanup`] 打断，本次运行被放弃并返回 `Ok`，
  /// 队列保持空闲可用。
  pub async fn start(&self, config: RunConfig) -> Result<(), RunError> {
    if self.shared.running.load(Ordering::Acquire)
      || self.shared.preparing.swap(true, Ordering::AcqRel)
    {
      return Err(RunError::AlreadyRunning);
    }
    if self.shared.running.load(Ordering::Acquire) {
      self.shared.preparing.store(false, Ordering::Release);
      return Err(RunError::AlreadyRunning);
    }

    let result = self.prepare_and_dispatch(config).await;
    if result.is_err() {
      self.shared.preparing.store(false, Ordering::Release);
    }
    result
  }

  async fn prepare_and_dispatch(&self, config: RunConfig) -> Result<(), RunError> {
    let epoch = self.shared.epoch.load(Ordering::Acquire);

    if let Some(recorder) = &self.recorder {
      let record = RunRecord {
        model_name: config.model_name.clone(),
        family: config.family,
        confidence_threshold: config.confidence_threshold,
        input_dir: config.input_dir.clone(),
        output_dir: config.output_dir.clone(),
        output_style: config.output_style,
        started_at: Utc::now(),
      };
      if let Err(e) = recorder.record_run(&record) {
        // 元数据持久化失败不阻断运行
        warn!("运行记录持久化失败: {:#}", e);
      }
    }

    if let Some(container) = &self.container {
      let Some(handle) = container.start(&config.model_name).await? else {
        return Err(RunError::ImageMissing(config.model_name.clone()));
      };
      info!("推理容器已启动: {}", handle.id);
      // 任何预测请求都必须等服务端预热完成之后
      self
        .client
        .wait_ready(&config.model_name, READY_DEADLINE)
        .await?;
    }

    let files = enumerate_input(&config.input_dir)?;
    info!("发现 {} 个输入文件", files.len());

    let ledger = Arc::new(DetectionLedger::create(&config.output_dir)?);
    info!("检测台账: {}", ledger.path().display());
    if config.output_style == OutputStyle::Class {
      prepare_class_dirs(&config.output_dir, &self.labels)?;
    }

    // 准备阶段（容器启动、就绪等待）可能持续很久，期间的 cleanup
    // 会推进 epoch；这里一旦察觉就放弃派发，不得用过期文件重新填桶
    let names = files.iter().map(|f| f.name.clone()).collect();
    if !self.shared.seed(epoch, names) {
      warn!("准备阶段队列被清理，放弃本次运行");
      self.shared.preparing.store(false, Ordering::Release);
      return Ok(());
    }

    let (tx, rx) = mpsc::channel(files.len().max(1));
    for task in files {
      // 容量即任务总数，投递不会失败
      let _ = tx.try_send(task);
    }
    drop(tx);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let context = WorkerContext {
      shared: Arc::clone(&self.shared),
      epoch,
      client: Arc::clone(&self.client),
      config: Arc::new(config),
      labels: Arc::clone(&self.labels),
      overlay: Arc::clone(&self.overlay),
      ledger: Arc::clone(&ledger),
    };

    let mut workers = JoinSet::new();
    for _ in 0..context.config.workers {
      workers.spawn(worker_loop(context.clone(), Arc::clone(&rx)));
    }

    self.shared.running.store(true, Ordering::Release);
    self.shared.preparing.store(false, Ordering::Release);
    // cleanup 恰好落在填桶与置位之间时撤销运行标志，丢弃刚填充的状态；
    // preparing 在此之前一直由本次 start 持有，不会与新的运行交错
    if self.shared.epoch.load(Ordering::Acquire) != epoch {
      self.shared.running.store(false, Ordering::Release);
      *self.shared.state.lock().unwrap() = RunnerState::default();
    }

    let shared = Arc::clone(&self.shared);
    let supervisor = tokio::spawn(async move {
      while workers.join_next().await.is_some() {}
      if let Err(e) = ledger.close() {
        error!("关闭检测台账失败: {}", e);
      }
      if shared.epoch.load(Ordering::Acquire) == epoch {
        shared.running.store(false, Ordering::Release);
        info!("本次运行结束");
      }
    });
    *self.supervisor.lock().unwrap() = Some(supervisor);

    Ok(())
  }

  /// 等待当前运行的所有工作任务收尾
  pub async fn wait(&self) {
    let supervisor = self.supervisor.lock().unwrap().take();
    if let Some(handle) = supervisor {
      if let Err(e) = handle.await {
        error!("等待运行收尾失败: {}", e);
      }
    }
  }

  pub fn stats(&self) -> QueueStats {
    let length = {
      let state = self.shared.state.lock().unwrap();
      state.not_started.len() + state.in_progress.len()
    };
    QueueStats {
      idle: !self.is_in_progress(),
      length,
    }
  }

  /// 某一时刻的只读进度快照，与内部可变状态无共享
  pub fn get_progress(&self) -> RunnerState {
    self.shared.snapshot()
  }

  pub fn is_in_progress(&self) -> bool {
    self.shared.preparing.load(Ordering::Acquire) || self.shared.running.load(Ordering::Acquire)
  }

  /// 立即丢弃跟踪状态，不等待也不取消在途任务。
  /// 已经派发的任务仍可能在这之后完成并写出文件。
  /// preparing 标志不在这里复位：正在准备中的 `start` 察觉 epoch
  /// 变化后自行退出并复位，避免清理与新运行的准备交错。
  pub fn cleanup(&self) {
    self.shared.epoch.fetch_add(1, Ordering::AcqRel);
    *self.shared.state.lock().unwrap() = RunnerState::default();
    self.shared.running.store(false, Ordering::Release);
    info!("任务队列状态已清理");
  }
}

/// 非递归枚举输入目录下的普通文件（跟随符号链接），
/// 按名称排序保证派发顺序稳定
fn enumerate_input(input_dir: &Path) -> std::io::Result<Vec<FileTask>> {
  let mut files = Vec::new();
  for entry in std::fs::read_dir(input_dir)? {
    let entry = entry?;
    // DirEntry::metadata 不跟随符号链接，必须对路径取元数据；
    // 悬空链接跳过而不中断整次枚举
    let is_file = match std::fs::metadata(entry.path()) {
      Ok(metadata) => metadata.is_file(),
      Err(e) => {
        warn!("跳过无法访问的目录项 {}: {}", entry.path().display(), e);
        false
      }
    };
    if is_file {
      files.push(FileTask {
        name: entry.file_name().to_string_lossy().into_owned(),
        path: entry.path(),
      });
    }
  }
  files.sort_by(|a, b| a.name.cmp(&b.name));
  Ok(files)
}

async fn worker_loop(ctx: WorkerContext, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<FileTask>>>) {
  loop {
    let task = { rx.lock().await.recv().await };
    let Some(task) = task else {
      break;
    };
    // 运行已被清理，未派发的任务不再处理
    if ctx.shared.epoch.load(Ordering::Acquire) != ctx.epoch {
      break;
    }

    ctx.shared.begin_file(ctx.epoch, &task.name);
    match process_image(&ctx, &task).await {
      Ok((count, output_path)) => {
        info!("处理完成: {} ({} 条检测)", task.path.display(), count);
        ctx.shared.complete_file(
          ctx.epoch,
          &task.name,
          CompletedFile {
            input_path: task.path.clone(),
            output_path,
            error: None,
          },
        );
      }
      Err(e) => {
        // 单张失败不中断整次运行
        error!("处理失败: {}: {:#}", task.path.display(), e);
        ctx.shared.complete_file(
          ctx.epoch,
          &task.name,
          CompletedFile {
            input_path: task.path.clone(),
            output_path: None,
            error: Some(format!("{:#}", e)),
          },
        );
      }
    }
  }
}

/// 单张图像的完整处理：预测、解码、空白合成、叠加绘制、写图、记台账
async fn process_image(ctx: &WorkerContext, task: &FileTask) -> anyhow::Result<(usize, Option<PathBuf>)> {
  let config = &ctx.config;

  let image = image::open(&task.path)
    .with_context(|| format!("无法读取图像 {}", task.path.display()))?
    .to_rgb8();
  let tensor = ImageTensor::from_rgb(&image, config.family);

  let raw = ctx
    .client
    .predict(&config.model_name, &tensor)
    .await
    .with_context(|| format!("预测请求失败: {}", task.path.display()))?;

  let candidates = decode_predictions(config.family, &raw, config.confidence_threshold)
    .with_context(|| format!("解码失败: {}", task.path.display()))?;

  // 空白合成：零置信检测的图像也恰好产生一条记录
  let mut detections: Vec<Detection> = if candidates.is_empty() {
    vec![Detection {
      file_name: task.name.clone(),
      class_name: ctx.labels.name_of(0).to_string(),
      class_id: 0,
      confidence: 0.0,
      input_path: task.path.clone(),
      output_path: NOT_SAVED.to_string(),
      bbox: [0.0; 4],
    }]
  } else {
    candidates
      .into_iter()
      .map(|c| Detection {
        file_name: task.name.clone(),
        class_name: ctx.labels.name_of(c.class_id).to_string(),
        class_id: c.class_id,
        confidence: c.score,
        input_path: task.path.clone(),
        output_path: NOT_SAVED.to_string(),
        bbox: c.bbox,
      })
      .collect()
  };

  // 同一张画布累积所有非空白叠加
  let mut canvas = image;
  for detection in &detections {
    if !ctx.labels.is_blank(detection.class_id) {
      ctx.overlay.draw(
        &mut canvas,
        &detection.class_name,
        detection.confidence,
        &detection.bbox,
      );
    }
  }

  let mut first_path = None;
  for detection in &mut detections {
    let path = resolve_output_path(
      config.output_style,
      &config.input_dir,
      &task.path,
      &config.output_dir,
      &detection.class_name,
    );
    if let Some(path) = path {
      save_annotated(&canvas, &path)
        .with_context(|| format!("写出失败: {}", path.display()))?;
      detection.output_path = path.display().to_string();
      first_path.get_or_insert(path);
    }
    ctx.ledger.append(detection).context("台账写入失败")?;
  }

  Ok((detections.len(), first_path))
}
