// 该文件是 Xunshan （巡山） 项目的一部分。
// tests/pipeline.rs - 流水线集成测试
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

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use xunshan::infer::{ImageTensor, InferError, Predict, RawPredictions};
use xunshan::pipeline::{RecordRun, RunError, RunRecord};
use xunshan::writer::Overlay;
use xunshan::{ClassNames, JobQueue, ModelFamily, OutputStyle, RunConfig};

/// 返回固定预测的桩客户端，可选地放慢响应并统计并发在途数
struct StubPredict {
  predictions: serde_json::Value,
  delay: Duration,
  inflight: AtomicUsize,
  max_inflight: AtomicUsize,
}

impl StubPredict {
  fn new(predictions: serde_json::Value) -> Self {
    StubPredict {
      predictions,
      delay: Duration::ZERO,
      inflight: AtomicUsize::new(0),
      max_inflight: AtomicUsize::new(0),
    }
  }

  fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }
}

#[async_trait]
impl Predict for StubPredict {
  async fn predict(&self, _model: &str, _tensor: &ImageTensor) -> Result<RawPredictions, InferError> {
    let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_inflight.fetch_max(now, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    self.inflight.fetch_sub(1, Ordering::SeqCst);
    Ok(RawPredictions(vec![self.predictions.clone()]))
  }
}

fn write_images(dir: &Path, count: usize) {
  for i in 0..count {
    let image = image::RgbImage::from_pixel(16, 16, image::Rgb([60, 120, 180]));
    image.save(dir.join(format!("img{}.png", i))).unwrap();
  }
}

fn sentinel_animal() -> serde_json::Value {
  json!({
    "boxes": [[0.1, 0.1, 0.6, 0.6]],
    "scores": [[0.0, 0.9]],
  })
}

fn queue_with(stub: Arc<StubPredict>) -> JobQueue {
  JobQueue::new(stub, ClassNames::default(), Overlay::new(None))
}

fn config(input: &TempDir, output: &TempDir, family: ModelFamily, style: OutputStyle) -> RunConfig {
  RunConfig::new("wildcam", family)
    .with_threshold(0.4)
    .with_dirs(input.path(), output.path())
    .with_style(style)
}

#[tokio::test]
async fn flat_run_yields_one_result_per_image() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 3);

  let queue = queue_with(Arc::new(StubPredict::new(sentinel_animal())));
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat))
    .await
    .unwrap();
  queue.wait().await;

  let progress = queue.get_progress();
  assert_eq!(progress.completed.len(), 3);
  assert!(progress.not_started.is_empty());
  assert!(progress.in_progress.is_empty());
  assert!(progress.completed.iter().all(|c| c.error.is_none()));
  assert!(queue.stats().idle);

  // 原始基本名直接落在输出目录下
  for i in 0..3 {
    assert!(output.path().join(format!("img{}.png", i)).is_file());
  }

  let ledger = std::fs::read_to_string(output.path().join("detections.csv")).unwrap();
  let lines: Vec<&str> = ledger.lines().collect();
  assert_eq!(lines[0], "File, Class Name, ClassID, Confidence, Path, Bounded Box");
  assert_eq!(lines.len(), 4);
  assert!(lines[1..].iter().all(|l| l.contains("animal")));
}

#[tokio::test]
async fn automl_below_threshold_yields_blank_result() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 1);

  let stub = Arc::new(StubPredict::new(json!({
    "detection_boxes": [[0.1, 0.1, 0.5, 0.5]],
    "detection_scores": [0.2],
    "detection_classes": [1.0],
    "num_detections": 1.0,
  })));
  let queue = queue_with(stub);
  queue
    .start(config(&input, &output, ModelFamily::AutoMl, OutputStyle::Flat))
    .await
    .unwrap();
  queue.wait().await;

  let ledger = std::fs::read_to_string(output.path().join("detections.csv")).unwrap();
  let lines: Vec<&str> = ledger.lines().collect();
  assert_eq!(lines.len(), 2);
  assert!(lines[1].starts_with("img0.png, blank, 0, 0.0000"));

  // 空白检测不画叠加层：输出与输入逐像素一致
  let written = image::open(output.path().join("img0.png")).unwrap().to_rgb8();
  let original = image::open(input.path().join("img0.png")).unwrap().to_rgb8();
  assert_eq!(written, original);
}

#[tokio::test]
async fn class_style_sorts_by_class_name() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 1);

  let queue = queue_with(Arc::new(StubPredict::new(sentinel_animal())));
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Class))
    .await
    .unwrap();
  queue.wait().await;

  assert!(output.path().join("animal/img0.png").is_file());
  // 空白类子目录已预创建
  assert!(output.path().join("blank").is_dir());
}

#[tokio::test]
async fn none_style_writes_only_the_ledger() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 2);

  let queue = queue_with(Arc::new(StubPredict::new(sentinel_animal())));
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::None))
    .await
    .unwrap();
  queue.wait().await;

  let entries: Vec<_> = std::fs::read_dir(output.path())
    .unwrap()
    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
    .collect();
  assert_eq!(entries, vec!["detections.csv"]);

  let ledger = std::fs::read_to_string(output.path().join("detections.csv")).unwrap();
  assert!(ledger.lines().skip(1).all(|l| l.contains("(not saved)")));
}

#[tokio::test]
async fn second_start_fails_while_running() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 2);

  let stub = Arc::new(StubPredict::new(sentinel_animal()).with_delay(Duration::from_millis(300)));
  let queue = queue_with(stub);
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat))
    .await
    .unwrap();

  let second = queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat))
    .await;
  assert!(matches!(second, Err(RunError::AlreadyRunning)));

  queue.wait().await;
  assert!(queue.stats().idle);
}

#[tokio::test]
async fn cleanup_mid_run_empties_the_snapshot() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 4);

  let stub = Arc::new(StubPredict::new(sentinel_animal()).with_delay(Duration::from_millis(200)));
  let queue = queue_with(stub);
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat))
    .await
    .unwrap();

  tokio::time::sleep(Duration::from_millis(50)).await;
  queue.cleanup();

  let progress = queue.get_progress();
  assert!(progress.not_started.is_empty());
  assert!(progress.in_progress.is_empty());
  assert!(progress.completed.is_empty());
  assert!(queue.stats().idle);

  // 在途任务仍可能在清理之后写出文件，这里只等待其收尾，不做断言
  queue.wait().await;
}

#[tokio::test]
async fn at_most_n_predictions_in_flight() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 9);

  let stub = Arc::new(StubPredict::new(sentinel_animal()).with_delay(Duration::from_millis(50)));
  let queue = queue_with(Arc::clone(&stub));
  queue
    .start(
      config(&input, &output, ModelFamily::Sentinel, OutputStyle::None).with_workers(3),
    )
    .await
    .unwrap();
  queue.wait().await;

  assert!(stub.max_inflight.load(Ordering::SeqCst) <= 3);
  assert_eq!(queue.get_progress().completed.len(), 9);
}

/// 在运行记录回调上卡住准备阶段，给旁路清理留出穿插窗口
struct GateRecorder {
  entered: std::sync::mpsc::Sender<()>,
  release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
}

impl RecordRun for GateRecorder {
  fn record_run(&self, _record: &RunRecord) -> anyhow::Result<()> {
    let _ = self.entered.send(());
    let _ = self.release.lock().unwrap().recv();
    Ok(())
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_during_preparation_leaves_queue_usable() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 2);

  let (entered_tx, entered_rx) = std::sync::mpsc::channel();
  let (release_tx, release_rx) = std::sync::mpsc::channel();
  let recorder = Arc::new(GateRecorder {
    entered: entered_tx,
    release: std::sync::Mutex::new(release_rx),
  });
  let queue = Arc::new(
    queue_with(Arc::new(StubPredict::new(sentinel_animal()))).with_recorder(recorder),
  );

  let starter = tokio::spawn({
    let queue = Arc::clone(&queue);
    let config = config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat);
    async move { queue.start(config).await }
  });

  // 准备阶段已进入回调，此时从旁边清理再放行
  entered_rx.recv().unwrap();
  queue.cleanup();
  release_tx.send(()).unwrap();
  starter.await.unwrap().unwrap();

  // 清理胜出：快照里没有残留文件，队列回到空闲
  let progress = queue.get_progress();
  assert!(progress.not_started.is_empty());
  assert!(progress.in_progress.is_empty());
  assert!(progress.completed.is_empty());
  assert!(!queue.is_in_progress());
  assert!(queue.stats().idle);

  // 后续运行照常开始并跑完
  release_tx.send(()).unwrap();
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat))
    .await
    .unwrap();
  queue.wait().await;
  assert_eq!(queue.get_progress().completed.len(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_image_is_enumerated() {
  let store = TempDir::new().unwrap();
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  let image = image::RgbImage::from_pixel(16, 16, image::Rgb([60, 120, 180]));
  image.save(store.path().join("real.png")).unwrap();
  std::os::unix::fs::symlink(store.path().join("real.png"), input.path().join("linked.png"))
    .unwrap();
  // 悬空链接只跳过，不影响其余文件
  std::os::unix::fs::symlink(store.path().join("gone.png"), input.path().join("gone.png"))
    .unwrap();

  let queue = queue_with(Arc::new(StubPredict::new(sentinel_animal())));
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat))
    .await
    .unwrap();
  queue.wait().await;

  let progress = queue.get_progress();
  assert_eq!(progress.completed.len(), 1);
  assert!(progress.completed[0].input_path.ends_with("linked.png"));
  assert!(output.path().join("linked.png").is_file());
}

#[tokio::test]
async fn unreadable_image_is_recorded_as_failed() {
  let input = TempDir::new().unwrap();
  let output = TempDir::new().unwrap();
  write_images(input.path(), 1);
  std::fs::write(input.path().join("broken.png"), b"not an image").unwrap();

  let queue = queue_with(Arc::new(StubPredict::new(sentinel_animal())));
  queue
    .start(config(&input, &output, ModelFamily::Sentinel, OutputStyle::Flat))
    .await
    .unwrap();
  queue.wait().await;

  let progress = queue.get_progress();
  assert_eq!(progress.completed.len(), 2);
  let broken = progress
    .completed
    .iter()
    .find(|c| c.input_path.ends_with("broken.png"))
    .unwrap();
  assert!(broken.error.is_some());
  let good = progress
    .completed
    .iter()
    .find(|c| c.input_path.ends_with("img0.png"))
    .unwrap();
  assert!(good.error.is_none());
}
