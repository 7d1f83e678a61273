// 该文件是 Xunshan （巡山） 项目的一部分。
// src/ledger.rs - 检测台账输出
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::warn;

use crate::pipeline::Detection;

/// 台账文件名
pub const LEDGER_FILE: &str = "detections.csv";
// 列头与既有外部工具的期望格式保持一致，包括分隔符里的空格
const LEDGER_HEADER: &str = "File, Class Name, ClassID, Confidence, Path, Bounded Box";

#[derive(Error, Debug)]
pub enum LedgerError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("检测台账已关闭")]
  Closed,
}

/// 逐行流式写出的检测台账。
/// 行追加在内部串行化，多个工作任务可以并发调用 `append`；
/// `close` 恰好生效一次，重复调用无害，Drop 兜底。
pub struct DetectionLedger {
  writer: Mutex<Option<BufWriter<File>>>,
  path: PathBuf,
}

impl DetectionLedger {
  /// 在输出目录下创建 `detections.csv` 并写入固定列头
  pub fn create(output_dir: &Path) -> Result<Self, LedgerError> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(LEDGER_FILE);
    let mut writer = BufWriter::new(File::create(&path)?);
    writeln!(writer, "{}", LEDGER_HEADER)?;
    writer.flush()?;
    Ok(DetectionLedger {
      writer: Mutex::new(Some(writer)),
      path,
    })
  }

  /// 追加一行检测记录并立即刷盘
  pub fn append(&self, detection: &Detection) -> Result<(), LedgerError> {
    let mut guard = self.writer.lock().unwrap();
    let writer = guard.as_mut().ok_or(LedgerError::Closed)?;
    writeln!(
      writer,
      "{}, {}, {}, {:.4}, {}, [{:.4}, {:.4}, {:.4}, {:.4}]",
      detection.file_name,
      detection.class_name,
      detection.class_id,
      detection.confidence,
      detection.output_path,
      detection.bbox[0],
      detection.bbox[1],
      detection.bbox[2],
      detection.bbox[3],
    )?;
    writer.flush()?;
    Ok(())
  }

  /// 关闭台账，幂等
  pub fn close(&self) -> Result<(), LedgerError> {
    if let Some(mut writer) = self.writer.lock().unwrap().take() {
      writer.flush()?;
    }
    Ok(())
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for DetectionLedger {
  fn drop(&mut self) {
    if let Err(e) = self.close() {
      warn!("关闭检测台账失败: {}", e);
    }
  }
}
