// 该文件是 Xunshan （巡山） 项目的一部分。
// src/labels.rs - 类别名称表
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

use thiserror::Error;

/// 保留类别：表示图像中没有超过阈值的检测
pub const BLANK_CLASS: &str = "blank";

/// 类别 id 到名称的映射表，id 0 固定为保留的空白类别
#[derive(Debug, Clone)]
pub struct ClassNames {
  names: Vec<String>,
}

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("类别表解析失败: {0}")]
  Json(#[from] serde_json::Error),
  #[error("类别表第 0 项必须是保留的 \"{BLANK_CLASS}\"")]
  MissingBlank,
}

impl ClassNames {
  /// 从名称列表创建，第 0 项必须是保留的空白类别
  pub fn new(names: Vec<String>) -> Result<Self, LabelError> {
    if names.first().map(String::as_str) != Some(BLANK_CLASS) {
      return Err(LabelError::MissingBlank);
    }
    Ok(ClassNames { names })
  }

  /// 从 JSON 文件（字符串数组）加载类别表
  pub fn from_json_file(path: &Path) -> Result<Self, LabelError> {
    let data = std::fs::read(path)?;
    let names: Vec<String> = serde_json::from_slice(&data)?;
    ClassNames::new(names)
  }

  pub fn name_of(&self, id: u32) -> &str {
    self
      .names
      .get(id as usize)
      .map(String::as_str)
      .unwrap_or("unknown")
  }

  pub fn is_blank(&self, id: u32) -> bool {
    id == 0
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl Default for ClassNames {
  /// 红外相机常见的三分类表
  fn default() -> Self {
    ClassNames {
      names: ["blank", "animal", "person", "vehicle"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}
