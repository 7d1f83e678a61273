// 该文件是 Xunshan （巡山） 项目的一部分。
// src/config.rs - 运行参数配置
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

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

/// 默认并发处理数量
pub const DEFAULT_WORKERS: usize = 3;
/// 默认置信度阈值
pub const DEFAULT_CONFIDENCE: f32 = 0.4;

/// 模型族，决定原始输出的解码方式与输入张量的编码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFamily {
  /// 通用模型：服务端已去重，每框携带各类别置信度
  Sentinel,
  /// YOLO 系列：扁平预测矩阵，需要 NMS 去重
  Yolo,
  /// AutoML 系列：四个平行数组，坐标轴相对其他两族转置
  AutoMl,
}

impl ModelFamily {
  /// 模型输入的正方形边长（像素）
  pub fn input_edge(&self) -> u32 {
    match self {
      ModelFamily::Sentinel => 512,
      ModelFamily::Yolo => 640,
      ModelFamily::AutoMl => 320,
    }
  }

  /// 像素编码：YOLO 族要求 [0,1] 归一化浮点，其余两族使用 [0,255] 原始值
  pub fn unit_pixels(&self) -> bool {
    matches!(self, ModelFamily::Yolo)
  }
}

impl FromStr for ModelFamily {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "sentinel" => Ok(ModelFamily::Sentinel),
      "yolo" => Ok(ModelFamily::Yolo),
      "automl" => Ok(ModelFamily::AutoMl),
      other => Err(format!("未知的模型族: {}", other)),
    }
  }
}

impl fmt::Display for ModelFamily {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelFamily::Sentinel => write!(f, "sentinel"),
      ModelFamily::Yolo => write!(f, "yolo"),
      ModelFamily::AutoMl => write!(f, "automl"),
    }
  }
}

/// 输出目录布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStyle {
  /// 按类别名建子目录
  Class,
  /// 保留输入目录的相对层级
  Hierarchy,
  /// 全部平铺在输出目录下
  Flat,
  /// 不写出图像文件
  None,
}

impl FromStr for OutputStyle {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "class" => Ok(OutputStyle::Class),
      "hierarchy" => Ok(OutputStyle::Hierarchy),
      "flat" => Ok(OutputStyle::Flat),
      "none" => Ok(OutputStyle::None),
      other => Err(format!("未知的输出布局: {}", other)),
    }
  }
}

impl fmt::Display for OutputStyle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OutputStyle::Class => write!(f, "class"),
      OutputStyle::Hierarchy => write!(f, "hierarchy"),
      OutputStyle::Flat => write!(f, "flat"),
      OutputStyle::None => write!(f, "none"),
    }
  }
}

/// 一次批量检测运行的全部参数，创建后在整个运行期间只读
#[derive(Debug, Clone)]
pub struct RunConfig {
  /// 模型名称，同时作为推理容器镜像名
  pub model_name: String,
  /// 模型族
  pub family: ModelFamily,
  /// 置信度阈值，[0,1]
  pub confidence_threshold: f32,
  /// 输入图片目录（不递归）
  pub input_dir: PathBuf,
  /// 输出目录
  pub output_dir: PathBuf,
  /// 输出目录布局
  pub output_style: OutputStyle,
  /// 并发处理数量
  pub workers: usize,
}

impl RunConfig {
  pub fn new(model_name: impl Into<String>, family: ModelFamily) -> Self {
    RunConfig {
      model_name: model_name.into(),
      family,
      confidence_threshold: DEFAULT_CONFIDENCE,
      input_dir: PathBuf::new(),
      output_dir: PathBuf::new(),
      output_style: OutputStyle::Flat,
      workers: DEFAULT_WORKERS,
    }
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold.clamp(0.0, 1.0);
    self
  }

  pub fn with_dirs(mut self, input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
    self.input_dir = input_dir.into();
    self.output_dir = output_dir.into();
    self
  }

  pub fn with_style(mut self, style: OutputStyle) -> Self {
    self.output_style = style;
    self
  }

  pub fn with_workers(mut self, workers: usize) -> Self {
    self.workers = workers.max(1);
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_model_family() {
    assert_eq!("yolo".parse::<ModelFamily>().unwrap(), ModelFamily::Yolo);
    assert_eq!("AutoML".parse::<ModelFamily>().unwrap(), ModelFamily::AutoMl);
    assert!("resnet".parse::<ModelFamily>().is_err());
  }

  #[test]
  fn parse_output_style() {
    assert_eq!("flat".parse::<OutputStyle>().unwrap(), OutputStyle::Flat);
    assert_eq!("NONE".parse::<OutputStyle>().unwrap(), OutputStyle::None);
    assert!("tree".parse::<OutputStyle>().is_err());
  }

  #[test]
  fn family_input_edges() {
    assert_eq!(ModelFamily::Sentinel.input_edge(), 512);
    assert_eq!(ModelFamily::Yolo.input_edge(), 640);
    assert_eq!(ModelFamily::AutoMl.input_edge(), 320);
    assert!(ModelFamily::Yolo.unit_pixels());
    assert!(!ModelFamily::Sentinel.unit_pixels());
  }

  #[test]
  fn config_builder_clamps() {
    let config = RunConfig::new("demo", ModelFamily::Yolo)
      .with_threshold(1.5)
      .with_workers(0);
    assert_eq!(config.confidence_threshold, 1.0);
    assert_eq!(config.workers, 1);
  }
}
