// 该文件是 Xunshan （巡山） 项目的一部分。
// src/decode.rs - 模型输出解码
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

//! 三个模型族的原始输出解码策略。
//!
//! 推理服务按模型族返回三种互不兼容的原始编码，这里把它们统一解码为
//! [`Candidate`] 列表：框为归一化角点坐标，类别为 id，置信度为 [0,1] 浮点。
//! YOLO 族在解码内部就完成 NMS 去重，调用方不得再套用其他族的阈值逻辑。

use serde_json::Value;
use thiserror::Error;

use crate::config::ModelFamily;
use crate::infer::RawPredictions;

mod automl;
mod sentinel;
mod yolo;

/// 阈值/NMS 之前的候选检测，只在单张图像的处理过程中存在
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub class_id: u32,
  pub score: f32,
  /// [x_min, y_min, x_max, y_max]，相对正方形模型输入归一化到 [0,1]
  pub bbox: [f32; 4],
}

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("预测列表为空")]
  Empty,
  #[error("响应形状无效: {0}")]
  Shape(String),
}

/// 按模型族解码原始预测
pub fn decode_predictions(
  family: ModelFamily,
  raw: &RawPredictions,
  threshold: f32,
) -> Result<Vec<Candidate>, DecodeError> {
  match family {
    ModelFamily::Sentinel => sentinel::decode(raw, threshold),
    ModelFamily::Yolo => yolo::decode(raw, threshold),
    ModelFamily::AutoMl => automl::decode(raw, threshold),
  }
}

fn shape(msg: impl Into<String>) -> DecodeError {
  DecodeError::Shape(msg.into())
}

fn as_array<'a>(value: &'a Value, what: &str) -> Result<&'a Vec<Value>, DecodeError> {
  value
    .as_array()
    .ok_or_else(|| shape(format!("{} 不是数组", what)))
}

fn as_f32(value: &Value, what: &str) -> Result<f32, DecodeError> {
  value
    .as_f64()
    .map(|v| v as f32)
    .ok_or_else(|| shape(format!("{} 不是数字", what)))
}

fn as_f32_slice(value: &Value, what: &str) -> Result<Vec<f32>, DecodeError> {
  as_array(value, what)?
    .iter()
    .map(|v| as_f32(v, what))
    .collect()
}

/// 保证 x0≤x1、y0≤y1 并截断到 [0,1]
fn ordered_box(x0: f32, y0: f32, x1: f32, y1: f32) -> [f32; 4] {
  [
    x0.min(x1).clamp(0.0, 1.0),
    y0.min(y1).clamp(0.0, 1.0),
    x0.max(x1).clamp(0.0, 1.0),
    y0.max(y1).clamp(0.0, 1.0),
  ]
}
