// 该文件是 Xunshan （巡山） 项目的一部分。
// src/decode/yolo.rs - YOLO 族模型输出解码
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

use tracing::debug;

use crate::config::ModelFamily;
use crate::decode::{Candidate, DecodeError, as_array, as_f32_slice, ordered_box, shape};
use crate::infer::RawPredictions;
use crate::nms::{DEFAULT_IOU_THRESHOLD, DEFAULT_MAX_CANDIDATES, nms};

/// YOLO 族输出：扁平预测矩阵，每行为
/// `[cx, cy, w, h, objectness, class0_conf, class1_conf, ...]`，
/// 坐标处于模型输入像素尺度。先用 objectness 做一次廉价过滤，
/// 再用 objectness × max(类别置信度) 过滤一次，最后交给 NMS 去重。
/// 返回的框已是归一化角点坐标，调用方不得再套用 sentinel 的阈值逻辑。
pub fn decode(raw: &RawPredictions, threshold: f32) -> Result<Vec<Candidate>, DecodeError> {
  let edge = ModelFamily::Yolo.input_edge() as f32;
  let rows = as_array(raw.0.first().ok_or(DecodeError::Empty)?, "预测矩阵")?;

  let mut candidates = Vec::new();
  for row in rows {
    let row = as_f32_slice(row, "预测矩阵行")?;
    if row.len() < 6 {
      return Err(shape(format!("预测矩阵行长度至少为 6, 实际为 {}", row.len())));
    }

    // 先看 objectness，避免为明显空框计算类别分数
    let objectness = row[4];
    if objectness < threshold {
      continue;
    }

    let (class_id, class_score) = row[5..]
      .iter()
      .enumerate()
      .fold((0u32, f32::MIN), |(best_id, best), (id, &s)| {
        if s > best { (id as u32, s) } else { (best_id, best) }
      });

    let score = objectness * class_score;
    if score < threshold {
      continue;
    }

    let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
    candidates.push(Candidate {
      class_id,
      score,
      bbox: ordered_box(
        (cx - w / 2.0) / edge,
        (cy - h / 2.0) / edge,
        (cx + w / 2.0) / edge,
        (cy + h / 2.0) / edge,
      ),
    });
  }

  debug!("yolo 解码得到 {} 个候选, 进入 NMS", candidates.len());
  Ok(nms(
    candidates,
    threshold,
    DEFAULT_MAX_CANDIDATES,
    DEFAULT_IOU_THRESHOLD,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn raw(rows: serde_json::Value) -> RawPredictions {
    RawPredictions(vec![rows])
  }

  #[test]
  fn decodes_center_size_to_normalized_corners() {
    // 320,320 中心、320x320 大小 => 归一化后 [0.25, 0.25, 0.75, 0.75]
    let raw = raw(json!([[320.0, 320.0, 320.0, 320.0, 0.9, 0.1, 0.8]]));
    let candidates = decode(&raw, 0.4).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].class_id, 1);
    assert!((candidates[0].score - 0.72).abs() < 1e-6);
    assert_eq!(candidates[0].bbox, [0.25, 0.25, 0.75, 0.75]);
  }

  #[test]
  fn objectness_filter_applies_before_composite() {
    let raw = raw(json!([
      [320.0, 320.0, 100.0, 100.0, 0.3, 1.0, 1.0],
      [320.0, 320.0, 100.0, 100.0, 0.9, 0.1, 0.2]
    ]));
    // 第一行 objectness 低于阈值，第二行复合置信度 0.18 低于阈值
    assert!(decode(&raw, 0.4).unwrap().is_empty());
  }

  #[test]
  fn overlapping_boxes_collapse_to_best() {
    let raw = raw(json!([
      [320.0, 320.0, 320.0, 320.0, 0.9, 0.0, 0.9],
      [330.0, 330.0, 320.0, 320.0, 0.8, 0.0, 0.9]
    ]));
    let candidates = decode(&raw, 0.4).unwrap();
    assert_eq!(candidates.len(), 1);
    assert!((candidates[0].score - 0.81).abs() < 1e-6);
  }

  #[test]
  fn all_survivors_meet_threshold() {
    for threshold in [0.1, 0.4, 0.7] {
      let raw = raw(json!([
        [100.0, 100.0, 50.0, 50.0, 0.5, 0.9, 0.1],
        [400.0, 400.0, 50.0, 50.0, 0.8, 0.1, 0.95],
        [500.0, 200.0, 50.0, 50.0, 0.95, 0.97, 0.2]
      ]));
      let candidates = decode(&raw, threshold).unwrap();
      assert!(candidates.iter().all(|c| c.score >= threshold));
    }
  }
}
