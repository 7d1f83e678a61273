// 该文件是 Xunshan （巡山） 项目的一部分。
// src/decode/sentinel.rs - 通用模型输出解码
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

use crate::decode::{Candidate, DecodeError, as_array, as_f32_slice, ordered_box, shape};
use crate::infer::RawPredictions;

/// 通用（Sentinel）模型输出：每框一组平行的角点坐标与各类别置信度，
/// 服务端已经去重，按下标对齐直接投影即可，不需要 NMS。
pub fn decode(raw: &RawPredictions, threshold: f32) -> Result<Vec<Candidate>, DecodeError> {
  let first = raw.0.first().ok_or(DecodeError::Empty)?;
  let boxes = as_array(
    first.get("boxes").ok_or_else(|| shape("缺少 boxes 字段"))?,
    "boxes",
  )?;
  let scores = as_array(
    first.get("scores").ok_or_else(|| shape("缺少 scores 字段"))?,
    "scores",
  )?;

  if boxes.len() != scores.len() {
    return Err(shape(format!(
      "boxes 与 scores 长度不一致: {} != {}",
      boxes.len(),
      scores.len()
    )));
  }

  let mut candidates = Vec::new();
  for (bbox, class_scores) in boxes.iter().zip(scores) {
    let bbox = as_f32_slice(bbox, "boxes 行")?;
    if bbox.len() != 4 {
      return Err(shape(format!("boxes 行长度必须为 4, 实际为 {}", bbox.len())));
    }
    let class_scores = as_f32_slice(class_scores, "scores 行")?;

    // 逐框取最高类别
    let (class_id, score) = class_scores
      .iter()
      .enumerate()
      .fold((0u32, f32::MIN), |(best_id, best), (id, &s)| {
        if s > best { (id as u32, s) } else { (best_id, best) }
      });

    if score >= threshold {
      candidates.push(Candidate {
        class_id,
        score,
        bbox: ordered_box(bbox[0], bbox[1], bbox[2], bbox[3]),
      });
    }
  }

  debug!("sentinel 解码得到 {} 个候选", candidates.len());
  Ok(candidates)
}
