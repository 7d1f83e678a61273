// 该文件是 Xunshan （巡山） 项目的一部分。
// src/decode/automl.rs - AutoML 族模型输出解码
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

use crate::decode::{Candidate, DecodeError, as_array, as_f32, as_f32_slice, ordered_box, shape};
use crate::infer::RawPredictions;

/// AutoML 族输出：四个平行数组（框、分数、类别、数量），
/// 框以 `[y0, x0, y1, x1]` 排列，解码时转回 `[x0, y0, x1, y1]`。
///
/// 阈值只检查分数最高的第一项：它低于阈值则整张图按空白处理，
/// 否则全部 `num_detections` 项原样保留。这与其他两族的逐候选过滤
/// 不对称，但为了与既有输出保持一致必须原样维持。
pub fn decode(raw: &RawPredictions, threshold: f32) -> Result<Vec<Candidate>, DecodeError> {
  let first = raw.0.first().ok_or(DecodeError::Empty)?;
  let field = |name: &str| first.get(name).ok_or_else(|| shape(format!("缺少 {} 字段", name)));

  let boxes = as_array(field("detection_boxes")?, "detection_boxes")?;
  let scores = as_f32_slice(field("detection_scores")?, "detection_scores")?;
  let classes = as_f32_slice(field("detection_classes")?, "detection_classes")?;
  let count = as_f32(field("num_detections")?, "num_detections")? as usize;

  match scores.first() {
    None => return Ok(Vec::new()),
    // 最高分低于阈值就整张图短路为空白
    Some(&top) if top < threshold => {
      debug!("automl 最高分 {:.3} 低于阈值 {:.3}, 按空白处理", top, threshold);
      return Ok(Vec::new());
    }
    Some(_) => {}
  }

  let count = count.min(boxes.len()).min(scores.len()).min(classes.len());
  let mut candidates = Vec::with_capacity(count);
  for i in 0..count {
    let bbox = as_f32_slice(&boxes[i], "detection_boxes 行")?;
    if bbox.len() != 4 {
      return Err(shape(format!(
        "detection_boxes 行长度必须为 4, 实际为 {}",
        bbox.len()
      )));
    }
    candidates.push(Candidate {
      class_id: classes[i] as u32,
      score: scores[i],
      // [y0, x0, y1, x1] -> [x0, y0, x1, y1]
      bbox: ordered_box(bbox[1], bbox[0], bbox[3], bbox[2]),
    });
  }

  debug!("automl 解码得到 {} 个候选", candidates.len());
  Ok(candidates)
}
