// 该文件是 Xunshan （巡山） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use crate::decode::Candidate;

/// 默认保留的候选数量上限
pub const DEFAULT_MAX_CANDIDATES: usize = 20;
/// 默认 IoU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.3;

/// 非极大值抑制。纯函数，对固定输入顺序是确定性的。
///
/// 低于 `threshold` 的候选被丢弃，剩余按置信度升序排序并只保留最高的
/// `max_candidates` 个（取 1 时只留单个最优，不再进入抑制循环），
/// 然后反复弹出置信度最高的候选进入保留集，并删除与它 IoU 超过
/// `iou_threshold` 的其余候选。
pub fn nms(
  mut candidates: Vec<Candidate>,
  threshold: f32,
  max_candidates: usize,
  iou_threshold: f32,
) -> Vec<Candidate> {
  candidates.retain(|c| c.score >= threshold);
  candidates.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));
  if candidates.len() > max_candidates {
    let cut = candidates.len() - max_candidates;
    candidates.drain(..cut);
  }

  let mut kept = Vec::with_capacity(candidates.len());
  while let Some(best) = candidates.pop() {
    candidates.retain(|c| iou(&best.bbox, &c.bbox) <= iou_threshold);
    kept.push(best);
  }
  kept
}

/// 轴对齐框的交并比，零面积退化框的交集记为 0
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x0 = a[0].max(b[0]);
  let y0 = a[1].max(b[1]);
  let x1 = a[2].min(b[2]);
  let y1 = a[3].min(b[3]);

  let intersection = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
