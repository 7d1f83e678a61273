// 该文件是 Xunshan （巡山） 项目的一部分。
// src/infer/tensor.rs - 输入张量编码
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

use image::RgbImage;
use serde::Serialize;

use crate::config::ModelFamily;

/// 请求体中的单张图像：行优先、通道在后的三维数组。
/// 像素编码与模型族配对：YOLO 族用 [0,1] 浮点，其余两族用 [0,255] 原始值；
/// 解码器必须与各自的编码约定一致。
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ImageTensor {
  Raw(Vec<Vec<[u8; 3]>>),
  Unit(Vec<Vec<[f32; 3]>>),
}

impl ImageTensor {
  /// 把图像缩放到模型族的正方形输入边长并按族编码
  pub fn from_rgb(image: &RgbImage, family: ModelFamily) -> Self {
    let edge = family.input_edge();
    let resized;
    let source = if image.width() == edge && image.height() == edge {
      image
    } else {
      resized = image::imageops::resize(image, edge, edge, image::imageops::FilterType::Triangle);
      &resized
    };

    if family.unit_pixels() {
      ImageTensor::Unit(
        source
          .rows()
          .map(|row| {
            row
              .map(|p| [p[0] as f32 / 255.0, p[1] as f32 / 255.0, p[2] as f32 / 255.0])
              .collect()
          })
          .collect(),
      )
    } else {
      ImageTensor::Raw(
        source
          .rows()
          .map(|row| row.map(|p| [p[0], p[1], p[2]]).collect())
          .collect(),
      )
    }
  }

  pub fn height(&self) -> usize {
    match self {
      ImageTensor::Raw(rows) => rows.len(),
      ImageTensor::Unit(rows) => rows.len(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn solid_image(edge: u32, value: u8) -> RgbImage {
    RgbImage::from_pixel(edge, edge, image::Rgb([value, value, value]))
  }

  #[test]
  fn sentinel_tensor_keeps_raw_bytes() {
    let tensor = ImageTensor::from_rgb(&solid_image(512, 128), ModelFamily::Sentinel);
    assert_eq!(tensor.height(), 512);
    match tensor {
      ImageTensor::Raw(rows) => assert_eq!(rows[0][0], [128, 128, 128]),
      ImageTensor::Unit(_) => panic!("sentinel 应使用原始字节编码"),
    }
  }

  #[test]
  fn yolo_tensor_normalizes_to_unit() {
    let tensor = ImageTensor::from_rgb(&solid_image(640, 255), ModelFamily::Yolo);
    match tensor {
      ImageTensor::Unit(rows) => assert_eq!(rows[0][0], [1.0, 1.0, 1.0]),
      ImageTensor::Raw(_) => panic!("yolo 应使用归一化编码"),
    }
  }

  #[test]
  fn resizes_to_family_edge() {
    let tensor = ImageTensor::from_rgb(&solid_image(100, 0), ModelFamily::AutoMl);
    assert_eq!(tensor.height(), 320);
  }

  #[test]
  fn serializes_as_bare_nested_array() {
    let tensor = ImageTensor::Raw(vec![vec![[1, 2, 3]]]);
    let json = serde_json::to_string(&tensor).unwrap();
    assert_eq!(json, "[[[1,2,3]]]");
  }
}
