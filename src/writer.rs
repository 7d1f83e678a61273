// 该文件是 Xunshan （巡山） 项目的一部分。
// src/writer.rs - 标注图像输出
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

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OutputStyle;
use crate::labels::ClassNames;

/// `none` 布局下的占位路径文本，不是真实文件位置
pub const NOT_SAVED: &str = "(not saved)";

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_COLOR: [u8; 3] = [0, 0, 255];

#[derive(Error, Debug)]
pub enum WriteError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
}

/// 按输出布局解析目标路径。纯函数，同样的输入总是得到同样的路径；
/// `None` 布局返回 `None`，表示不写任何文件。
pub fn resolve_output_path(
  style: OutputStyle,
  input_dir: &Path,
  input_path: &Path,
  output_dir: &Path,
  class_name: &str,
) -> Option<PathBuf> {
  let base_name = input_path.file_name().unwrap_or(input_path.as_os_str());
  match style {
    OutputStyle::Class => Some(output_dir.join(class_name).join(base_name)),
    OutputStyle::Hierarchy => {
      let relative = input_path.strip_prefix(input_dir).unwrap_or(Path::new(base_name));
      Some(output_dir.join(relative))
    }
    OutputStyle::Flat => Some(output_dir.join(base_name)),
    OutputStyle::None => None,
  }
}

/// `class` 布局运行开始时预创建空白类与所有已知类的子目录，
/// 目录已存在时不报错
pub fn prepare_class_dirs(output_dir: &Path, labels: &ClassNames) -> std::io::Result<()> {
  for name in labels.iter() {
    std::fs::create_dir_all(output_dir.join(name))?;
  }
  Ok(())
}

/// 保存标注后的图像，必要时创建父目录
pub fn save_annotated(image: &RgbImage, path: &Path) -> Result<(), WriteError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  image.save(path)?;
  Ok(())
}

/// 检测框与标签的叠加绘制。字体是运行时可选输入：
/// 缺省时只画边框不画文字。
pub struct Overlay {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  label_color: [u8; 3],
}

impl Overlay {
  pub fn new(font_path: Option<&Path>) -> Self {
    let font = match font_path {
      Some(path) => match std::fs::read(path) {
        Ok(data) => match FontVec::try_from_vec(data) {
          Ok(font) => Some(font),
          Err(e) => {
            warn!("字体文件无效，标签只画边框不画文字: {}: {}", path.display(), e);
            None
          }
        },
        Err(e) => {
          warn!("无法读取字体文件，标签只画边框不画文字: {}: {}", path.display(), e);
          None
        }
      },
      // 不配置字体是正常的降级模式，不算告警
      None => {
        debug!("未配置字体，标签只画边框不画文字");
        None
      }
    };

    Overlay {
      font,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      label_color: LABEL_COLOR,
    }
  }

  /// 在图像上叠加一个检测框与标签，bbox 为归一化角点坐标
  pub fn draw(&self, image: &mut RgbImage, class_name: &str, confidence: f32, bbox: &[f32; 4]) {
    let (w, h) = (image.width() as f32, image.height() as f32);

    let x_min = ((bbox[0] * w).floor() as i32).clamp(0, w as i32 - 1);
    let y_min = ((bbox[1] * h).floor() as i32).clamp(0, h as i32 - 1);
    let x_max = ((bbox[2] * w).ceil() as i32).clamp(0, w as i32 - 1);
    let y_max = ((bbox[3] * h).ceil() as i32).clamp(0, h as i32 - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    self.draw_rectangle(image, x_min, y_min, x_max, y_max);
    self.draw_label(image, x_min, y_min, &format!("{} {:.2}", class_name, confidence));
  }

  // 手绘 2 像素边框
  fn draw_rectangle(&self, image: &mut RgbImage, x_min: i32, y_min: i32, x_max: i32, y_max: i32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let color = Rgb(self.label_color);

    for thickness in 0..2 {
      let x0 = (x_min + thickness).min(w - 1);
      let y0 = (y_min + thickness).min(h - 1);
      let x1 = (x_max - thickness).max(0);
      let y1 = (y_max - thickness).max(0);

      for x in x0..=x1 {
        image.put_pixel(x as u32, y0 as u32, color);
        image.put_pixel(x as u32, y1 as u32, color);
      }
      for y in y0..=y1 {
        image.put_pixel(x0 as u32, y as u32, color);
        image.put_pixel(x1 as u32, y as u32, color);
      }
    }
  }

  fn draw_label(&self, image: &mut RgbImage, x_min: i32, y_min: i32, label: &str) {
    let Some(font) = &self.font else {
      return;
    };

    let w = image.width() as i32;
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 标签背景放在边框上方，不超出图像边界
    let label_x = x_min.max(0);
    let label_y = (y_min - text_height).max(0);
    let label_width = text_width.min((w - label_x).max(0)) as u32;
    let label_height = text_height as u32;

    if label_width == 0 || label_height == 0 {
      return;
    }

    let rect = imageproc::rect::Rect::at(label_x, label_y).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, Rgb(self.label_color));
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x,
      label_y + self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      font,
      label,
    );
  }
}
