// 该文件是 Xunshan （巡山） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

use xunshan::{ModelFamily, OutputStyle};

/// Xunshan 批量检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型名称，同时作为推理容器镜像名
  #[arg(long, value_name = "NAME")]
  pub model: String,

  /// 模型族 (sentinel, yolo, automl)
  #[arg(long, default_value = "sentinel", value_name = "FAMILY")]
  pub family: ModelFamily,

  /// 输入图片目录（不递归）
  #[arg(long, value_name = "DIR")]
  pub input: PathBuf,

  /// 输出目录
  #[arg(long, value_name = "DIR")]
  pub output: PathBuf,

  /// 输出目录布局 (class, hierarchy, flat, none)
  #[arg(long, default_value = "flat", value_name = "STYLE")]
  pub style: OutputStyle,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.4", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 并发处理数量
  #[arg(long, default_value = "3", value_name = "COUNT")]
  pub workers: usize,

  /// 推理服务地址
  #[arg(long, default_value = "http://localhost:8501/", value_name = "URL")]
  pub endpoint: Url,

  /// 类别表 JSON 文件（字符串数组，第 0 项必须为 "blank"），
  /// 缺省使用内置的红外相机三分类表
  #[arg(long, value_name = "FILE")]
  pub labels: Option<PathBuf>,

  /// 标签字体文件路径，缺省时叠加层只画边框不画文字
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 跳过容器管理，假定推理服务已经在运行
  #[arg(long)]
  pub no_container: bool,

  /// 单次推理请求超时（秒）
  #[arg(long, default_value = "60", value_name = "SECONDS")]
  pub timeout: u64,
}
