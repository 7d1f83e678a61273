// 该文件是 Xunshan （巡山） 项目的一部分。
// src/lib.rs - 库主文件
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

//! 巡山：对一个目录的图像批量执行目标检测。
//!
//! 推理由容器化的模型服务后端完成，检测结果按配置的布局写出标注
//! 图像，并在输出目录追加一份 `detections.csv` 台账。

pub mod config;
pub mod container;
pub mod decode;
pub mod infer;
pub mod labels;
pub mod ledger;
pub mod nms;
pub mod pipeline;
pub mod writer;

pub use config::{ModelFamily, OutputStyle, RunConfig};
pub use labels::ClassNames;
pub use pipeline::{Detection, JobQueue, RunnerState};
