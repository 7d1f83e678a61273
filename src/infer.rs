// 该文件是 Xunshan （巡山） 项目的一部分。
// src/infer.rs - 推理客户端接口
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

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod client;
mod tensor;

pub use self::client::ServingClient;
pub use self::tensor::ImageTensor;

/// 推理服务返回的原始预测，形状由模型族决定，交给解码器处理
#[derive(Debug, Clone)]
pub struct RawPredictions(pub Vec<serde_json::Value>);

#[derive(Error, Debug)]
pub enum InferError {
  #[error("网络错误: {0}")]
  Network(#[from] reqwest::Error),
  #[error("推理服务返回错误: {0}")]
  Server(String),
  #[error("推理服务状态码异常: {0}")]
  Status(reqwest::StatusCode),
  #[error("URL 无效: {0}")]
  Url(#[from] url::ParseError),
  #[error("推理服务在 {0:?} 内未就绪")]
  NotReady(Duration),
}

/// 单张图像的预测接口。流水线只依赖这个接口，
/// 测试里可以用桩实现替代 HTTP 客户端。
#[async_trait]
pub trait Predict: Send + Sync {
  /// 对一张编码好的图像张量发起预测
  async fn predict(&self, model: &str, tensor: &ImageTensor) -> Result<RawPredictions, InferError>;

  /// 等待模型就绪；容器刚启动时服务端有一段预热期
  async fn wait_ready(&self, _model: &str, _deadline: Duration) -> Result<(), InferError> {
    Ok(())
  }
}
