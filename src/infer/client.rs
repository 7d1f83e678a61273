// 该文件是 Xunshan （巡山） 项目的一部分。
// src/infer/client.rs - HTTP 推理客户端
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

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::infer::{ImageTensor, InferError, Predict, RawPredictions};

/// 就绪探测的轮询间隔
const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Serialize)]
struct PredictRequest<'a> {
  signature_name: &'a str,
  instances: [&'a ImageTensor; 1],
}

#[derive(Deserialize)]
struct PredictResponse {
  #[serde(default)]
  predictions: Option<Vec<serde_json::Value>>,
  #[serde(default)]
  error: Option<String>,
}

/// TensorFlow-Serving 风格推理端点的客户端
pub struct ServingClient {
  http: reqwest::Client,
  base: Url,
}

impl ServingClient {
  pub fn new(base: Url, timeout: Duration) -> Result<Self, InferError> {
    let http = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(ServingClient { http, base })
  }

  fn model_url(&self, model: &str, suffix: &str) -> Result<Url, InferError> {
    let path = format!("v1/models/{}{}", urlencoding::encode(model), suffix);
    Ok(self.base.join(&path)?)
  }
}

#[async_trait]
impl Predict for ServingClient {
  async fn predict(&self, model: &str, tensor: &ImageTensor) -> Result<RawPredictions, InferError> {
    let url = self.model_url(model, ":predict")?;
    let request = PredictRequest {
      signature_name: "serving_default",
      instances: [tensor],
    };

    debug!("发送预测请求: {}", url);
    let response = self.http.post(url).json(&request).send().await?;
    if !response.status().is_success() {
      return Err(InferError::Status(response.status()));
    }

    let body: PredictResponse = response.json().await?;
    if let Some(error) = body.error.filter(|e| !e.is_empty()) {
      return Err(InferError::Server(error));
    }

    Ok(RawPredictions(body.predictions.unwrap_or_default()))
  }

  async fn wait_ready(&self, model: &str, deadline: Duration) -> Result<(), InferError> {
    let url = self.model_url(model, "")?;
    let start = Instant::now();

    loop {
      match self.http.get(url.clone()).send().await {
        Ok(response) if response.status().is_success() => {
          debug!("模型 {} 已就绪, 等待 {:.2?}", model, start.elapsed());
          return Ok(());
        }
        Ok(response) => {
          debug!("模型 {} 尚未就绪: {}", model, response.status());
        }
        Err(e) => {
          debug!("就绪探测失败: {}", e);
        }
      }

      if start.elapsed() >= deadline {
        warn!("模型 {} 在 {:.2?} 内未就绪", model, deadline);
        return Err(InferError::NotReady(deadline));
      }
      tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
  }
}
