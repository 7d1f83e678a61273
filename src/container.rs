// 该文件是 Xunshan （巡山） 项目的一部分。
// src/container.rs - 推理容器生命周期管理
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

//! 通过 docker 命令行驱动推理容器。
//!
//! 镜像缺失不是错误：`start` 返回 `Ok(None)`，由编排侧提示用户安装，
//! 与运行途中的网络故障区分开。

use std::process::Output;

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

/// 保留的推理容器名称
pub const SERVING_CONTAINER_NAME: &str = "xunshan-serving";
/// 容器内推理服务端口
const SERVING_PORT: u16 = 8501;

/// 已安装镜像的信息
#[derive(Debug, Clone)]
pub struct ImageInfo {
  pub id: String,
  pub reference: String,
}

/// 运行中推理容器的引用，stop/cleanup 后失效
#[derive(Debug, Clone)]
pub struct ContainerHandle {
  pub id: String,
  pub model_name: String,
}

#[derive(Error, Debug)]
pub enum ContainerError {
  #[error("无法执行 docker 命令: {0}")]
  Spawn(#[from] std::io::Error),
  #[error("docker 命令失败: {0}")]
  Command(String),
}

/// 推理容器的生命周期管理器
pub struct ContainerManager {
  docker: String,
}

impl Default for ContainerManager {
  fn default() -> Self {
    ContainerManager::new()
  }
}

impl ContainerManager {
  pub fn new() -> Self {
    ContainerManager {
      docker: "docker".to_string(),
    }
  }

  async fn docker(&self, args: &[&str]) -> Result<String, ContainerError> {
    let Output { status, stdout, stderr } =
      Command::new(&self.docker).args(args).output().await?;

    if !status.success() {
      return Err(ContainerError::Command(
        String::from_utf8_lossy(&stderr).trim().to_string(),
      ));
    }
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
  }

  /// 查询模型对应的镜像是否已安装
  pub async fn find_image(&self, model: &str) -> Result<Option<ImageInfo>, ContainerError> {
    let out = self.docker(&["images", "-q", model]).await?;
    match out.lines().next() {
      Some(id) if !id.is_empty() => Ok(Some(ImageInfo {
        id: id.to_string(),
        reference: model.to_string(),
      })),
      _ => Ok(None),
    }
  }

  /// 启动推理容器。镜像缺失时返回 `Ok(None)`，调用方必须先检查再继续。
  /// 容器启动到端点可用之间有预热期，由推理客户端的就绪探测吸收。
  pub async fn start(&self, model: &str) -> Result<Option<ContainerHandle>, ContainerError> {
    let Some(image) = self.find_image(model).await? else {
      warn!("未找到模型镜像: {}", model);
      return Ok(None);
    };

    info!("启动推理容器 {} (镜像 {})", SERVING_CONTAINER_NAME, image.reference);
    let port = format!("{}:{}", SERVING_PORT, SERVING_PORT);
    let env = format!("MODEL_NAME={}", model);
    let id = self
      .docker(&[
        "run",
        "-d",
        "--rm",
        "--name",
        SERVING_CONTAINER_NAME,
        "-p",
        &port,
        "-e",
        &env,
        &image.reference,
      ])
      .await?;

    Ok(Some(ContainerHandle {
      id,
      model_name: model.to_string(),
    }))
  }

  /// 停止保留名称的推理容器，未在运行时也安全
  pub async fn stop(&self) -> Result<(), ContainerError> {
    match self.docker(&["stop", SERVING_CONTAINER_NAME]).await {
      Ok(_) => {
        info!("推理容器已停止");
        Ok(())
      }
      Err(ContainerError::Command(msg)) => {
        // 容器本就不在运行
        warn!("停止容器被忽略: {}", msg);
        Ok(())
      }
      Err(e) => Err(e),
    }
  }

  /// 停止保留名称的容器并清理已停止的容器，可重复调用
  pub async fn cleanup(&self) -> Result<(), ContainerError> {
    self.stop().await?;
    self.docker(&["container", "prune", "-f"]).await?;
    info!("已清理停止的容器");
    Ok(())
  }
}
