//! # Castellan 应用程序模块
//!
//! 把配置、签发编排器与请求提交通道组装成一个可运行的请求服务。

use crate::AppResult;
use castellan_ca::{CaConfig, Orchestrator, RcgenSigner, SubmissionChannel};
use error::ErrorInfo;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// 应用程序配置
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 应用程序名称
    pub app_name: String,
    /// 应用程序版本
    pub app_version: String,
    /// 颁发机构配置
    pub ca: CaConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "Castellan".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            ca: CaConfig::default(),
        }
    }
}

/// 应用程序状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AppState {
    /// 运行中
    Running,
    /// 已停止
    Stopped,
}

/// 请求服务
///
/// 每条提交消息都在共享的队列与结果目录上处理。
pub struct CastellanApp {
    config: AppConfig,
    orchestrator: Arc<Orchestrator>,
    submission: SubmissionChannel,
    state: Arc<RwLock<AppState>>,
}

impl CastellanApp {
    /// 校验配置并打开全部持久化组件
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let orchestrator = Orchestrator::new(config.ca.clone(), Arc::new(RcgenSigner::new()))
            .await
            .map_err(|e| ErrorInfo::from(e).with_context("初始化签发编排器失败".to_string()))?;
        let submission = orchestrator.submission_channel();

        tracing::info!("{} {} 已就绪", config.app_name, config.app_version);
        tracing::debug!("{}", config.ca.summary());

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            submission,
            state: Arc::new(RwLock::new(AppState::Running)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 供操作员工具使用的编排器
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    pub async fn state(&self) -> AppState {
        *self.state.read().await
    }

    /// 处理一条提交消息
    pub async fn handle_message(&self, message: &str, cancel: &CancellationToken) -> AppResult<Value> {
        if self.state().await == AppState::Stopped {
            return Err(ErrorInfo::new(1001, "请求服务已停止".to_string()));
        }
        Ok(self.submission.handle(message, cancel).await)
    }

    pub async fn stop(&self) {
        *self.state.write().await = AppState::Stopped;
        tracing::info!("请求服务已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(temp_dir: &TempDir) -> AppConfig {
        AppConfig {
            ca: CaConfig::builder()
                .with_base_directory(temp_dir.path())
                .build()
                .expect("配置创建失败"),
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn test_handle_message_until_stopped() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let app = CastellanApp::new(config(&temp_dir)).await.expect("创建应用失败");
        let cancel = CancellationToken::new();

        let response = app.handle_message("{", &cancel).await.expect("处理消息失败");
        assert_eq!(response["reason"], "bad_json");

        app.stop().await;
        assert_eq!(app.state().await, AppState::Stopped);
        assert!(app.handle_message("{}", &cancel).await.is_err(), "停止后不再接受消息");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let mut config = config(&temp_dir);
        config.ca.key_algorithm = "RSA".to_string();
        config.ca.key_size = 2048;

        let err = CastellanApp::new(config).await.err().expect("RSA 配置应该被拒绝");
        assert_eq!(err.code(), 7018);
    }

    #[cfg(feature = "config")]
    #[test]
    fn test_config_from_toml() {
        let content = r#"
            app_name = "Castellan Test"

            [ca]
            organization_name = "Example"
            certificate_validity_days = 90
        "#;
        let config: AppConfig = toml::from_str(content).expect("解析配置失败");
        assert_eq!(config.app_name, "Castellan Test");
        assert_eq!(config.ca.organization_name, "Example");
        assert_eq!(config.ca.certificate_validity_days, 90);
        assert_eq!(config.ca.ssh_certificate_validity_days, 364, "未给出的字段使用默认值");
    }
}
