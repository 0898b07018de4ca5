//! # 签发结果通道
//!
//! 签发产物以请求 ID 为文件名发布到 `<results>/`，提交方轮询读取。

use crate::error::CaError;
use crate::storage::{self, FileMode};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// 结果通道
#[derive(Debug, Clone)]
pub struct ResultsChannel {
    directory: PathBuf,
    poll_interval: Duration,
}

impl ResultsChannel {
    pub fn open(directory: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, CaError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| CaError::Storage(format!("创建结果目录失败: {}", e)))?;
        Ok(Self { directory, poll_interval })
    }

    /// 发布结果，读者只会看到完整内容
    pub fn publish(&self, request_id: &str, artifact: &str) -> Result<(), CaError> {
        storage::validate_identifier(request_id)?;
        storage::write_atomic(&self.directory.join(request_id), artifact.as_bytes(), FileMode::Public)?;
        debug!("请求 {} 的结果已发布", request_id);
        Ok(())
    }

    /// 读取结果，尚未发布时返回 None
    pub fn fetch(&self, request_id: &str) -> Result<Option<String>, CaError> {
        storage::validate_identifier(request_id)?;
        match std::fs::read_to_string(self.directory.join(request_id)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CaError::Storage(format!("读取结果 {} 失败: {}", request_id, e))),
        }
    }

    /// 等待结果出现
    ///
    /// 超时返回 [`CaError::ResultTimeout`]，令牌取消时返回 [`CaError::Cancelled`]。
    pub async fn await_result(
        &self,
        request_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, CaError> {
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(CaError::Cancelled(request_id.to_string()));
            }
            if let Some(artifact) = self.fetch(request_id)? {
                return Ok(artifact);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CaError::ResultTimeout(request_id.to_string()));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(CaError::Cancelled(request_id.to_string()));
                }
                _ = sleep(self.poll_interval.min(remaining)) => {}
            }
        }
    }
}
