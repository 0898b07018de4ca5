//! # 签发意图日志
//!
//! 签发开始前写入 `<manager>/journal/<authority_id>.intent`，提交完成后删除。
//! 进程中途退出后残留的意图表示该颁发机构处于存疑状态。

use crate::error::CaError;
use crate::storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// 一次未完成的签发
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuanceIntent {
    pub authority_id: String,
    pub request_id: String,
    pub serial: u64,
    pub started_at: DateTime<Utc>,
}

/// 意图日志
#[derive(Debug, Clone)]
pub struct IssuanceJournal {
    directory: PathBuf,
}

impl IssuanceJournal {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, CaError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| CaError::Storage(format!("创建日志目录失败: {}", e)))?;
        Ok(Self { directory })
    }

    fn intent_path(&self, authority_id: &str) -> PathBuf {
        self.directory.join(format!("{}.intent", authority_id))
    }

    /// 记录签发意图，已有残留意图时拒绝
    pub fn begin(&self, authority_id: &str, request_id: &str, serial: u64) -> Result<IssuanceIntent, CaError> {
        if let Some(existing) = self.load(authority_id)? {
            return Err(CaError::SerialAllocationConflict(
                authority_id.to_string(),
                format!("请求 {} 的签发尚未确认，需先执行恢复", existing.request_id),
            ));
        }
        let intent = IssuanceIntent {
            authority_id: authority_id.to_string(),
            request_id: request_id.to_string(),
            serial,
            started_at: Utc::now(),
        };
        storage::write_json(&self.intent_path(authority_id), &intent)?;
        debug!("记录签发意图: {} 序列号 {}", request_id, serial);
        Ok(intent)
    }

    pub fn load(&self, authority_id: &str) -> Result<Option<IssuanceIntent>, CaError> {
        storage::read_json(&self.intent_path(authority_id))
    }

    pub fn clear(&self, authority_id: &str) -> Result<(), CaError> {
        storage::remove_if_exists(&self.intent_path(authority_id))?;
        Ok(())
    }
}
