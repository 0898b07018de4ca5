//! # 待处理请求队列
//!
//! 每个请求是 `<requests>/<request_id>` 下的一个 JSON 文件。请求被签发或丢弃后
//! 在 `<requests>/.done/` 下留下墓碑，同一 ID 不会被再次接受。

use crate::error::CaError;
use crate::storage::{self, FileMode};
use crate::types::SigningRequest;
use chrono::Utc;
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TOMBSTONE_DIRECTORY: &str = ".done";

/// 请求离开队列的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Consumed,
    Dropped,
}

impl Disposition {
    fn as_str(&self) -> &'static str {
        match self {
            Disposition::Consumed => "consumed",
            Disposition::Dropped => "dropped",
        }
    }
}

/// 请求队列
#[derive(Debug, Clone)]
pub struct RequestQueue {
    directory: PathBuf,
}

impl RequestQueue {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, CaError> {
        let directory = directory.into();
        fs::create_dir_all(directory.join(TOMBSTONE_DIRECTORY))
            .map_err(|e| CaError::Storage(format!("创建请求目录失败: {}", e)))?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn request_path(&self, request_id: &str) -> PathBuf {
        self.directory.join(request_id)
    }

    fn tombstone_path(&self, request_id: &str) -> PathBuf {
        self.directory.join(TOMBSTONE_DIRECTORY).join(request_id)
    }

    /// 请求是否已经被处理过
    pub fn is_settled(&self, request_id: &str) -> bool {
        self.tombstone_path(request_id).exists()
    }

    /// 投递请求，原样返回请求 ID
    pub fn enqueue(&self, request: &SigningRequest) -> Result<String, CaError> {
        storage::validate_identifier(&request.request_id)?;
        if request.key_data.trim().is_empty() {
            return Err(CaError::InvalidRequest(format!("请求 {} 缺少 keyData", request.request_id)));
        }
        if self.request_path(&request.request_id).exists() || self.is_settled(&request.request_id) {
            return Err(CaError::DuplicateRequest(request.request_id.clone()));
        }

        let serialized = serde_json::to_string_pretty(request)?;
        storage::write_atomic(&self.request_path(&request.request_id), serialized.as_bytes(), FileMode::Public)?;
        info!("请求 {} ({}) 已入队", request.request_id, request.kind.type_tag());
        Ok(request.request_id.clone())
    }

    /// 读取单个请求
    pub fn get(&self, request_id: &str) -> Result<SigningRequest, CaError> {
        storage::validate_identifier(request_id)
            .map_err(|_| CaError::RequestNotFound(request_id.to_string()))?;
        let mut request: SigningRequest = storage::read_json(&self.request_path(request_id))?
            .ok_or_else(|| CaError::RequestNotFound(request_id.to_string()))?;
        request.request_id = request_id.to_string();
        Ok(request)
    }

    /// 按 `keyType` 前缀遍历待处理请求
    ///
    /// 返回的迭代器逐个读取目录项，不会把整个队列载入内存。
    pub fn peek_all(&self, filter: Option<&str>) -> Result<PendingRequests<'_>, CaError> {
        let entries = fs::read_dir(&self.directory)
            .map_err(|e| CaError::Storage(format!("读取请求目录失败: {}", e)))?;
        Ok(PendingRequests {
            queue: self,
            entries,
            filter: filter.map(str::to_string),
        })
    }

    /// 签发成功后移除请求
    pub fn dequeue(&self, request_id: &str) -> Result<SigningRequest, CaError> {
        self.settle(request_id, Disposition::Consumed)
    }

    /// 不签发，直接丢弃请求
    pub fn drop_request(&self, request_id: &str) -> Result<SigningRequest, CaError> {
        let request = self.settle(request_id, Disposition::Dropped)?;
        info!("请求 {} 已丢弃", request_id);
        Ok(request)
    }

    /// 返回请求的密钥指纹
    pub fn fingerprint(&self, request_id: &str) -> Result<String, CaError> {
        Ok(self.get(request_id)?.fingerprint())
    }

    /// 先写墓碑再删除请求文件
    fn settle(&self, request_id: &str, disposition: Disposition) -> Result<SigningRequest, CaError> {
        let request = self.get(request_id)?;
        let marker = format!("{} {}\n", disposition.as_str(), Utc::now().to_rfc3339());
        storage::write_atomic(&self.tombstone_path(request_id), marker.as_bytes(), FileMode::Public)?;
        storage::remove_if_exists(&self.request_path(request_id))?;
        debug!("请求 {} 标记为 {}", request_id, disposition.as_str());
        Ok(request)
    }
}

/// 待处理请求迭代器
pub struct PendingRequests<'a> {
    queue: &'a RequestQueue,
    entries: ReadDir,
    filter: Option<String>,
}

impl Iterator for PendingRequests<'_> {
    type Item = SigningRequest;

    fn next(&mut self) -> Option<Self::Item> {
        for entry in self.entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("读取请求目录项失败: {}", e);
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.path().is_file() {
                continue;
            }

            let request = match self.queue.get(&name) {
                Ok(request) => request,
                Err(e) => {
                    warn!("跳过无法解析的请求 {}: {}", name, e);
                    continue;
                }
            };
            let matches = self
                .filter
                .as_deref()
                .is_none_or(|prefix| request.kind.type_tag().starts_with(prefix));
            if matches {
                return Some(request);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RequestKind;
    use tempfile::TempDir;

    fn host_request(id: &str, host: &str) -> SigningRequest {
        SigningRequest::new(id, RequestKind::HostSsh { host_name: host.to_string() }, "ssh-ed25519 AAAA")
    }

    #[test]
    fn test_enqueue_and_get() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let queue = RequestQueue::open(temp_dir.path()).expect("打开队列失败");

        let id = queue.enqueue(&host_request("r1", "db01")).expect("入队失败");
        assert_eq!(id, "r1");
        let request = queue.get("r1").expect("读取失败");
        assert_eq!(request.request_id, "r1");
        assert_eq!(request.kind.subject(), "db01");
        assert_eq!(queue.fingerprint("r1").expect("读取指纹失败"), request.fingerprint());

        let result = queue.enqueue(&host_request("r1", "db02"));
        assert!(matches!(result, Err(CaError::DuplicateRequest(_))));
    }

    #[test]
    fn test_peek_filters_by_prefix() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let queue = RequestQueue::open(temp_dir.path()).expect("打开队列失败");

        queue.enqueue(&host_request("a", "db01")).expect("入队失败");
        queue
            .enqueue(&SigningRequest::new("b", RequestKind::HostSsl { host_name: "example.org".to_string() }, "csr"))
            .expect("入队失败");

        assert_eq!(queue.peek_all(None).expect("遍历失败").count(), 2);
        let ssl: Vec<_> = queue.peek_all(Some("ssl_")).expect("遍历失败").collect();
        assert_eq!(ssl.len(), 1);
        assert_eq!(ssl[0].request_id, "b");
        assert_eq!(queue.peek_all(Some("ssh_host")).expect("遍历失败").count(), 1);
    }

    #[test]
    fn test_settled_requests_cannot_return() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let queue = RequestQueue::open(temp_dir.path()).expect("打开队列失败");

        queue.enqueue(&host_request("r1", "db01")).expect("入队失败");
        queue.dequeue("r1").expect("出队失败");

        assert!(matches!(queue.get("r1"), Err(CaError::RequestNotFound(_))));
        assert!(matches!(queue.dequeue("r1"), Err(CaError::RequestNotFound(_))));
        assert!(matches!(queue.enqueue(&host_request("r1", "db01")), Err(CaError::DuplicateRequest(_))));
        assert_eq!(queue.peek_all(None).expect("遍历失败").count(), 0, "墓碑不应被当作请求");
    }

    #[test]
    fn test_drop_and_invalid_ids() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let queue = RequestQueue::open(temp_dir.path()).expect("打开队列失败");

        queue.enqueue(&host_request("r2", "db01")).expect("入队失败");
        queue.drop_request("r2").expect("丢弃失败");
        assert!(queue.is_settled("r2"));

        assert!(matches!(queue.enqueue(&host_request("../x", "db01")), Err(CaError::InvalidRequest(_))));
        assert!(matches!(queue.get("../x"), Err(CaError::RequestNotFound(_))));
        assert!(matches!(queue.drop_request("missing"), Err(CaError::RequestNotFound(_))));
    }

    #[test]
    fn test_unparsable_files_are_skipped() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let queue = RequestQueue::open(temp_dir.path()).expect("打开队列失败");

        fs::write(temp_dir.path().join("garbage"), "{not json").expect("写入失败");
        queue.enqueue(&host_request("ok", "db01")).expect("入队失败");

        let ids: Vec<_> = queue.peek_all(None).expect("遍历失败").map(|r| r.request_id).collect();
        assert_eq!(ids, vec!["ok".to_string()]);
    }
}
