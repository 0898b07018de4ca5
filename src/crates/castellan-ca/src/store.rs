//! # 证书存储
//!
//! 已签发证书记录保存在 `<manager>/certificates/<certificate_id>.json`，
//! 内存中保留一份索引。

use crate::error::CaError;
use crate::storage;
use crate::types::Certificate;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 证书存储
pub struct CertificateStore {
    directory: PathBuf,
    cache: RwLock<HashMap<String, Certificate>>,
}

impl CertificateStore {
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, CaError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)
            .map_err(|e| CaError::Storage(format!("创建证书目录失败: {}", e)))?;

        let mut certificates = HashMap::new();
        for entry in std::fs::read_dir(&directory)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match storage::read_json::<Certificate>(&path) {
                Ok(Some(certificate)) => {
                    certificates.insert(certificate.certificate_id.clone(), certificate);
                }
                Ok(None) => {}
                Err(e) => warn!("跳过无法解析的证书记录 {}: {}", path.display(), e),
            }
        }

        info!("证书存储加载完成，共 {} 条记录", certificates.len());
        Ok(Self {
            directory,
            cache: RwLock::new(certificates),
        })
    }

    fn record_path(&self, certificate_id: &str) -> PathBuf {
        self.directory.join(format!("{}.json", certificate_id))
    }

    /// 写入新记录
    ///
    /// 同一颁发机构下的序列号不得重复。
    pub async fn insert(&self, certificate: Certificate) -> Result<(), CaError> {
        storage::validate_identifier(&certificate.certificate_id)?;
        let mut cache = self.cache.write().await;

        if cache.contains_key(&certificate.certificate_id) {
            return Err(CaError::DuplicateRequest(certificate.certificate_id.clone()));
        }
        if let Some(existing) = cache.values().find(|c| {
            c.authority == certificate.authority && c.serial_number == certificate.serial_number
        }) {
            return Err(CaError::SerialAllocationConflict(
                certificate.authority.authority_id.clone(),
                format!("序列号 {} 已被证书 {} 使用", certificate.serial_number, existing.certificate_id),
            ));
        }

        storage::write_json(&self.record_path(&certificate.certificate_id), &certificate)?;
        debug!(
            "证书 {} 已记录，颁发机构 {}，序列号 {}",
            certificate.certificate_id, certificate.authority.authority_id, certificate.serial_number
        );
        cache.insert(certificate.certificate_id.clone(), certificate);
        Ok(())
    }

    pub async fn get(&self, certificate_id: &str) -> Result<Certificate, CaError> {
        self.cache
            .read()
            .await
            .get(certificate_id)
            .cloned()
            .ok_or_else(|| CaError::CertificateNotFound(certificate_id.to_string()))
    }

    /// 吊销记录，已吊销时返回 false
    ///
    /// 存储不提供任何撤销吊销的途径。
    pub async fn revoke(&self, certificate_id: &str, at: DateTime<Utc>) -> Result<bool, CaError> {
        let mut cache = self.cache.write().await;
        let mut certificate = cache
            .get(certificate_id)
            .cloned()
            .ok_or_else(|| CaError::CertificateNotFound(certificate_id.to_string()))?;
        if !certificate.revoke(at) {
            return Ok(false);
        }
        storage::write_json(&self.record_path(certificate_id), &certificate)?;
        cache.insert(certificate_id.to_string(), certificate);
        Ok(true)
    }

    /// 删除记录，仅用于签发失败时回滚
    ///
    /// 已吊销的证书不可删除。
    pub(crate) async fn remove(&self, certificate_id: &str) -> Result<bool, CaError> {
        let mut cache = self.cache.write().await;
        if let Some(existing) = cache.get(certificate_id) {
            if existing.revoked {
                return Err(CaError::InvalidRequest(format!("证书 {} 已吊销，不能删除", certificate_id)));
            }
        }
        let removed = storage::remove_if_exists(&self.record_path(certificate_id))?;
        Ok(cache.remove(certificate_id).is_some() || removed)
    }

    pub async fn list(&self) -> Vec<Certificate> {
        let mut certificates: Vec<Certificate> = self.cache.read().await.values().cloned().collect();
        certificates.sort_by(|a, b| {
            a.authority
                .authority_id
                .cmp(&b.authority.authority_id)
                .then(a.serial_number.cmp(&b.serial_number))
        });
        certificates
    }

    /// 某颁发机构签发的全部证书，按序列号排序
    pub async fn by_authority(&self, authority_id: &str) -> Vec<Certificate> {
        let mut certificates: Vec<Certificate> = self
            .cache
            .read()
            .await
            .values()
            .filter(|c| c.is_issued_by(authority_id))
            .cloned()
            .collect();
        certificates.sort_by_key(|c| c.serial_number);
        certificates
    }

    pub async fn find_by_serial(&self, authority_id: &str, serial: u64) -> Option<Certificate> {
        self.cache
            .read()
            .await
            .values()
            .find(|c| c.is_issued_by(authority_id) && c.serial_number == serial)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthorityKind, AuthorityRef, ValidityWindow};
    use tempfile::TempDir;

    fn certificate(id: &str, authority: &str, serial: u64) -> Certificate {
        Certificate {
            certificate_id: id.to_string(),
            authority: AuthorityRef { kind: AuthorityKind::Ssh, authority_id: authority.to_string() },
            request_kind: "ssh_host".to_string(),
            receiver: "db01".to_string(),
            serial_number: serial,
            validity: ValidityWindow::starting_now(364),
            issued_at: Utc::now(),
            revoked: false,
            revoked_at: None,
            artifact_path: PathBuf::from(format!("/tmp/{}-cert.pem", id)),
            fingerprint: String::new(),
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicates() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let store = CertificateStore::open(temp_dir.path()).await.expect("打开存储失败");

        store.insert(certificate("c1", "ssh", 1)).await.expect("插入失败");
        assert!(matches!(
            store.insert(certificate("c1", "ssh", 2)).await,
            Err(CaError::DuplicateRequest(_))
        ));
        assert!(matches!(
            store.insert(certificate("c2", "ssh", 1)).await,
            Err(CaError::SerialAllocationConflict(..))
        ));
        // 不同颁发机构可以有相同序列号
        store.insert(certificate("c3", "other", 1)).await.expect("插入失败");
    }

    #[tokio::test]
    async fn test_queries_and_reload() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        {
            let store = CertificateStore::open(temp_dir.path()).await.expect("打开存储失败");
            store.insert(certificate("c2", "ssh", 2)).await.expect("插入失败");
            store.insert(certificate("c1", "ssh", 1)).await.expect("插入失败");
            assert!(store.revoke("c1", Utc::now()).await.expect("吊销失败"));
        }

        let store = CertificateStore::open(temp_dir.path()).await.expect("重新打开失败");
        let serials: Vec<u64> = store.by_authority("ssh").await.iter().map(|c| c.serial_number).collect();
        assert_eq!(serials, vec![1, 2]);
        assert!(store.get("c1").await.expect("查询失败").revoked, "吊销状态应该被持久化");
        assert_eq!(
            store.find_by_serial("ssh", 2).await.map(|c| c.certificate_id),
            Some("c2".to_string())
        );
        assert!(matches!(store.get("missing").await, Err(CaError::CertificateNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_for_rollback() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let store = CertificateStore::open(temp_dir.path()).await.expect("打开存储失败");

        store.insert(certificate("c1", "ssh", 1)).await.expect("插入失败");
        assert!(store.remove("c1").await.expect("删除失败"));
        assert!(matches!(store.get("c1").await, Err(CaError::CertificateNotFound(_))));
        assert!(!store.remove("c1").await.expect("删除失败"));
    }

    #[tokio::test]
    async fn test_revocation_survives_every_mutation() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let store = CertificateStore::open(temp_dir.path()).await.expect("打开存储失败");

        store.insert(certificate("c1", "ssh", 1)).await.expect("插入失败");
        let revoked_at = Utc::now();
        assert!(store.revoke("c1", revoked_at).await.expect("吊销失败"));

        // 重复吊销不改变吊销时间
        assert!(!store.revoke("c1", revoked_at + chrono::Duration::hours(1)).await.expect("吊销失败"));
        // 以原始记录重新插入会被拒绝
        assert!(matches!(
            store.insert(certificate("c1", "ssh", 1)).await,
            Err(CaError::DuplicateRequest(_))
        ));
        // 已吊销的记录不能被回滚删除
        assert!(matches!(store.remove("c1").await, Err(CaError::InvalidRequest(_))));

        let reopened = CertificateStore::open(temp_dir.path()).await.expect("重新打开失败");
        let record = reopened.get("c1").await.expect("查询失败");
        assert!(record.revoked, "吊销状态不应被任何操作清除");
        assert_eq!(record.revoked_at, Some(revoked_at));
        assert!(matches!(reopened.remove("c1").await, Err(CaError::InvalidRequest(_))));
    }
}
