//! # 吊销与 CRL
//!
//! 吊销只改变证书记录中的状态；CRL 每次都从当前记录完整重建，
//! 写入 `<output>/<authority_id>.crl.pem`。

use crate::config::CaConfig;
use crate::error::CaError;
use crate::registry::AuthorityRegistry;
use crate::signer::Signer;
use crate::storage::{self, FileMode};
use crate::store::CertificateStore;
use crate::types::{AuthorityKind, Crl, RevokedEntry};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// 吊销服务
pub struct RevocationService {
    registry: Arc<AuthorityRegistry>,
    store: Arc<CertificateStore>,
    signer: Arc<dyn Signer>,
    config: Arc<CaConfig>,
}

impl RevocationService {
    pub fn new(
        registry: Arc<AuthorityRegistry>,
        store: Arc<CertificateStore>,
        signer: Arc<dyn Signer>,
        config: Arc<CaConfig>,
    ) -> Self {
        Self { registry, store, signer, config }
    }

    /// 吊销证书，已吊销时返回 false
    pub async fn revoke(&self, certificate_id: &str) -> Result<bool, CaError> {
        let now = Utc::now();
        let changed = self.store.revoke(certificate_id, now).await?;
        if changed {
            info!("证书 {} 已吊销", certificate_id);
        } else {
            info!("证书 {} 此前已吊销", certificate_id);
        }
        Ok(changed)
    }

    /// 重建颁发机构的 CRL
    pub async fn generate_crl(&self, authority_id: &str) -> Result<Crl, CaError> {
        let authority = self.registry.get(authority_id).await?;
        if authority.kind == AuthorityKind::Ssh {
            return Err(CaError::UnsupportedOperation(format!("SSH 颁发机构 {} 不生成 CRL", authority_id)));
        }
        let issuer_certificate = self.registry.read_certificate(&authority)?;
        let issuer_key = self.registry.read_private_key(&authority)?;

        let revoked: Vec<RevokedEntry> = self
            .store
            .by_authority(authority_id)
            .await
            .into_iter()
            .filter(|c| c.revoked)
            .map(|c| RevokedEntry {
                serial_number: c.serial_number,
                revoked_at: c.revoked_at.unwrap_or(c.issued_at),
            })
            .collect();

        let generated_at = Utc::now();
        let next_update = generated_at + self.config.crl_validity();
        let pem = self
            .signer
            .build_crl(&issuer_certificate, &issuer_key, &revoked, generated_at, next_update)
            .await?;

        let path = self.config.output_directory.join(format!("{}.crl.pem", authority_id));
        storage::write_atomic(&path, pem.as_bytes(), FileMode::Public)?;
        info!("颁发机构 {} 的 CRL 已生成，包含 {} 个吊销序列号", authority_id, revoked.len());

        Ok(Crl {
            authority_id: authority_id.to_string(),
            generated_at,
            next_update,
            revoked_serials: revoked.iter().map(|e| e.serial_number).collect(),
            pem,
            path,
        })
    }
}
