//! # 签发引擎
//!
//! 校验请求与颁发机构是否匹配，并调用签名能力生成产物。引擎本身不持有状态，
//! 序列号、存储与请求队列由编排层负责。

use crate::config::CaConfig;
use crate::error::CaError;
use crate::policy::{validate_subject, AuthorityPolicy};
use crate::signer::Signer;
use crate::types::{Authority, SigningRequest, ValidityWindow};
use std::sync::Arc;
use tracing::debug;

/// 签发产物
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedArtifact {
    /// SSH 证书行，或 PEM 证书（非根颁发机构附带自身证书链）
    pub content: String,
    pub validity: ValidityWindow,
}

/// 签发所需的颁发机构材料
#[derive(Debug, Clone)]
pub struct AuthorityMaterial {
    pub private_key: String,
    /// SSL 颁发机构的证书（链），SSH 为 None
    pub certificate: Option<String>,
}

/// 签发引擎
pub struct SigningEngine {
    signer: Arc<dyn Signer>,
    config: Arc<CaConfig>,
}

impl SigningEngine {
    pub fn new(signer: Arc<dyn Signer>, config: Arc<CaConfig>) -> Self {
        Self { signer, config }
    }

    pub fn policy(&self, authority: &Authority) -> AuthorityPolicy {
        AuthorityPolicy::for_kind(authority.kind, &self.config)
    }

    /// 请求与颁发机构的前置检查
    ///
    /// 依次检查类型兼容、激活状态与主体名称。
    pub fn validate(&self, authority: &Authority, request: &SigningRequest) -> Result<(), CaError> {
        if !self.policy(authority).allows(&request.kind) {
            return Err(CaError::IncompatibleRequest {
                authority: authority.authority_id.clone(),
                request_kind: request.kind.type_tag().to_string(),
            });
        }
        if !authority.is_active() {
            return Err(CaError::AuthorityNotActive(authority.authority_id.clone()));
        }
        validate_subject(&request.kind)
    }

    /// 以给定序列号签发
    pub async fn issue(
        &self,
        authority: &Authority,
        material: &AuthorityMaterial,
        request: &SigningRequest,
        serial: u64,
    ) -> Result<IssuedArtifact, CaError> {
        self.validate(authority, request)?;
        debug!(
            "颁发机构 {} 为 {} 签发，序列号 {}",
            authority.authority_id,
            request.kind.receiver(),
            serial
        );

        match self.policy(authority) {
            AuthorityPolicy::Ssh(policy) => {
                let spec = policy.certificate_spec(&request.kind, serial)?;
                let content = self
                    .signer
                    .sign_ssh_key(&material.private_key, &request.key_data, &spec)
                    .await?;
                Ok(IssuedArtifact { content, validity: spec.validity })
            }
            AuthorityPolicy::Ssl(policy) => {
                let authority_pem = material
                    .certificate
                    .as_deref()
                    .ok_or_else(|| CaError::AuthorityNotActive(authority.authority_id.clone()))?;
                let (profile, validity) = policy.profile(&request.kind)?;
                let leaf = self
                    .signer
                    .sign_csr(&request.key_data, authority_pem, &material.private_key, serial, &validity, &profile)
                    .await?;
                Ok(IssuedArtifact {
                    content: policy.finish_artifact(authority, leaf, authority_pem),
                    validity,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{ExtensionProfile, RcgenSigner, SubjectName};
    use crate::types::{AuthorityKind, AuthorityState, RequestKind};
    use chrono::Utc;
    use std::path::PathBuf;

    fn authority(kind: AuthorityKind, is_root: bool, state: AuthorityState) -> Authority {
        Authority {
            authority_id: "ca".to_string(),
            name: "CA".to_string(),
            kind,
            is_root,
            state,
            serial: 1,
            private_key_path: PathBuf::from("ca.key"),
            public_key_path: PathBuf::from("ca.pub"),
            certificate_path: None,
            csr_path: None,
            key_fingerprint: String::new(),
            created_at: Utc::now(),
            activated_at: None,
        }
    }

    fn engine() -> SigningEngine {
        let config = CaConfig::builder().build().expect("配置创建失败");
        SigningEngine::new(Arc::new(RcgenSigner::new()), Arc::new(config))
    }

    #[test]
    fn test_validation_order() {
        let engine = engine();
        let inactive = authority(AuthorityKind::Ssl, false, AuthorityState::AwaitingActivation);

        let ssh_request = SigningRequest::new(
            "r",
            RequestKind::UserSsh { user_name: "alice".to_string(), root_requested: false },
            "k",
        );
        assert!(
            matches!(engine.validate(&inactive, &ssh_request), Err(CaError::IncompatibleRequest { .. })),
            "类型不兼容优先于未激活"
        );

        let ssl_request = SigningRequest::new("r", RequestKind::HostSsl { host_name: "example.org".to_string() }, "csr");
        assert!(matches!(engine.validate(&inactive, &ssl_request), Err(CaError::AuthorityNotActive(_))));

        let active = authority(AuthorityKind::Ssl, true, AuthorityState::Active);
        assert!(engine.validate(&active, &ssl_request).is_ok());
    }

    #[tokio::test]
    async fn test_issue_ssh_host_certificate() {
        let engine = engine();
        let signer = RcgenSigner::new();
        let ca_keys = signer.generate_ssh_keypair().await.expect("生成 CA 密钥失败");
        let host_keys = signer.generate_ssh_keypair().await.expect("生成主机密钥失败");

        let ca = authority(AuthorityKind::Ssh, false, AuthorityState::Active);
        let material = AuthorityMaterial { private_key: ca_keys.private_pem, certificate: None };
        let request = SigningRequest::new("r", RequestKind::HostSsh { host_name: "db01".to_string() }, host_keys.public_pem);

        let artifact = engine.issue(&ca, &material, &request, 7).await.expect("签发失败");
        let certificate = ssh_key::Certificate::from_openssh(artifact.content.trim()).expect("应该是合法的 SSH 证书");
        assert_eq!(certificate.serial(), 7);
        assert_eq!(certificate.key_id(), "host_db01");
        assert_eq!(artifact.validity.days(), 364);
    }

    #[tokio::test]
    async fn test_intermediate_artifact_carries_chain() {
        let engine = engine();
        let signer = RcgenSigner::new();
        let algorithm = crate::config::KeyAlgorithm::EcdsaP256;
        let subject = |cn: &str| SubjectName {
            common_name: cn.to_string(),
            organization: "Castellan".to_string(),
            country: "CN".to_string(),
        };

        let int_keys = signer.generate_keypair(algorithm).await.expect("生成密钥失败");
        let int_cert = signer
            .create_self_signed(
                &int_keys.private_pem,
                &subject("Int"),
                &ValidityWindow::starting_now(30),
                &ExtensionProfile::IntermediateAuthority,
            )
            .await
            .expect("生成证书失败");
        let leaf_keys = signer.generate_keypair(algorithm).await.expect("生成密钥失败");
        let csr = signer
            .create_csr(&leaf_keys.private_pem, &subject("example.org"), &ExtensionProfile::TlsServer {
                dns_names: vec!["example.org".to_string()],
            })
            .await
            .expect("生成 CSR 失败");

        let int = authority(AuthorityKind::Ssl, false, AuthorityState::Active);
        let material = AuthorityMaterial { private_key: int_keys.private_pem, certificate: Some(int_cert.clone()) };
        let request = SigningRequest::new("r", RequestKind::HostSsl { host_name: "example.org".to_string() }, csr);

        let artifact = engine.issue(&int, &material, &request, 1).await.expect("签发失败");
        assert_eq!(artifact.content.matches("BEGIN CERTIFICATE").count(), 2, "产物应包含叶子与颁发机构证书");
        assert!(artifact.content.trim_end().ends_with(int_cert.trim_end()));
    }
}
