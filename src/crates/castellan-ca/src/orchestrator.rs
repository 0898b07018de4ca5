//! # 签发编排器
//!
//! 对外暴露唯一的组合操作 [`Orchestrator::sign_request`]，在颁发机构级锁与意图日志
//! 的保护下完成序列号分配、签名、证书持久化与请求消费。
//!
//! 提交顺序：证书记录 → 序列号 → 请求墓碑 → 清除意图。任何一步失败都会尽量撤销
//! 已完成的写入；无法撤销时保留意图，由 [`Orchestrator::recover`] 处理。

use crate::config::CaConfig;
use crate::engine::{AuthorityMaterial, IssuedArtifact, SigningEngine};
use crate::error::CaError;
use crate::journal::{IssuanceIntent, IssuanceJournal};
use crate::queue::RequestQueue;
use crate::registry::{AuthorityRegistry, CreatedAuthority, SerialReservation};
use crate::results::ResultsChannel;
use crate::revocation::RevocationService;
use crate::signer::Signer;
use crate::storage::{self, FileMode};
use crate::store::CertificateStore;
use crate::submission::SubmissionChannel;
use crate::types::{sha256_hex, Authority, AuthorityKind, Certificate, Crl, SigningRequest};
use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

/// 签发前供操作员确认的提案
#[derive(Debug, Clone, PartialEq)]
pub struct SigningProposal {
    pub authority: Authority,
    pub request: SigningRequest,
    pub receiver: String,
    /// 请求密钥材料的 SHA-256
    pub fingerprint: String,
    /// 将要分配的序列号
    pub serial: u64,
}

/// 恢复结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// 没有残留意图
    Clean,
    /// 未找到对应证书，已回滚，请求仍待处理
    RolledBack { request_id: String, serial: u64 },
    /// 证书已存在，补全序列号与请求消费
    RolledForward { certificate_id: String, serial: u64 },
}

/// 签发编排器
pub struct Orchestrator {
    config: Arc<CaConfig>,
    registry: Arc<AuthorityRegistry>,
    store: Arc<CertificateStore>,
    queue: RequestQueue,
    journal: IssuanceJournal,
    results: ResultsChannel,
    engine: SigningEngine,
    revocation: RevocationService,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    /// 校验配置并打开全部持久化组件
    pub async fn new(config: CaConfig, signer: Arc<dyn Signer>) -> Result<Self, CaError> {
        config.validate()?;
        config.ensure_directories()?;
        let config = Arc::new(config);

        let registry = Arc::new(AuthorityRegistry::open(config.clone(), signer.clone()).await?);
        let store = Arc::new(CertificateStore::open(config.manager_directory.join("certificates")).await?);
        let queue = RequestQueue::open(&config.requests_directory)?;
        let journal = IssuanceJournal::open(config.journal_directory())?;
        let results = ResultsChannel::open(&config.results_directory, config.result_poll_interval())?;
        let engine = SigningEngine::new(signer.clone(), config.clone());
        let revocation = RevocationService::new(registry.clone(), store.clone(), signer, config.clone());

        info!("签发编排器已启动");
        Ok(Self {
            config,
            registry,
            store,
            queue,
            journal,
            results,
            engine,
            revocation,
            locks: DashMap::new(),
        })
    }

    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    /// 与本编排器共享队列和结果目录的提交通道
    pub fn submission_channel(&self) -> SubmissionChannel {
        SubmissionChannel::new(self.queue.clone(), self.results.clone(), self.config.result_wait_timeout())
    }

    pub fn results(&self) -> &ResultsChannel {
        &self.results
    }

    /// 非阻塞地获取颁发机构级锁，已被占用时立即失败
    fn try_lock_authority(&self, authority_id: &str) -> Result<OwnedMutexGuard<()>, CaError> {
        let lock = self
            .locks
            .entry(authority_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.try_lock_owned().map_err(|_| {
            CaError::SerialAllocationConflict(authority_id.to_string(), "另一个签发正在进行".to_string())
        })
    }

    fn artifact_path(&self, certificate_id: &str) -> PathBuf {
        self.config.output_directory.join(format!("{}-cert.pem", certificate_id))
    }

    // ---- 颁发机构 ----

    pub async fn create_authority(
        &self,
        authority_id: &str,
        name: &str,
        kind: AuthorityKind,
        is_root: bool,
    ) -> Result<CreatedAuthority, CaError> {
        self.registry.create(authority_id, name, kind, is_root).await
    }

    /// 存入上级签署的证书并激活颁发机构
    pub async fn activate_authority(&self, authority_id: &str, certificate_pem: &str) -> Result<Authority, CaError> {
        self.registry.activate(authority_id, certificate_pem).await
    }

    pub async fn get_authority(&self, authority_id: &str) -> Result<Authority, CaError> {
        self.registry.get(authority_id).await
    }

    pub async fn list_authorities(&self) -> Vec<Authority> {
        self.registry.list().await
    }

    // ---- 请求 ----

    pub fn list_requests(&self, filter: Option<&str>) -> Result<Vec<SigningRequest>, CaError> {
        Ok(self.queue.peek_all(filter)?.collect())
    }

    pub fn get_request(&self, request_id: &str) -> Result<SigningRequest, CaError> {
        self.queue.get(request_id)
    }

    pub fn drop_request(&self, request_id: &str) -> Result<SigningRequest, CaError> {
        self.queue.drop_request(request_id)
    }

    // ---- 签发 ----

    /// 生成签发提案，不改变任何状态
    pub async fn propose(&self, authority_id: &str, request_id: &str) -> Result<SigningProposal, CaError> {
        let authority = self.registry.get(authority_id).await?;
        let request = self.queue.get(request_id)?;
        self.engine.validate(&authority, &request)?;

        Ok(SigningProposal {
            receiver: request.kind.receiver(),
            fingerprint: request.fingerprint(),
            serial: authority.serial,
            authority,
            request,
        })
    }

    /// 确认提案并签发，请求或序列号已变化时拒绝
    pub async fn commit(&self, proposal: &SigningProposal) -> Result<Certificate, CaError> {
        self.issue(&proposal.authority.authority_id, &proposal.request.request_id, Some(proposal))
            .await
    }

    /// 以颁发机构签发请求
    pub async fn sign_request(&self, authority_id: &str, request_id: &str) -> Result<Certificate, CaError> {
        self.issue(authority_id, request_id, None).await
    }

    async fn issue(
        &self,
        authority_id: &str,
        request_id: &str,
        proposal: Option<&SigningProposal>,
    ) -> Result<Certificate, CaError> {
        let authority = self.registry.get(authority_id).await?;
        let request = self.queue.get(request_id)?;
        self.engine.validate(&authority, &request)?;

        let _guard = self.try_lock_authority(authority_id)?;
        // 加锁后重新读取，拿到最新的计数器
        let authority = self.registry.get(authority_id).await?;
        let request = self.queue.get(request_id)?;

        if let Some(proposal) = proposal {
            if proposal.fingerprint != request.fingerprint() || proposal.request.kind != request.kind {
                return Err(CaError::ProposalOutdated(format!("请求 {} 的内容已变化", request_id)));
            }
            if proposal.serial != authority.serial {
                return Err(CaError::ProposalOutdated(format!(
                    "颁发机构 {} 的序列号已从 {} 变为 {}",
                    authority_id, proposal.serial, authority.serial
                )));
            }
        }

        let reservation = self.registry.allocate_serial(authority_id).await?;
        let intent = self.journal.begin(authority_id, request_id, reservation.serial())?;

        let artifact = match self.produce(&authority, &request, reservation.serial()).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(
                    "颁发机构 {} 签发请求 {} 失败，序列号 {} 已回滚: {}",
                    authority_id,
                    request_id,
                    reservation.serial(),
                    e
                );
                self.release_intent(authority_id);
                return Err(e);
            }
        };

        let certificate = self.commit_issuance(&authority, &request, &reservation, &intent, artifact).await?;

        if let Err(e) = self.publish_result(&certificate.certificate_id).await {
            warn!("发布证书 {} 失败，可稍后重试: {}", certificate.certificate_id, e);
        }
        Ok(certificate)
    }

    async fn produce(
        &self,
        authority: &Authority,
        request: &SigningRequest,
        serial: u64,
    ) -> Result<IssuedArtifact, CaError> {
        let material = AuthorityMaterial {
            private_key: self.registry.read_private_key(authority)?,
            certificate: match authority.kind {
                AuthorityKind::Ssl => Some(self.registry.read_certificate(authority)?),
                AuthorityKind::Ssh => None,
            },
        };
        self.engine.issue(authority, &material, request, serial).await
    }

    async fn commit_issuance(
        &self,
        authority: &Authority,
        request: &SigningRequest,
        reservation: &SerialReservation,
        intent: &IssuanceIntent,
        artifact: IssuedArtifact,
    ) -> Result<Certificate, CaError> {
        let authority_id = authority.authority_id.as_str();
        let artifact_path = self.artifact_path(&request.request_id);

        let certificate = Certificate {
            certificate_id: request.request_id.clone(),
            authority: authority.reference(),
            request_kind: request.kind.type_tag().to_string(),
            receiver: request.kind.receiver(),
            serial_number: reservation.serial(),
            validity: artifact.validity,
            issued_at: Utc::now(),
            revoked: false,
            revoked_at: None,
            artifact_path: artifact_path.clone(),
            fingerprint: sha256_hex(artifact.content.as_bytes()),
        };

        let undo_artifact = || {
            if let Err(e) = storage::remove_if_exists(&artifact_path) {
                warn!("清理产物 {} 失败: {}", artifact_path.display(), e);
            }
        };

        if let Err(e) = storage::write_atomic(&artifact_path, artifact.content.as_bytes(), FileMode::Public) {
            self.release_intent(authority_id);
            return Err(e);
        }

        if let Err(e) = self.store.insert(certificate.clone()).await {
            undo_artifact();
            self.release_intent(authority_id);
            return Err(e);
        }

        if let Err(e) = self.registry.commit_serial(reservation).await {
            match self.store.remove(&certificate.certificate_id).await {
                Ok(_) => {
                    undo_artifact();
                    self.release_intent(authority_id);
                }
                Err(undo) => error!("撤销证书记录 {} 失败，保留签发意图: {}", certificate.certificate_id, undo),
            }
            return Err(e);
        }

        if let Err(e) = self.queue.dequeue(&request.request_id) {
            error!(
                "证书 {} 已记录但请求未能消费，保留签发意图 (序列号 {}): {}",
                certificate.certificate_id, intent.serial, e
            );
            return Err(e);
        }

        self.release_intent(authority_id);

        info!(
            "颁发机构 {} 为 {} 签发证书 {}，序列号 {}",
            authority_id, certificate.receiver, certificate.certificate_id, certificate.serial_number
        );
        Ok(certificate)
    }

    /// 清除签发意图，失败时只记录日志，残留意图交给 `recover` 处理
    fn release_intent(&self, authority_id: &str) {
        if let Err(e) = self.journal.clear(authority_id) {
            warn!("清除颁发机构 {} 的签发意图失败，需要执行恢复: {}", authority_id, e);
        }
    }

    /// 将已签发的产物（重新）发布到结果通道
    pub async fn publish_result(&self, certificate_id: &str) -> Result<(), CaError> {
        let certificate = self.store.get(certificate_id).await?;
        let artifact = storage::read_text(&certificate.artifact_path)?;
        self.results.publish(certificate_id, &artifact)
    }

    // ---- 证书与吊销 ----

    pub async fn get_certificate(&self, certificate_id: &str) -> Result<Certificate, CaError> {
        self.store.get(certificate_id).await
    }

    pub async fn list_certificates(&self) -> Vec<Certificate> {
        self.store.list().await
    }

    /// 吊销证书，已吊销时返回 false
    pub async fn revoke_certificate(&self, certificate_id: &str) -> Result<bool, CaError> {
        self.revocation.revoke(certificate_id).await
    }

    pub async fn generate_crl(&self, authority_id: &str) -> Result<Crl, CaError> {
        self.revocation.generate_crl(authority_id).await
    }

    // ---- 恢复 ----

    /// 处理残留的签发意图，不会再次调用签名能力
    pub async fn recover(&self, authority_id: &str) -> Result<RecoveryOutcome, CaError> {
        self.registry.get(authority_id).await?;
        let _guard = self.try_lock_authority(authority_id)?;

        let Some(intent) = self.journal.load(authority_id)? else {
            return Ok(RecoveryOutcome::Clean);
        };

        let recorded = self
            .store
            .find_by_serial(authority_id, intent.serial)
            .await
            .filter(|c| c.certificate_id == intent.request_id);

        let outcome = match recorded {
            Some(certificate) => {
                self.registry.advance_serial_past(authority_id, intent.serial).await?;
                match self.queue.dequeue(&intent.request_id) {
                    Ok(_) | Err(CaError::RequestNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                info!("颁发机构 {} 前滚完成，证书 {}", authority_id, certificate.certificate_id);
                RecoveryOutcome::RolledForward {
                    certificate_id: certificate.certificate_id,
                    serial: intent.serial,
                }
            }
            None => {
                storage::remove_if_exists(&self.artifact_path(&intent.request_id))?;
                info!("颁发机构 {} 回滚完成，请求 {} 仍待处理", authority_id, intent.request_id);
                RecoveryOutcome::RolledBack {
                    request_id: intent.request_id.clone(),
                    serial: intent.serial,
                }
            }
        };

        self.journal.clear(authority_id)?;

        if let RecoveryOutcome::RolledForward { certificate_id, .. } = &outcome {
            if let Err(e) = self.publish_result(certificate_id).await {
                warn!("发布证书 {} 失败，可稍后重试: {}", certificate_id, e);
            }
        }
        Ok(outcome)
    }
}
