//! # 颁发机构注册表
//!
//! 独占颁发机构记录及其序列号计数器。记录按类型存放在
//! `<manager>/authorities/<ssh|ssl>/<id>.json`，密钥与证书文件与记录同目录。

use crate::config::CaConfig;
use crate::error::CaError;
use crate::signer::{certificate_binds_key, ExtensionProfile, Signer, SubjectName};
use crate::storage::{self, FileMode};
use crate::types::{
    sha256_hex, Authority, AuthorityKind, AuthorityRef, AuthorityState, RequestKind, SigningRequest,
    ValidityWindow, INITIAL_SERIAL,
};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 新建颁发机构的结果
#[derive(Debug, Clone)]
pub struct CreatedAuthority {
    pub authority: Authority,
    /// 非根 SSL 颁发机构需要交由上级签署的 CASSL 请求
    pub activation_request: Option<SigningRequest>,
}

/// 已分配但尚未持久化的序列号
///
/// 只有 [`AuthorityRegistry::commit_serial`] 会推进计数器，丢弃预留即回滚。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialReservation {
    authority_id: String,
    serial: u64,
}

impl SerialReservation {
    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// 颁发机构注册表
pub struct AuthorityRegistry {
    root: PathBuf,
    config: Arc<CaConfig>,
    signer: Arc<dyn Signer>,
    cache: RwLock<HashMap<String, Authority>>,
}

impl AuthorityRegistry {
    /// 打开注册表并加载已有记录
    pub async fn open(config: Arc<CaConfig>, signer: Arc<dyn Signer>) -> Result<Self, CaError> {
        let root = config.manager_directory.join("authorities");
        let mut authorities = HashMap::new();

        for kind in AuthorityKind::all() {
            let dir = root.join(kind.directory_name());
            std::fs::create_dir_all(&dir)
                .map_err(|e| CaError::Storage(format!("创建注册表目录失败: {}", e)))?;

            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match storage::read_json::<Authority>(&path) {
                    Ok(Some(authority)) if authority.kind == kind => {
                        authorities.insert(authority.authority_id.clone(), authority);
                    }
                    Ok(Some(authority)) => {
                        warn!("颁发机构 {} 的类型与所在目录不符，已忽略", authority.authority_id);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("跳过无法解析的颁发机构记录 {}: {}", path.display(), e),
                }
            }
        }

        info!("颁发机构注册表加载完成，共 {} 个", authorities.len());
        Ok(Self {
            root,
            config,
            signer,
            cache: RwLock::new(authorities),
        })
    }

    /// 按类型分派的记录目录
    fn kind_directory(&self, kind: AuthorityKind) -> PathBuf {
        self.root.join(kind.directory_name())
    }

    fn file_path(&self, kind: AuthorityKind, id: &str, extension: &str) -> PathBuf {
        self.kind_directory(kind).join(format!("{}.{}", id, extension))
    }

    fn subject(&self, name: &str) -> SubjectName {
        SubjectName {
            common_name: name.to_string(),
            organization: self.config.organization_name.clone(),
            country: self.config.country_code.clone(),
        }
    }

    /// 创建颁发机构
    ///
    /// SSH 与根 SSL 颁发机构创建后立即可用；非根 SSL 颁发机构生成 CSR 并进入
    /// 等待激活状态，同时返回需要路由给上级的 CASSL 请求。
    pub async fn create(
        &self,
        id: &str,
        name: &str,
        kind: AuthorityKind,
        is_root: bool,
    ) -> Result<CreatedAuthority, CaError> {
        storage::validate_identifier(id)?;
        if kind == AuthorityKind::Ssh && is_root {
            return Err(CaError::InvalidRequest("SSH 颁发机构不区分根与中间".to_string()));
        }

        let mut cache = self.cache.write().await;
        let on_disk = AuthorityKind::all()
            .iter()
            .any(|k| self.file_path(*k, id, "json").exists());
        if cache.contains_key(id) || on_disk {
            return Err(CaError::DuplicateAuthority(id.to_string()));
        }

        info!("创建{} {} ({})", kind.description(), id, name);

        let mut files: Vec<(PathBuf, String, FileMode)> = Vec::new();
        let key_path = self.file_path(kind, id, "key");
        let pub_path = self.file_path(kind, id, "pub");
        let mut certificate_path = None;
        let mut csr_path = None;
        let mut activation_request = None;

        let (state, public_pem) = match (kind, is_root) {
            (AuthorityKind::Ssh, _) => {
                let keys = self.signer.generate_ssh_keypair().await?;
                files.push((key_path.clone(), keys.private_pem, FileMode::Secret));
                files.push((pub_path.clone(), keys.public_pem.clone(), FileMode::Public));
                (AuthorityState::Active, keys.public_pem)
            }
            (AuthorityKind::Ssl, true) => {
                let keys = self.signer.generate_keypair(self.config.signing_algorithm()?).await?;
                let validity = ValidityWindow::starting_now(self.config.root_ca_validity_days);
                let certificate = self
                    .signer
                    .create_self_signed(&keys.private_pem, &self.subject(name), &validity, &ExtensionProfile::RootAuthority)
                    .await?;
                let crt_path = self.file_path(kind, id, "crt");
                files.push((key_path.clone(), keys.private_pem, FileMode::Secret));
                files.push((pub_path.clone(), keys.public_pem.clone(), FileMode::Public));
                files.push((crt_path.clone(), certificate, FileMode::Public));
                certificate_path = Some(crt_path);
                (AuthorityState::Active, keys.public_pem)
            }
            (AuthorityKind::Ssl, false) => {
                let keys = self.signer.generate_keypair(self.config.signing_algorithm()?).await?;
                let csr = self
                    .signer
                    .create_csr(&keys.private_pem, &self.subject(name), &ExtensionProfile::IntermediateAuthority)
                    .await?;
                let path = self.file_path(kind, id, "csr");
                files.push((key_path.clone(), keys.private_pem, FileMode::Secret));
                files.push((pub_path.clone(), keys.public_pem.clone(), FileMode::Public));
                files.push((path.clone(), csr.clone(), FileMode::Public));
                csr_path = Some(path);
                activation_request = Some(SigningRequest::new(
                    Uuid::new_v4().to_string(),
                    RequestKind::CaSsl { ca_name: id.to_string() },
                    csr,
                ));
                (AuthorityState::AwaitingActivation, keys.public_pem)
            }
        };

        let now = Utc::now();
        let authority = Authority {
            authority_id: id.to_string(),
            name: name.to_string(),
            kind,
            is_root,
            state,
            serial: INITIAL_SERIAL,
            private_key_path: key_path,
            public_key_path: pub_path,
            certificate_path,
            csr_path,
            key_fingerprint: sha256_hex(public_pem.trim().as_bytes()),
            created_at: now,
            activated_at: if state == AuthorityState::Active { Some(now) } else { None },
        };

        let mut written: Vec<&Path> = Vec::new();
        let result = (|| {
            for (path, contents, mode) in &files {
                storage::write_atomic(path, contents.as_bytes(), *mode)?;
                written.push(path.as_path());
            }
            storage::write_json(&self.file_path(kind, id, "json"), &authority)
        })();
        if let Err(e) = result {
            for path in written {
                let _ = storage::remove_if_exists(path);
            }
            return Err(e);
        }

        cache.insert(id.to_string(), authority.clone());
        info!("颁发机构 {} 创建完成，状态: {}", id, authority.state.description());
        Ok(CreatedAuthority { authority, activation_request })
    }

    /// 查询颁发机构
    pub async fn get(&self, id: &str) -> Result<Authority, CaError> {
        self.cache
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| CaError::AuthorityNotFound(id.to_string()))
    }

    /// 按类型化引用查询
    pub async fn resolve(&self, reference: &AuthorityRef) -> Result<Authority, CaError> {
        let authority = self.get(&reference.authority_id).await?;
        if authority.kind != reference.kind {
            return Err(CaError::AuthorityNotFound(format!(
                "{}:{}",
                reference.kind, reference.authority_id
            )));
        }
        Ok(authority)
    }

    /// 列出全部颁发机构
    pub async fn list(&self) -> Vec<Authority> {
        let mut authorities: Vec<Authority> = self.cache.read().await.values().cloned().collect();
        authorities.sort_by(|a, b| a.authority_id.cmp(&b.authority_id));
        authorities
    }

    /// 预留下一个序列号
    pub async fn allocate_serial(&self, id: &str) -> Result<SerialReservation, CaError> {
        let authority = self.get(id).await?;
        debug!("颁发机构 {} 预留序列号 {}", id, authority.serial);
        Ok(SerialReservation {
            authority_id: authority.authority_id,
            serial: authority.serial,
        })
    }

    /// 持久化预留的序列号，计数器加一
    pub async fn commit_serial(&self, reservation: &SerialReservation) -> Result<Authority, CaError> {
        let mut cache = self.cache.write().await;
        let current = cache
            .get(&reservation.authority_id)
            .cloned()
            .ok_or_else(|| CaError::AuthorityNotFound(reservation.authority_id.clone()))?;

        if current.serial != reservation.serial {
            return Err(CaError::SerialAllocationConflict(
                reservation.authority_id.clone(),
                format!("预留序列号 {} 与当前计数器 {} 不一致", reservation.serial, current.serial),
            ));
        }

        let mut updated = current;
        updated.serial = reservation.serial.checked_add(1).ok_or_else(|| {
            CaError::SerialAllocationConflict(reservation.authority_id.clone(), "序列号溢出".to_string())
        })?;
        self.persist(&updated)?;
        cache.insert(updated.authority_id.clone(), updated.clone());
        debug!("颁发机构 {} 序列号推进到 {}", updated.authority_id, updated.serial);
        Ok(updated)
    }

    /// 恢复时确保计数器已越过某个序列号
    pub async fn advance_serial_past(&self, id: &str, serial: u64) -> Result<Authority, CaError> {
        let mut cache = self.cache.write().await;
        let mut authority = cache
            .get(id)
            .cloned()
            .ok_or_else(|| CaError::AuthorityNotFound(id.to_string()))?;
        if authority.serial > serial {
            return Ok(authority);
        }
        authority.serial = serial + 1;
        self.persist(&authority)?;
        cache.insert(id.to_string(), authority.clone());
        Ok(authority)
    }

    /// 存入上级签署的证书，激活非根 SSL 颁发机构
    pub async fn activate(&self, id: &str, certificate_pem: &str) -> Result<Authority, CaError> {
        let mut cache = self.cache.write().await;
        let mut authority = cache
            .get(id)
            .cloned()
            .ok_or_else(|| CaError::AuthorityNotFound(id.to_string()))?;

        if authority.kind != AuthorityKind::Ssl {
            return Err(CaError::UnsupportedOperation(format!("SSH 颁发机构 {} 无需激活", id)));
        }
        if authority.state != AuthorityState::AwaitingActivation {
            return Err(CaError::InvalidState {
                authority: id.to_string(),
                reason: format!("当前状态为{}", authority.state.description()),
            });
        }

        let public_key = self.read_public_key(&authority)?;
        if !certificate_binds_key(certificate_pem, &public_key)? {
            warn!("颁发机构 {} 的激活证书与其公钥不匹配", id);
            return Err(CaError::ActivationMismatch(id.to_string()));
        }

        let crt_path = self.file_path(authority.kind, id, "crt");
        storage::write_atomic(&crt_path, certificate_pem.as_bytes(), FileMode::Public)?;

        authority.certificate_path = Some(crt_path);
        authority.state = AuthorityState::Active;
        authority.activated_at = Some(Utc::now());
        if let Err(e) = self.persist(&authority) {
            let _ = storage::remove_if_exists(&self.file_path(authority.kind, id, "crt"));
            return Err(e);
        }

        cache.insert(id.to_string(), authority.clone());
        info!("颁发机构 {} 已激活", id);
        Ok(authority)
    }

    pub fn read_private_key(&self, authority: &Authority) -> Result<String, CaError> {
        storage::read_text(&authority.private_key_path)
    }

    /// 颁发机构自身的证书（链），尚未激活时报错
    pub fn read_certificate(&self, authority: &Authority) -> Result<String, CaError> {
        match &authority.certificate_path {
            Some(path) => storage::read_text(path),
            None => Err(CaError::AuthorityNotActive(authority.authority_id.clone())),
        }
    }

    fn read_public_key(&self, authority: &Authority) -> Result<String, CaError> {
        storage::read_text(&authority.public_key_path)
    }

    fn persist(&self, authority: &Authority) -> Result<(), CaError> {
        storage::write_json(&self.file_path(authority.kind, &authority.authority_id, "json"), authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::RcgenSigner;
    use tempfile::TempDir;

    async fn registry(temp_dir: &TempDir) -> AuthorityRegistry {
        let config = CaConfig::builder()
            .with_base_directory(temp_dir.path())
            .build()
            .expect("配置创建失败");
        AuthorityRegistry::open(Arc::new(config), Arc::new(RcgenSigner::new()))
            .await
            .expect("打开注册表失败")
    }

    #[tokio::test]
    async fn test_create_and_duplicate() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let registry = registry(&temp_dir).await;

        let created = registry
            .create("root", "Root CA", AuthorityKind::Ssl, true)
            .await
            .expect("创建根颁发机构失败");
        assert_eq!(created.authority.state, AuthorityState::Active);
        assert_eq!(created.authority.serial, INITIAL_SERIAL);
        assert!(created.activation_request.is_none());
        assert!(created.authority.certificate_path.is_some());

        let result = registry.create("root", "Other", AuthorityKind::Ssh, false).await;
        assert!(matches!(result, Err(CaError::DuplicateAuthority(_))), "ID 跨类型唯一");
    }

    #[tokio::test]
    async fn test_intermediate_awaits_activation() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let registry = registry(&temp_dir).await;

        let created = registry
            .create("int", "Intermediate", AuthorityKind::Ssl, false)
            .await
            .expect("创建中间颁发机构失败");
        assert_eq!(created.authority.state, AuthorityState::AwaitingActivation);
        let request = created.activation_request.expect("应该生成 CASSL 请求");
        assert_eq!(request.kind, RequestKind::CaSsl { ca_name: "int".to_string() });
        assert!(request.key_data.contains("CERTIFICATE REQUEST"));

        let err = registry
            .read_certificate(&created.authority)
            .expect_err("未激活时没有证书");
        assert!(matches!(err, CaError::AuthorityNotActive(_)));
    }

    #[tokio::test]
    async fn test_activation_rejects_foreign_certificate() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let registry = registry(&temp_dir).await;

        let root = registry.create("root", "Root", AuthorityKind::Ssl, true).await.expect("创建失败");
        registry.create("int", "Int", AuthorityKind::Ssl, false).await.expect("创建失败");

        let root_cert = registry.read_certificate(&root.authority).expect("读取根证书失败");
        let result = registry.activate("int", &root_cert).await;
        assert!(matches!(result, Err(CaError::ActivationMismatch(_))));

        let int = registry.get("int").await.expect("查询失败");
        assert_eq!(int.state, AuthorityState::AwaitingActivation, "失败的激活不改变状态");

        let result = registry.activate("root", &root_cert).await;
        assert!(matches!(result, Err(CaError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_serial_reservation_commit_and_rollback() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let registry = registry(&temp_dir).await;
        registry.create("ssh", "SSH CA", AuthorityKind::Ssh, false).await.expect("创建失败");

        let first = registry.allocate_serial("ssh").await.expect("分配失败");
        assert_eq!(first.serial(), 1);
        // 未提交的预留被丢弃，计数器不变
        drop(first);
        let again = registry.allocate_serial("ssh").await.expect("分配失败");
        assert_eq!(again.serial(), 1);

        let updated = registry.commit_serial(&again).await.expect("提交失败");
        assert_eq!(updated.serial, 2);

        let stale = registry.commit_serial(&again).await;
        assert!(matches!(stale, Err(CaError::SerialAllocationConflict(..))), "重复提交必须冲突");
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        {
            let registry = registry(&temp_dir).await;
            registry.create("ssh", "SSH CA", AuthorityKind::Ssh, false).await.expect("创建失败");
            let reservation = registry.allocate_serial("ssh").await.expect("分配失败");
            registry.commit_serial(&reservation).await.expect("提交失败");
        }

        let registry = registry(&temp_dir).await;
        let authority = registry.get("ssh").await.expect("重新加载后应该存在");
        assert_eq!(authority.serial, 2);
        assert_eq!(registry.list().await.len(), 1);

        let wrong_kind = AuthorityRef { kind: AuthorityKind::Ssl, authority_id: "ssh".to_string() };
        assert!(matches!(registry.resolve(&wrong_kind).await, Err(CaError::AuthorityNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_creation_arguments() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let registry = registry(&temp_dir).await;

        assert!(matches!(
            registry.create("../x", "x", AuthorityKind::Ssl, true).await,
            Err(CaError::InvalidRequest(_))
        ));
        assert!(matches!(
            registry.create("ssh", "x", AuthorityKind::Ssh, true).await,
            Err(CaError::InvalidRequest(_))
        ));
        assert!(matches!(registry.get("missing").await, Err(CaError::AuthorityNotFound(_))));
    }
}
