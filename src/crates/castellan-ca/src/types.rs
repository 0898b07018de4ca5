//! # 数据类型定义
//!
//! 颁发机构、签发请求、证书记录与 CRL 的数据结构。

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// 序列号初始值
pub const INITIAL_SERIAL: u64 = 1;

/// 颁发机构类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityKind {
    /// 签发 OpenSSH 用户/主机证书
    Ssh,
    /// 签发 X.509 证书
    Ssl,
}

impl AuthorityKind {
    pub fn description(&self) -> &'static str {
        match self {
            AuthorityKind::Ssh => "SSH 颁发机构",
            AuthorityKind::Ssl => "SSL 颁发机构",
        }
    }

    /// 注册表中的子目录名
    pub fn directory_name(&self) -> &'static str {
        match self {
            AuthorityKind::Ssh => "ssh",
            AuthorityKind::Ssl => "ssl",
        }
    }

    /// 该类型可接受请求的 `keyType` 前缀
    pub fn request_prefix(&self) -> &'static str {
        match self {
            AuthorityKind::Ssh => "ssh_",
            AuthorityKind::Ssl => "ssl_",
        }
    }

    pub fn all() -> [AuthorityKind; 2] {
        [AuthorityKind::Ssh, AuthorityKind::Ssl]
    }
}

impl fmt::Display for AuthorityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directory_name())
    }
}

/// 颁发机构激活状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityState {
    Uninitialized,
    /// 非根 SSL 颁发机构等待上级签署其 CSR
    AwaitingActivation,
    Active,
}

impl AuthorityState {
    pub fn description(&self) -> &'static str {
        match self {
            AuthorityState::Uninitialized => "未初始化",
            AuthorityState::AwaitingActivation => "等待激活",
            AuthorityState::Active => "已激活",
        }
    }
}

/// 颁发机构记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authority {
    pub authority_id: String,
    pub name: String,
    pub kind: AuthorityKind,
    /// 仅对 SSL 颁发机构有意义
    pub is_root: bool,
    pub state: AuthorityState,
    /// 下一个待分配的序列号
    pub serial: u64,
    pub private_key_path: PathBuf,
    /// SSH 为 OpenSSH 公钥，SSL 为 SPKI PEM
    pub public_key_path: PathBuf,
    /// 自签名证书或激活时写入的证书链，仅 SSL
    pub certificate_path: Option<PathBuf>,
    pub csr_path: Option<PathBuf>,
    /// 公钥的 SHA-256 指纹
    pub key_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
}

impl Authority {
    pub fn reference(&self) -> AuthorityRef {
        AuthorityRef {
            kind: self.kind,
            authority_id: self.authority_id.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == AuthorityState::Active
    }

    /// 签发产物是否需要附加本机构证书
    pub fn chains_artifacts(&self) -> bool {
        self.kind == AuthorityKind::Ssl && !self.is_root
    }
}

/// 指向颁发机构的类型化引用
///
/// 证书只按 ID 引用颁发机构，不持有其记录。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorityRef {
    pub kind: AuthorityKind,
    pub authority_id: String,
}

/// 签发请求类型
///
/// 线上格式以 `keyType` 区分变体，字段使用驼峰命名。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "keyType")]
pub enum RequestKind {
    #[serde(rename = "ssh_user", rename_all = "camelCase")]
    UserSsh {
        user_name: String,
        #[serde(default)]
        root_requested: bool,
    },

    #[serde(rename = "ssh_host", rename_all = "camelCase")]
    HostSsh { host_name: String },

    #[serde(rename = "ssl_user", rename_all = "camelCase")]
    UserSsl { user_name: String },

    #[serde(rename = "ssl_host", rename_all = "camelCase")]
    HostSsl { host_name: String },

    /// 中间颁发机构的 CSR
    #[serde(rename = "ssl_ca", rename_all = "camelCase")]
    CaSsl { ca_name: String },
}

impl RequestKind {
    /// 线上 `keyType` 标签
    pub fn type_tag(&self) -> &'static str {
        match self {
            RequestKind::UserSsh { .. } => "ssh_user",
            RequestKind::HostSsh { .. } => "ssh_host",
            RequestKind::UserSsl { .. } => "ssl_user",
            RequestKind::HostSsl { .. } => "ssl_host",
            RequestKind::CaSsl { .. } => "ssl_ca",
        }
    }

    /// 请求所针对的用户、主机或颁发机构名称
    pub fn subject(&self) -> &str {
        match self {
            RequestKind::UserSsh { user_name, .. } | RequestKind::UserSsl { user_name } => user_name,
            RequestKind::HostSsh { host_name } | RequestKind::HostSsl { host_name } => host_name,
            RequestKind::CaSsl { ca_name } => ca_name,
        }
    }

    /// 可以处理该请求的颁发机构类型
    pub fn authority_kind(&self) -> AuthorityKind {
        match self {
            RequestKind::UserSsh { .. } | RequestKind::HostSsh { .. } => AuthorityKind::Ssh,
            _ => AuthorityKind::Ssl,
        }
    }

    /// 证书接收方描述
    pub fn receiver(&self) -> String {
        match self {
            RequestKind::UserSsh { user_name, root_requested: true } => format!("{} (+root)", user_name),
            other => other.subject().to_string(),
        }
    }
}

/// 签发请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
    /// 由提交方生成，即投递文件名，不写入文件内容
    #[serde(skip)]
    pub request_id: String,

    #[serde(flatten)]
    pub kind: RequestKind,

    /// SSH 公钥（OpenSSH 格式）或 PEM 格式的 CSR
    #[serde(rename = "keyData")]
    pub key_data: String,
}

impl SigningRequest {
    pub fn new(request_id: impl Into<String>, kind: RequestKind, key_data: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            key_data: key_data.into(),
        }
    }

    /// 密钥材料的 SHA-256 指纹，供操作员带外核对
    pub fn fingerprint(&self) -> String {
        sha256_hex(self.key_data.as_bytes())
    }
}

/// 有效期区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl ValidityWindow {
    /// 从当前时刻开始的有效期
    pub fn starting_now(days: u32) -> Self {
        // 签名格式只保留秒
        let now = DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap_or_else(Utc::now);
        Self {
            not_before: now,
            not_after: now + Duration::days(i64::from(days)),
        }
    }

    pub fn days(&self) -> i64 {
        (self.not_after - self.not_before).num_days()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.not_before <= instant && instant <= self.not_after
    }
}

/// 已签发证书记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    /// 与来源请求 ID 相同
    pub certificate_id: String,
    pub authority: AuthorityRef,
    /// 来源请求的 `keyType`
    pub request_kind: String,
    pub receiver: String,
    pub serial_number: u64,
    pub validity: ValidityWindow,
    pub issued_at: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub artifact_path: PathBuf,
    /// 产物的 SHA-256 指纹
    pub fingerprint: String,
}

impl Certificate {
    /// 标记为已吊销，已吊销时返回 false
    pub fn revoke(&mut self, at: DateTime<Utc>) -> bool {
        if self.revoked {
            return false;
        }
        self.revoked = true;
        self.revoked_at = Some(at);
        true
    }

    pub fn is_issued_by(&self, authority_id: &str) -> bool {
        self.authority.authority_id == authority_id
    }
}

/// 吊销列表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial_number: u64,
    pub revoked_at: DateTime<Utc>,
}

/// 证书吊销列表
///
/// 每次都根据当前证书状态重新生成。
#[derive(Debug, Clone, PartialEq)]
pub struct Crl {
    pub authority_id: String,
    pub generated_at: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub revoked_serials: Vec<u64>,
    pub pem: String,
    pub path: PathBuf,
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
