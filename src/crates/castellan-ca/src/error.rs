//! # 颁发机构错误定义
//!
//! 生命周期引擎内部统一返回 [`CaError`]，对外通过 `From<CaError> for ErrorInfo`
//! 附加错误类别与严重程度。

use error::{Error, ErrorCategory, ErrorInfo, ErrorKind, ErrorSeverity};

/// 颁发机构生命周期错误
///
/// 所有错误都会中止当前组合操作，持久化状态保持操作前的样子。
#[derive(Debug, Clone, Error)]
pub enum CaError {
    #[error("颁发机构已存在: {0}")]
    #[code(7001)]
    DuplicateAuthority(String),

    #[error("颁发机构不存在: {0}")]
    #[code(7002)]
    AuthorityNotFound(String),

    #[error("签发请求不存在: {0}")]
    #[code(7003)]
    RequestNotFound(String),

    #[error("颁发机构 {authority} 不接受 {request_kind} 类型的请求")]
    #[code(7004)]
    IncompatibleRequest { authority: String, request_kind: String },

    #[error("颁发机构尚未激活: {0}")]
    #[code(7005)]
    AuthorityNotActive(String),

    #[error("证书不存在: {0}")]
    #[code(7006)]
    CertificateNotFound(String),

    /// 外部签名操作失败，不会改动任何持久化状态
    #[error("签名操作失败: {0}")]
    #[code(7007)]
    SigningFailure(String),

    /// 并发分配或存在未决的签发意图
    #[error("颁发机构 {0} 序列号分配冲突: {1}")]
    #[code(7008)]
    SerialAllocationConflict(String, String),

    #[error("签发请求已存在或已处理: {0}")]
    #[code(7009)]
    DuplicateRequest(String),

    #[error("无效的签发请求: {0}")]
    #[code(7010)]
    InvalidRequest(String),

    #[error("颁发机构 {authority} 当前状态不允许该操作: {reason}")]
    #[code(7011)]
    InvalidState { authority: String, reason: String },

    #[error("激活证书与颁发机构 {0} 的密钥不匹配")]
    #[code(7012)]
    ActivationMismatch(String),

    #[error("签发提议已失效: {0}")]
    #[code(7013)]
    ProposalOutdated(String),

    #[error("不支持的操作: {0}")]
    #[code(7014)]
    UnsupportedOperation(String),

    #[error("等待签发结果超时: {0}")]
    #[code(7015)]
    ResultTimeout(String),

    #[error("等待签发结果被取消: {0}")]
    #[code(7016)]
    Cancelled(String),

    #[error("存储错误: {0}")]
    #[code(7017)]
    Storage(String),

    #[error("配置错误: {0}")]
    #[code(7018)]
    Config(ConfigError),
}

impl std::error::Error for CaError {}

impl From<ConfigError> for CaError {
    fn from(err: ConfigError) -> Self {
        CaError::Config(err)
    }
}

impl From<std::io::Error> for CaError {
    fn from(err: std::io::Error) -> Self {
        CaError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for CaError {
    fn from(err: serde_json::Error) -> Self {
        CaError::Storage(format!("JSON 序列化失败: {}", err))
    }
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("无效的密钥参数: {0}")]
    #[code(7201)]
    InvalidKey(String),

    #[error("无效的有效期: {0} 天")]
    #[code(7202)]
    InvalidValidityPeriod(u32),

    #[error("无效的存储路径: {0}")]
    #[code(7203)]
    InvalidStoragePath(String),

    #[error("配置验证失败: {0}")]
    #[code(7204)]
    ValidationFailed(String),
}

impl std::error::Error for ConfigError {}

impl From<CaError> for ErrorInfo {
    fn from(err: CaError) -> Self {
        let (category, severity) = match &err {
            CaError::DuplicateAuthority(_) | CaError::DuplicateRequest(_) => {
                (ErrorCategory::Conflict, ErrorSeverity::Warning)
            }
            CaError::AuthorityNotFound(_)
            | CaError::RequestNotFound(_)
            | CaError::CertificateNotFound(_) => (ErrorCategory::NotFound, ErrorSeverity::Warning),
            CaError::IncompatibleRequest { .. } | CaError::InvalidRequest(_) => {
                (ErrorCategory::Validation, ErrorSeverity::Warning)
            }
            CaError::AuthorityNotActive(_)
            | CaError::InvalidState { .. }
            | CaError::ProposalOutdated(_) => (ErrorCategory::State, ErrorSeverity::Warning),
            CaError::ActivationMismatch(_) => (ErrorCategory::Validation, ErrorSeverity::Error),
            CaError::SigningFailure(_) => (ErrorCategory::Encryption, ErrorSeverity::Error),
            CaError::SerialAllocationConflict(..) => (ErrorCategory::Conflict, ErrorSeverity::Critical),
            CaError::UnsupportedOperation(_) => (ErrorCategory::NotImplemented, ErrorSeverity::Warning),
            CaError::ResultTimeout(_) => (ErrorCategory::Timeout, ErrorSeverity::Info),
            CaError::Cancelled(_) => (ErrorCategory::Cancelled, ErrorSeverity::Info),
            CaError::Storage(_) => (ErrorCategory::Storage, ErrorSeverity::Error),
            CaError::Config(_) => (ErrorCategory::Configuration, ErrorSeverity::Error),
        };

        ErrorInfo::new(err.error_code(), err.error_message())
            .with_category(category)
            .with_severity(severity)
    }
}
