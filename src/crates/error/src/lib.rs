//! # 错误处理框架
//!
//! 工作区共享的错误模型。领域错误枚举通过 `#[derive(Error)]` 获得 `Display`
//! 与 `ErrorKind` 实现，再显式转换为携带错误码、类别和严重程度的 [`ErrorInfo`]
//! 向调用方暴露。
//!
//! ```rust
//! use error::{Error, ErrorInfo, ErrorKind};
//!
//! #[derive(Debug, Error)]
//! enum SpoolError {
//!     #[error("请求不存在: {0}")]
//!     #[code(7003)]
//!     Missing(String),
//!
//!     #[error("颁发机构 {authority} 尚未激活")]
//!     Inactive { authority: String },
//! }
//!
//! let err = SpoolError::Missing("req-1".to_string());
//! assert_eq!(err.error_code(), 7003);
//!
//! let info = ErrorInfo::from_kind(&err);
//! assert_eq!(info.message(), "请求不存在: req-1");
//! ```

// 允许在本 crate 内部使用派生宏生成的 `::error::` 路径
extern crate self as error;

pub use error_derive::Error;

use std::fmt;

/// 错误严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// 调试信息
    Debug = 0,
    /// 普通信息
    Info = 1,
    /// 可恢复，调用方通常可以修正后重试
    Warning = 2,
    /// 操作失败
    Error = 3,
    /// 持久化状态可能需要人工介入
    Critical = 4,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorSeverity::Debug => "调试",
            ErrorSeverity::Info => "信息",
            ErrorSeverity::Warning => "警告",
            ErrorSeverity::Error => "错误",
            ErrorSeverity::Critical => "严重",
        };
        f.write_str(text)
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// IO 错误
    Io,
    /// 解析错误
    Parse,
    /// 验证错误
    Validation,
    /// 配置错误
    Configuration,
    /// 存储错误
    Storage,
    /// 加密或签名错误
    Encryption,
    /// 资源不存在
    NotFound,
    /// 资源冲突
    Conflict,
    /// 状态不允许该操作
    State,
    /// 等待超时
    Timeout,
    /// 操作被取消
    Cancelled,
    /// 不支持的操作
    NotImplemented,
    /// 其他错误
    Other,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ErrorCategory::Io => "IO错误",
            ErrorCategory::Parse => "解析错误",
            ErrorCategory::Validation => "验证错误",
            ErrorCategory::Configuration => "配置错误",
            ErrorCategory::Storage => "存储错误",
            ErrorCategory::Encryption => "加密错误",
            ErrorCategory::NotFound => "资源不存在",
            ErrorCategory::Conflict => "资源冲突",
            ErrorCategory::State => "状态错误",
            ErrorCategory::Timeout => "超时",
            ErrorCategory::Cancelled => "已取消",
            ErrorCategory::NotImplemented => "不支持的操作",
            ErrorCategory::Other => "其他错误",
        };
        f.write_str(text)
    }
}

/// 错误类型的核心trait
///
/// `#[derive(Error)]` 会自动实现本 trait。
pub trait ErrorKind: fmt::Debug + fmt::Display + Send + Sync {
    /// 错误码
    fn error_code(&self) -> u32;

    /// 人类可读的错误描述
    fn error_message(&self) -> String;

    /// 引起当前错误的源错误
    fn source(&self) -> Option<&(dyn ErrorKind + Send + Sync)> {
        None
    }
}

/// 错误信息
///
/// 封装错误码、消息、源错误、上下文、严重程度和类别。
#[derive(Debug)]
pub struct ErrorInfo {
    code: u32,
    message: String,
    source: Option<Box<dyn ErrorKind + Send + Sync>>,
    context: Vec<String>,
    severity: ErrorSeverity,
    category: ErrorCategory,
}

impl Clone for ErrorInfo {
    fn clone(&self) -> Self {
        Self {
            code: self.code,
            message: self.message.clone(),
            // 源错误是 trait 对象，不参与克隆
            source: None,
            context: self.context.clone(),
            severity: self.severity,
            category: self.category,
        }
    }
}

impl PartialEq for ErrorInfo {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && self.message == other.message
            && self.context == other.context
            && self.severity == other.severity
            && self.category == other.category
    }
}

impl ErrorInfo {
    /// 创建新的错误信息
    ///
    /// ```rust
    /// use error::ErrorInfo;
    ///
    /// let error = ErrorInfo::new(7002, "颁发机构不存在: root".to_string());
    /// assert_eq!(error.code(), 7002);
    /// ```
    pub fn new(code: u32, message: String) -> Self {
        Self {
            code,
            message,
            source: None,
            context: Vec::new(),
            severity: ErrorSeverity::Error,
            category: ErrorCategory::Other,
        }
    }

    /// 由任意 `ErrorKind` 构造，沿用其错误码与消息
    pub fn from_kind<E: ErrorKind + ?Sized>(kind: &E) -> Self {
        Self::new(kind.error_code(), kind.error_message())
    }

    /// 创建带源错误的错误信息
    pub fn with_source<E: ErrorKind + 'static>(code: u32, message: String, source: E) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(code, message)
        }
    }

    /// 追加上下文
    pub fn add_context(&mut self, context: String) {
        self.context.push(context);
    }

    /// 链式追加上下文
    ///
    /// ```rust
    /// use error::ErrorInfo;
    ///
    /// let error = ErrorInfo::new(7003, "请求不存在".to_string())
    ///     .with_context("签发请求 req-7".to_string());
    /// assert_eq!(error.context().len(), 1);
    /// ```
    pub fn with_context(mut self, context: String) -> Self {
        self.context.push(context);
        self
    }

    /// 设置严重程度
    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// 设置类别
    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = category;
        self
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source(&self) -> Option<&(dyn ErrorKind + Send + Sync)> {
        self.source.as_deref()
    }

    pub fn context(&self) -> &[String] {
        &self.context
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    /// 是否为严重错误
    pub fn is_critical(&self) -> bool {
        self.severity == ErrorSeverity::Critical
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}][错误码: {}] {}", self.severity, self.category, self.code, self.message)?;
        for ctx in &self.context {
            write!(f, "\n  上下文: {}", ctx)?;
        }
        if let Some(source) = &self.source {
            write!(f, "\n  由以下错误引起: {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorInfo {}

impl ErrorKind for ErrorInfo {
    fn error_code(&self) -> u32 {
        self.code
    }

    fn error_message(&self) -> String {
        self.message.clone()
    }

    fn source(&self) -> Option<&(dyn ErrorKind + Send + Sync)> {
        self.source.as_deref()
    }
}

/// 使用 `ErrorInfo` 的 Result 别名
pub type Result<T> = std::result::Result<T, ErrorInfo>;

impl From<std::io::Error> for ErrorInfo {
    fn from(err: std::io::Error) -> Self {
        let (code, category) = match err.kind() {
            std::io::ErrorKind::NotFound => (404, ErrorCategory::NotFound),
            std::io::ErrorKind::PermissionDenied => (403, ErrorCategory::Io),
            std::io::ErrorKind::AlreadyExists => (409, ErrorCategory::Conflict),
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                (400, ErrorCategory::Validation)
            }
            std::io::ErrorKind::TimedOut => (504, ErrorCategory::Timeout),
            _ => (500, ErrorCategory::Io),
        };

        ErrorInfo::new(code, err.to_string()).with_category(category)
    }
}
