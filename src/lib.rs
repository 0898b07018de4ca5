//! # Castellan 证书颁发服务
//!
//! 为运维人员签发、跟踪和吊销 SSH 证书与 X.509 证书的请求服务。
//!
//! ## 模块架构
//!
//! ```text
//! castellan/
//! ├── src/
//! │   ├── main.rs         # 请求服务入口
//! │   ├── lib.rs          # 库入口
//! │   ├── app.rs          # 应用程序组装
//! │   └── crates/
//! │       ├── error/          # 错误处理框架
//! │       ├── error-derive/   # 错误派生宏
//! │       └── castellan-ca/   # 颁发机构生命周期引擎
//! ```
//!
//! ## 使用示例
//!
//! ```no_run
//! use castellan::app::{AppConfig, CastellanApp};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = CastellanApp::new(AppConfig::default()).await?;
//!
//!     let message = r#"{"type":"get_certificate","requestID":"2b1c7a90"}"#;
//!     let response = app.handle_message(message, &CancellationToken::new()).await?;
//!     println!("{}", response);
//!     Ok(())
//! }
//! ```

pub mod app;

use error::ErrorInfo;

// 重新导出颁发机构引擎
pub use castellan_ca::{
    Authority, AuthorityKind, AuthorityState, CaConfig, CaError, Certificate, Crl, Orchestrator, RcgenSigner,
    RecoveryOutcome, RequestKind, Signer, SigningProposal, SigningRequest, SubmissionEnvelope,
};

/// 应用程序结果类型
pub type AppResult<T> = std::result::Result<T, ErrorInfo>;
