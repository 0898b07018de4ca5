//! # Castellan 颁发机构生命周期引擎
//!
//! 为操作员签发、跟踪和吊销 SSH 用户/主机证书与 X.509 证书，支持多级 SSL 颁发机构。
//!
//! ## 架构设计
//!
//! - **签名层**: [`Signer`] 能力及基于 rcgen / ssh-key 的 [`RcgenSigner`]
//! - **数据层**: 颁发机构注册表、请求队列、证书存储、签发意图日志
//! - **策略层**: 按颁发机构类型划分的扩展、有效期与证书链规则
//! - **编排层**: [`Orchestrator`] 把序列号分配、签名、证书持久化与请求消费组合为一次原子签发
//! - **通道层**: 请求提交协议与签发结果发布
//!
//! ## 核心保证
//!
//! - 同一颁发机构的序列号从 1 开始逐一递增，不重复
//! - 每个请求最多被签发一次，签发或丢弃后留下墓碑
//! - 吊销单向不可逆，CRL 每次从当前状态重建
//! - 非根 SSL 颁发机构在存入上级签署的证书之前不能签发
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use castellan_ca::{AuthorityKind, CaConfig, Orchestrator, RcgenSigner};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), castellan_ca::CaError> {
//! let config = CaConfig::builder()
//!     .with_base_directory("/var/lib/castellan")
//!     .with_organization_name("Example")
//!     .build()?;
//!
//! let orchestrator = Orchestrator::new(config, Arc::new(RcgenSigner::new())).await?;
//! orchestrator.create_authority("hosts", "Host CA", AuthorityKind::Ssh, false).await?;
//!
//! // 对队列中的请求签发
//! let certificate = orchestrator.sign_request("hosts", "2b1c7a90-8f0e-4c4b-9f38-0a7d0c6a9e11").await?;
//! println!("序列号: {}", certificate.serial_number);
//! # Ok(())
//! # }
//! ```

use ::error::ErrorInfo;

pub mod config;
pub mod engine;
pub mod error;
pub mod journal;
pub mod orchestrator;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod results;
pub mod revocation;
pub mod signer;
pub mod storage;
pub mod store;
pub mod submission;
pub mod types;

pub use config::{CaConfig, CaConfigBuilder, KeyAlgorithm};
pub use engine::{IssuedArtifact, SigningEngine};
pub use error::{CaError, ConfigError};
pub use orchestrator::{Orchestrator, RecoveryOutcome, SigningProposal};
pub use policy::{AuthorityPolicy, SshPolicy, SslPolicy};
pub use queue::RequestQueue;
pub use registry::{AuthorityRegistry, CreatedAuthority, SerialReservation};
pub use results::ResultsChannel;
pub use signer::{ExtensionProfile, KeyMaterial, RcgenSigner, Signer, SshCertKind, SshCertificateSpec, SubjectName};
pub use store::CertificateStore;
pub use submission::{FailureReason, SubmissionChannel, SubmissionEnvelope};
pub use types::{
    Authority, AuthorityKind, AuthorityRef, AuthorityState, Certificate, Crl, RequestKind, RevokedEntry,
    SigningRequest, ValidityWindow, INITIAL_SERIAL,
};

/// 对外统一结果类型
pub type CaResult<T> = std::result::Result<T, ErrorInfo>;
