//! # 颁发机构配置
//!
//! [`CaConfig`] 在进程启动时构造一次，随后显式传入 [`crate::Orchestrator`]，
//! 生命周期与编排器实例一致。支持构建器创建，也可以从 TOML 反序列化后调用
//! [`CaConfig::validate`] 校验。

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 签名密钥算法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// ECDSA P-256 + SHA-256
    EcdsaP256,
    /// ECDSA P-384 + SHA-384
    EcdsaP384,
    /// Ed25519
    Ed25519,
}

impl KeyAlgorithm {
    /// 由算法名称与密钥长度解析
    pub fn from_parts(algorithm: &str, key_size: u32) -> Result<Self, ConfigError> {
        match (algorithm, key_size) {
            ("ECDSA", 256) => Ok(KeyAlgorithm::EcdsaP256),
            ("ECDSA", 384) => Ok(KeyAlgorithm::EcdsaP384),
            ("EdDSA", 255) => Ok(KeyAlgorithm::Ed25519),
            ("RSA", _) => Err(ConfigError::InvalidKey("不支持生成 RSA 密钥".to_string())),
            _ => Err(ConfigError::InvalidKey(format!("{}-{}", algorithm, key_size))),
        }
    }
}

/// 配置构建器
#[derive(Debug, Clone, Default)]
pub struct CaConfigBuilder {
    config: CaConfig,
}

impl CaConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以同一个根目录派生四个工作目录
    pub fn with_base_directory<P: AsRef<Path>>(mut self, base: P) -> Self {
        let base = base.as_ref();
        self.config.manager_directory = base.join("manager");
        self.config.requests_directory = base.join("requests");
        self.config.output_directory = base.join("output");
        self.config.results_directory = base.join("results");
        self
    }

    pub fn with_manager_directory<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.config.manager_directory = directory.as_ref().to_path_buf();
        self
    }

    pub fn with_requests_directory<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.config.requests_directory = directory.as_ref().to_path_buf();
        self
    }

    pub fn with_output_directory<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.config.output_directory = directory.as_ref().to_path_buf();
        self
    }

    pub fn with_results_directory<P: AsRef<Path>>(mut self, directory: P) -> Self {
        self.config.results_directory = directory.as_ref().to_path_buf();
        self
    }

    /// 设置密钥算法，例如 ("ECDSA", 256)、("EdDSA", 255)
    pub fn with_key_algorithm(mut self, algorithm: impl Into<String>, key_size: u32) -> Self {
        self.config.key_algorithm = algorithm.into();
        self.config.key_size = key_size;
        self
    }

    pub fn with_organization_name(mut self, name: impl Into<String>) -> Self {
        self.config.organization_name = name.into();
        self
    }

    pub fn with_country_code(mut self, code: impl Into<String>) -> Self {
        self.config.country_code = code.into();
        self
    }

    pub fn with_root_validity_days(mut self, days: u32) -> Self {
        self.config.root_ca_validity_days = days;
        self
    }

    pub fn with_intermediate_validity_days(mut self, days: u32) -> Self {
        self.config.intermediate_ca_validity_days = days;
        self
    }

    /// 终端实体 X.509 证书有效期
    pub fn with_certificate_validity_days(mut self, days: u32) -> Self {
        self.config.certificate_validity_days = days;
        self
    }

    pub fn with_ssh_validity_days(mut self, days: u32) -> Self {
        self.config.ssh_certificate_validity_days = days;
        self
    }

    /// CRL 有效时长（小时）
    pub fn with_crl_validity_hours(mut self, hours: u32) -> Self {
        self.config.crl_validity_hours = hours;
        self
    }

    pub fn with_result_poll_interval(mut self, interval: Duration) -> Self {
        self.config.result_poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_result_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.result_wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// 构建并验证配置
    pub fn build(self) -> Result<CaConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// 颁发机构配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaConfig {
    /// 颁发机构、证书记录与签发意图日志的根目录
    pub manager_directory: PathBuf,

    /// 待处理签发请求的投递目录
    pub requests_directory: PathBuf,

    /// 签发产物与 CRL 的输出目录
    pub output_directory: PathBuf,

    /// 按请求 ID 发布签发结果的目录
    pub results_directory: PathBuf,

    /// 密钥算法名称：ECDSA / EdDSA
    pub key_algorithm: String,

    /// 密钥长度（位）
    pub key_size: u32,

    pub organization_name: String,

    pub country_code: String,

    pub root_ca_validity_days: u32,

    pub intermediate_ca_validity_days: u32,

    pub certificate_validity_days: u32,

    pub ssh_certificate_validity_days: u32,

    pub crl_validity_hours: u32,

    pub result_poll_interval_ms: u64,

    /// 提交方等待结果的上限（毫秒）
    pub result_wait_timeout_ms: u64,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            manager_directory: PathBuf::from("./castellan/manager"),
            requests_directory: PathBuf::from("./castellan/requests"),
            output_directory: PathBuf::from("./castellan/output"),
            results_directory: PathBuf::from("./castellan/results"),
            key_algorithm: "ECDSA".to_string(),
            key_size: 256,
            organization_name: "Castellan".to_string(),
            country_code: "CN".to_string(),
            root_ca_validity_days: 3650,
            intermediate_ca_validity_days: 1825,
            certificate_validity_days: 365,
            ssh_certificate_validity_days: 364,
            crl_validity_hours: 24,
            result_poll_interval_ms: 1000,
            result_wait_timeout_ms: 300_000,
        }
    }
}

impl CaConfig {
    pub fn builder() -> CaConfigBuilder {
        CaConfigBuilder::new()
    }

    /// 校验配置参数
    pub fn validate(&self) -> Result<(), ConfigError> {
        KeyAlgorithm::from_parts(&self.key_algorithm, self.key_size)?;

        for days in [
            self.root_ca_validity_days,
            self.intermediate_ca_validity_days,
            self.certificate_validity_days,
            self.ssh_certificate_validity_days,
        ] {
            if !(1..=3650).contains(&days) {
                return Err(ConfigError::InvalidValidityPeriod(days));
            }
        }

        if self.intermediate_ca_validity_days > self.root_ca_validity_days {
            return Err(ConfigError::ValidationFailed("中间颁发机构有效期不能超过根颁发机构".to_string()));
        }

        if !(1..=8760).contains(&self.crl_validity_hours) {
            return Err(ConfigError::ValidationFailed(format!(
                "CRL 有效时长必须在 1-8760 小时之间: {}",
                self.crl_validity_hours
            )));
        }

        if self.country_code.len() != 2 || !self.country_code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::ValidationFailed("国家代码必须是2个字母".to_string()));
        }

        for (label, path) in [
            ("manager_directory", &self.manager_directory),
            ("requests_directory", &self.requests_directory),
            ("output_directory", &self.output_directory),
            ("results_directory", &self.results_directory),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidStoragePath(format!("{} 不能为空", label)));
            }
        }

        if self.result_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed("结果轮询间隔必须大于0".to_string()));
        }

        Ok(())
    }

    /// 已验证的密钥算法
    pub fn signing_algorithm(&self) -> Result<KeyAlgorithm, ConfigError> {
        KeyAlgorithm::from_parts(&self.key_algorithm, self.key_size)
    }

    pub fn crl_validity(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.crl_validity_hours))
    }

    pub fn result_poll_interval(&self) -> Duration {
        Duration::from_millis(self.result_poll_interval_ms)
    }

    pub fn result_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.result_wait_timeout_ms)
    }

    /// 签发意图日志目录
    pub fn journal_directory(&self) -> PathBuf {
        self.manager_directory.join("journal")
    }

    /// 创建全部工作目录
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for dir in [
            &self.manager_directory,
            &self.requests_directory,
            &self.output_directory,
            &self.results_directory,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| {
                ConfigError::InvalidStoragePath(format!("创建目录 {} 失败: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// 生成配置摘要
    pub fn summary(&self) -> String {
        format!(
            "颁发机构配置摘要:\n\
            - 算法: {}-{}\n\
            - 有效期: 根 {} 天 / 中间 {} 天 / 证书 {} 天 / SSH {} 天\n\
            - CRL 有效时长: {} 小时\n\
            - 管理目录: {}\n\
            - 请求目录: {}",
            self.key_algorithm,
            self.key_size,
            self.root_ca_validity_days,
            self.intermediate_ca_validity_days,
            self.certificate_validity_days,
            self.ssh_certificate_validity_days,
            self.crl_validity_hours,
            self.manager_directory.display(),
            self.requests_directory.display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CaConfig::builder().build().expect("默认配置应该有效");
        assert_eq!(config.root_ca_validity_days, 3650);
        assert_eq!(config.crl_validity(), chrono::Duration::days(1));
        assert_eq!(config.signing_algorithm(), Ok(KeyAlgorithm::EcdsaP256));
    }

    #[test]
    fn test_base_directory_layout() {
        let config = CaConfig::builder()
            .with_base_directory("/srv/ca")
            .build()
            .expect("配置创建失败");
        assert_eq!(config.requests_directory, PathBuf::from("/srv/ca/requests"));
        assert_eq!(config.journal_directory(), PathBuf::from("/srv/ca/manager/journal"));
    }

    #[test]
    fn test_invalid_key_parameters() {
        let result = CaConfig::builder().with_key_algorithm("ECDSA", 1024).build();
        assert!(matches!(result, Err(ConfigError::InvalidKey(_))));

        let result = CaConfig::builder().with_key_algorithm("RSA", 4096).build();
        assert!(matches!(result, Err(ConfigError::InvalidKey(_))), "RSA 生成不受支持");

        let config = CaConfig::builder()
            .with_key_algorithm("EdDSA", 255)
            .build()
            .expect("Ed25519 应该有效");
        assert_eq!(config.signing_algorithm(), Ok(KeyAlgorithm::Ed25519));
    }

    #[test]
    fn test_invalid_validity() {
        let result = CaConfig::builder().with_certificate_validity_days(0).build();
        assert_eq!(result, Err(ConfigError::InvalidValidityPeriod(0)));

        let result = CaConfig::builder()
            .with_root_validity_days(100)
            .with_intermediate_validity_days(200)
            .build();
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));

        let result = CaConfig::builder().with_crl_validity_hours(0).build();
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_invalid_country_and_poll_interval() {
        let result = CaConfig::builder().with_country_code("CHN").build();
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));

        let result = CaConfig::builder()
            .with_result_poll_interval(Duration::from_millis(0))
            .build();
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: CaConfig = serde_json::from_str(r#"{"crl_validity_hours": 48}"#)
            .expect("部分配置应该可以反序列化");
        assert_eq!(config.crl_validity_hours, 48);
        assert_eq!(config.certificate_validity_days, 365);
        assert!(config.validate().is_ok());
    }
}
