//! # 签名能力
//!
//! [`Signer`] 是生命周期引擎唯一的密码学出口：生成密钥、构建 CSR、自签名、
//! 签署 CSR、构建 CRL 以及签署 SSH 公钥。调用方把每一次签名都视为不可撤销、
//! 幂等性未知的外部副作用。
//!
//! [`RcgenSigner`] 使用 rcgen 处理 X.509，使用 ssh-key 处理 OpenSSH 证书。

use crate::config::KeyAlgorithm;
use crate::error::CaError;
use crate::types::{RevokedEntry, ValidityWindow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams,
    CertificateSigningRequestParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyIdMethod, KeyPair, KeyUsagePurpose, RevokedCertParams, SanType, SerialNumber,
};
use ssh_key::certificate::{Builder as SshCertificateBuilder, CertType};
use ssh_key::rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey, PublicKey};
use std::fmt;
use tracing::debug;

/// 密钥材料
///
/// X.509 密钥为 PKCS#8 私钥与 SPKI 公钥 PEM，SSH 密钥为 OpenSSH 格式。
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub private_pem: String,
    pub public_pem: String,
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("private_pem", &"<已隐藏>")
            .field("public_pem", &self.public_pem)
            .finish()
    }
}

/// 证书主题
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectName {
    pub common_name: String,
    pub organization: String,
    pub country: String,
}

impl SubjectName {
    fn to_distinguished_name(&self) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CountryName, self.country.as_str());
        dn.push(DnType::OrganizationName, self.organization.as_str());
        dn.push(DnType::CommonName, self.common_name.as_str());
        dn
    }
}

/// X.509 扩展配置
///
/// 决定基本约束、密钥用途、扩展密钥用途与 SAN。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionProfile {
    RootAuthority,
    IntermediateAuthority,
    TlsServer { dns_names: Vec<String> },
    TlsClient,
}

/// SSH 证书类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SshCertKind {
    User,
    Host,
}

/// SSH 证书签发参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshCertificateSpec {
    pub cert_kind: SshCertKind,
    pub key_id: String,
    pub principals: Vec<String>,
    pub serial: u64,
    pub validity: ValidityWindow,
    /// 无数据的扩展名，例如 `permit-pty`
    pub extensions: Vec<String>,
}

/// 签名能力
#[async_trait]
pub trait Signer: Send + Sync {
    /// 生成 X.509 密钥对
    async fn generate_keypair(&self, algorithm: KeyAlgorithm) -> Result<KeyMaterial, CaError>;

    async fn create_self_signed(
        &self,
        private_pem: &str,
        subject: &SubjectName,
        validity: &ValidityWindow,
        profile: &ExtensionProfile,
    ) -> Result<String, CaError>;

    async fn create_csr(
        &self,
        private_pem: &str,
        subject: &SubjectName,
        profile: &ExtensionProfile,
    ) -> Result<String, CaError>;

    /// 以颁发者身份签署 CSR，返回证书 PEM
    ///
    /// `issuer_cert_pem` 可以是证书链，只使用第一个证书。
    async fn sign_csr(
        &self,
        csr_pem: &str,
        issuer_cert_pem: &str,
        issuer_private_pem: &str,
        serial: u64,
        validity: &ValidityWindow,
        profile: &ExtensionProfile,
    ) -> Result<String, CaError>;

    async fn build_crl(
        &self,
        issuer_cert_pem: &str,
        issuer_private_pem: &str,
        revoked: &[RevokedEntry],
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    ) -> Result<String, CaError>;

    /// 生成 Ed25519 SSH 密钥对
    async fn generate_ssh_keypair(&self) -> Result<KeyMaterial, CaError>;

    /// 签署 SSH 公钥，返回 OpenSSH 证书行
    async fn sign_ssh_key(
        &self,
        ca_private_key: &str,
        public_key: &str,
        spec: &SshCertificateSpec,
    ) -> Result<String, CaError>;
}

/// 基于 rcgen 与 ssh-key 的签名实现
#[derive(Debug, Clone, Copy, Default)]
pub struct RcgenSigner;

impl RcgenSigner {
    pub fn new() -> Self {
        Self
    }
}

fn signing_failure<E: fmt::Display>(context: &'static str) -> impl FnOnce(E) -> CaError {
    move |e| CaError::SigningFailure(format!("{}: {}", context, e))
}

fn to_offset(instant: DateTime<Utc>) -> Result<time::OffsetDateTime, CaError> {
    time::OffsetDateTime::from_unix_timestamp(instant.timestamp())
        .map_err(signing_failure("时间超出范围"))
}

fn load_key(private_pem: &str) -> Result<KeyPair, CaError> {
    KeyPair::from_pem(private_pem).map_err(signing_failure("解析私钥失败"))
}

fn apply_validity(params: &mut CertificateParams, validity: &ValidityWindow) -> Result<(), CaError> {
    params.not_before = to_offset(validity.not_before)?;
    params.not_after = to_offset(validity.not_after)?;
    Ok(())
}

fn apply_profile(params: &mut CertificateParams, profile: &ExtensionProfile) -> Result<(), CaError> {
    params.key_usages.clear();
    params.extended_key_usages.clear();

    match profile {
        ExtensionProfile::RootAuthority => {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
            params.key_usages.push(KeyUsagePurpose::DigitalSignature);
            params.key_usages.push(KeyUsagePurpose::KeyCertSign);
            params.key_usages.push(KeyUsagePurpose::CrlSign);
        }
        ExtensionProfile::IntermediateAuthority => {
            // 中间颁发机构只签发终端证书
            params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
            params.key_usages.push(KeyUsagePurpose::KeyCertSign);
            params.key_usages.push(KeyUsagePurpose::CrlSign);
        }
        ExtensionProfile::TlsServer { dns_names } => {
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages.push(KeyUsagePurpose::DigitalSignature);
            params.key_usages.push(KeyUsagePurpose::KeyEncipherment);
            params.extended_key_usages.push(ExtendedKeyUsagePurpose::ServerAuth);
            params.subject_alt_names.clear();
            for name in dns_names {
                params.subject_alt_names.push(SanType::DnsName(
                    name.clone()
                        .try_into()
                        .map_err(signing_failure("DNS 名称转换失败"))?,
                ));
            }
        }
        ExtensionProfile::TlsClient => {
            params.is_ca = IsCa::ExplicitNoCa;
            params.key_usages.push(KeyUsagePurpose::DigitalSignature);
            params.extended_key_usages.push(ExtendedKeyUsagePurpose::ClientAuth);
        }
    }
    Ok(())
}

#[async_trait]
impl Signer for RcgenSigner {
    async fn generate_keypair(&self, algorithm: KeyAlgorithm) -> Result<KeyMaterial, CaError> {
        let alg = match algorithm {
            KeyAlgorithm::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
            KeyAlgorithm::EcdsaP384 => &rcgen::PKCS_ECDSA_P384_SHA384,
            KeyAlgorithm::Ed25519 => &rcgen::PKCS_ED25519,
        };
        let key = KeyPair::generate_for(alg).map_err(signing_failure("生成密钥对失败"))?;
        debug!("生成 {:?} 密钥对", algorithm);
        Ok(KeyMaterial {
            private_pem: key.serialize_pem(),
            public_pem: key.public_key_pem(),
        })
    }

    async fn create_self_signed(
        &self,
        private_pem: &str,
        subject: &SubjectName,
        validity: &ValidityWindow,
        profile: &ExtensionProfile,
    ) -> Result<String, CaError> {
        let key = load_key(private_pem)?;
        let mut params = CertificateParams::default();
        params.distinguished_name = subject.to_distinguished_name();
        apply_validity(&mut params, validity)?;
        apply_profile(&mut params, profile)?;

        let cert = params.self_signed(&key).map_err(signing_failure("创建自签名证书失败"))?;
        Ok(cert.pem())
    }

    async fn create_csr(
        &self,
        private_pem: &str,
        subject: &SubjectName,
        profile: &ExtensionProfile,
    ) -> Result<String, CaError> {
        let key = load_key(private_pem)?;
        let mut params = CertificateParams::default();
        params.distinguished_name = subject.to_distinguished_name();
        // CSR 只携带 SAN，其余扩展由颁发者在签署时决定
        if let ExtensionProfile::TlsServer { .. } = profile {
            apply_profile(&mut params, profile)?;
            params.is_ca = IsCa::NoCa;
            params.key_usages.clear();
            params.extended_key_usages.clear();
        }

        let csr = params.serialize_request(&key).map_err(signing_failure("创建 CSR 失败"))?;
        csr.pem().map_err(signing_failure("编码 CSR 失败"))
    }

    async fn sign_csr(
        &self,
        csr_pem: &str,
        issuer_cert_pem: &str,
        issuer_private_pem: &str,
        serial: u64,
        validity: &ValidityWindow,
        profile: &ExtensionProfile,
    ) -> Result<String, CaError> {
        let issuer_key = load_key(issuer_private_pem)?;
        let issuer = Issuer::from_ca_cert_pem(issuer_cert_pem, issuer_key)
            .map_err(signing_failure("解析颁发者证书失败"))?;

        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem)
            .map_err(signing_failure("解析 CSR 失败"))?;
        csr.params.serial_number = Some(SerialNumber::from(serial));
        csr.params.use_authority_key_identifier_extension = true;
        apply_validity(&mut csr.params, validity)?;
        apply_profile(&mut csr.params, profile)?;

        let cert = csr.signed_by(&issuer).map_err(signing_failure("签署 CSR 失败"))?;
        debug!("签署 CSR，序列号 {}", serial);
        Ok(cert.pem())
    }

    async fn build_crl(
        &self,
        issuer_cert_pem: &str,
        issuer_private_pem: &str,
        revoked: &[RevokedEntry],
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    ) -> Result<String, CaError> {
        let issuer_key = load_key(issuer_private_pem)?;
        let issuer = Issuer::from_ca_cert_pem(issuer_cert_pem, issuer_key)
            .map_err(signing_failure("解析颁发者证书失败"))?;

        let revoked_certs = revoked
            .iter()
            .map(|entry| {
                Ok(RevokedCertParams {
                    serial_number: SerialNumber::from(entry.serial_number),
                    revocation_time: to_offset(entry.revoked_at)?,
                    reason_code: None,
                    invalidity_date: None,
                })
            })
            .collect::<Result<Vec<_>, CaError>>()?;

        let params = CertificateRevocationListParams {
            this_update: to_offset(this_update)?,
            next_update: to_offset(next_update)?,
            // CRL 编号取生成时间的微秒数，同一秒内重建也不会重复
            crl_number: SerialNumber::from(this_update.timestamp_micros().max(0) as u64),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        };

        let crl = params.signed_by(&issuer).map_err(signing_failure("签署 CRL 失败"))?;
        crl.pem().map_err(signing_failure("编码 CRL 失败"))
    }

    async fn generate_ssh_keypair(&self) -> Result<KeyMaterial, CaError> {
        let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
            .map_err(signing_failure("生成 SSH 密钥失败"))?;
        let private_pem = key
            .to_openssh(LineEnding::LF)
            .map_err(signing_failure("编码 SSH 私钥失败"))?;
        let public_pem = key
            .public_key()
            .to_openssh()
            .map_err(signing_failure("编码 SSH 公钥失败"))?;
        Ok(KeyMaterial {
            private_pem: private_pem.as_str().to_owned(),
            public_pem,
        })
    }

    async fn sign_ssh_key(
        &self,
        ca_private_key: &str,
        public_key: &str,
        spec: &SshCertificateSpec,
    ) -> Result<String, CaError> {
        let ca_key = PrivateKey::from_openssh(ca_private_key).map_err(signing_failure("解析 SSH CA 私钥失败"))?;
        let subject_key = PublicKey::from_openssh(public_key.trim()).map_err(signing_failure("解析 SSH 公钥失败"))?;

        let valid_after = spec.validity.not_before.timestamp().max(0) as u64;
        let valid_before = spec.validity.not_after.timestamp().max(0) as u64;

        let mut builder = SshCertificateBuilder::new_with_random_nonce(
            &mut OsRng,
            subject_key.key_data().clone(),
            valid_after,
            valid_before,
        )
        .map_err(signing_failure("创建 SSH 证书失败"))?;

        let cert_type = match spec.cert_kind {
            SshCertKind::User => CertType::User,
            SshCertKind::Host => CertType::Host,
        };
        builder.serial(spec.serial).map_err(signing_failure("设置序列号失败"))?;
        builder.cert_type(cert_type).map_err(signing_failure("设置证书类型失败"))?;
        builder.key_id(spec.key_id.as_str()).map_err(signing_failure("设置密钥标识失败"))?;
        for principal in &spec.principals {
            builder
                .valid_principal(principal.as_str())
                .map_err(signing_failure("设置主体失败"))?;
        }
        for extension in &spec.extensions {
            builder
                .extension(extension.as_str(), "")
                .map_err(signing_failure("设置扩展失败"))?;
        }

        let cert = builder.sign(&ca_key).map_err(signing_failure("签署 SSH 证书失败"))?;
        debug!("签署 SSH 证书，序列号 {}", spec.serial);
        cert.to_openssh().map_err(signing_failure("编码 SSH 证书失败"))
    }
}

/// 检查证书（链中的第一个）的主体公钥是否就是给定的 SPKI 公钥
pub fn certificate_binds_key(certificate_pem: &str, public_key_pem: &str) -> Result<bool, CaError> {
    let certificate = pem::parse(certificate_pem)
        .map_err(|e| CaError::InvalidRequest(format!("无法解析证书: {}", e)))?;
    if certificate.tag() != "CERTIFICATE" {
        return Err(CaError::InvalidRequest(format!("期望 CERTIFICATE，实际为 {}", certificate.tag())));
    }
    let public_key = pem::parse(public_key_pem)
        .map_err(|e| CaError::Storage(format!("无法解析公钥: {}", e)))?;

    let (_, parsed) = x509_parser::parse_x509_certificate(certificate.contents())
        .map_err(|e| CaError::InvalidRequest(format!("证书 DER 无效: {}", e)))?;
    Ok(parsed.tbs_certificate.subject_pki.raw == public_key.contents())
}
