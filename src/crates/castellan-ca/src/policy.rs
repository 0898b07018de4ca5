//! # 颁发策略
//!
//! 按颁发机构类型划分的小型策略对象，集中描述允许的请求类型、扩展、
//! 有效期与证书链处理。

use crate::config::CaConfig;
use crate::error::CaError;
use crate::signer::{ExtensionProfile, SshCertKind, SshCertificateSpec};
use crate::types::{Authority, AuthorityKind, RequestKind, ValidityWindow};

/// OpenSSH 用户证书的默认扩展
const SSH_USER_EXTENSIONS: [&str; 5] = [
    "permit-X11-forwarding",
    "permit-agent-forwarding",
    "permit-port-forwarding",
    "permit-pty",
    "permit-user-rc",
];

/// SSH 颁发机构策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshPolicy {
    pub validity_days: u32,
}

impl SshPolicy {
    pub fn allows(&self, kind: &RequestKind) -> bool {
        matches!(kind, RequestKind::UserSsh { .. } | RequestKind::HostSsh { .. })
    }

    /// 生成 SSH 证书签发参数
    pub fn certificate_spec(&self, kind: &RequestKind, serial: u64) -> Result<SshCertificateSpec, CaError> {
        let validity = ValidityWindow::starting_now(self.validity_days);
        match kind {
            RequestKind::UserSsh { user_name, root_requested } => {
                let mut principals = vec![user_name.clone()];
                if *root_requested && user_name != "root" {
                    principals.push("root".to_string());
                }
                Ok(SshCertificateSpec {
                    cert_kind: SshCertKind::User,
                    key_id: format!("user_{}", user_name),
                    principals,
                    serial,
                    validity,
                    extensions: SSH_USER_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
                })
            }
            RequestKind::HostSsh { host_name } => Ok(SshCertificateSpec {
                cert_kind: SshCertKind::Host,
                key_id: format!("host_{}", host_name.replace('.', "_")),
                principals: vec![host_name.clone()],
                serial,
                validity,
                extensions: Vec::new(),
            }),
            other => Err(CaError::UnsupportedOperation(format!("SSH 策略无法处理 {}", other.type_tag()))),
        }
    }
}

/// SSL 颁发机构策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslPolicy {
    pub certificate_validity_days: u32,
    pub intermediate_validity_days: u32,
}

impl SslPolicy {
    pub fn allows(&self, kind: &RequestKind) -> bool {
        matches!(
            kind,
            RequestKind::UserSsl { .. } | RequestKind::HostSsl { .. } | RequestKind::CaSsl { .. }
        )
    }

    /// 请求对应的扩展配置与有效期
    pub fn profile(&self, kind: &RequestKind) -> Result<(ExtensionProfile, ValidityWindow), CaError> {
        match kind {
            RequestKind::HostSsl { host_name } => Ok((
                ExtensionProfile::TlsServer { dns_names: vec![host_name.clone()] },
                ValidityWindow::starting_now(self.certificate_validity_days),
            )),
            RequestKind::UserSsl { .. } => Ok((
                ExtensionProfile::TlsClient,
                ValidityWindow::starting_now(self.certificate_validity_days),
            )),
            RequestKind::CaSsl { .. } => Ok((
                ExtensionProfile::IntermediateAuthority,
                ValidityWindow::starting_now(self.intermediate_validity_days),
            )),
            other => Err(CaError::UnsupportedOperation(format!("SSL 策略无法处理 {}", other.type_tag()))),
        }
    }

    /// 非根颁发机构在签发产物后附加自身证书（链）
    pub fn finish_artifact(&self, authority: &Authority, leaf_pem: String, authority_pem: &str) -> String {
        if !authority.chains_artifacts() {
            return leaf_pem;
        }
        format!("{}\n{}\n", leaf_pem.trim_end(), authority_pem.trim_end())
    }
}

/// 按颁发机构类型分派的策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityPolicy {
    Ssh(SshPolicy),
    Ssl(SslPolicy),
}

impl AuthorityPolicy {
    pub fn for_kind(kind: AuthorityKind, config: &CaConfig) -> Self {
        match kind {
            AuthorityKind::Ssh => AuthorityPolicy::Ssh(SshPolicy {
                validity_days: config.ssh_certificate_validity_days,
            }),
            AuthorityKind::Ssl => AuthorityPolicy::Ssl(SslPolicy {
                certificate_validity_days: config.certificate_validity_days,
                intermediate_validity_days: config.intermediate_ca_validity_days,
            }),
        }
    }

    pub fn allows(&self, kind: &RequestKind) -> bool {
        match self {
            AuthorityPolicy::Ssh(policy) => policy.allows(kind),
            AuthorityPolicy::Ssl(policy) => policy.allows(kind),
        }
    }
}

/// 校验请求主体名称：不得为空，不得含空白、路径分隔符或控制字符
pub fn validate_subject(kind: &RequestKind) -> Result<(), CaError> {
    let subject = kind.subject();
    if subject.is_empty() {
        return Err(CaError::InvalidRequest(format!("{} 请求缺少主体名称", kind.type_tag())));
    }
    if subject
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || c == '/' || c == '\\')
    {
        return Err(CaError::InvalidRequest(format!("非法的主体名称: {:?}", subject)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CaConfig {
        CaConfig::builder().build().expect("配置创建失败")
    }

    #[test]
    fn test_allowed_sets() {
        let ssh = AuthorityPolicy::for_kind(AuthorityKind::Ssh, &config());
        let ssl = AuthorityPolicy::for_kind(AuthorityKind::Ssl, &config());

        let user_ssh = RequestKind::UserSsh { user_name: "alice".to_string(), root_requested: false };
        let host_ssl = RequestKind::HostSsl { host_name: "example.org".to_string() };
        let ca_ssl = RequestKind::CaSsl { ca_name: "int".to_string() };

        assert!(ssh.allows(&user_ssh));
        assert!(!ssh.allows(&host_ssl));
        assert!(ssl.allows(&host_ssl));
        assert!(ssl.allows(&ca_ssl));
        assert!(!ssl.allows(&user_ssh));
    }

    #[test]
    fn test_ssh_user_spec() {
        let policy = SshPolicy { validity_days: 364 };
        let spec = policy
            .certificate_spec(&RequestKind::UserSsh { user_name: "alice".to_string(), root_requested: true }, 4)
            .expect("生成签发参数失败");
        assert_eq!(spec.key_id, "user_alice");
        assert_eq!(spec.principals, vec!["alice".to_string(), "root".to_string()]);
        assert_eq!(spec.serial, 4);
        assert_eq!(spec.validity.days(), 364);
        assert!(spec.extensions.contains(&"permit-pty".to_string()));
    }

    #[test]
    fn test_ssh_host_spec() {
        let policy = SshPolicy { validity_days: 364 };
        let spec = policy
            .certificate_spec(&RequestKind::HostSsh { host_name: "mail.example.org".to_string() }, 1)
            .expect("生成签发参数失败");
        assert_eq!(spec.cert_kind, SshCertKind::Host);
        assert_eq!(spec.key_id, "host_mail_example_org");
        assert!(spec.extensions.is_empty());
    }

    #[test]
    fn test_ssl_profiles_and_lifetimes() {
        let policy = SslPolicy { certificate_validity_days: 365, intermediate_validity_days: 1825 };

        let (profile, validity) = policy
            .profile(&RequestKind::CaSsl { ca_name: "int".to_string() })
            .expect("CA 请求应该有配置");
        assert_eq!(profile, ExtensionProfile::IntermediateAuthority);
        assert_eq!(validity.days(), 1825);

        let (profile, validity) = policy
            .profile(&RequestKind::HostSsl { host_name: "example.org".to_string() })
            .expect("主机请求应该有配置");
        assert_eq!(profile, ExtensionProfile::TlsServer { dns_names: vec!["example.org".to_string()] });
        assert_eq!(validity.days(), 365);
    }

    #[test]
    fn test_subject_validation() {
        assert!(validate_subject(&RequestKind::HostSsh { host_name: "db01".to_string() }).is_ok());
        assert!(validate_subject(&RequestKind::HostSsh { host_name: String::new() }).is_err());
        assert!(validate_subject(&RequestKind::UserSsl { user_name: "../etc".to_string() }).is_err());
        assert!(validate_subject(&RequestKind::UserSsl { user_name: "a b".to_string() }).is_err());
    }
}
