//! # Error 派生宏集成测试

use error::{Error, ErrorInfo, ErrorKind};

/// 未标注错误码时按声明顺序编号
#[derive(Debug, Error)]
#[allow(dead_code)]
enum SpoolError {
    #[error("请求队列不可用")]
    Unavailable,

    #[error("请求不存在: {0}")]
    Missing(String),

    #[error("请求 {request} 与颁发机构 {authority} 不兼容")]
    Incompatible { authority: String, request: String },
}

/// 显式错误码
#[derive(Debug, Error)]
#[allow(dead_code)]
enum SerialError {
    #[error("颁发机构 {0} 的序列号 {1} 已被占用")]
    #[code(7008)]
    Taken(String, u64),

    #[error("序列号溢出")]
    #[code(7099)]
    Overflow,

    #[error("记录损坏")]
    Corrupted { path: String },
}

#[test]
fn test_sequential_codes() {
    assert_eq!(SpoolError::Unavailable.error_code(), 1);
    assert_eq!(SpoolError::Missing("r".to_string()).error_code(), 2);
    let err = SpoolError::Incompatible {
        authority: "ssh-ca".to_string(),
        request: "ssl_host".to_string(),
    };
    assert_eq!(err.error_code(), 3);
}

#[test]
fn test_named_fields_follow_message_order() {
    let err = SpoolError::Incompatible {
        authority: "ssh-ca".to_string(),
        request: "ssl_host".to_string(),
    };
    assert_eq!(format!("{}", err), "请求 ssl_host 与颁发机构 ssh-ca 不兼容");
    assert_eq!(err.error_message(), format!("{}", err));
}

#[test]
fn test_explicit_codes_and_positional_fields() {
    let err = SerialError::Taken("int".to_string(), 7);
    assert_eq!(format!("{}", err), "颁发机构 int 的序列号 7 已被占用");
    assert_eq!(err.error_code(), 7008);

    assert_eq!(SerialError::Overflow.error_code(), 7099);
    // 未标注错误码的变体沿用声明位置
    let corrupted = SerialError::Corrupted { path: "/tmp/x".to_string() };
    assert_eq!(corrupted.error_code(), 3);
    assert_eq!(format!("{}", corrupted), "记录损坏");
}

#[test]
fn test_wrapped_in_error_info() {
    let source = SpoolError::Missing("req-9".to_string());
    let info = ErrorInfo::with_source(7100, "签发失败".to_string(), source);

    let inner = info.source().expect("应该保留源错误");
    assert_eq!(inner.error_code(), 2);
    assert_eq!(inner.error_message(), "请求不存在: req-9");
}

fn load_authority(id: &str) -> error::Result<String> {
    if id.is_empty() {
        return Err(ErrorInfo::from_kind(&SpoolError::Missing(id.to_string())));
    }
    Ok(format!("authority:{}", id))
}

#[test]
fn test_result_alias() {
    assert_eq!(load_authority("root").expect("应该成功"), "authority:root");
    let err = load_authority("").expect_err("空标识应该失败");
    assert_eq!(err.code(), 2);
}
