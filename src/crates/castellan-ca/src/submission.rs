//! # 请求提交通道
//!
//! 外部提交方使用的 JSON 信封协议：
//!
//! - `{"type":"sign_request","requestID":..,"request":{..}}` 投递请求
//! - `{"type":"get_certificate","requestID":..}` 等待并取回签发结果
//!
//! 每条消息都得到 `{"failed":..,"status":..}` 形式的应答，失败时附带 `reason`。

use crate::error::CaError;
use crate::queue::RequestQueue;
use crate::results::ResultsChannel;
use crate::types::{RequestKind, SigningRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// 提交信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionEnvelope {
    SignRequest {
        #[serde(rename = "requestID")]
        request_id: String,
        request: SigningRequest,
    },
    GetCertificate {
        #[serde(rename = "requestID")]
        request_id: String,
    },
}

impl SubmissionEnvelope {
    /// 以新生成的 UUID 作为请求 ID 构造投递信封
    pub fn sign_request(kind: RequestKind, key_data: impl Into<String>) -> Self {
        let request_id = Uuid::new_v4().to_string();
        SubmissionEnvelope::SignRequest {
            request: SigningRequest::new(request_id.clone(), kind, key_data),
            request_id,
        }
    }

    pub fn get_certificate(request_id: impl Into<String>) -> Self {
        SubmissionEnvelope::GetCertificate { request_id: request_id.into() }
    }

    pub fn request_id(&self) -> &str {
        match self {
            SubmissionEnvelope::SignRequest { request_id, .. } => request_id,
            SubmissionEnvelope::GetCertificate { request_id } => request_id,
        }
    }
}

/// 应答中的失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    BadJson,
    UnknownType,
    MissingRequestId,
    InvalidRequest,
    DuplicateRequest,
    Timeout,
    Cancelled,
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::BadJson => "bad_json",
            FailureReason::UnknownType => "unknown_type",
            FailureReason::MissingRequestId => "missing_request_id",
            FailureReason::InvalidRequest => "invalid_request",
            FailureReason::DuplicateRequest => "duplicate_request",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal => "internal",
        }
    }
}

impl From<&CaError> for FailureReason {
    fn from(error: &CaError) -> Self {
        match error {
            CaError::InvalidRequest(_) => FailureReason::InvalidRequest,
            CaError::DuplicateRequest(_) => FailureReason::DuplicateRequest,
            CaError::ResultTimeout(_) => FailureReason::Timeout,
            CaError::Cancelled(_) => FailureReason::Cancelled,
            _ => FailureReason::Internal,
        }
    }
}

fn failure(reason: FailureReason) -> Value {
    json!({ "failed": true, "status": "error", "reason": reason.as_str() })
}

/// 提交通道
#[derive(Debug, Clone)]
pub struct SubmissionChannel {
    queue: RequestQueue,
    results: ResultsChannel,
    wait_timeout: Duration,
}

impl SubmissionChannel {
    pub fn new(queue: RequestQueue, results: ResultsChannel, wait_timeout: Duration) -> Self {
        Self { queue, results, wait_timeout }
    }

    /// 处理一条原始 JSON 消息
    pub async fn handle(&self, message: &str, cancel: &CancellationToken) -> Value {
        let raw: Value = match serde_json::from_str(message) {
            Ok(value) => value,
            Err(e) => {
                warn!("无法解析提交消息: {}", e);
                return failure(FailureReason::BadJson);
            }
        };

        let Some(message_type) = raw.get("type").and_then(Value::as_str) else {
            return failure(FailureReason::UnknownType);
        };
        if !matches!(message_type, "sign_request" | "get_certificate") {
            warn!("未知的消息类型: {}", message_type);
            return failure(FailureReason::UnknownType);
        }
        if raw.get("requestID").and_then(Value::as_str).is_none_or(str::is_empty) {
            return failure(FailureReason::MissingRequestId);
        }

        match serde_json::from_value::<SubmissionEnvelope>(raw) {
            Ok(envelope) => self.dispatch(envelope, cancel).await,
            Err(e) => {
                warn!("提交消息内容非法: {}", e);
                failure(FailureReason::InvalidRequest)
            }
        }
    }

    /// 处理已解析的信封
    pub async fn dispatch(&self, envelope: SubmissionEnvelope, cancel: &CancellationToken) -> Value {
        match envelope {
            SubmissionEnvelope::SignRequest { request_id, mut request } => {
                request.request_id = request_id.clone();
                match self.queue.enqueue(&request) {
                    Ok(_) => {
                        info!("收到签发请求 {}，接收方 {}", request_id, request.kind.receiver());
                        json!({ "failed": false, "status": "ok", "requestID": request_id })
                    }
                    Err(e) => {
                        warn!("拒绝签发请求 {}: {}", request_id, e);
                        failure(FailureReason::from(&e))
                    }
                }
            }
            SubmissionEnvelope::GetCertificate { request_id } => {
                match self.results.await_result(&request_id, self.wait_timeout, cancel).await {
                    Ok(certificate) => json!({
                        "failed": false,
                        "status": "ok",
                        "requestID": request_id,
                        "certificate": certificate,
                    }),
                    Err(e) => {
                        warn!("取回 {} 的证书失败: {}", request_id, e);
                        failure(FailureReason::from(&e))
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn channel(temp_dir: &TempDir, wait: Duration) -> SubmissionChannel {
        let queue = RequestQueue::open(temp_dir.path().join("requests")).expect("打开队列失败");
        let results =
            ResultsChannel::open(temp_dir.path().join("results"), Duration::from_millis(10)).expect("打开通道失败");
        SubmissionChannel::new(queue, results, wait)
    }

    #[tokio::test]
    async fn test_sign_request_is_spooled() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let channel = channel(&temp_dir, Duration::from_millis(50));
        let cancel = CancellationToken::new();

        let message = r#"{"type":"sign_request","requestID":"r1","request":{"keyType":"ssh_host","hostName":"db01","keyData":"ssh-ed25519 AAAA"}}"#;
        let response = channel.handle(message, &cancel).await;
        assert_eq!(response, json!({ "failed": false, "status": "ok", "requestID": "r1" }));
        assert!(temp_dir.path().join("requests").join("r1").exists(), "请求应该写入队列目录");

        let response = channel.handle(message, &cancel).await;
        assert_eq!(response["reason"], "duplicate_request");
    }

    #[tokio::test]
    async fn test_error_reasons() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let channel = channel(&temp_dir, Duration::from_millis(30));
        let cancel = CancellationToken::new();

        let cases = [
            ("not json", "bad_json"),
            (r#"{"type":"ping","requestID":"x"}"#, "unknown_type"),
            (r#"{"requestID":"x"}"#, "unknown_type"),
            (r#"{"type":"get_certificate"}"#, "missing_request_id"),
            (r#"{"type":"sign_request","requestID":"x","request":{"keyType":"pgp"}}"#, "invalid_request"),
            (
                r#"{"type":"sign_request","requestID":"../x","request":{"keyType":"ssh_host","hostName":"h","keyData":"k"}}"#,
                "invalid_request",
            ),
            (r#"{"type":"get_certificate","requestID":"nobody"}"#, "timeout"),
        ];
        for (message, reason) in cases {
            let response = channel.handle(message, &cancel).await;
            assert_eq!(response["failed"], true, "消息 {} 应该失败", message);
            assert_eq!(response["reason"], reason, "消息 {} 的失败原因不符", message);
        }
    }

    #[tokio::test]
    async fn test_get_certificate_returns_published_result() {
        let temp_dir = TempDir::new().expect("无法创建临时目录");
        let channel = channel(&temp_dir, Duration::from_secs(1));
        channel.results.publish("r9", "CERT").expect("发布失败");

        let response = channel
            .dispatch(SubmissionEnvelope::get_certificate("r9"), &CancellationToken::new())
            .await;
        assert_eq!(response["certificate"], "CERT");
        assert_eq!(response["requestID"], "r9");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = channel.dispatch(SubmissionEnvelope::get_certificate("none"), &cancel).await;
        assert_eq!(response["reason"], "cancelled");
    }

    #[test]
    fn test_helper_generates_uuid_and_wire_shape() {
        let envelope = SubmissionEnvelope::sign_request(
            RequestKind::UserSsh { user_name: "alice".to_string(), root_requested: false },
            "ssh-ed25519 AAAA",
        );
        assert!(Uuid::parse_str(envelope.request_id()).is_ok(), "请求 ID 应该是 UUID");

        let value = serde_json::to_value(&envelope).expect("序列化失败");
        assert_eq!(value["type"], "sign_request");
        assert_eq!(value["request"]["keyType"], "ssh_user");
        assert_eq!(value["requestID"], envelope.request_id());
    }
}
