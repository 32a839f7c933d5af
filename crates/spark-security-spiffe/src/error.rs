//! SPIFFE 安全连接器的错误类型。
//!
//! # 设计背景（Why）
//! - 工厂刷新失败、ALPN 不匹配、授权检查拒绝等结局都需要以可匹配的值交给上层，
//!   而不是以日志文本或裸状态码表达；
//! - 每个变体提供稳定的点分错误码与 [`ErrorCategory`]，便于审计与自动化策略消费。
//!
//! # 契约说明（What）
//! - 授权检查相关变体的 `Display` 文案保持固定格式，调用方可直接展示给用户；
//! - [`ReloadError::status`] 给出对应的 RPC 状态码。

use spark_transport_core::{ErrorCategory, SecurityClass, StatusCode};
use thiserror::Error;

use crate::engine::HandshakeEngineError;

/// 凭证获取协议的失败结局。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ReloadError {
    /// 既未配置重载能力，也没有现成的密钥材料。
    #[error("either credential reload config or key materials should be provisioned")]
    Precondition,
    /// 重载能力要求异步完成且没有可回退的材料。
    #[error("async credential reload is unsupported")]
    Unimplemented,
    /// 重载失败且没有可回退的材料。
    #[error("credential reload failed with an error: {details}")]
    Internal { details: String },
}

impl ReloadError {
    pub const fn status(&self) -> StatusCode {
        match self {
            ReloadError::Precondition => StatusCode::FailedPrecondition,
            ReloadError::Unimplemented => StatusCode::Unimplemented,
            ReloadError::Internal { .. } => StatusCode::Internal,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            ReloadError::Precondition => "spark.security.spiffe.reload.precondition",
            ReloadError::Unimplemented => "spark.security.spiffe.reload.unimplemented",
            ReloadError::Internal { .. } => "spark.security.spiffe.reload.internal",
        }
    }
}

/// 握手后 ALPN 校验失败的原因。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AlpnError {
    #[error("Cannot check peer: missing selected ALPN property.")]
    MissingSelectedProtocol,
    #[error("Cannot check peer: invalid ALPN value.")]
    InvalidProtocol,
}

/// 安全连接器对外暴露的错误。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SecurityError {
    /// 初始化或刷新时凭证获取失败。
    #[error("key materials are not populated: {0}")]
    KeyMaterials(#[from] ReloadError),
    /// 需要重建工厂时密钥材料中没有任何证书对。
    #[error("key materials contain no key/cert pair")]
    MissingKeyCertPairs,
    /// 握手引擎拒绝构造工厂或握手器。
    #[error(transparent)]
    Engine(#[from] HandshakeEngineError),
    /// 上一次工厂重建失败，当前没有可用工厂。
    #[error("no handshaker factory is available")]
    FactoryUnavailable,
    /// 工厂存在但无法为本次建连创建握手器。
    #[error("Handshaker creation failed with error {0}.")]
    HandshakerCreation(HandshakeEngineError),
    #[error(transparent)]
    Alpn(#[from] AlpnError),
    #[error("Cannot check peer: missing pem cert property.")]
    AuthorizationMissingProperty,
    #[error("Server authorization check is cancelled by the caller with error: {details}")]
    AuthorizationCancelled { details: String },
    #[error("Server authorization check failed with error: {details}")]
    AuthorizationRejected { details: String },
    #[error("Server authorization check did not finish correctly with error: {details}")]
    AuthorizationIncomplete { status: StatusCode, details: String },
    #[error("call host does not match SSL server name")]
    CallHostMismatch,
    #[error("target name must not be empty")]
    InvalidTargetName,
    #[error("private key and cert chain of a key/cert pair must both be non-empty")]
    InvalidKeyCertPair,
}

impl SecurityError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SecurityError::KeyMaterials(inner) => inner.code(),
            SecurityError::MissingKeyCertPairs => "spark.security.spiffe.missing_key_cert_pairs",
            SecurityError::Engine(_) => "spark.security.spiffe.engine_failed",
            SecurityError::FactoryUnavailable => "spark.security.spiffe.factory_unavailable",
            SecurityError::HandshakerCreation(_) => "spark.security.spiffe.handshaker_creation",
            SecurityError::Alpn(_) => "spark.security.spiffe.alpn_mismatch",
            SecurityError::AuthorizationMissingProperty => {
                "spark.security.spiffe.authz.missing_property"
            }
            SecurityError::AuthorizationCancelled { .. } => "spark.security.spiffe.authz.cancelled",
            SecurityError::AuthorizationRejected { .. } => "spark.security.spiffe.authz.rejected",
            SecurityError::AuthorizationIncomplete { .. } => {
                "spark.security.spiffe.authz.incomplete"
            }
            SecurityError::CallHostMismatch => "spark.security.spiffe.call_host_mismatch",
            SecurityError::InvalidTargetName => "spark.security.spiffe.invalid_target_name",
            SecurityError::InvalidKeyCertPair => "spark.security.spiffe.invalid_key_cert_pair",
        }
    }

    /// 错误分类。
    ///
    /// - 凭证获取失败中只有 `Internal` 视为可重试，其余属于配置缺失；
    /// - 授权检查被取消映射为 `Cancelled`，其余授权结局均为授权类安全事件。
    pub fn category(&self) -> ErrorCategory {
        match self {
            SecurityError::KeyMaterials(ReloadError::Internal { .. }) => ErrorCategory::Retryable,
            SecurityError::KeyMaterials(_)
            | SecurityError::MissingKeyCertPairs
            | SecurityError::InvalidTargetName
            | SecurityError::InvalidKeyCertPair => ErrorCategory::NonRetryable,
            SecurityError::Engine(_)
            | SecurityError::FactoryUnavailable
            | SecurityError::HandshakerCreation(_) => {
                ErrorCategory::Security(SecurityClass::Integrity)
            }
            SecurityError::Alpn(_) => ErrorCategory::ProtocolViolation,
            SecurityError::AuthorizationMissingProperty => {
                ErrorCategory::Security(SecurityClass::Authentication)
            }
            SecurityError::AuthorizationCancelled { .. } => ErrorCategory::Cancelled,
            SecurityError::AuthorizationRejected { .. }
            | SecurityError::AuthorizationIncomplete { .. }
            | SecurityError::CallHostMismatch => ErrorCategory::Security(SecurityClass::Authorization),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_errors_map_to_rpc_status() {
        assert_eq!(ReloadError::Precondition.status(), StatusCode::FailedPrecondition);
        assert_eq!(ReloadError::Unimplemented.status(), StatusCode::Unimplemented);
        let internal = ReloadError::Internal {
            details: "disk unreadable".into(),
        };
        assert_eq!(internal.status(), StatusCode::Internal);
        assert!(internal.to_string().contains("disk unreadable"));
    }

    #[test]
    fn categories_follow_the_failure_kind() {
        let cancelled = SecurityError::AuthorizationCancelled {
            details: "deadline".into(),
        };
        assert_eq!(cancelled.category(), ErrorCategory::Cancelled);
        assert_eq!(
            SecurityError::CallHostMismatch.category(),
            ErrorCategory::Security(SecurityClass::Authorization)
        );
        assert_eq!(
            SecurityError::from(AlpnError::InvalidProtocol).code(),
            "spark.security.spiffe.alpn_mismatch"
        );
        assert_eq!(
            SecurityError::from(ReloadError::Precondition).code(),
            "spark.security.spiffe.reload.precondition"
        );
    }
}
