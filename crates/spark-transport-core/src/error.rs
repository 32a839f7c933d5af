//! 错误分类契约。
//!
//! # 设计背景（Why）
//! - 各 crate 的错误以 `thiserror` 枚举表达，但上层的重试、告警与关闭策略只关心“属于哪一类”，
//!   因此由本模块提供统一的分类枚举，错误类型通过 `category()` 映射到这里；
//! - 安全类错误进一步细分为认证、授权、完整性等子类，便于审计系统按风险分级。
//!
//! # 契约说明（What）
//! - 两个枚举均为 `#[non_exhaustive]`，下游匹配时必须保留通配分支；
//! - [`SecurityClass::code`] 与 [`ErrorCategory::code`] 返回稳定字符串，适合作为日志字段或指标标签。

/// 安全事件分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SecurityClass {
    /// 认证失败，例如对端未出示证书或证书属性缺失。
    Authentication,
    /// 授权失败，例如授权检查拒绝或主机名不匹配。
    Authorization,
    /// 完整性校验失败。
    Integrity,
    /// 未归类的安全事件。
    Unknown,
}

impl SecurityClass {
    /// 返回分类对应的稳定代码。
    pub const fn code(self) -> &'static str {
        match self {
            SecurityClass::Authentication => "security.authentication",
            SecurityClass::Authorization => "security.authorization",
            SecurityClass::Integrity => "security.integrity",
            SecurityClass::Unknown => "security.unknown",
        }
    }
}

/// 错误分类枚举，驱动自动化容错策略。
///
/// # 契约说明（What）
/// - `Retryable`：瞬时故障，稍后重试可能成功（例如凭证重载暂时失败）；
/// - `NonRetryable`：配置或能力缺失，重试不会改变结果；
/// - `Security`：携带安全子类 [`SecurityClass`]；
/// - `ProtocolViolation`：协议协商不满足要求，例如 ALPN 不匹配；
/// - `Cancelled`：调用方主动取消。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable,
    NonRetryable,
    Security(SecurityClass),
    ProtocolViolation,
    Cancelled,
}

impl ErrorCategory {
    /// 返回分类的稳定代码，安全类错误沿用 [`SecurityClass::code`]。
    pub const fn code(self) -> &'static str {
        match self {
            ErrorCategory::Retryable => "retryable",
            ErrorCategory::NonRetryable => "non_retryable",
            ErrorCategory::Security(class) => class.code(),
            ErrorCategory::ProtocolViolation => "protocol_violation",
            ErrorCategory::Cancelled => "cancelled",
        }
    }

    /// 是否属于安全类错误。
    pub const fn is_security(self) -> bool {
        matches!(self, ErrorCategory::Security(_))
    }
}
