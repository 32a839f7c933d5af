//! 服务端授权检查协议。
//!
//! # 设计背景（Why）
//! - 客户端在握手后需要询问可插拔的授权能力“这个服务端是否可信”，能力既可同步给出结论，
//!   也可稍后异步完成；
//! - 两条路径必须共享同一个结果解释函数 [`process_authorization_check_result`]，
//!   以保证同一组 `(status, success, error_details)` 在两条路径上得到一致的结论。
//!
//! # 逻辑解析（How）
//! - 每个通道连接器持有一个可复用的 [`AuthorizationCheckRequest`]，内部以互斥锁保护字段；
//! - 发起检查时写入对端证书、目标名与完成回调；能力返回 `Asynchronous` 时连接器立即返回，
//!   能力稍后调用 [`AuthorizationCheckRequest::complete`]；返回 `Synchronous` 时连接器就地解释结果；
//! - 完成回调只会被取出一次，取出后请求字段复位，等待下一次检查。
//!
//! # 风险提示（Trade-offs）
//! - 请求对象是单一的可变缓冲区：同一连接器上重叠的检查会共享 `peer_cert` / `target_name`
//!   （先写者获胜），后到的检查接管待完成回调，被接管的回调以 `AuthorizationIncomplete`（`ABORTED`）
//!   立即完成。调用方必须串行化同一连接器上的 `check_peer`。

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use spark_transport_core::{ExecCtx, SharedLogger, StatusCode};

use crate::{
    LOG_TARGET, auth_context::AuthContext, context::RequestContext, error::SecurityError,
    reload::CompletionMode,
};

const SUPERSEDED_DETAILS: &str = "superseded by an overlapping authorization check";

/// 对端校验的完成回调，成功时携带认证上下文。
pub type PeerCheckedCallback = Box<dyn FnOnce(Result<Arc<AuthContext>, SecurityError>) + Send>;

/// 解释授权检查结果。
///
/// - `CANCELLED`：调用方取消；
/// - `OK` 且 `success == false`：检查完成但拒绝；
/// - `OK` 且 `success == true`：授权通过；
/// - 其他状态：检查未正确完成。
pub fn process_authorization_check_result(
    status: StatusCode,
    success: bool,
    error_details: Option<&str>,
) -> Result<(), SecurityError> {
    let details = || error_details.unwrap_or_default().to_owned();
    match status {
        StatusCode::Cancelled => Err(SecurityError::AuthorizationCancelled { details: details() }),
        StatusCode::Ok if success => Ok(()),
        StatusCode::Ok => Err(SecurityError::AuthorizationRejected { details: details() }),
        other => Err(SecurityError::AuthorizationIncomplete {
            status: other,
            details: details(),
        }),
    }
}

/// 服务端授权检查能力。
///
/// # 契约说明（What）
/// - `schedule` 返回 `Synchronous` 前须通过 [`AuthorizationCheckRequest::set_result`] 写入结论；
/// - 返回 `Asynchronous` 时能力可克隆请求句柄，稍后写入结论并调用
///   [`AuthorizationCheckRequest::complete`]，且必须最终完成；
/// - `cancel` 为可选入口，连接器自身不会调用。
pub trait ServerAuthorizationCheck: Send + Sync + 'static {
    fn schedule(&self, request: &AuthorizationCheckRequest) -> CompletionMode;

    fn cancel(&self, _request: &AuthorizationCheckRequest) {}
}

/// 由闭包实现的授权检查能力，见 [`server_authorization_check_fn`]。
pub struct ServerAuthorizationCheckFn<F> {
    schedule: F,
}

pub fn server_authorization_check_fn<F>(schedule: F) -> ServerAuthorizationCheckFn<F>
where
    F: Fn(&AuthorizationCheckRequest) -> CompletionMode + Send + Sync + 'static,
{
    ServerAuthorizationCheckFn { schedule }
}

impl<F> ServerAuthorizationCheck for ServerAuthorizationCheckFn<F>
where
    F: Fn(&AuthorizationCheckRequest) -> CompletionMode + Send + Sync + 'static,
{
    fn schedule(&self, request: &AuthorizationCheckRequest) -> CompletionMode {
        (self.schedule)(request)
    }
}

impl<F> fmt::Debug for ServerAuthorizationCheckFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerAuthorizationCheckFn")
    }
}

struct PendingCheck {
    on_peer_checked: PeerCheckedCallback,
    auth_context: Arc<AuthContext>,
}

struct CheckState {
    peer_cert: Option<String>,
    target_name: Option<String>,
    status: StatusCode,
    success: bool,
    error_details: Option<String>,
    context: Option<RequestContext>,
    pending: Option<PendingCheck>,
}

impl CheckState {
    fn reset_for_next_check(&mut self) {
        self.peer_cert = None;
        self.target_name = None;
        self.status = StatusCode::Ok;
        self.success = false;
        self.error_details = None;
    }
}

type CheckOutcome = (PeerCheckedCallback, Result<Arc<AuthContext>, SecurityError>);

/// 可复用的授权检查请求句柄。克隆共享同一请求。
#[derive(Clone)]
pub struct AuthorizationCheckRequest {
    state: Arc<Mutex<CheckState>>,
    logger: SharedLogger,
}

impl AuthorizationCheckRequest {
    pub(crate) fn new(logger: SharedLogger) -> Self {
        Self {
            state: Arc::new(Mutex::new(CheckState {
                peer_cert: None,
                target_name: None,
                status: StatusCode::Ok,
                success: false,
                error_details: None,
                context: None,
                pending: None,
            })),
            logger,
        }
    }

    /// PEM 编码的对端证书。
    pub fn peer_cert(&self) -> Option<String> {
        self.state.lock().peer_cert.clone()
    }

    pub fn target_name(&self) -> Option<String> {
        self.state.lock().target_name.clone()
    }

    pub fn status(&self) -> StatusCode {
        self.state.lock().status
    }

    pub fn success(&self) -> bool {
        self.state.lock().success
    }

    pub fn error_details(&self) -> Option<String> {
        self.state.lock().error_details.clone()
    }

    /// 写入检查结论。
    pub fn set_result(&self, status: StatusCode, success: bool, error_details: Option<String>) {
        let mut state = self.state.lock();
        state.status = status;
        state.success = success;
        state.error_details = error_details;
    }

    /// 挂载用户上下文，替换旧上下文时旧上下文的销毁钩子立即执行。
    pub fn set_context(&self, context: RequestContext) {
        let previous = self.state.lock().context.replace(context);
        drop(previous);
    }

    /// 在锁内访问用户上下文；`f` 内不得再调用本请求的其他方法。
    pub fn with_context<R>(&self, f: impl FnOnce(Option<&mut RequestContext>) -> R) -> R {
        f(self.state.lock().context.as_mut())
    }

    /// 是否存在尚未完成的检查。
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// 异步完成入口：解释结论并投递完成回调。
    ///
    /// 在独立的执行上下文中投递，返回前回调已经运行；没有待完成检查时为空操作。
    pub fn complete(&self) {
        let _ctx = ExecCtx::enter();
        match self.take_outcome() {
            Some(outcome) => deliver(outcome),
            None => self.logger.warn(
                LOG_TARGET,
                "authorization check completed without a pending peer check",
                &[],
            ),
        }
    }

    /// 写入本次检查的输入；`peer_cert` 与 `target_name` 先写者获胜。
    ///
    /// 已有待完成检查时，旧回调以 [`SecurityError::AuthorizationIncomplete`]（`ABORTED`）完成，
    /// 每次 `check_peer` 的回调恰好触发一次。
    pub(crate) fn begin(
        &self,
        peer_cert: &str,
        target_name: &str,
        on_peer_checked: PeerCheckedCallback,
        auth_context: Arc<AuthContext>,
    ) {
        let superseded = {
            let mut state = self.state.lock();
            if state.peer_cert.is_none() {
                state.peer_cert = Some(peer_cert.to_owned());
            }
            if state.target_name.is_none() {
                state.target_name = Some(target_name.to_owned());
            }
            state.pending.replace(PendingCheck {
                on_peer_checked,
                auth_context,
            })
        };
        if let Some(superseded) = superseded {
            self.logger.warn(
                LOG_TARGET,
                "overlapping authorization check superseded a pending completion callback",
                &[],
            );
            deliver_peer_checked(
                superseded.on_peer_checked,
                Err(SecurityError::AuthorizationIncomplete {
                    status: StatusCode::Aborted,
                    details: SUPERSEDED_DETAILS.to_owned(),
                }),
            );
        }
    }

    /// 同步完成路径：能力已在 `schedule` 内写好结论。
    pub(crate) fn finish_synchronously(&self) {
        if let Some(outcome) = self.take_outcome() {
            deliver(outcome);
        }
    }

    fn take_outcome(&self) -> Option<CheckOutcome> {
        let mut state = self.state.lock();
        let pending = state.pending.take()?;
        let verdict = process_authorization_check_result(
            state.status,
            state.success,
            state.error_details.as_deref(),
        );
        state.reset_for_next_check();
        let result = verdict.map(|()| pending.auth_context);
        Some((pending.on_peer_checked, result))
    }
}

impl fmt::Debug for AuthorizationCheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AuthorizationCheckRequest")
            .field("target_name", &state.target_name)
            .field("status", &state.status)
            .field("success", &state.success)
            .field("pending", &state.pending.is_some())
            .finish_non_exhaustive()
    }
}

/// 经由执行上下文投递对端校验结果。
pub(crate) fn deliver_peer_checked(
    on_peer_checked: PeerCheckedCallback,
    result: Result<Arc<AuthContext>, SecurityError>,
) {
    ExecCtx::run(Box::new(move || on_peer_checked(result)));
}

fn deliver((on_peer_checked, result): CheckOutcome) {
    deliver_peer_checked(on_peer_checked, result);
}
