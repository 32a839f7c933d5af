//! 凭证重载协议。
//!
//! # 设计背景（Why）
//! - 证书可能在进程运行期间轮换，连接器在每次建连前询问可插拔的重载能力“材料是否变化”；
//! - 重载数据从何处获取（文件监听、远端服务）不属于本模块，这里只负责调用能力并解释结果。
//!
//! # 逻辑解析（How）
//! 1. 既无重载能力又无材料时以 `Precondition` 失败；
//! 2. 仅有材料时直接视为 `Unchanged`；
//! 3. 能力声明异步完成时不等待：材料为空视为 `Unimplemented`，否则沿用现有材料；
//! 4. 同步完成后按状态分支：`Unchanged`、`New` 直接返回；`Fail` 在材料为空时报 `Internal`，
//!    否则沿用现有材料（过期但可用）；
//! 5. 请求对象在函数返回前析构，挂载的上下文销毁钩子随之执行。
//!
//! # 风险提示（Trade-offs）
//! - `Fail` 被吞掉是有意的宽容策略，避免一次瞬时重载失败破坏已经正常工作的连接器；
//! - 材料是否为空在调用能力之前判定，能力在 `Fail` 时写入的新材料不影响该判定。

use std::fmt;

use spark_transport_core::{KeyValue, Logger};

use crate::{
    LOG_TARGET,
    context::RequestContext,
    error::ReloadError,
    material::{KeyMaterialsConfig, PemKeyCertPair},
    options::TlsCredentialsOptions,
};

/// 一次重载的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ReloadStatus {
    #[default]
    Unchanged,
    New,
    Fail,
}

impl ReloadStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReloadStatus::Unchanged => "unchanged",
            ReloadStatus::New => "new",
            ReloadStatus::Fail => "fail",
        }
    }
}

/// 可插拔能力的完成方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionMode {
    /// 调用返回时结果已写入请求对象。
    Synchronous,
    /// 结果稍后通过回调交付。
    Asynchronous,
}

/// 交给重载能力的请求对象。
///
/// # 契约说明（What）
/// - 能力通过 [`key_materials_mut`](Self::key_materials_mut) 或
///   [`set_key_materials`](Self::set_key_materials) 写入新材料，并以 [`set_status`](Self::set_status)
///   报告结果；
/// - 请求对象仅在一次调用期间存在，析构时释放上下文。
pub struct CredentialReloadArg<'a> {
    key_materials: &'a mut KeyMaterialsConfig,
    status: ReloadStatus,
    error_details: Option<String>,
    context: Option<RequestContext>,
}

impl<'a> CredentialReloadArg<'a> {
    pub fn new(key_materials: &'a mut KeyMaterialsConfig) -> Self {
        Self {
            key_materials,
            status: ReloadStatus::Unchanged,
            error_details: None,
            context: None,
        }
    }

    pub fn key_materials(&self) -> &KeyMaterialsConfig {
        &*self.key_materials
    }

    pub fn key_materials_mut(&mut self) -> &mut KeyMaterialsConfig {
        &mut *self.key_materials
    }

    pub fn set_key_materials(
        &mut self,
        pem_root_certs: Option<String>,
        pem_key_cert_pairs: Vec<PemKeyCertPair>,
    ) {
        self.key_materials
            .set_key_materials(pem_root_certs, pem_key_cert_pairs);
    }

    pub fn status(&self) -> ReloadStatus {
        self.status
    }

    pub fn set_status(&mut self, status: ReloadStatus) {
        self.status = status;
    }

    pub fn error_details(&self) -> Option<&str> {
        self.error_details.as_deref()
    }

    pub fn set_error_details(&mut self, details: impl Into<String>) {
        self.error_details = Some(details.into());
    }

    pub fn context(&self) -> Option<&RequestContext> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: RequestContext) {
        self.context = Some(context);
    }
}

impl fmt::Debug for CredentialReloadArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialReloadArg")
            .field("status", &self.status)
            .field("error_details", &self.error_details)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// 凭证重载能力。
///
/// # 契约说明（What）
/// - `schedule` 返回 [`CompletionMode::Synchronous`] 时必须已写好状态；
/// - 本实现不支持真正的异步重载，返回 `Asynchronous` 会走降级路径；
/// - `cancel` 为可选入口，连接器自身不会调用。
pub trait CredentialReload: Send + Sync + 'static {
    fn schedule(&self, arg: &mut CredentialReloadArg<'_>) -> CompletionMode;

    fn cancel(&self, _arg: &mut CredentialReloadArg<'_>) {}
}

/// 由闭包实现的重载能力，见 [`credential_reload_fn`]。
pub struct CredentialReloadFn<F> {
    schedule: F,
}

/// 以闭包构造重载能力。
pub fn credential_reload_fn<F>(schedule: F) -> CredentialReloadFn<F>
where
    F: Fn(&mut CredentialReloadArg<'_>) -> CompletionMode + Send + Sync + 'static,
{
    CredentialReloadFn { schedule }
}

impl<F> CredentialReload for CredentialReloadFn<F>
where
    F: Fn(&mut CredentialReloadArg<'_>) -> CompletionMode + Send + Sync + 'static,
{
    fn schedule(&self, arg: &mut CredentialReloadArg<'_>) -> CompletionMode {
        (self.schedule)(arg)
    }
}

impl<F> fmt::Debug for CredentialReloadFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialReloadFn")
    }
}

/// 判断证书数据是否可用且是否更新。
///
/// 返回 `Ok(ReloadStatus::New)` 表示需要重建握手工厂，其余 `Ok` 取值均可复用现有工厂。
pub fn fetch_key_materials(
    key_materials: &mut KeyMaterialsConfig,
    options: &TlsCredentialsOptions,
    logger: &dyn Logger,
) -> Result<ReloadStatus, ReloadError> {
    let was_empty = key_materials.is_empty();
    let Some(reload) = options.credential_reload() else {
        if was_empty {
            logger.error(
                LOG_TARGET,
                "Either credential reload config or key materials should be provisioned.",
                None,
                &[],
            );
            return Err(ReloadError::Precondition);
        }
        return Ok(ReloadStatus::Unchanged);
    };

    let mut arg = CredentialReloadArg::new(key_materials);
    match reload.schedule(&mut arg) {
        CompletionMode::Asynchronous => {
            logger.error(
                LOG_TARGET,
                "Async credential reload is unsupported now.",
                None,
                &[KeyValue::new("materials_empty", was_empty)],
            );
            if was_empty {
                Err(ReloadError::Unimplemented)
            } else {
                Ok(ReloadStatus::Unchanged)
            }
        }
        CompletionMode::Synchronous => match arg.status() {
            ReloadStatus::Unchanged => {
                logger.debug(LOG_TARGET, "Credential does not change after reload.", &[]);
                Ok(ReloadStatus::Unchanged)
            }
            ReloadStatus::New => Ok(ReloadStatus::New),
            ReloadStatus::Fail => {
                let details = arg.error_details().unwrap_or_default().to_owned();
                logger.error(
                    LOG_TARGET,
                    "Credential reload failed with an error:",
                    None,
                    &[
                        KeyValue::new("details", details.as_str()),
                        KeyValue::new("materials_empty", was_empty),
                    ],
                );
                if was_empty {
                    Err(ReloadError::Internal { details })
                } else {
                    Ok(ReloadStatus::Fail)
                }
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use spark_transport_core::{LogSeverity, NoopLogger, test_stubs::RecordingLogger};

    use super::*;

    fn pair() -> PemKeyCertPair {
        PemKeyCertPair::new("key", "chain").expect("valid pair")
    }

    fn populated() -> KeyMaterialsConfig {
        KeyMaterialsConfig::new().with_key_materials(Some("roots".into()), vec![pair()])
    }

    fn options_with(
        reload: impl Fn(&mut CredentialReloadArg<'_>) -> CompletionMode + Send + Sync + 'static,
    ) -> TlsCredentialsOptions {
        TlsCredentialsOptions::new().with_credential_reload(credential_reload_fn(reload))
    }

    #[test]
    fn nothing_provisioned_is_a_precondition_failure() {
        let logger = RecordingLogger::new();
        let mut materials = KeyMaterialsConfig::new();
        let result = fetch_key_materials(&mut materials, &TlsCredentialsOptions::new(), &logger);
        assert_eq!(result, Err(ReloadError::Precondition));
        assert_eq!(logger.count(LogSeverity::Error), 1);
    }

    #[test]
    fn static_materials_need_no_reload() {
        let mut materials = populated();
        let result = fetch_key_materials(&mut materials, &TlsCredentialsOptions::new(), &NoopLogger);
        assert_eq!(result, Ok(ReloadStatus::Unchanged));
    }

    #[test]
    fn async_reload_falls_back_only_when_materials_exist() {
        let options = options_with(|_| CompletionMode::Asynchronous);

        let mut empty = KeyMaterialsConfig::new();
        assert_eq!(
            fetch_key_materials(&mut empty, &options, &NoopLogger),
            Err(ReloadError::Unimplemented)
        );

        let mut existing = populated();
        assert_eq!(
            fetch_key_materials(&mut existing, &options, &NoopLogger),
            Ok(ReloadStatus::Unchanged)
        );
    }

    #[test]
    fn failed_reload_is_swallowed_with_existing_materials() {
        let options = options_with(|arg| {
            arg.set_status(ReloadStatus::Fail);
            arg.set_error_details("secret store offline");
            CompletionMode::Synchronous
        });

        let mut empty = KeyMaterialsConfig::new();
        assert_eq!(
            fetch_key_materials(&mut empty, &options, &NoopLogger),
            Err(ReloadError::Internal {
                details: "secret store offline".into()
            })
        );

        let logger = RecordingLogger::new();
        let mut existing = populated();
        assert_eq!(
            fetch_key_materials(&mut existing, &options, &logger),
            Ok(ReloadStatus::Fail)
        );
        assert!(logger.records()[0].fields.contains("details=secret store offline"));
        assert_eq!(existing, populated());
    }

    #[test]
    fn new_materials_are_written_through_the_request() {
        let options = options_with(|arg| {
            arg.set_key_materials(None, vec![pair(), pair()]);
            arg.set_status(ReloadStatus::New);
            CompletionMode::Synchronous
        });
        let mut materials = KeyMaterialsConfig::new();
        assert_eq!(
            fetch_key_materials(&mut materials, &options, &NoopLogger),
            Ok(ReloadStatus::New)
        );
        assert_eq!(materials.pem_key_cert_pairs().len(), 2);
        assert_eq!(materials.pem_root_certs(), None);
    }

    #[test]
    fn request_context_is_destroyed_on_every_exit_path() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        for (mode, status) in [
            (CompletionMode::Asynchronous, ReloadStatus::Unchanged),
            (CompletionMode::Synchronous, ReloadStatus::Fail),
            (CompletionMode::Synchronous, ReloadStatus::New),
        ] {
            let counter = Arc::clone(&destroyed);
            let options = options_with(move |arg| {
                let counter = Arc::clone(&counter);
                arg.set_context(RequestContext::new(()).with_destroy(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
                arg.set_status(status);
                mode
            });
            let mut materials = KeyMaterialsConfig::new();
            let _ = fetch_key_materials(&mut materials, &options, &NoopLogger);
        }
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
    }
}
