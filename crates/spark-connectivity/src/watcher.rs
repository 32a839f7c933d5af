//! 观察者接口与异步适配器。

use std::{fmt, sync::Arc};

use spark_transport_core::{SharedExecutor, SharedLogger, noop_logger};

use crate::{notifier::notify_async, state::ConnectivityState};

/// 追踪器面向的观察者接口。
///
/// # 契约说明（What）
/// - 追踪器在状态变化时调用 `notify`，实现应尽快返回，不得在调用中回调追踪器；
/// - 观察者一旦注册即归追踪器所有，移除或关闭时所有权交回调用方或直接析构。
pub trait ConnectivityStateWatcher: Send + 'static {
    fn notify(&self, new_state: ConnectivityState);
}

/// 接收异步状态变更的业务处理器。
pub trait StateChangeHandler: Send + Sync + 'static {
    fn on_connectivity_state_change(&self, new_state: ConnectivityState);
}

/// 把 [`StateChangeHandler`] 包装为异步投递的观察者。
///
/// # 逻辑解析（How）
/// - `notify` 不直接调用处理器，而是经 [`notify_async`] 生成一次性任务；
/// - 配置了执行器时任务在执行器上有序运行，否则进入线程本地执行上下文。
///
/// # 风险提示（Trade-offs）
/// - 同一处理器被多个追踪器共享且未配置共同的串行执行器时，回调可能并发发生，
///   处理器需自行保证线程安全（`Sync` 约束即为此）。
pub struct AsyncConnectivityStateWatcher<H: ?Sized> {
    handler: Arc<H>,
    executor: Option<SharedExecutor>,
    logger: SharedLogger,
}

impl<H> AsyncConnectivityStateWatcher<H>
where
    H: StateChangeHandler + ?Sized,
{
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            executor: None,
            logger: noop_logger(),
        }
    }

    /// 指定投递通知的串行执行器。
    pub fn with_executor(mut self, executor: SharedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }
}

impl<H> ConnectivityStateWatcher for AsyncConnectivityStateWatcher<H>
where
    H: StateChangeHandler + ?Sized,
{
    fn notify(&self, new_state: ConnectivityState) {
        notify_async(
            Arc::clone(&self.handler),
            new_state,
            self.executor.as_deref(),
            &self.logger,
        );
    }
}

impl<H: ?Sized> fmt::Debug for AsyncConnectivityStateWatcher<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncConnectivityStateWatcher")
            .field("serialized", &self.executor.is_some())
            .finish_non_exhaustive()
    }
}
