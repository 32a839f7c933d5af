//! 单次状态通知的异步投递。
//!
//! # 设计背景（Why）
//! - 通知是“发出即忘”的：调用方不持有任何句柄，通知载体在投递完成后自行消亡；
//! - 在 Rust 中无需自删除对象，任务闭包按值捕获处理器与状态，由执行上下文负责其生命周期。
//!
//! # 逻辑解析（How）
//! - 提供执行器（通常为 [`WorkSerializer`](spark_transport_core::WorkSerializer)）时，任务入队，
//!   同一执行器上的通知按入队顺序逐个执行；
//! - 未提供时交给 [`ExecCtx::run`]，在当前执行上下文让出后运行，不保证与其他追踪器的相对顺序。

use std::sync::Arc;

use spark_transport_core::{ExecCtx, Executor, KeyValue, SharedLogger, Task};

use crate::{LOG_TARGET, state::ConnectivityState, watcher::StateChangeHandler};

/// 异步投递一次 `(handler, state)` 通知。
pub fn notify_async<H>(
    handler: Arc<H>,
    state: ConnectivityState,
    executor: Option<&dyn Executor>,
    logger: &SharedLogger,
) where
    H: StateChangeHandler + ?Sized,
{
    let logger = Arc::clone(logger);
    let task: Task = Box::new(move || {
        logger.trace(
            LOG_TARGET,
            "delivering async notification",
            &[KeyValue::new("state", state.as_str())],
        );
        handler.on_connectivity_state_change(state);
    });
    match executor {
        Some(executor) => executor.execute(task),
        None => ExecCtx::run(task),
    }
}
