//! 执行上下文契约与实现。
//!
//! # 设计背景（Why）
//! - 状态变更通知与授权检查的完成回调都属于“发出即忘”的任务，不能在触发点同步执行，
//!   否则调用方持有的锁或状态可能被回调重入；
//! - 因此统一抽象为 [`Executor`]：任务被移交给执行上下文后，由上下文决定何时、按何种顺序运行。
//!
//! # 结构说明（How）
//! - [`WorkSerializer`]：单消费者有序队列，保证同一序列化器上的任务按入队顺序逐个执行；
//! - [`ExecCtx`]：线程本地的延迟队列，任务在当前执行上下文让出时统一运行；
//! - `TokioSerialExecutor`：在 Tokio 运行时上以单个任务循环消费通道，语义与 `WorkSerializer` 相同。

mod exec_ctx;
mod executor;
mod serializer;
#[cfg(feature = "runtime-tokio")]
mod tokio;

pub use exec_ctx::{ExecCtx, ExecCtxGuard};
pub use executor::{Executor, SharedExecutor, Task};
pub use serializer::WorkSerializer;
#[cfg(feature = "runtime-tokio")]
pub use self::tokio::{RuntimeUnavailable, TokioSerialExecutor};
