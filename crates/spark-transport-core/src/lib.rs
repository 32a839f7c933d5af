#![deny(unsafe_code)]
#![doc = r#"
# spark-transport-core

## 设计动机（Why）
- **共享契约**：连通性状态机与 SPIFFE 安全连接器都位于连接建立路径上，二者共享同一套
  “异步完成”习惯用法、RPC 状态码与错误分类，因此抽出独立 crate 统一维护；
- **可注入观测**：日志不依赖全局开关，而是由调用方在构造组件时注入 [`Logger`] 实现，默认空操作；
- **调度中立**：通知与完成回调通过 [`Executor`] 抽象投递，既可在串行队列上保证顺序，也可在
  线程本地的延迟上下文中执行。

## 核心契约（What）
- [`StatusCode`]：17 种 RPC 状态码及其规范名称；
- [`ErrorCategory`] / [`SecurityClass`]：驱动上层自动化策略的错误分类；
- [`Logger`]、[`LogRecord`]、[`NoopLogger`]、`TracingLogger`：结构化日志接口与实现；
- [`rt`]：`Executor`、`WorkSerializer`、`ExecCtx` 以及可选的 `TokioSerialExecutor`。

## 风险与考量（Trade-offs）
- `WorkSerializer` 由首个提交者线程负责排空队列，长耗时任务会阻塞该提交者；
- `ExecCtx` 为线程本地结构，跨线程提交的任务不会进入当前线程的延迟队列。
"#]

pub mod error;
pub mod observability;
pub mod rt;
pub mod status;
/// 测试桩命名空间，提供记录型 `Logger` 等对象，供各 crate 的单元与集成测试复用。
pub mod test_stubs;

pub use error::{ErrorCategory, SecurityClass};
#[cfg(feature = "tracing")]
pub use observability::TracingLogger;
pub use observability::{
    FieldValue, KeyValue, LogRecord, LogSeverity, Logger, NoopLogger, SharedLogger, noop_logger,
};
pub use rt::{ExecCtx, ExecCtxGuard, Executor, SharedExecutor, Task, WorkSerializer};
#[cfg(feature = "runtime-tokio")]
pub use rt::{RuntimeUnavailable, TokioSerialExecutor};
pub use status::StatusCode;
