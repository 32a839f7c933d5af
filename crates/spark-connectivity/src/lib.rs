#![deny(unsafe_code)]
#![doc = r#"
# spark-connectivity

## 设计动机（Why）
- 连接的健康状况（空闲、连接中、就绪、瞬时失败、关闭）需要被负载均衡、重试与诊断等多个
  观察者同时感知，且关闭状态不可逆；
- 通知必须异步投递：状态变更的触发方往往持有连接层的锁，同步回调会引入重入风险。

## 核心契约（What）
- [`ConnectivityState`]：五种状态，`Shutdown` 为吸收态；
- [`ConnectivityStateTracker`]：状态机本体与观察者注册表，负责追赶通知、变更扇出与关闭时清理；
- [`ConnectivityStateWatcher`]：追踪器面向的观察者接口；
- [`AsyncConnectivityStateWatcher`] 与 [`notify_async`]：把一次通知封装为任务，投递到可选的
  串行执行器或线程本地执行上下文。

## 风险与考量（Trade-offs）
- 当前状态以 `Relaxed` 原子读写保存，只保证单个取值不被撕裂，不与其他内存建立先后关系；
- 未提供串行执行器时，不同追踪器之间的通知没有顺序保证。
"#]

pub mod notifier;
pub mod state;
pub mod tracker;
pub mod watcher;

pub use notifier::notify_async;
pub use state::ConnectivityState;
pub use tracker::{ConnectivityStateReader, ConnectivityStateTracker, WatcherId};
pub use watcher::{AsyncConnectivityStateWatcher, ConnectivityStateWatcher, StateChangeHandler};

/// 连通性组件使用的日志 target。
pub const LOG_TARGET: &str = "spark.connectivity";
