//! 连通性状态机与观察者注册表。
//!
//! # 设计背景（Why）
//! - 连接的持有者（通常是子通道）记录健康状态的每次迁移，并把迁移扇出给所有观察者；
//! - 关闭是吸收态：进入后追踪器主动通知并清空所有观察者，调用方无需逐个注销。
//!
//! # 逻辑解析（How）
//! - 变更操作接收 `&mut self`，由持有者的同步手段（锁或串行执行器）保证互斥，
//!   追踪器内部不再加锁；
//! - 当前状态存放在共享的 `AtomicU8` 中并以 `Relaxed` 读写，[`ConnectivityStateReader`]
//!   允许其他线程在不获取持有者同步手段的情况下读取；
//! - 观察者以自增的 [`WatcherId`] 为键存放在 `BTreeMap`，遍历顺序即注册顺序。
//!
//! # 契约说明（What）
//! - `set_state` 对相同状态为空操作；进入 `Shutdown` 后不应再调用 `set_state` 设置其他状态；
//! - 析构时若尚未关闭，向每个观察者补发一次 `Shutdown` 通知。

use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use spark_transport_core::{KeyValue, SharedLogger, noop_logger};

use crate::{LOG_TARGET, state::ConnectivityState, watcher::ConnectivityStateWatcher};

/// 追踪器内观察者的标识。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// 当前状态的只读句柄，可跨线程克隆。
#[derive(Clone, Debug)]
pub struct ConnectivityStateReader {
    state: Arc<AtomicU8>,
}

impl ConnectivityStateReader {
    pub fn state(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.state.load(Ordering::Relaxed))
    }
}

/// 连通性状态追踪器。
///
/// # 契约说明（What）
/// - **前置条件**：所有变更调用由持有者串行化；
/// - **后置条件**：每次真实状态变化都会对当时已注册的每个观察者调用一次 `notify`；
///   `Shutdown` 之后注册表为空。
pub struct ConnectivityStateTracker {
    name: Cow<'static, str>,
    state: Arc<AtomicU8>,
    watchers: BTreeMap<WatcherId, Box<dyn ConnectivityStateWatcher>>,
    next_watcher_id: u64,
    logger: SharedLogger,
}

impl ConnectivityStateTracker {
    /// 以诊断名称与初始状态创建追踪器。
    pub fn new(name: impl Into<Cow<'static, str>>, initial: ConnectivityState) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(AtomicU8::new(initial.as_u8())),
            watchers: BTreeMap::new(),
            next_watcher_id: 0,
            logger: noop_logger(),
        }
    }

    pub fn with_logger(mut self, logger: SharedLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 注册观察者。
    ///
    /// # 逻辑解析（How）
    /// - `initial_state` 是调用方对当前状态的猜测，与实际不符时立即补发一次追赶通知；
    /// - 若追踪器已关闭，观察者收到追赶通知后立即被丢弃，返回 `None`。
    pub fn add_watcher(
        &mut self,
        initial_state: ConnectivityState,
        watcher: Box<dyn ConnectivityStateWatcher>,
    ) -> Option<WatcherId> {
        let id = WatcherId(self.next_watcher_id);
        self.next_watcher_id += 1;
        self.logger.trace(
            LOG_TARGET,
            "add watcher",
            &[
                KeyValue::new("tracker", self.name.as_ref()),
                KeyValue::new("watcher", id.get()),
            ],
        );
        let current = self.load();
        if initial_state != current {
            self.trace_notify(id, initial_state, current);
            watcher.notify(current);
        }
        if current.is_terminal() {
            return None;
        }
        self.watchers.insert(id, watcher);
        Some(id)
    }

    /// 注销观察者并交回其所有权；不会发送任何通知。
    pub fn remove_watcher(&mut self, id: WatcherId) -> Option<Box<dyn ConnectivityStateWatcher>> {
        self.logger.trace(
            LOG_TARGET,
            "remove watcher",
            &[
                KeyValue::new("tracker", self.name.as_ref()),
                KeyValue::new("watcher", id.get()),
            ],
        );
        self.watchers.remove(&id)
    }

    /// 设置新状态；`reason` 仅用于诊断，不会传给观察者。
    pub fn set_state(&mut self, new_state: ConnectivityState, reason: &str) {
        let current = self.load();
        if new_state == current {
            return;
        }
        let transition = format!("{current} -> {new_state} ({reason})");
        self.logger.trace(
            LOG_TARGET,
            &transition,
            &[KeyValue::new("tracker", self.name.as_ref())],
        );
        self.state.store(new_state.as_u8(), Ordering::Relaxed);
        for (id, watcher) in &self.watchers {
            self.trace_notify(*id, current, new_state);
            watcher.notify(new_state);
        }
        if new_state.is_terminal() {
            self.watchers.clear();
        }
    }

    /// 读取当前状态。
    pub fn state(&self) -> ConnectivityState {
        let state = self.load();
        self.logger.trace(
            LOG_TARGET,
            "get current state",
            &[
                KeyValue::new("tracker", self.name.as_ref()),
                KeyValue::new("state", state.as_str()),
            ],
        );
        state
    }

    pub fn reader(&self) -> ConnectivityStateReader {
        ConnectivityStateReader {
            state: Arc::clone(&self.state),
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    fn load(&self) -> ConnectivityState {
        ConnectivityState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn trace_notify(&self, id: WatcherId, from: ConnectivityState, to: ConnectivityState) {
        self.logger.trace(
            LOG_TARGET,
            "notifying watcher",
            &[
                KeyValue::new("tracker", self.name.as_ref()),
                KeyValue::new("watcher", id.get()),
                KeyValue::new("from", from.as_str()),
                KeyValue::new("to", to.as_str()),
            ],
        );
    }
}

impl Drop for ConnectivityStateTracker {
    fn drop(&mut self) {
        let current = self.load();
        if current.is_terminal() {
            return;
        }
        for (id, watcher) in &self.watchers {
            self.trace_notify(*id, current, ConnectivityState::Shutdown);
            watcher.notify(ConnectivityState::Shutdown);
        }
    }
}

impl fmt::Debug for ConnectivityStateTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectivityStateTracker")
            .field("name", &self.name)
            .field("state", &self.load())
            .field("watchers", &self.watchers.len())
            .finish()
    }
}
