//! 结构化日志契约与默认实现。
//!
//! # 设计背景（Why）
//! - 连通性状态机与安全连接器需要输出诊断事件，但不应依赖进程级的全局追踪开关；
//!   组件在构造时接收调用方注入的 [`Logger`]，未注入时使用 [`NoopLogger`]，行为与关闭追踪等价；
//! - 记录结构借鉴 OpenTelemetry Log Data Model：消息、级别、目标、可选错误与结构化字段。
//!
//! # 逻辑解析（How）
//! - `log` 为唯一必需方法，`trace`/`debug`/`info`/`warn`/`error` 便捷方法内部构造 [`LogRecord`]
//!   后统一委托给 `log`，保证所有路径共享同一实现；
//! - 字段以 `&[KeyValue]` 切片传递，调用期间借用，不产生复制。
//!
//! # 契约说明（What）
//! - **前置条件**：字段键需为低基数的静态字符串；
//! - **后置条件**：实现应尽量非阻塞，`log` 返回后不得继续持有记录中的引用。

use std::{borrow::Cow, error::Error, fmt, sync::Arc};

/// 日志级别。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogSeverity {
    /// 级别的小写名称。
    pub const fn as_str(self) -> &'static str {
        match self {
            LogSeverity::Trace => "trace",
            LogSeverity::Debug => "debug",
            LogSeverity::Info => "info",
            LogSeverity::Warn => "warn",
            LogSeverity::Error => "error",
        }
    }
}

/// 结构化字段的取值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    U64(u64),
    Bool(bool),
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(value) => f.write_str(value),
            FieldValue::U64(value) => write!(f, "{value}"),
            FieldValue::Bool(value) => write!(f, "{value}"),
        }
    }
}

impl<'a> From<&'a str> for FieldValue<'a> {
    fn from(value: &'a str) -> Self {
        FieldValue::Str(value)
    }
}

impl From<u64> for FieldValue<'_> {
    fn from(value: u64) -> Self {
        FieldValue::U64(value)
    }
}

impl From<bool> for FieldValue<'_> {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// 单个结构化字段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyValue<'a> {
    pub key: &'static str,
    pub value: FieldValue<'a>,
}

impl<'a> KeyValue<'a> {
    pub fn new(key: &'static str, value: impl Into<FieldValue<'a>>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// 单条结构化日志记录。
///
/// # 契约说明（What）
/// - `target` 表示日志分类（例如 `spark.connectivity`），对齐 `tracing` 的 target 语义；
/// - `error` 以引用形式携带根因，避免克隆错误链；
/// - **后置条件**：提交给 [`Logger::log`] 后视为不可变对象。
#[derive(Debug)]
pub struct LogRecord<'a> {
    pub message: Cow<'a, str>,
    pub severity: LogSeverity,
    pub target: Option<&'static str>,
    pub error: Option<&'a (dyn Error + 'static)>,
    pub attributes: &'a [KeyValue<'a>],
}

impl<'a> LogRecord<'a> {
    /// 构建新的日志记录，不复制任何字段。
    pub fn new(
        message: impl Into<Cow<'a, str>>,
        severity: LogSeverity,
        target: Option<&'static str>,
        error: Option<&'a (dyn Error + 'static)>,
        attributes: &'a [KeyValue<'a>],
    ) -> Self {
        Self {
            message: message.into(),
            severity,
            target,
            error,
            attributes,
        }
    }

    /// 将字段渲染为 `key=value` 形式，供文本后端使用。
    pub fn render_attributes(&self) -> String {
        let mut rendered = String::new();
        for (index, kv) in self.attributes.iter().enumerate() {
            if index > 0 {
                rendered.push(' ');
            }
            rendered.push_str(kv.key);
            rendered.push('=');
            rendered.push_str(&kv.value.to_string());
        }
        rendered
    }
}

/// 日志接口的核心契约。
///
/// # 设计背景（Why）
/// - 统一组件对宿主日志实现的依赖，允许对接 `tracing` 或自研后端；
/// - 对象安全，组件以 [`SharedLogger`] 持有。
///
/// # 风险提示（Trade-offs）
/// - 热路径上的 `trace` 调用即便被空实现吞掉，也会付出构造记录的成本；调用方可先判断是否需要输出。
pub trait Logger: Send + Sync + 'static {
    /// 提交结构化日志。
    fn log(&self, record: &LogRecord<'_>);

    /// 输出 TRACE 日志。
    fn trace(&self, target: &'static str, message: &str, attributes: &[KeyValue<'_>]) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Trace,
            Some(target),
            None,
            attributes,
        ));
    }

    /// 输出 DEBUG 日志。
    fn debug(&self, target: &'static str, message: &str, attributes: &[KeyValue<'_>]) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Debug,
            Some(target),
            None,
            attributes,
        ));
    }

    /// 输出 INFO 日志。
    fn info(&self, target: &'static str, message: &str, attributes: &[KeyValue<'_>]) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Info,
            Some(target),
            None,
            attributes,
        ));
    }

    /// 输出 WARN 日志。
    fn warn(&self, target: &'static str, message: &str, attributes: &[KeyValue<'_>]) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Warn,
            Some(target),
            None,
            attributes,
        ));
    }

    /// 输出 ERROR 日志，可附带根因。
    fn error(
        &self,
        target: &'static str,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
        attributes: &[KeyValue<'_>],
    ) {
        self.log(&LogRecord::new(
            message,
            LogSeverity::Error,
            Some(target),
            error,
            attributes,
        ));
    }
}

/// 组件共享的日志句柄。
pub type SharedLogger = Arc<dyn Logger>;

/// 空操作日志实现，组件未注入日志时的默认值。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _record: &LogRecord<'_>) {}
}

/// 返回共享的空日志句柄。
pub fn noop_logger() -> SharedLogger {
    Arc::new(NoopLogger)
}

/// 将 [`LogRecord`] 转发给 `tracing` 的桥接实现。
///
/// # 逻辑解析（How）
/// - `tracing` 的 target 必须是编译期常量，因此记录的 `target` 以 `component` 字段输出；
/// - 结构化字段渲染为 `fields` 字符串，错误以 `error` 字段输出其 `Display` 文本。
///
/// # 契约说明（What）
/// - **前置条件**：宿主需自行安装 `tracing-subscriber`，否则事件被丢弃；
/// - **后置条件**：级别一一映射到 `tracing::Level`。
#[cfg(feature = "tracing")]
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

#[cfg(feature = "tracing")]
impl Logger for TracingLogger {
    fn log(&self, record: &LogRecord<'_>) {
        let component = record.target.unwrap_or("spark");
        let fields = record.render_attributes();
        let error = record
            .error
            .map(|err| err.to_string())
            .unwrap_or_default();
        let message = record.message.as_ref();
        match record.severity {
            LogSeverity::Trace => {
                tracing::trace!(component, fields = %fields, error = %error, "{message}")
            }
            LogSeverity::Debug => {
                tracing::debug!(component, fields = %fields, error = %error, "{message}")
            }
            LogSeverity::Info => {
                tracing::info!(component, fields = %fields, error = %error, "{message}")
            }
            LogSeverity::Warn => {
                tracing::warn!(component, fields = %fields, error = %error, "{message}")
            }
            LogSeverity::Error => {
                tracing::error!(component, fields = %fields, error = %error, "{message}")
            }
        }
    }
}
