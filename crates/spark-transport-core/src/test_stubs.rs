//! 供单元测试与集成测试复用的桩对象。
//!
//! # 设计背景（Why）
//! - 连通性追踪器与安全连接器的诊断事件需要在测试中断言；
//! - 各 crate 若各自实现记录型日志，容易出现断言口径不一致，因此集中在此维护。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::observability::{LogRecord, LogSeverity, Logger};

/// 记录中可持有的日志快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedRecord {
    pub severity: LogSeverity,
    pub target: Option<&'static str>,
    pub message: String,
    pub fields: String,
    pub error: Option<String>,
}

/// 将所有日志复制为 [`CapturedRecord`] 保存的记录型日志。
///
/// # 契约说明（What）
/// - 克隆句柄共享同一缓冲区，组件持有一份、测试持有一份即可断言；
/// - 记录顺序与 `log` 调用顺序一致。
#[derive(Clone, Debug, Default)]
pub struct RecordingLogger {
    records: Arc<Mutex<Vec<CapturedRecord>>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回迄今为止的全部记录。
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    /// 是否存在消息包含 `needle` 的记录。
    pub fn contains(&self, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.message.contains(needle))
    }

    /// 指定级别的记录条数。
    pub fn count(&self, severity: LogSeverity) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.severity == severity)
            .count()
    }

    /// 清空缓冲区。
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Logger for RecordingLogger {
    fn log(&self, record: &LogRecord<'_>) {
        let captured = CapturedRecord {
            severity: record.severity,
            target: record.target,
            message: record.message.to_string(),
            fields: record.render_attributes(),
            error: record.error.map(|err| err.to_string()),
        };
        self.records.lock().push(captured);
    }
}
