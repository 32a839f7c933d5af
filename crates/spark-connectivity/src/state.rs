//! 连接健康状态枚举。

use core::fmt;

/// 连接的健康状态。
///
/// # 契约说明（What）
/// - 取值之间没有大小语义，只有“`Shutdown` 一旦进入便不可离开”这一条约束；
/// - `as_str` 返回大写规范名称，用于日志输出。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectivityState {
    Idle = 0,
    Connecting = 1,
    Ready = 2,
    TransientFailure = 3,
    Shutdown = 4,
}

impl ConnectivityState {
    /// 全部状态，按声明顺序排列。
    pub const ALL: [ConnectivityState; 5] = [
        ConnectivityState::Idle,
        ConnectivityState::Connecting,
        ConnectivityState::Ready,
        ConnectivityState::TransientFailure,
        ConnectivityState::Shutdown,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        }
    }

    /// 是否为终止态。
    pub const fn is_terminal(self) -> bool {
        matches!(self, ConnectivityState::Shutdown)
    }

    pub(crate) const fn as_u8(self) -> u8 {
        self as u8
    }

    // 原子槽中只会写入 `as_u8` 的结果，越界值按终止态处理。
    pub(crate) const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectivityState::Idle,
            1 => ConnectivityState::Connecting,
            2 => ConnectivityState::Ready,
            3 => ConnectivityState::TransientFailure,
            _ => ConnectivityState::Shutdown,
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
