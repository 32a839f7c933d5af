use std::{cell::RefCell, collections::VecDeque, marker::PhantomData};

use super::executor::{Executor, Task};

thread_local! {
    static EXEC_CTX: RefCell<Option<ExecCtxState>> = const { RefCell::new(None) };
}

struct ExecCtxState {
    depth: usize,
    queue: VecDeque<Task>,
}

/// 线程本地的延迟执行上下文。
///
/// # 设计背景（Why）
/// - 回调不应在触发点同步执行：触发方可能仍持有锁或处于不一致的中间状态；
/// - 借鉴“执行上下文（exec ctx）”模式：调用栈入口处进入上下文，期间提交的任务先入队，
///   当最外层上下文退出（即当前执行流让出）时统一运行。
///
/// # 契约说明（What）
/// - [`ExecCtx::enter`] 可嵌套，只有最外层守卫析构时才排空队列；
/// - [`ExecCtx::run`] 在存在活动上下文时延迟执行任务，否则立即在调用线程上执行；
/// - 同一线程上提交的任务按提交顺序执行；不同线程的上下文之间没有顺序保证。
///
/// # 风险提示（Trade-offs）
/// - 守卫不可跨线程移动（`!Send`），以免在错误的线程上排空队列。
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecCtx;

impl ExecCtx {
    /// 进入执行上下文，返回的守卫析构时排空延迟任务。
    pub fn enter() -> ExecCtxGuard {
        EXEC_CTX.with(|cell| {
            let mut slot = cell.borrow_mut();
            match slot.as_mut() {
                Some(state) => state.depth += 1,
                None => {
                    *slot = Some(ExecCtxState {
                        depth: 1,
                        queue: VecDeque::new(),
                    })
                }
            }
        });
        ExecCtxGuard {
            _not_send: PhantomData,
        }
    }

    /// 当前线程是否处于执行上下文中。
    pub fn is_active() -> bool {
        EXEC_CTX.with(|cell| cell.borrow().is_some())
    }

    /// 提交任务：有活动上下文时延迟执行，否则立即执行。
    pub fn run(task: Task) {
        let deferred = EXEC_CTX.with(|cell| match cell.borrow_mut().as_mut() {
            Some(state) => {
                state.queue.push_back(task);
                None
            }
            None => Some(task),
        });
        if let Some(task) = deferred {
            task();
        }
    }

    /// 立即排空当前线程上的延迟任务，包括排空过程中新提交的任务。
    pub fn flush() {
        loop {
            let next = EXEC_CTX.with(|cell| {
                cell.borrow_mut()
                    .as_mut()
                    .and_then(|state| state.queue.pop_front())
            });
            match next {
                Some(task) => task(),
                None => return,
            }
        }
    }
}

impl Executor for ExecCtx {
    fn execute(&self, task: Task) {
        ExecCtx::run(task);
    }
}

/// [`ExecCtx::enter`] 返回的守卫。
#[must_use = "守卫析构时才会排空延迟任务"]
pub struct ExecCtxGuard {
    _not_send: PhantomData<*const ()>,
}

impl std::fmt::Debug for ExecCtxGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExecCtxGuard")
    }
}

impl Drop for ExecCtxGuard {
    fn drop(&mut self) {
        let outermost = EXEC_CTX.with(|cell| match cell.borrow_mut().as_mut() {
            Some(state) if state.depth == 1 => true,
            Some(state) => {
                state.depth -= 1;
                false
            }
            None => false,
        });
        if outermost {
            ExecCtx::flush();
            EXEC_CTX.with(|cell| *cell.borrow_mut() = None);
        }
    }
}
