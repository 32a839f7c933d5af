use std::collections::VecDeque;

use parking_lot::Mutex;

use super::executor::{Executor, Task};

/// 单消费者有序任务队列。
///
/// # 设计背景（Why）
/// - 同一连通性状态机的通知必须按 `set_state` 的调用顺序送达，并且不能并发执行；
/// - 借鉴“合并器（combiner）”模式：不为队列配备专用线程，而是由首个发现队列空闲的提交者
///   负责排空队列，其余并发提交者只入队即返回。
///
/// # 逻辑解析（How）
/// 1. `run` 在锁内入队；若已有排空者则立即返回；
/// 2. 否则当前线程成为排空者，逐个出队并在锁外执行任务；
/// 3. 队列为空时清除排空标记并返回。任务内部再次提交到同一序列化器时只会入队，
///    不会递归执行，因此顺序与“不重叠”保证在重入场景同样成立。
///
/// # 契约说明（What）
/// - **后置条件**：同一实例上的任务严格按入队顺序执行，任意时刻至多一个任务在运行；
/// - 任务 panic 时排空标记会被复位，后续提交仍可被执行，但 panic 会传播给当前排空者。
///
/// # 风险提示（Trade-offs）
/// - 排空者线程会执行其他线程提交的任务，长耗时任务会放大该线程的延迟。
#[derive(Debug, Default)]
pub struct WorkSerializer {
    state: Mutex<SerializerState>,
}

#[derive(Default)]
struct SerializerState {
    queue: VecDeque<Task>,
    draining: bool,
}

impl std::fmt::Debug for SerializerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializerState")
            .field("queued", &self.queue.len())
            .field("draining", &self.draining)
            .finish()
    }
}

impl WorkSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交任务；若当前无排空者，则在调用线程上排空队列。
    pub fn run(&self, task: Task) {
        {
            let mut state = self.state.lock();
            state.queue.push_back(task);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        let _reset = DrainReset { serializer: self };
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            next();
        }
    }

    /// 队列中尚未执行的任务数量。
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl Executor for WorkSerializer {
    fn execute(&self, task: Task) {
        self.run(task);
    }
}

/// 任务 panic 展开时复位排空标记。
struct DrainReset<'a> {
    serializer: &'a WorkSerializer,
}

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.serializer.state.lock().draining = false;
        }
    }
}
