use tokio::{runtime::Handle, sync::mpsc};

use super::executor::{Executor, Task};

/// 当前线程不在 Tokio 运行时内。
#[derive(Debug, thiserror::Error)]
#[error("no tokio runtime is available on the current thread")]
pub struct RuntimeUnavailable;

/// 基于 Tokio 的串行执行器。
///
/// # 逻辑解析（How）
/// - 构造时在给定运行时上派生一个消费者任务，循环接收无界通道中的任务并逐个执行；
/// - 单一消费者保证任务按提交顺序运行且互不重叠，与 [`WorkSerializer`](super::WorkSerializer) 等价。
///
/// # 契约说明（What）
/// - **前置条件**：任务应为短小的同步闭包，长耗时任务会阻塞同一执行器上的后续任务与所在工作线程；
/// - **后置条件**：运行时关闭后提交的任务被静默丢弃；最后一个句柄析构后消费者任务自然退出。
#[derive(Clone, Debug)]
pub struct TokioSerialExecutor {
    sender: mpsc::UnboundedSender<Task>,
}

impl TokioSerialExecutor {
    /// 在指定运行时上创建串行执行器。
    pub fn spawn_on(handle: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = receiver.recv().await {
                task();
            }
        });
        Self { sender }
    }

    /// 在当前线程所属的运行时上创建串行执行器。
    pub fn spawn_current() -> Result<Self, RuntimeUnavailable> {
        let handle = Handle::try_current().map_err(|_| RuntimeUnavailable)?;
        Ok(Self::spawn_on(&handle))
    }
}

impl Executor for TokioSerialExecutor {
    fn execute(&self, task: Task) {
        // 消费者已退出意味着运行时正在关闭，任务随之丢弃。
        let _ = self.sender.send(task);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tasks_run_in_submission_order() {
        let executor = TokioSerialExecutor::spawn_current().expect("runtime available");
        let order = Arc::new(Mutex::new(Vec::new()));
        for value in 0..32 {
            let log = Arc::clone(&order);
            executor.execute(Box::new(move || log.lock().push(value)));
        }
        let (done_tx, done_rx) = oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = done_tx.send(());
        }));
        done_rx.await.expect("executor dropped the completion task");

        assert_eq!(*order.lock(), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn spawn_current_requires_a_runtime() {
        assert!(TokioSerialExecutor::spawn_current().is_err());
    }
}
