use std::sync::Arc;

/// 执行上下文接收的任务：一次性闭包，按值拥有全部负载。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// `Executor` 定义“接收一次性任务并在稍后运行”的调度契约。
///
/// # 契约说明（What）
/// - **前置条件**：任务必须满足 `Send + 'static`，执行上下文可能在其他线程运行它；
/// - **后置条件**：`execute` 返回时任务可能尚未运行；实现保证每个被接受的任务至多运行一次；
/// - 串行实现（[`WorkSerializer`](super::WorkSerializer)、`TokioSerialExecutor`）额外保证同一实例上的
///   任务按提交顺序逐个执行，彼此不重叠。
///
/// # 风险提示（Trade-offs）
/// - 契约不返回结果句柄，调用方无法得知任务何时完成；需要确认完成的场景应由任务自身发出信号。
pub trait Executor: Send + Sync + 'static {
    /// 提交任务。
    fn execute(&self, task: Task);
}

/// 组件间共享的执行上下文句柄。
pub type SharedExecutor = Arc<dyn Executor>;

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task);
    }
}
