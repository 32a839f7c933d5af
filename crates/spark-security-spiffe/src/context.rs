//! 请求对象携带的用户上下文。
//!
//! 重载请求与授权检查请求都允许能力实现挂载任意上下文，并可注册销毁钩子。
//! 钩子在上下文析构时恰好运行一次，请求对象在任何退出路径上被释放都会触发它。

use std::{any::Any, fmt};

type DestroyHook = Box<dyn FnOnce(Box<dyn Any + Send>) + Send>;

/// 挂载在请求对象上的用户上下文。
pub struct RequestContext {
    value: Option<Box<dyn Any + Send>>,
    on_destroy: Option<DestroyHook>,
}

impl RequestContext {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Some(Box::new(value)),
            on_destroy: None,
        }
    }

    /// 注册销毁钩子，钩子接收上下文值的所有权。
    pub fn with_destroy<F>(mut self, on_destroy: F) -> Self
    where
        F: FnOnce(Box<dyn Any + Send>) + Send + 'static,
    {
        self.on_destroy = Some(Box::new(on_destroy));
        self
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.as_ref().and_then(|value| value.downcast_ref())
    }

    pub fn downcast_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.as_mut().and_then(|value| value.downcast_mut())
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if let (Some(hook), Some(value)) = (self.on_destroy.take(), self.value.take()) {
            hook(value);
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("has_destroy_hook", &self.on_destroy.is_some())
            .finish_non_exhaustive()
    }
}
