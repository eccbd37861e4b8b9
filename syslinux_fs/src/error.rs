//! 错误处理模块，复用核心 crate 的错误类型。

pub use syslinux_fs_core::{Error, ErrorKind, Result};

/// 为结果类型添加上下文的 trait
pub(crate) trait Context<T> {
    /// 用 `context` 替换错误信息，保留错误类别
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T> Context<T> for Result<T> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|e| Error::new(e.kind(), context))
    }
}

/// 为 `Option` 实现 Context：`None` 转换为 `NotFound`
impl<T> Context<T> for Option<T> {
    fn context(self, context: &'static str) -> Result<T> {
        self.ok_or(Error::new(ErrorKind::NotFound, context))
    }
}
