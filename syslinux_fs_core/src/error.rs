//! 错误处理模块

use core::fmt;

/// 错误分类
///
/// 与引导期驱动的错误分类一一对应：挂载失败、查找未命中、结构损坏、
/// I/O 失败以及不支持的特性。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 超级块/引导扇区魔数不匹配，无法挂载
    BadMagic,
    /// 名字或 inode 不存在
    NotFound,
    /// 路径中间分量不是目录
    NotDirectory,
    /// 目标不是普通文件
    NotFile,
    /// 符号链接过多或链接路径过长
    TooManyLinks,
    /// 磁盘结构损坏（fixup 不一致、头部魔数错误、越界）
    Corrupted,
    /// 底层设备读失败
    Io,
    /// 不支持的特性（多设备 btrfs、压缩/加密数据等）
    Unsupported,
    /// 参数非法
    InvalidInput,
    /// 固定容量结构已满
    NoSpace,
}

impl ErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadMagic => "bad magic",
            ErrorKind::NotFound => "not found",
            ErrorKind::NotDirectory => "not a directory",
            ErrorKind::NotFile => "not a regular file",
            ErrorKind::TooManyLinks => "too many symlinks",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::Io => "i/o error",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::NoSpace => "no space",
        }
    }
}

/// 文件系统错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

impl Error {
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &'static str {
        self.message
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind, kind.as_str())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl core::error::Error for Error {}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let message = match err.kind() {
            std::io::ErrorKind::UnexpectedEof => "unexpected end of device",
            std::io::ErrorKind::NotFound => "device not found",
            std::io::ErrorKind::PermissionDenied => "device permission denied",
            _ => "device i/o failure",
        };
        Self::new(ErrorKind::Io, message)
    }
}

/// 文件系统 Result 类型
pub type Result<T> = core::result::Result<T, Error>;
