//! 引导加载器的只读文件系统层。
//!
//! 在 `syslinux_fs_core` 的驱动之上提供挂载探测、路径解析（含符号链接）、
//! 文件和目录句柄。

// 禁用标准库，适用于引导环境
#![no_std]

// 引入内存分配库
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// 引入日志宏
#[macro_use]
extern crate log;

// 块设备实现模块
mod blockdev;
// 目录读取模块
mod dir;
// 错误处理模块
mod error;
// 文件句柄模块
mod file;
// 分发层核心逻辑模块
mod fs;

// 对外暴露块设备相关类型
pub use blockdev::{RamDisk, DEV_BSIZE};
#[cfg(feature = "std")]
pub use blockdev::FileDevice;
pub use syslinux_fs_core::{BlockDev, BlockDevice};

// 对外暴露错误处理类型
pub use error::{Error, ErrorKind, Result};

// 对外暴露文件系统相关类型
pub use dir::DirReader;
pub use file::{File, SeekFrom};
pub use fs::{Driver, Filesystem, FsConfig, FsType, Metadata, StatFs};
pub use syslinux_fs_core::{DirEntry, Inode, InodeType};

/// 驱动层，供需要直接使用单个驱动的调用者
pub use syslinux_fs_core as core_fs;
