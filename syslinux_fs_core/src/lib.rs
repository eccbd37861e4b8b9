//! syslinux-fs-core: 引导加载器使用的只读文件系统驱动
//!
//! 本 crate 提供块缓存和 ext2/3/4、FAT12/16/32（含 VFAT 长文件名）、NTFS、
//! UFS1/2、btrfs 的只读驱动。所有驱动实现同一个 [`FsOps`] 接口，文件读取
//! 统一以扇区为单位，经 extent 映射后直接从设备读取。

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

// 公共模块
pub mod block;
pub mod bmap;
pub mod cache;
pub mod codepage;
pub mod consts;
pub mod error;
pub mod fs;
pub mod types;

// 驱动
pub mod btrfs;
pub mod ext2;
pub mod fat;
pub mod ntfs;
pub mod ufs;

// 重新导出常用类型
pub use block::{BlockDev, BlockDevice};
pub use cache::BlockCache;
pub use codepage::Codepage;
pub use consts::*;
pub use error::{Error, ErrorKind, Result};
pub use fs::{generic_getfssec, FsOps, OpenFile};
pub use types::*;

pub use btrfs::BtrfsFs;
pub use ext2::Ext2Fs;
pub use fat::FatFs;
pub use ntfs::NtfsFs;
pub use ufs::UfsFs;
