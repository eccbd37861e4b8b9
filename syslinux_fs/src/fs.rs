//! 文件系统分发层：挂载探测、路径解析以及对各驱动的统一调用。

use alloc::borrow::ToOwned;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use syslinux_fs_core::{
    BlockCache, BlockDev, BlockDevice, BtrfsFs, DirCursor, DirEntry, Ext2Fs, FatFs, FsOps,
    Inode, InodeType, NtfsFs, OpenFile, UfsFs, DEFAULT_CACHE_BLOCKS, MAX_SYMLINK_BUF,
    MAX_SYMLINK_CNT,
};

use crate::{
    dir::DirReader,
    error::Context,
    file::File,
    Error, ErrorKind, Result,
};

/// 支持的文件系统类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsType {
    Ext2,
    Btrfs,
    Ntfs,
    Ufs,
    Fat,
}

impl FsType {
    /// 驱动名
    pub fn name(self) -> &'static str {
        match self {
            FsType::Ext2 => "ext2",
            FsType::Btrfs => "btrfs",
            FsType::Ntfs => "ntfs",
            FsType::Ufs => "ufs",
            FsType::Fat => "vfat",
        }
    }
}

/// 文件系统配置参数
#[derive(Debug, Clone)]
pub struct FsConfig {
    /// 块缓存容量（块数）
    pub cache_blocks: usize,
    /// btrfs 子卷名，`None` 使用默认子卷
    pub subvolume: Option<String>,
    /// 挂载时依次尝试的驱动
    pub probe_order: Vec<FsType>,
    /// 分区在设备上的字节偏移
    pub partition_offset: u64,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            cache_blocks: DEFAULT_CACHE_BLOCKS,
            subvolume: None,
            probe_order: vec![
                FsType::Ext2,
                FsType::Btrfs,
                FsType::Ntfs,
                FsType::Ufs,
                FsType::Fat,
            ],
            partition_offset: 0,
        }
    }
}

/// 文件系统状态信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFs {
    pub fs_type: FsType,
    pub driver: &'static str,
    pub block_size: u32,
    pub sector_size: u32,
    pub uuid: Option<[u8; 16]>,
}

/// 文件属性
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub ino: u64,
    pub kind: InodeType,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl From<&Inode> for Metadata {
    fn from(inode: &Inode) -> Self {
        Self {
            ino: inode.ino,
            kind: inode.mode,
            size: inode.size,
            atime: inode.atime,
            mtime: inode.mtime,
            ctime: inode.ctime,
        }
    }
}

/// 已挂载的驱动实例
pub enum Driver {
    Ext2(Ext2Fs),
    Btrfs(BtrfsFs),
    Ntfs(NtfsFs),
    Ufs(UfsFs),
    Fat(FatFs),
}

/// 把调用转发给当前驱动
macro_rules! dispatch {
    ($driver:expr, $fs:ident => $body:expr) => {
        match $driver {
            Driver::Ext2($fs) => $body,
            Driver::Btrfs($fs) => $body,
            Driver::Ntfs($fs) => $body,
            Driver::Ufs($fs) => $body,
            Driver::Fat($fs) => $body,
        }
    };
}

impl Driver {
    /// 用指定驱动挂载
    fn mount<D: BlockDevice>(
        fs_type: FsType,
        cache: &mut BlockCache<D>,
        config: &FsConfig,
    ) -> Result<Self> {
        Ok(match fs_type {
            FsType::Ext2 => Driver::Ext2(Ext2Fs::mount(cache)?),
            FsType::Btrfs => Driver::Btrfs(BtrfsFs::mount(cache, config.subvolume.as_deref())?),
            FsType::Ntfs => Driver::Ntfs(NtfsFs::mount(cache)?),
            FsType::Ufs => Driver::Ufs(UfsFs::mount(cache)?),
            FsType::Fat => Driver::Fat(FatFs::mount(cache)?),
        })
    }

    pub fn fs_type(&self) -> FsType {
        match self {
            Driver::Ext2(_) => FsType::Ext2,
            Driver::Btrfs(_) => FsType::Btrfs,
            Driver::Ntfs(_) => FsType::Ntfs,
            Driver::Ufs(_) => FsType::Ufs,
            Driver::Fat(_) => FsType::Fat,
        }
    }

    pub fn name(&self) -> &'static str {
        dispatch!(self, fs => fs.name())
    }

    pub fn block_shift(&self) -> u32 {
        dispatch!(self, fs => fs.block_shift())
    }

    pub fn uuid(&self) -> Option<[u8; 16]> {
        dispatch!(self, fs => fs.uuid())
    }

    pub(crate) fn iget_root<D: BlockDevice>(&self, cache: &mut BlockCache<D>) -> Result<Inode> {
        dispatch!(self, fs => fs.iget_root(cache))
    }

    pub(crate) fn iget<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        name: &[u8],
        parent: &Inode,
    ) -> Result<Option<Inode>> {
        dispatch!(self, fs => fs.iget(cache, name, parent))
    }

    pub(crate) fn readdir<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &mut Inode,
        cursor: &mut DirCursor,
    ) -> Result<Option<DirEntry>> {
        dispatch!(self, fs => fs.readdir(cache, dir, cursor))
    }

    pub(crate) fn readlink<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &Inode,
    ) -> Result<Vec<u8>> {
        dispatch!(self, fs => fs.readlink(cache, inode))
    }

    pub(crate) fn getfssec<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        file: &mut OpenFile,
        buf: &mut [u8],
        sectors: u32,
    ) -> Result<(usize, bool)> {
        dispatch!(self, fs => fs.getfssec(cache, file, buf, sectors))
    }

    pub fn mangle_name(&self, src: &str) -> String {
        dispatch!(self, fs => fs.mangle_name(src))
    }
}

/// 路径上的一级：分量名和对应的 inode，根目录的名字为空
#[derive(Debug, Clone)]
struct PathNode {
    name: String,
    inode: Inode,
}

/// 已挂载的文件系统实例
///
/// 持有块缓存和驱动，所有文件、目录句柄都通过它访问设备。
pub struct Filesystem<D: BlockDevice> {
    cache: BlockCache<D>,
    driver: Driver,
    root: Inode,
    /// 当前目录，从根开始的每一级
    cwd: Vec<PathNode>,
}

impl<D: BlockDevice> Filesystem<D> {
    /// 按 `config.probe_order` 依次尝试各驱动，第一个挂载成功的胜出
    pub fn mount(device: D, config: FsConfig) -> Result<Self> {
        let mut cache = Self::new_cache(device, &config)?;
        for &fs_type in &config.probe_order {
            match Driver::mount(fs_type, &mut cache, &config) {
                Ok(driver) => return Self::with_driver(cache, driver),
                Err(e) if e.kind() == ErrorKind::BadMagic => {
                    debug!("probe {}: not recognized", fs_type.name());
                }
                Err(e) => warn!("probe {}: {}", fs_type.name(), e),
            }
        }
        Err(Error::new(ErrorKind::BadMagic, "no supported filesystem found"))
    }

    /// 只用指定的驱动挂载
    pub fn mount_as(device: D, fs_type: FsType, config: FsConfig) -> Result<Self> {
        let mut cache = Self::new_cache(device, &config)?;
        let driver = Driver::mount(fs_type, &mut cache, &config)?;
        Self::with_driver(cache, driver)
    }

    fn new_cache(device: D, config: &FsConfig) -> Result<BlockCache<D>> {
        let mut bdev = BlockDev::new(device)?;
        if config.partition_offset != 0 {
            bdev.set_partition_offset(config.partition_offset)?;
        }
        BlockCache::new(bdev, config.cache_blocks).context("cache needs at least two blocks")
    }

    fn with_driver(mut cache: BlockCache<D>, driver: Driver) -> Result<Self> {
        let root = driver.iget_root(&mut cache)?;
        if !root.is_dir() {
            return Err(Error::new(ErrorKind::Corrupted, "root is not a directory"));
        }
        info!(
            "mounted {} filesystem, block size {}",
            driver.name(),
            1u32 << driver.block_shift()
        );
        let cwd = vec![PathNode {
            name: String::new(),
            inode: root.clone(),
        }];
        Ok(Self {
            cache,
            driver,
            root,
            cwd,
        })
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub fn fs_type(&self) -> FsType {
        self.driver.fs_type()
    }

    pub fn root(&self) -> &Inode {
        &self.root
    }

    pub fn cache(&self) -> &BlockCache<D> {
        &self.cache
    }

    pub fn sector_shift(&self) -> u32 {
        self.cache.sector_shift()
    }

    /// 卸载并取回设备
    pub fn into_device(self) -> D {
        self.cache.into_bdev().into_inner()
    }

    /// 解析路径
    ///
    /// 绝对路径从根开始，相对路径从当前目录开始。中间分量的符号链接总是跟随，
    /// 最后一个分量只在 `follow_last` 时跟随。
    ///
    /// # 返回
    ///
    /// 从根到目标的每一级
    fn walk(&mut self, path: &str, follow_last: bool) -> Result<Vec<PathNode>> {
        let mut pending = self.driver.mangle_name(path);
        let mut stack = if pending.starts_with('/') {
            self.cwd[..1].to_vec()
        } else {
            self.cwd.clone()
        };
        let mut links = 0;

        loop {
            let trimmed = pending.trim_start_matches('/');
            if trimmed.is_empty() {
                return Ok(stack);
            }
            let (name, rest) = match trimmed.find('/') {
                Some(i) => (trimmed[..i].to_owned(), trimmed[i + 1..].to_owned()),
                None => (trimmed.to_owned(), String::new()),
            };

            match name.as_str() {
                "." => {}
                ".." => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                _ => {
                    let parent = match stack.last() {
                        Some(node) => &node.inode,
                        None => &self.root,
                    };
                    if !parent.is_dir() {
                        return Err(Error::new(ErrorKind::NotDirectory, "not a directory"));
                    }
                    let child = self
                        .driver
                        .iget(&mut self.cache, name.as_bytes(), parent)?
                        .context("no such file or directory")?;
                    trace!("walk: {} -> inode {}", name, child.ino);

                    if child.is_symlink() && (follow_last || !rest.is_empty()) {
                        links += 1;
                        if links > MAX_SYMLINK_CNT {
                            return Err(Error::new(ErrorKind::TooManyLinks, "too many symlinks"));
                        }
                        let target = self.driver.readlink(&mut self.cache, &child)?;
                        if target.len() + 1 + rest.len() > MAX_SYMLINK_BUF {
                            return Err(Error::new(ErrorKind::TooManyLinks, "symlink path too long"));
                        }
                        let target = String::from_utf8_lossy(&target);
                        if target.starts_with('/') {
                            stack.truncate(1);
                        }
                        let mut next = self.driver.mangle_name(&target);
                        next.push('/');
                        next.push_str(&rest);
                        pending = next;
                        continue;
                    }
                    stack.push(PathNode { name, inode: child });
                }
            }
            pending = rest;
        }
    }

    /// 查找路径对应的 inode（跟随符号链接）
    pub fn searchdir(&mut self, path: &str) -> Result<Inode> {
        let mut stack = self.walk(path, true)?;
        match stack.pop() {
            Some(node) => Ok(node.inode),
            None => Ok(self.root.clone()),
        }
    }

    /// 打开普通文件
    pub fn open(&mut self, path: &str) -> Result<File<'_, D>> {
        let inode = self.searchdir(path)?;
        if !inode.is_file() {
            return Err(Error::new(ErrorKind::NotFile, "not a regular file"));
        }
        debug!("open {}: inode {}, {} bytes", path, inode.ino, inode.size);
        Ok(File::new(self, inode))
    }

    /// 打开目录
    pub fn opendir(&mut self, path: &str) -> Result<DirReader<'_, D>> {
        let inode = self.searchdir(path)?;
        if !inode.is_dir() {
            return Err(Error::new(ErrorKind::NotDirectory, "not a directory"));
        }
        Ok(DirReader::new(self, inode))
    }

    /// 切换当前目录
    pub fn chdir(&mut self, path: &str) -> Result<()> {
        let stack = self.walk(path, true)?;
        if !stack.last().is_some_and(|node| node.inode.is_dir()) {
            return Err(Error::new(ErrorKind::NotDirectory, "not a directory"));
        }
        self.cwd = stack;
        Ok(())
    }

    /// 当前目录的绝对路径
    pub fn cwd(&self) -> String {
        if self.cwd.len() <= 1 {
            return "/".to_owned();
        }
        let mut path = String::new();
        for node in &self.cwd[1..] {
            path.push('/');
            path.push_str(&node.name);
        }
        path
    }

    /// 读取符号链接目标（不跟随最后一级）
    pub fn read_link(&mut self, path: &str) -> Result<Vec<u8>> {
        let inode = match self.walk(path, false)?.pop() {
            Some(node) => node.inode,
            None => self.root.clone(),
        };
        if !inode.is_symlink() {
            return Err(Error::new(ErrorKind::InvalidInput, "not a symlink"));
        }
        self.driver.readlink(&mut self.cache, &inode)
    }

    /// 路径对应文件的属性
    pub fn stat(&mut self, path: &str) -> Result<Metadata> {
        self.searchdir(path).map(|inode| Metadata::from(&inode))
    }

    /// 文件系统状态信息
    pub fn statfs(&self) -> StatFs {
        StatFs {
            fs_type: self.driver.fs_type(),
            driver: self.driver.name(),
            block_size: 1 << self.driver.block_shift(),
            sector_size: 1 << self.cache.sector_shift(),
            uuid: self.driver.uuid(),
        }
    }

    pub(crate) fn getfssec(
        &mut self,
        file: &mut OpenFile,
        buf: &mut [u8],
        sectors: u32,
    ) -> Result<(usize, bool)> {
        self.driver.getfssec(&mut self.cache, file, buf, sectors)
    }

    pub(crate) fn readdir(&mut self, dir: &mut Inode, cursor: &mut DirCursor) -> Result<Option<DirEntry>> {
        self.driver.readdir(&mut self.cache, dir, cursor)
    }
}
