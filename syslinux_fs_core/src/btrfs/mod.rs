//! btrfs 只读驱动
//!
//! 只支持单设备卷。元数据通过 B 树查找，逻辑地址经 chunk 映射表转换为
//! 物理地址；映射表先由 superblock 内嵌的 system chunk 填充，再扫描 chunk 树补全。

mod chunk;
mod items;
mod super_block;
mod tree;

pub use chunk::{ChunkMap, ChunkMapItem, MAX_CHUNK_ENTRIES};
pub use items::{name_hash, FileExtent, Key};
pub use super_block::{sb_offset, SuperBlock, BTRFS_MAGIC, BTRFS_SUPER_FLAG_METADUMP};
pub use tree::{Cursor, TreeReader};

use core::cmp::Ordering;

use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, warn};

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{generic_getfssec, resident_getfssec, FsOps, OpenFile};
use crate::types::{DirCursor, DirEntry, Extent, Inode, InodeData, InodeType, Pstart};

use items::{
    ft_to_type, parse_chunk, parse_dir_items, root_ref_name, InodeItem, RootItem,
    BTRFS_CHUNK_ITEM_KEY, BTRFS_DIR_INDEX_KEY, BTRFS_DIR_ITEM_KEY, BTRFS_EXTENT_DATA_KEY,
    BTRFS_FIRST_CHUNK_TREE_OBJECTID, BTRFS_FIRST_FREE_OBJECTID, BTRFS_FS_TREE_OBJECTID,
    BTRFS_INODE_ITEM_KEY, BTRFS_ROOT_ITEM_KEY, BTRFS_ROOT_REF_KEY,
};

/// 缓存块大小的 log2
pub const BTRFS_BLOCK_SHIFT: u32 = 12;

/// 内联在 extent item 中的文件数据
#[derive(Debug, Clone)]
pub struct InlineData {
    /// 压缩或加密过，无法直接读取
    pub encoded: bool,
    pub data: Vec<u8>,
}

/// btrfs inode 私有数据
#[derive(Debug, Clone)]
pub struct BtrfsInode {
    pub objectid: u64,
    /// 文件全部内容内联时的数据
    pub inline: Option<InlineData>,
}

fn pvt(inode: &Inode) -> Result<&BtrfsInode> {
    match &inode.data {
        InodeData::Btrfs(pvt) => Ok(pvt),
        _ => Err(Error::new(ErrorKind::InvalidInput, "inode is not a btrfs inode")),
    }
}

/// btrfs 文件系统实例
pub struct BtrfsFs {
    sb: SuperBlock,
    reader: TreeReader,
    /// 当前子卷的 objectid
    subvol: u64,
    /// 子卷 B 树根的逻辑地址
    fs_tree: u64,
    root_dir: u64,
    sector_shift: u32,
}

impl BtrfsFs {
    /// 挂载
    ///
    /// # 参数
    ///
    /// * `cache` - 块缓存
    /// * `subvolume` - 子卷名；`None` 或空串使用默认的 FS 树，名字不存在时同样回退到默认树
    pub fn mount<D: BlockDevice>(cache: &mut BlockCache<D>, subvolume: Option<&str>) -> Result<Self> {
        let sb = SuperBlock::load(cache.bdev_mut())?;
        if sb.num_devices > 1 {
            return Err(Error::new(ErrorKind::Unsupported, "multi-device btrfs"));
        }
        let sector_shift = cache.sector_shift();
        if sb.sectorsize < 1 << sector_shift {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "btrfs sector smaller than device sector",
            ));
        }
        cache.init(BTRFS_BLOCK_SHIFT.max(sector_shift))?;

        let mut reader = TreeReader {
            chunks: sb.sys_chunks()?,
            nodesize: sb.nodesize as usize,
            fsid: sb.fsid,
        };
        if !sb.is_metadump() {
            let chunks = Self::read_chunk_tree(&reader, cache, sb.chunk_root)?;
            for item in chunks {
                reader.chunks.insert(item)?;
            }
        }
        debug!("btrfs: {} chunks mapped", reader.chunks.len());

        let subvol = match subvolume.filter(|name| !name.is_empty()) {
            Some(name) => match Self::find_subvol(&reader, cache, sb.root, name)? {
                Some(id) => id,
                None => {
                    warn!("btrfs: subvolume {} not found, using default", name);
                    BTRFS_FS_TREE_OBJECTID
                }
            },
            None => BTRFS_FS_TREE_OBJECTID,
        };

        let target = Key::new(subvol, BTRFS_ROOT_ITEM_KEY, u64::MAX);
        let (cursor, _) = reader.search(cache, sb.root, &target)?;
        let root = match cursor.item()? {
            Some((key, data)) if key.cmp_type(&target) == Ordering::Equal => RootItem::parse(data)?,
            _ => return Err(Error::new(ErrorKind::Corrupted, "missing btrfs root item")),
        };
        let root_dir = match root.root_dirid {
            0 => BTRFS_FIRST_FREE_OBJECTID,
            id => id,
        };
        debug!(
            "btrfs: subvolume {} tree at {:#x} level {}",
            subvol, root.bytenr, root.level
        );

        Ok(Self {
            sb,
            reader,
            subvol,
            fs_tree: root.bytenr,
            root_dir,
            sector_shift,
        })
    }

    /// 扫描 chunk 树中的全部 chunk item
    fn read_chunk_tree<D: BlockDevice>(
        reader: &TreeReader,
        cache: &mut BlockCache<D>,
        chunk_root: u64,
    ) -> Result<Vec<ChunkMapItem>> {
        let target = Key::new(BTRFS_FIRST_CHUNK_TREE_OBJECTID, BTRFS_CHUNK_ITEM_KEY, 0);
        let mut cursor = reader.seek(cache, chunk_root, &target)?;
        let mut chunks = Vec::new();
        while let Some((key, data)) = cursor.item()? {
            if key.cmp_type(&target) != Ordering::Equal {
                break;
            }
            let (item, _) = parse_chunk(key.offset, data)?;
            chunks.push(item);
            if !reader.next(cache, &mut cursor)? {
                break;
            }
        }
        Ok(chunks)
    }

    /// 在 FS 树的 ROOT_REF 中按名字查找子卷
    fn find_subvol<D: BlockDevice>(
        reader: &TreeReader,
        cache: &mut BlockCache<D>,
        tree_root: u64,
        name: &str,
    ) -> Result<Option<u64>> {
        let target = Key::new(BTRFS_FS_TREE_OBJECTID, BTRFS_ROOT_REF_KEY, 0);
        let mut cursor = reader.seek(cache, tree_root, &target)?;
        while let Some((key, data)) = cursor.item()? {
            if key.cmp_type(&target) != Ordering::Equal {
                break;
            }
            if root_ref_name(data)? == name.as_bytes() {
                return Ok(Some(key.offset));
            }
            if !reader.next(cache, &mut cursor)? {
                break;
            }
        }
        Ok(None)
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    /// 当前使用的子卷
    pub fn subvolume_id(&self) -> u64 {
        self.subvol
    }

    pub fn chunk_map(&self) -> &ChunkMap {
        &self.reader.chunks
    }

    /// 逻辑地址转换为物理地址，落在空隙中是错误
    pub fn logical_physical(&self, logical: u64) -> Result<u64> {
        self.reader.logical_physical(logical)
    }

    /// 按 objectid 读取 inode
    pub fn iget_by_objectid<D: BlockDevice>(&self, cache: &mut BlockCache<D>, id: u64) -> Result<Inode> {
        let target = Key::new(id, BTRFS_INODE_ITEM_KEY, 0);
        let (cursor, exact) = self.reader.search(cache, self.fs_tree, &target)?;
        let item = match cursor.item()? {
            Some((_, data)) if exact => InodeItem::parse(data)?,
            _ => return Err(Error::new(ErrorKind::Corrupted, "missing btrfs inode item")),
        };

        let mode = InodeType::from_mode(item.mode);
        let inline = match mode {
            InodeType::RegularFile | InodeType::Symlink => self.inline_data(cache, id, item.size)?,
            _ => None,
        };
        Ok(Inode {
            ino: id,
            mode,
            size: item.size,
            atime: item.atime,
            mtime: item.mtime,
            ctime: item.ctime,
            data: InodeData::Btrfs(BtrfsInode { objectid: id, inline }),
        })
    }

    /// 文件偏移 0 处是内联 extent 时取出其数据
    fn inline_data<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        id: u64,
        size: u64,
    ) -> Result<Option<InlineData>> {
        let target = Key::new(id, BTRFS_EXTENT_DATA_KEY, 0);
        let (cursor, exact) = self.reader.search(cache, self.fs_tree, &target)?;
        if !exact {
            return Ok(None);
        }
        match cursor.item()? {
            Some((_, data)) => match FileExtent::parse(data)? {
                FileExtent::Inline { encoded, data } => {
                    let len = if encoded {
                        data.len()
                    } else {
                        data.len().min(size as usize)
                    };
                    Ok(Some(InlineData {
                        encoded,
                        data: data[..len].to_vec(),
                    }))
                }
                FileExtent::Regular { .. } => Ok(None),
            },
            None => Ok(None),
        }
    }

    /// 普通 extent 中 `pos` 处的映射
    fn map_regular(&self, extent_start: u64, extent: &FileExtent, pos: u64, lstart: u64) -> Result<Option<Extent>> {
        let (encoded, prealloc, disk_bytenr, offset, num_bytes) = match *extent {
            FileExtent::Regular {
                encoded,
                prealloc,
                disk_bytenr,
                offset,
                num_bytes,
            } => (encoded, prealloc, disk_bytenr, offset, num_bytes),
            FileExtent::Inline { .. } => {
                return Err(Error::new(ErrorKind::Corrupted, "inline extent past file start"))
            }
        };
        let end = extent_start + num_bytes;
        if pos >= end {
            return Ok(None);
        }
        if encoded {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "compressed or encrypted btrfs extent",
            ));
        }

        let sector = 1u64 << self.sector_shift;
        let bytes = end - pos;
        if prealloc || disk_bytenr == 0 {
            return Ok(Some(Extent {
                lstart,
                pstart: Pstart::Zero,
                len: bytes.div_ceil(sector),
            }));
        }

        let logical = disk_bytenr + offset + (pos - extent_start);
        let (physical, avail) = self
            .reader
            .chunks
            .map(logical)
            .ok_or(Error::new(ErrorKind::Corrupted, "file extent not covered by any chunk"))?;
        if physical & (sector - 1) != 0 {
            return Err(Error::new(ErrorKind::Corrupted, "file extent not sector aligned"));
        }
        Ok(Some(Extent {
            lstart,
            pstart: Pstart::Sector(physical >> self.sector_shift),
            len: bytes.min(avail).div_ceil(sector),
        }))
    }
}

impl FsOps for BtrfsFs {
    fn name(&self) -> &'static str {
        "btrfs"
    }

    fn block_shift(&self) -> u32 {
        BTRFS_BLOCK_SHIFT.max(self.sector_shift)
    }

    fn uuid(&self) -> Option<[u8; 16]> {
        Some(self.sb.fsid)
    }

    fn iget_root<D: BlockDevice>(&self, cache: &mut BlockCache<D>) -> Result<Inode> {
        self.iget_by_objectid(cache, self.root_dir)
    }

    /// 按名字哈希查找 DIR_ITEM，再在哈希冲突的多个目录项中比较名字
    fn iget<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        name: &[u8],
        parent: &Inode,
    ) -> Result<Option<Inode>> {
        let target = Key::new(parent.ino, BTRFS_DIR_ITEM_KEY, name_hash(name));
        let (cursor, exact) = self.reader.search(cache, self.fs_tree, &target)?;
        if !exact {
            return Ok(None);
        }
        let location = match cursor.item()? {
            Some((_, data)) => parse_dir_items(data)?
                .into_iter()
                .find(|item| item.name == name)
                .map(|item| item.location),
            None => None,
        };
        match location {
            Some(loc) if loc.item_type == BTRFS_ROOT_ITEM_KEY => Err(Error::new(
                ErrorKind::Unsupported,
                "lookup crosses into another subvolume",
            )),
            Some(loc) => self.iget_by_objectid(cache, loc.objectid).map(Some),
            None => Ok(None),
        }
    }

    /// `cursor.offset` 是下一个要找的 DIR_INDEX 序号
    fn readdir<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &mut Inode,
        cursor: &mut DirCursor,
    ) -> Result<Option<DirEntry>> {
        let target = Key::new(dir.ino, BTRFS_DIR_INDEX_KEY, cursor.offset);
        let tc = self.reader.seek(cache, self.fs_tree, &target)?;
        let (key, data) = match tc.item()? {
            Some((key, data)) if key.cmp_type(&target) == Ordering::Equal => (key, data),
            _ => return Ok(None),
        };
        let items = parse_dir_items(data)?;
        let item = items
            .first()
            .ok_or(Error::new(ErrorKind::Corrupted, "empty btrfs dir index"))?;

        cursor.offset = key.offset + 1;
        Ok(Some(DirEntry {
            ino: item.location.objectid,
            offset: cursor.offset,
            kind: ft_to_type(item.file_type),
            name: String::from_utf8_lossy(item.name).into_owned(),
        }))
    }

    /// 找到覆盖 `lstart` 的 EXTENT_DATA；没有时返回到下一个 extent（或文件末尾）
    /// 为止的空洞
    fn next_extent<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &mut Inode,
        lstart: u64,
    ) -> Result<Option<Extent>> {
        if pvt(inode)?.inline.is_some() {
            return Ok(None);
        }
        let sector = 1u64 << self.sector_shift;
        let pos = lstart << self.sector_shift;
        let target = Key::new(inode.ino, BTRFS_EXTENT_DATA_KEY, pos);
        let (mut tc, _) = self.reader.search(cache, self.fs_tree, &target)?;

        if let Some((key, data)) = tc.item()? {
            if key.cmp_type(&target) == Ordering::Equal && key.offset <= pos {
                let extent = FileExtent::parse(data)?;
                if let Some(ext) = self.map_regular(key.offset, &extent, pos, lstart)? {
                    return Ok(Some(ext));
                }
            }
        }

        let next_start = loop {
            match tc.key() {
                Some(k) if k <= target => {
                    self.reader.next(cache, &mut tc)?;
                }
                Some(k) if k.cmp_type(&target) == Ordering::Equal => break Some(k.offset),
                _ => break None,
            }
        };
        let hole_end = next_start.unwrap_or(inode.size.next_multiple_of(sector));
        if hole_end <= pos {
            return Ok(None);
        }
        Ok(Some(Extent {
            lstart,
            pstart: Pstart::Zero,
            len: (hole_end - pos).div_ceil(sector),
        }))
    }

    /// 符号链接的目标总是内联存放
    fn readlink<D: BlockDevice>(&self, _cache: &mut BlockCache<D>, inode: &Inode) -> Result<Vec<u8>> {
        match &pvt(inode)?.inline {
            Some(inline) if inline.encoded => Err(Error::new(
                ErrorKind::Unsupported,
                "compressed btrfs symlink",
            )),
            Some(inline) => Ok(inline.data.clone()),
            None => Err(Error::new(ErrorKind::Corrupted, "btrfs symlink without inline data")),
        }
    }

    fn getfssec<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        file: &mut OpenFile,
        buf: &mut [u8],
        sectors: u32,
    ) -> Result<(usize, bool)> {
        match &pvt(&file.inode)?.inline {
            Some(inline) if inline.encoded => Err(Error::new(
                ErrorKind::Unsupported,
                "compressed or encrypted btrfs extent",
            )),
            Some(inline) => {
                resident_getfssec(&inline.data, self.sector_shift, &mut file.offset, buf, sectors)
            }
            None => generic_getfssec(self, cache, file, buf, sectors),
        }
    }
}
