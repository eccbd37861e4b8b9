//! FAT12/16/32 只读驱动，支持 VFAT 长文件名
//!
//! 缓存块大小等于扇区大小。FAT12/16 的根目录是数据区之前的固定区域，
//! FAT32 的根目录是普通的簇链。

mod bpb;
mod dirent;

pub use bpb::{Bpb, FatType, FAT12_MAX_CLUSTERS, FAT16_MAX_CLUSTERS, FAT32_MAX_CLUSTERS};
pub use dirent::{
    lfn_checksum, mangle_dos_name, FatAttr, LongEntry, LongName, ShortEntry, DIR_ENTRY_SIZE,
};

use alloc::string::String;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::codepage::Codepage;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{vfat_mangle_name, FsOps};
use crate::types::{DirCursor, DirEntry, Extent, Inode, InodeData, InodeType, Pstart};

use dirent::{match_longname, query_units, ATTR_LONG_NAME, DELETED_MARK};

/// FAT inode 私有数据
#[derive(Debug, Clone)]
pub struct FatInode {
    /// 首簇号；FAT12/16 根目录为 0
    pub start_cluster: u32,
    /// 首扇区
    pub start: u64,
    pub attr: FatAttr,
    /// 上一次 `next_extent` 结束时的（逻辑簇号, 物理簇号）
    extent_pos: Option<(u64, u32)>,
    /// 上一次目录读取停留的（扇区序号, 扇区号）
    dir_pos: Option<(u64, u64)>,
}

impl FatInode {
    fn new(start_cluster: u32, start: u64, attr: FatAttr) -> Self {
        Self {
            start_cluster,
            start,
            attr,
            extent_pos: None,
            dir_pos: None,
        }
    }
}

fn pvt(inode: &Inode) -> Result<&FatInode> {
    match &inode.data {
        InodeData::Fat(pvt) => Ok(pvt),
        _ => Err(Error::new(ErrorKind::InvalidInput, "inode is not a FAT inode")),
    }
}

fn pvt_mut(inode: &mut Inode) -> Result<&mut FatInode> {
    match &mut inode.data {
        InodeData::Fat(pvt) => Ok(pvt),
        _ => Err(Error::new(ErrorKind::InvalidInput, "inode is not a FAT inode")),
    }
}

/// DOS 日期时间转换为 Unix 时间戳（按 UTC 处理）
pub fn dos_time_to_unix(date: u16, time: u16) -> u64 {
    if date == 0 {
        return 0;
    }
    let year = 1980 + (date >> 9) as i64;
    let month = ((date >> 5) & 0x0f).clamp(1, 12) as i64;
    let day = (date & 0x1f).max(1) as i64;

    // 公历日期到 1970-01-01 起的天数
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    let days = era * 146097 + doe - 719468;

    let secs = (time >> 11) as i64 * 3600 + ((time >> 5) & 0x3f) as i64 * 60 + (time & 0x1f) as i64 * 2;
    (days * 86400 + secs) as u64
}

/// FAT 文件系统实例
pub struct FatFs {
    fat_type: FatType,
    sector_shift: u32,
    /// 有效 FAT 的起始扇区
    fat: u64,
    /// 根目录区起始扇区
    root: u64,
    /// 数据区起始扇区
    data: u64,
    /// FAT12/16 根目录区扇区数；FAT32 为 0
    root_size: u64,
    clusters: u32,
    root_cluster: u32,
    clust_shift: u32,
    serial: u32,
    label: [u8; 11],
    codepage: &'static Codepage,
}

impl FatFs {
    /// 挂载
    ///
    /// 读取扇区 0 的 BPB，计算 FAT 区、根目录区和数据区的位置，
    /// 再按数据区簇数确定 FAT 类型。
    pub fn mount<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<Self> {
        let sector_shift = cache.sector_shift();
        cache.init(sector_shift)?;
        let boot = cache.get(0)?;
        let bpb = Bpb::parse(&boot)?;

        if bpb.bytes_per_sector as u32 != 1 << sector_shift {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "FAT sector size differs from device sector size",
            ));
        }

        let clust_shift = bpb.sectors_per_cluster.trailing_zeros();
        let fat_size = bpb.fat_size as u64;
        let root = bpb.reserved_sectors as u64 + fat_size * bpb.fats as u64;
        let root_size = ((bpb.root_entries as u64) * DIR_ENTRY_SIZE as u64)
            .div_ceil(1 << sector_shift);
        let data = root + root_size;
        let total = bpb.total_sectors as u64;
        if total <= data || fat_size == 0 {
            return Err(Error::new(ErrorKind::BadMagic, "FAT data area is empty"));
        }

        let mut clusters = ((total - data) >> clust_shift) as u32;
        let fat_type = FatType::from_clusters(clusters);

        let mut fat = bpb.reserved_sectors as u64;
        let (root, root_size, root_cluster) = if fat_type == FatType::Fat32 {
            if bpb.ext_flags & 0x80 != 0 {
                let active = (bpb.ext_flags & 0x0f) as u64;
                if active >= bpb.fats as u64 {
                    return Err(Error::new(ErrorKind::Corrupted, "active FAT out of range"));
                }
                fat += active * fat_size;
            }
            clusters = clusters.min(FAT32_MAX_CLUSTERS);
            let rc = bpb.root_cluster;
            if rc < 2 || rc - 2 >= clusters {
                return Err(Error::new(ErrorKind::Corrupted, "bad FAT32 root cluster"));
            }
            (data + (((rc - 2) as u64) << clust_shift), 0, rc)
        } else {
            if root_size == 0 {
                return Err(Error::new(ErrorKind::BadMagic, "FAT12/16 without root directory"));
            }
            (root, root_size, 0)
        };

        debug!(
            "{} mounted: {} clusters of {} sectors, data at {}",
            fat_type.as_str(),
            clusters,
            1u32 << clust_shift,
            data
        );

        Ok(Self {
            fat_type,
            sector_shift,
            fat,
            root,
            data,
            root_size,
            clusters,
            root_cluster,
            clust_shift,
            serial: bpb.serial,
            label: bpb.label,
            codepage: Codepage::cp437(),
        })
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn clusters(&self) -> u32 {
        self.clusters
    }

    /// 卷序列号
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// 卷标（去掉填充空格）
    pub fn label(&self) -> String {
        let end = self.label.iter().rposition(|&c| c != b' ').map_or(0, |i| i + 1);
        self.label[..end]
            .iter()
            .filter_map(|&c| char::from_u32(self.codepage.to_unicode(c) as u32))
            .collect()
    }

    fn cluster_valid(&self, cluster: u32) -> bool {
        cluster >= 2 && cluster - 2 < self.clusters
    }

    fn cluster_sector(&self, cluster: u32) -> u64 {
        self.data + (((cluster - 2) as u64) << self.clust_shift)
    }

    /// 读取 FAT 表项
    ///
    /// # 返回
    ///
    /// 下一个簇号；表项达到链结束阈值时返回 `None`
    pub fn next_cluster<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        cluster: u32,
    ) -> Result<Option<u32>> {
        let shift = self.sector_shift;
        let mask = (1u64 << shift) - 1;
        let c = cluster as u64;

        let value = match self.fat_type {
            FatType::Fat12 => {
                let offset = c + (c >> 1);
                let sector = self.fat + (offset >> shift);
                let off = (offset & mask) as usize;
                let data = cache.get(sector)?;
                let raw = if off as u64 == mask {
                    // 表项跨越扇区边界
                    let hi = cache.get(sector + 1)?[0];
                    data[off] as u32 | (hi as u32) << 8
                } else {
                    LittleEndian::read_u16(&data[off..]) as u32
                };
                if cluster & 1 != 0 {
                    raw >> 4
                } else {
                    raw & 0x0fff
                }
            }
            FatType::Fat16 => {
                let offset = c << 1;
                let data = cache.get(self.fat + (offset >> shift))?;
                LittleEndian::read_u16(&data[(offset & mask) as usize..]) as u32
            }
            FatType::Fat32 => {
                let offset = c << 2;
                let data = cache.get(self.fat + (offset >> shift))?;
                LittleEndian::read_u32(&data[(offset & mask) as usize..]) & 0x0fff_ffff
            }
        };

        if value >= self.fat_type.eoc_threshold() {
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    /// 目录中 `sector` 之后的扇区
    ///
    /// 固定根目录区内顺序递增；数据区内先走完当前簇，再沿 FAT 链跳到下一簇。
    fn next_sector<D: BlockDevice>(&self, cache: &mut BlockCache<D>, sector: u64) -> Result<Option<u64>> {
        if sector < self.data {
            let next = sector + 1;
            return Ok((next < self.data).then_some(next));
        }

        let ds = sector - self.data;
        let clust_mask = (1u64 << self.clust_shift) - 1;
        if (ds + 1) & clust_mask != 0 {
            return Ok(Some(sector + 1));
        }

        let cluster = (ds >> self.clust_shift) as u32 + 2;
        match self.next_cluster(cache, cluster)? {
            Some(next) if self.cluster_valid(next) => Ok(Some(self.cluster_sector(next))),
            Some(next) => {
                warn!("FAT: directory chain points to cluster {}", next);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// 目录最多能占用的扇区数，用于限制对损坏簇链的遍历
    fn max_dir_sectors(&self) -> u64 {
        self.root_size + ((self.clusters as u64) << self.clust_shift)
    }

    /// 目录中第 `index` 个扇区；优先从上次停留的位置继续
    fn dir_sector<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &mut Inode,
        index: u64,
    ) -> Result<Option<u64>> {
        let pvt = pvt_mut(dir)?;
        let (mut pos, mut sector) = match pvt.dir_pos {
            Some((pos, sector)) if pos <= index => (pos, sector),
            _ => (0, pvt.start),
        };
        if index >= self.max_dir_sectors() {
            return Err(Error::new(ErrorKind::Corrupted, "FAT directory chain too long"));
        }
        while pos < index {
            sector = match self.next_sector(cache, sector)? {
                Some(next) => next,
                None => return Ok(None),
            };
            pos += 1;
        }
        pvt.dir_pos = Some((pos, sector));
        Ok(Some(sector))
    }

    /// 由短目录项构造 inode
    ///
    /// 首簇为 0 的目录是指向根目录的 `..`。
    fn make_inode(&self, de: &ShortEntry) -> Inode {
        let mode = if de.is_dir() {
            InodeType::Directory
        } else {
            InodeType::RegularFile
        };
        let mtime = dos_time_to_unix(de.w_date, de.w_time);
        let mut inode = Inode {
            ino: de.first_cluster as u64,
            mode,
            size: de.file_size as u64,
            atime: dos_time_to_unix(de.a_date, 0),
            mtime,
            ctime: dos_time_to_unix(de.c_date, de.c_time),
            data: InodeData::Fat(FatInode::new(de.first_cluster, 0, de.attr)),
        };
        if de.is_dir() && de.first_cluster == 0 {
            inode.ino = self.root_cluster as u64;
            inode.size = self.root_dir_size();
            inode.data = InodeData::Fat(FatInode::new(self.root_cluster, self.root, de.attr));
        } else if self.cluster_valid(de.first_cluster) {
            inode.data = InodeData::Fat(FatInode::new(
                de.first_cluster,
                self.cluster_sector(de.first_cluster),
                de.attr,
            ));
        }
        inode
    }

    /// FAT32 根目录没有记录长度，只能沿簇链走到底才知道，这里取最大值
    fn root_dir_size(&self) -> u64 {
        if self.root_size != 0 {
            self.root_size << self.sector_shift
        } else {
            u32::MAX as u64
        }
    }

    /// 在目录中按长文件名或 8.3 名查找
    fn find_entry<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &Inode,
        name: &[u8],
    ) -> Result<Option<ShortEntry>> {
        let cp = self.codepage;
        let wanted = query_units(name, cp);
        if wanted.len() > dirent::LFN_CHARS * dirent::LFN_MAX_SLOTS {
            return Ok(None);
        }
        let short = cp.encode_name(name).map(|bytes| mangle_dos_name(&bytes, cp));

        let start = pvt(dir)?.start;
        if start == 0 {
            return Ok(None);
        }
        let mut sector = Some(start);
        let mut lfn = LongName::new();
        let mut visited = 0u64;

        while let Some(s) = sector {
            visited += 1;
            if visited > self.max_dir_sectors() {
                return Err(Error::new(ErrorKind::Corrupted, "FAT directory chain too long"));
            }
            let data = cache.get(s)?;
            for raw in data.chunks_exact(DIR_ENTRY_SIZE) {
                if raw[0] == 0 {
                    return Ok(None);
                }
                if raw[0] == DELETED_MARK {
                    lfn.reset();
                    continue;
                }
                if raw[11] == ATTR_LONG_NAME {
                    lfn.feed(&LongEntry::parse(raw));
                    continue;
                }
                let de = ShortEntry::parse(raw);
                if de.attr.contains(FatAttr::VOLUME_ID) {
                    lfn.reset();
                    continue;
                }
                if let Some(long) = lfn.finish(&de.name) {
                    if match_longname(&wanted, long, cp) {
                        return Ok(Some(de));
                    }
                }
                if short.is_some_and(|short| short == de.name) {
                    return Ok(Some(de));
                }
            }
            sector = self.next_sector(cache, s)?;
        }
        Ok(None)
    }
}

impl FsOps for FatFs {
    fn name(&self) -> &'static str {
        "vfat"
    }

    fn block_shift(&self) -> u32 {
        self.sector_shift
    }

    fn iget_root<D: BlockDevice>(&self, _cache: &mut BlockCache<D>) -> Result<Inode> {
        Ok(Inode {
            ino: self.root_cluster as u64,
            mode: InodeType::Directory,
            size: self.root_dir_size(),
            atime: 0,
            mtime: 0,
            ctime: 0,
            data: InodeData::Fat(FatInode::new(
                self.root_cluster,
                self.root,
                FatAttr::DIRECTORY,
            )),
        })
    }

    fn iget<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        name: &[u8],
        parent: &Inode,
    ) -> Result<Option<Inode>> {
        Ok(self
            .find_entry(cache, parent, name)?
            .map(|de| self.make_inode(&de)))
    }

    /// 游标为目录内的字节偏移，总是停在某个目录项的开头
    fn readdir<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &mut Inode,
        cursor: &mut DirCursor,
    ) -> Result<Option<DirEntry>> {
        if pvt(dir)?.start == 0 {
            return Ok(None);
        }
        let shift = self.sector_shift;
        let mask = (1u64 << shift) - 1;
        let mut lfn = LongName::new();

        loop {
            let sector = match self.dir_sector(cache, dir, cursor.offset >> shift)? {
                Some(sector) => sector,
                None => return Ok(None),
            };
            let data = cache.get(sector)?;
            let mut off = (cursor.offset & mask) as usize;

            while off < data.len() {
                let raw = &data[off..off + DIR_ENTRY_SIZE];
                if raw[0] == 0 {
                    return Ok(None);
                }
                off += DIR_ENTRY_SIZE;
                cursor.offset += DIR_ENTRY_SIZE as u64;

                if raw[0] == DELETED_MARK {
                    lfn.reset();
                    continue;
                }
                if raw[11] == ATTR_LONG_NAME {
                    lfn.feed(&LongEntry::parse(raw));
                    continue;
                }
                let de = ShortEntry::parse(raw);
                if de.attr.contains(FatAttr::VOLUME_ID) {
                    lfn.reset();
                    continue;
                }

                let name = match lfn.finish(&de.name) {
                    Some(long) => char::decode_utf16(long.iter().copied())
                        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                        .collect(),
                    None => de.display_name(self.codepage),
                };
                return Ok(Some(DirEntry {
                    ino: de.first_cluster as u64,
                    offset: cursor.offset,
                    kind: if de.is_dir() {
                        InodeType::Directory
                    } else {
                        InodeType::RegularFile
                    },
                    name,
                }));
            }
        }
    }

    fn next_extent<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        inode: &mut Inode,
        lstart: u64,
    ) -> Result<Option<Extent>> {
        let clust_shift = self.clust_shift;
        let clust_mask = (1u64 << clust_shift) - 1;
        let size = inode.size;
        let is_dir = inode.is_dir();
        let pvt = pvt_mut(inode)?;

        // FAT12/16 根目录区不在簇链中
        if pvt.start_cluster == 0 && is_dir && self.root_size != 0 {
            if lstart >= self.root_size {
                return Ok(None);
            }
            return Ok(Some(Extent {
                lstart,
                pstart: Pstart::Sector(self.root + lstart),
                len: self.root_size - lstart,
            }));
        }

        let cluster_bytes = 1u64 << (clust_shift + self.sector_shift);
        let tcluster = size.div_ceil(cluster_bytes);
        let mcluster = lstart >> clust_shift;
        if mcluster >= tcluster {
            return Ok(None);
        }

        let (mut lcluster, mut pcluster) = match pvt.extent_pos {
            Some((l, p)) if l <= mcluster => (l, p),
            _ => (0, pvt.start_cluster),
        };

        while lcluster < mcluster {
            if lcluster > self.clusters as u64 {
                return Err(Error::new(ErrorKind::Corrupted, "FAT chain loops"));
            }
            pcluster = match self.next_cluster(cache, pcluster)? {
                Some(next) => next,
                None => {
                    return Err(Error::new(
                        ErrorKind::Corrupted,
                        "FAT chain shorter than file",
                    ))
                }
            };
            lcluster += 1;
        }
        if !self.cluster_valid(pcluster) {
            warn!("FAT: cluster {} outside data area", pcluster);
            return Err(Error::new(ErrorKind::Corrupted, "bad cluster in FAT chain"));
        }

        // 把物理上连续的簇合并成一个 extent
        let first = pcluster;
        let mut count = 1u64;
        while lcluster + 1 < tcluster {
            match self.next_cluster(cache, pcluster)? {
                Some(next) if next == pcluster + 1 && self.cluster_valid(next) => {
                    pcluster = next;
                    lcluster += 1;
                    count += 1;
                }
                _ => break,
            }
        }
        pvt.extent_pos = Some((lcluster, pcluster));

        let skip = lstart & clust_mask;
        Ok(Some(Extent {
            lstart,
            pstart: Pstart::Sector(self.cluster_sector(first) + skip),
            len: (count << clust_shift) - skip,
        }))
    }

    fn mangle_name(&self, src: &str) -> String {
        vfat_mangle_name(src)
    }
}
