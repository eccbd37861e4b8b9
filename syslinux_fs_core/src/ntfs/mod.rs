//! NTFS 只读驱动
//!
//! 不支持压缩和加密的数据流。目录通过 `$I30` 索引访问：先看常驻的
//! `$INDEX_ROOT`，根节点带子节点时再顺序扫描 `$INDEX_ALLOCATION` 中的 INDX 块。

mod boot;
mod index;
mod record;
mod runlist;

pub use boot::BootSector;
pub use index::{parse_node, IndexEntry, IndexEntryFlags, IndexNode, NameMatcher, NameSpace};
pub use record::{
    apply_fixups, parse_attr_list, Attr, AttrFlags, AttrListEntry, AttrValue, MftRecord,
    RecordFlags, NTFS_MAGIC_FILE, NTFS_MAGIC_INDX,
};
pub use runlist::{find_run, parse_runs, read_runs, Run};

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};

use crate::block::BlockDevice;
use crate::cache::BlockCache;
use crate::codepage::Codepage;
use crate::error::{Error, ErrorKind, Result};
use crate::fs::{generic_getfssec, resident_getfssec, FsOps, OpenFile};
use crate::types::{DirCursor, DirEntry, Extent, Inode, InodeData, InodeType, Pstart};

use index::{BLOCK_HEADER_OFFSET, ROOT_HEADER_OFFSET};
use record::{
    AT_ATTR_LIST, AT_DATA, AT_INDEX_ALLOCATION, AT_INDEX_ROOT, AT_STANDARD_INFORMATION,
    AT_VOL_INFO,
};

/// `$MFT` 的记录号
pub const FILE_MFT: u64 = 0;
/// `$Volume` 的记录号
pub const FILE_VOLUME: u64 = 3;
/// 根目录的记录号
pub const FILE_ROOT: u64 = 5;

/// `$ATTRIBUTE_LIST` 的大小上限
const MAX_ATTR_LIST: u64 = 256 * 1024;

/// 1601-01-01 到 1970-01-01 的秒数
const NT_EPOCH_DELTA: u64 = 11_644_473_600;

/// NT 时间（100ns 为单位，从 1601 年起）转换为 Unix 时间戳
pub fn nt_time_to_unix(t: u64) -> u64 {
    (t / 10_000_000).saturating_sub(NT_EPOCH_DELTA)
}

/// NTFS inode 的数据来源
#[derive(Debug, Clone)]
pub enum NtfsData {
    /// 常驻 `$DATA`，内容在 MFT 记录中
    Resident(Vec<u8>),
    /// 非常驻 `$DATA`
    NonResident { runs: Vec<Run>, flags: AttrFlags },
    /// 目录索引
    Directory {
        root: IndexNode,
        alloc: Vec<Run>,
        alloc_size: u64,
    },
}

/// NTFS inode 私有数据
#[derive(Debug, Clone)]
pub struct NtfsInode {
    pub mft_no: u64,
    pub seq_no: u16,
    pub data: NtfsData,
}

fn pvt(inode: &Inode) -> Result<&NtfsInode> {
    match &inode.data {
        InodeData::Ntfs(pvt) => Ok(pvt),
        _ => Err(Error::new(ErrorKind::InvalidInput, "inode is not an NTFS inode")),
    }
}

/// 目录 inode 的索引部分
fn dir_index(inode: &Inode) -> Result<(&IndexNode, &[Run], u64)> {
    match &pvt(inode)?.data {
        NtfsData::Directory {
            root,
            alloc,
            alloc_size,
        } => Ok((root, alloc, *alloc_size)),
        _ => Err(Error::new(ErrorKind::NotDirectory, "NTFS inode is not a directory")),
    }
}

/// NTFS 文件系统实例
pub struct NtfsFs {
    sector_shift: u32,
    /// 每簇扇区数的 log2
    clust_shift: u32,
    clust_byte_shift: u32,
    record_shift: u32,
    index_shift: u32,
    block_shift: u32,
    /// `$MFT` 自身的数据运行
    mft_runs: Vec<Run>,
    mft_size: u64,
    /// 记录头中带有自身编号（3.1 及以后）
    numbered: bool,
    version: (u8, u8),
    serial: u64,
    codepage: &'static Codepage,
}

impl NtfsFs {
    /// 挂载
    ///
    /// 校验引导扇区，读取 `$MFT` 的第 0 条记录取得 `$MFT` 本身的数据运行，
    /// 再从 `$Volume` 的卷信息属性中读出 NTFS 版本。
    pub fn mount<D: BlockDevice>(cache: &mut BlockCache<D>) -> Result<Self> {
        let mut sector = [0u8; 512];
        cache.bdev_mut().read_bytes(0, &mut sector)?;
        let bs = BootSector::parse(&sector)?;

        let sector_shift = cache.sector_shift();
        if bs.bytes_per_sector as u32 != 1 << sector_shift {
            return Err(Error::new(
                ErrorKind::Unsupported,
                "NTFS sector size differs from device sector size",
            ));
        }
        let clust_byte_shift = bs.cluster_byte_shift();
        let record_shift = bs.mft_record_shift()?;
        let index_shift = bs.index_record_shift()?;
        let block_shift = index_shift.max(sector_shift);
        cache.init(block_shift)?;

        let clust_shift = clust_byte_shift - sector_shift;
        let clusters = bs.total_sectors >> clust_shift;
        if bs.mft_lcn >= clusters {
            return Err(Error::new(ErrorKind::Corrupted, "$MFT beyond end of volume"));
        }

        let mut buf = vec![0u8; 1 << record_shift];
        cache.read_bytes(bs.mft_lcn << clust_byte_shift, &mut buf)?;
        let mft = MftRecord::from_raw(buf)?;
        let data = mft
            .find_attr(AT_DATA)?
            .ok_or(Error::new(ErrorKind::Corrupted, "$MFT has no $DATA"))?;
        let (mft_runs, mft_size) = match data.value {
            AttrValue::NonResident {
                runs, data_size, ..
            } => (runs, data_size),
            AttrValue::Resident(_) => {
                return Err(Error::new(ErrorKind::Corrupted, "$MFT data is resident"))
            }
        };

        let mut fs = Self {
            sector_shift,
            clust_shift,
            clust_byte_shift,
            record_shift,
            index_shift,
            block_shift,
            mft_runs,
            mft_size,
            numbered: false,
            version: (3, 0),
            serial: bs.serial,
            codepage: Codepage::cp437(),
        };

        let volume = fs.read_record_at(cache, FILE_VOLUME)?;
        if let Some(attr) = volume.find_attr(AT_VOL_INFO)? {
            match &attr.value {
                AttrValue::Resident(v) if v.len() >= 10 => fs.version = (v[8], v[9]),
                _ => warn!("NTFS: unreadable volume information"),
            }
        }
        fs.numbered = fs.version >= (3, 1) && volume.record_no() as u64 == FILE_VOLUME;

        debug!(
            "NTFS {}.{} mounted: cluster {} bytes, record {} bytes, index block {} bytes",
            fs.version.0,
            fs.version.1,
            1u32 << clust_byte_shift,
            1u32 << record_shift,
            1u32 << index_shift
        );
        Ok(fs)
    }

    /// 卷版本（主版本, 次版本）
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// 卷序列号
    pub fn serial(&self) -> u64 {
        self.serial
    }

    fn record_size(&self) -> usize {
        1 << self.record_shift
    }

    /// 读取 `$MFT` 中第 `index` 个位置上的记录
    fn read_record_at<D: BlockDevice>(&self, cache: &mut BlockCache<D>, index: u64) -> Result<MftRecord> {
        let offset = index << self.record_shift;
        if offset + self.record_size() as u64 > self.mft_size {
            return Err(Error::new(ErrorKind::Corrupted, "MFT record beyond $MFT"));
        }
        let mut buf = vec![0u8; self.record_size()];
        read_runs(cache, &self.mft_runs, self.clust_byte_shift, offset, &mut buf)?;
        MftRecord::from_raw(buf)
    }

    /// 按记录号读取 MFT 记录
    ///
    /// 记录通常就在 `no * 记录大小` 处。3.1 及以后的卷会核对记录头中的编号，
    /// 不一致时从头顺序扫描 `$MFT`，按每条记录的 `bytes_allocated` 前进。
    pub fn mft_record<D: BlockDevice>(&self, cache: &mut BlockCache<D>, no: u64) -> Result<MftRecord> {
        let rec = self.read_record_at(cache, no)?;
        if !self.numbered || rec.record_no() as u64 == no {
            return Ok(rec);
        }

        warn!("NTFS: MFT record {} not in its slot, scanning", no);
        let rsize = self.record_size() as u64;
        let mut offset = 0u64;
        while offset + rsize <= self.mft_size {
            let mut step = rsize;
            match self.read_record_at(cache, offset >> self.record_shift) {
                Ok(r) if r.record_no() as u64 == no => return Ok(r),
                Ok(r) => {
                    let alloc = r.bytes_allocated() as u64;
                    if alloc >= rsize && alloc % rsize == 0 {
                        step = alloc;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Corrupted => {}
                Err(e) => return Err(e),
            }
            offset += step;
        }
        Err(Error::new(ErrorKind::Corrupted, "MFT record not found"))
    }

    /// 读取非常驻属性的完整值
    fn read_value<D: BlockDevice>(&self, cache: &mut BlockCache<D>, attr: &Attr, limit: u64) -> Result<Vec<u8>> {
        match &attr.value {
            AttrValue::Resident(v) => Ok(v.clone()),
            AttrValue::NonResident {
                runs, data_size, ..
            } => {
                if *data_size > limit {
                    return Err(Error::new(ErrorKind::Corrupted, "NTFS attribute too large"));
                }
                let mut buf = vec![0u8; *data_size as usize];
                read_runs(cache, runs, self.clust_byte_shift, 0, &mut buf)?;
                Ok(buf)
            }
        }
    }

    /// 查找属性
    ///
    /// 先在记录本身中找；找不到且记录带有 `$ATTRIBUTE_LIST` 时，按列表到扩展记录中
    /// 收集该属性的各段，非常驻属性的数据运行按 `lowest_vcn` 顺序拼接。
    pub fn lookup_attr<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        rec: &MftRecord,
        rec_no: u64,
        kind: u32,
    ) -> Result<Option<Attr>> {
        let attrs = rec.attrs()?;
        let wanted = |a: &Attr| a.kind == kind && (kind != AT_DATA || a.name_len == 0);
        if let Some(attr) = attrs.iter().find(|a| wanted(a)) {
            return Ok(Some(attr.clone()));
        }
        let list = match attrs.iter().find(|a| a.kind == AT_ATTR_LIST) {
            Some(list) => list,
            None => return Ok(None),
        };

        let list = self.read_value(cache, list, MAX_ATTR_LIST)?;
        let mut entries: Vec<AttrListEntry> = parse_attr_list(&list)?
            .into_iter()
            .filter(|e| e.kind == kind && (kind != AT_DATA || e.name_len == 0))
            .collect();
        entries.sort_by_key(|e| e.lowest_vcn);

        let mut merged: Option<Attr> = None;
        for entry in entries {
            if entry.record == rec_no {
                continue;
            }
            let ext = self.mft_record(cache, entry.record)?;
            let segment = ext.attrs()?.into_iter().find(|a| {
                wanted(a)
                    && match a.value {
                        AttrValue::NonResident { lowest_vcn, .. } => lowest_vcn == entry.lowest_vcn,
                        AttrValue::Resident(_) => true,
                    }
            });
            let segment = match segment {
                Some(segment) => segment,
                None => {
                    return Err(Error::new(
                        ErrorKind::Corrupted,
                        "attribute list points to a missing attribute",
                    ))
                }
            };
            match (&mut merged, segment.value) {
                (None, value) => {
                    merged = Some(Attr { value, ..segment });
                }
                (
                    Some(Attr {
                        value: AttrValue::NonResident { runs, .. },
                        ..
                    }),
                    AttrValue::NonResident { runs: more, .. },
                ) => runs.extend(more),
                _ => {
                    return Err(Error::new(
                        ErrorKind::Corrupted,
                        "resident attribute split across records",
                    ))
                }
            }
        }
        Ok(merged)
    }

    /// 按 MFT 记录号构造 inode
    pub fn iget_by_mft<D: BlockDevice>(&self, cache: &mut BlockCache<D>, no: u64) -> Result<Inode> {
        let rec = self.mft_record(cache, no)?;
        if !rec.flags().contains(RecordFlags::IN_USE) {
            return Err(Error::new(ErrorKind::Corrupted, "MFT record not in use"));
        }

        let (mut ctime, mut mtime, mut atime) = (0, 0, 0);
        if let Some(si) = self.lookup_attr(cache, &rec, no, AT_STANDARD_INFORMATION)? {
            if let AttrValue::Resident(v) = &si.value {
                if v.len() >= 32 {
                    ctime = nt_time_to_unix(LittleEndian::read_u64(&v[0..]));
                    mtime = nt_time_to_unix(LittleEndian::read_u64(&v[8..]));
                    atime = nt_time_to_unix(LittleEndian::read_u64(&v[24..]));
                }
            }
        }

        let (mode, size, data) = if rec.is_dir() {
            let root = self
                .lookup_attr(cache, &rec, no, AT_INDEX_ROOT)?
                .ok_or(Error::new(ErrorKind::Corrupted, "directory without $INDEX_ROOT"))?;
            let value = match root.value {
                AttrValue::Resident(v) => v,
                AttrValue::NonResident { .. } => {
                    return Err(Error::new(ErrorKind::Corrupted, "non-resident $INDEX_ROOT"))
                }
            };
            let root = parse_node(&value, ROOT_HEADER_OFFSET)?;

            // 只有根节点带子节点时才需要 $INDEX_ALLOCATION
            let (alloc, alloc_size) = if root.has_child {
                match self.lookup_attr(cache, &rec, no, AT_INDEX_ALLOCATION)? {
                    Some(Attr {
                        value: AttrValue::NonResident {
                            runs, data_size, ..
                        },
                        ..
                    }) => (runs, data_size),
                    Some(_) => {
                        return Err(Error::new(ErrorKind::Corrupted, "resident $INDEX_ALLOCATION"))
                    }
                    None => {
                        return Err(Error::new(ErrorKind::Corrupted, "missing $INDEX_ALLOCATION"))
                    }
                }
            } else {
                (Vec::new(), 0)
            };
            (
                InodeType::Directory,
                value.len() as u64 + alloc_size,
                NtfsData::Directory {
                    root,
                    alloc,
                    alloc_size,
                },
            )
        } else {
            let attr = self
                .lookup_attr(cache, &rec, no, AT_DATA)?
                .ok_or(Error::new(ErrorKind::Corrupted, "file without $DATA"))?;
            let flags = attr.flags;
            match attr.value {
                AttrValue::Resident(v) => (InodeType::RegularFile, v.len() as u64, NtfsData::Resident(v)),
                AttrValue::NonResident {
                    runs,
                    initialized_size,
                    ..
                } => (
                    InodeType::RegularFile,
                    initialized_size,
                    NtfsData::NonResident { runs, flags },
                ),
            }
        };

        Ok(Inode {
            ino: no,
            mode,
            size,
            atime,
            mtime,
            ctime,
            data: InodeData::Ntfs(NtfsInode {
                mft_no: no,
                seq_no: rec.seq_no(),
                data,
            }),
        })
    }

    /// 读取 `$INDEX_ALLOCATION` 中的第 `k` 个 INDX 块
    ///
    /// 未使用的块（魔数不是 INDX）返回 `None`。
    fn index_block<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        alloc: &[Run],
        k: u64,
    ) -> Result<Option<IndexNode>> {
        let mut buf = vec![0u8; 1 << self.index_shift];
        read_runs(cache, alloc, self.clust_byte_shift, k << self.index_shift, &mut buf)?;
        if LittleEndian::read_u32(&buf) != NTFS_MAGIC_INDX {
            debug!("NTFS: index block {} not in use", k);
            return Ok(None);
        }
        apply_fixups(&mut buf)?;
        parse_node(&buf, BLOCK_HEADER_OFFSET).map(Some)
    }

    fn index_blocks(&self, alloc_size: u64) -> u64 {
        alloc_size >> self.index_shift
    }

    /// 非常驻数据的 extent
    fn runs_extent(&self, runs: &[Run], lstart: u64) -> Option<Extent> {
        let mask = (1u64 << self.clust_shift) - 1;
        let vcn = lstart >> self.clust_shift;
        let run = find_run(runs, vcn)?;
        let skip = lstart & mask;
        let pstart = match run.lcn {
            Some(lcn) => Pstart::Sector(
                lcn.checked_add(vcn - run.vcn)?.checked_mul(mask + 1)? + skip,
            ),
            None => Pstart::Zero,
        };
        Some(Extent {
            lstart,
            pstart,
            len: (run.end() - vcn).saturating_mul(mask + 1) - skip,
        })
    }
}

fn make_dirent(e: &IndexEntry, offset: u64) -> DirEntry {
    DirEntry {
        ino: e.mft_no,
        offset,
        kind: if e.is_dir() {
            InodeType::Directory
        } else {
            InodeType::RegularFile
        },
        name: char::decode_utf16(e.name.iter().copied())
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect::<String>(),
    }
}

impl FsOps for NtfsFs {
    fn name(&self) -> &'static str {
        "ntfs"
    }

    fn block_shift(&self) -> u32 {
        self.block_shift
    }

    fn iget_root<D: BlockDevice>(&self, cache: &mut BlockCache<D>) -> Result<Inode> {
        self.iget_by_mft(cache, FILE_ROOT)
    }

    fn iget<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        name: &[u8],
        parent: &Inode,
    ) -> Result<Option<Inode>> {
        let (root, alloc, alloc_size) = dir_index(parent)?;
        let query = match self.codepage.encode_name(name) {
            Some(query) => query,
            None => return Ok(None),
        };
        let mut matcher = NameMatcher::new(self.codepage);

        if let Some(e) = root.entries.iter().find(|e| matcher.matches(&query, e)) {
            return self.iget_by_mft(cache, e.mft_no).map(Some);
        }
        if !root.has_child {
            return Ok(None);
        }

        for k in 0..self.index_blocks(alloc_size) {
            let node = match self.index_block(cache, alloc, k)? {
                Some(node) => node,
                None => continue,
            };
            if let Some(e) = node.entries.iter().find(|e| matcher.matches(&query, e)) {
                return self.iget_by_mft(cache, e.mft_no).map(Some);
            }
        }
        Ok(None)
    }

    /// `cursor.block` 为 `None` 时位于 `$INDEX_ROOT`，否则为 INDX 块号；
    /// `cursor.offset` 是节点内的项序号
    fn readdir<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        dir: &mut Inode,
        cursor: &mut DirCursor,
    ) -> Result<Option<DirEntry>> {
        let (root, alloc, alloc_size) = dir_index(dir)?;

        if cursor.block.is_none() {
            while let Some(e) = root.entries.get(cursor.offset as usize) {
                cursor.offset += 1;
                if e.is_listed() {
                    return Ok(Some(make_dirent(e, cursor.offset)));
                }
            }
            if !root.has_child {
                return Ok(None);
            }
            cursor.block = Some(0);
            cursor.offset = 0;
        }

        while let Some(k) = cursor.block {
            if k >= self.index_blocks(alloc_size) {
                return Ok(None);
            }
            if let Some(node) = self.index_block(cache, alloc, k)? {
                while let Some(e) = node.entries.get(cursor.offset as usize) {
                    cursor.offset += 1;
                    if e.is_listed() {
                        return Ok(Some(make_dirent(e, cursor.offset)));
                    }
                }
            }
            cursor.block = Some(k + 1);
            cursor.offset = 0;
        }
        Ok(None)
    }

    fn next_extent<D: BlockDevice>(
        &self,
        _cache: &mut BlockCache<D>,
        inode: &mut Inode,
        lstart: u64,
    ) -> Result<Option<Extent>> {
        match &pvt(inode)?.data {
            NtfsData::NonResident { runs, flags } => {
                if flags.intersects(AttrFlags::COMPRESSED | AttrFlags::ENCRYPTED) {
                    return Err(Error::new(
                        ErrorKind::Unsupported,
                        "compressed or encrypted NTFS data",
                    ));
                }
                Ok(self.runs_extent(runs, lstart))
            }
            NtfsData::Resident(_) | NtfsData::Directory { .. } => Ok(None),
        }
    }

    /// 常驻数据直接从 MFT 记录的副本中拷贝，其余走通用实现
    fn getfssec<D: BlockDevice>(
        &self,
        cache: &mut BlockCache<D>,
        file: &mut OpenFile,
        buf: &mut [u8],
        sectors: u32,
    ) -> Result<(usize, bool)> {
        match &pvt(&file.inode)?.data {
            NtfsData::Resident(data) => {
                resident_getfssec(data, self.sector_shift, &mut file.offset, buf, sectors)
            }
            _ => generic_getfssec(self, cache, file, buf, sectors),
        }
    }
}
