//! 集成测试共用的工具：日志初始化和各文件系统的内存镜像
//!
//! 镜像都按驱动读取的字段手工拼出，只填必要的部分，其余保持为零。

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};
use syslinux_fs::core_fs::btrfs::name_hash;
use syslinux_fs::core_fs::ufs::UfsType;
use syslinux_fs::{ErrorKind, Filesystem, FsConfig, RamDisk, Result};

/// 初始化日志，重复调用无害
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 可复现的测试数据
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| ((i * 31 + seed as usize) % 251) as u8)
        .collect()
}

/// 挂载镜像，失败直接让测试失败
pub fn mount(disk: RamDisk) -> Filesystem<RamDisk> {
    Filesystem::mount(disk, FsConfig::default()).expect("Failed to mount image")
}

/// 读出整个文件
pub fn read_file(fs: &mut Filesystem<RamDisk>, path: &str) -> Vec<u8> {
    let mut file = fs.open(path).expect("Failed to open file");
    let mut data = Vec::new();
    file.read_to_end(&mut data).expect("Failed to read file");
    data
}

/// 目录中的全部名字，保持驱动给出的顺序
pub fn list_dir(fs: &mut Filesystem<RamDisk>, path: &str) -> Vec<String> {
    fs.opendir(path)
        .expect("Failed to open directory")
        .map(|entry| entry.expect("Failed to read directory").name)
        .collect()
}

/// 错误类别，成功时为 `None`
pub fn err_kind<T>(result: Result<T>) -> Option<ErrorKind> {
    result.err().map(|e| e.kind())
}

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    LittleEndian::write_u16(&mut buf[off..], v);
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    LittleEndian::write_u32(&mut buf[off..], v);
}

fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    LittleEndian::write_u64(&mut buf[off..], v);
}

// ---------------------------------------------------------------------------
// ext2：1K 块，128 块，单个块组，inode 表在块 5
// ---------------------------------------------------------------------------

pub const EXT2_BLOCK: usize = 1024;
pub const EXT2_UUID: [u8; 16] = *b"syslinux-ext2-fs";
pub const EXT2_MTIME: u32 = 1_600_000_000;
/// big.bin 中唯一一个经三级间接块映射的逻辑块
pub const EXT2_BIG_TAIL_BLOCK: u64 = 12 + 256 + 65536;
pub const EXT2_BIG_SIZE: u64 = (EXT2_BIG_TAIL_BLOCK + 1) * EXT2_BLOCK as u64;
pub const SYSLINUX_CFG: &[u8] = b"DEFAULT linux\nLABEL linux\n  KERNEL /boot/vmlinuz\n";

const EXT2_INODE_TABLE: usize = 5;

pub fn hello_text() -> Vec<u8> {
    pattern(1500, 7)
}

/// big.bin 直接块 0 的内容
pub fn ext2_big_head() -> Vec<u8> {
    pattern(EXT2_BLOCK, 5)
}

/// big.bin 三级间接块映射的那一块
pub fn ext2_big_tail() -> Vec<u8> {
    pattern(EXT2_BLOCK, 99)
}

fn ext2_block(img: &mut [u8], block: u32) -> &mut [u8] {
    let start = block as usize * EXT2_BLOCK;
    &mut img[start..start + EXT2_BLOCK]
}

fn ext2_inode(img: &mut [u8], ino: u32, mode: u16, size: u32) -> &mut [u8] {
    let off = EXT2_INODE_TABLE * EXT2_BLOCK + (ino as usize - 1) * 128;
    let raw = &mut img[off..off + 128];
    put_u16(raw, 0, mode);
    put_u32(raw, 4, size);
    put_u32(raw, 8, EXT2_MTIME + 10);
    put_u32(raw, 12, EXT2_MTIME - 10);
    put_u32(raw, 16, EXT2_MTIME);
    raw
}

fn ext2_ptrs(raw: &mut [u8], ptrs: &[(usize, u32)]) {
    for &(index, block) in ptrs {
        put_u32(raw, 40 + index * 4, block);
    }
}

/// 目标存放在块指针区的快速符号链接
fn ext2_symlink(img: &mut [u8], ino: u32, target: &str) {
    let raw = ext2_inode(img, ino, 0o120777, target.len() as u32);
    raw[40..40 + target.len()].copy_from_slice(target.as_bytes());
}

/// 最后一项的 rec_len 延伸到块尾
fn ext2_dir(img: &mut [u8], block: u32, entries: &[(u32, u8, &str)]) {
    let data = ext2_block(img, block);
    let mut off = 0;
    for (i, &(ino, file_type, name)) in entries.iter().enumerate() {
        let rec_len = if i + 1 == entries.len() {
            EXT2_BLOCK - off
        } else {
            (8 + name.len() + 3) & !3
        };
        put_u32(data, off, ino);
        put_u16(data, off + 4, rec_len as u16);
        data[off + 6] = name.len() as u8;
        data[off + 7] = file_type;
        data[off + 8..off + 8 + name.len()].copy_from_slice(name.as_bytes());
        off += rec_len;
    }
}

/// ext2 镜像
///
/// ```text
/// /hello.txt            1500 字节，块 21-22
/// /big.bin              直接块 0 和三级间接映射的最后一块，其余为空洞
/// /link -> hello.txt
/// /boot/syslinux.cfg
/// /boot/up -> ../hello.txt
/// /loop -> loop
/// ```
pub fn ext2_image() -> RamDisk {
    let mut img = vec![0u8; 128 * EXT2_BLOCK];
    {
        let sb = &mut img[1024..2048];
        put_u32(sb, 0, 32);
        put_u32(sb, 4, 128);
        put_u32(sb, 20, 1);
        put_u32(sb, 24, 0);
        put_u32(sb, 32, 8192);
        put_u32(sb, 40, 32);
        put_u16(sb, 56, 0xEF53);
        sb[104..120].copy_from_slice(&EXT2_UUID);
    }
    // 块组描述符：inode 表位置
    put_u32(ext2_block(&mut img, 2), 8, EXT2_INODE_TABLE as u32);

    let root = ext2_inode(&mut img, 2, 0o040755, EXT2_BLOCK as u32);
    ext2_ptrs(root, &[(0, 20)]);
    ext2_dir(
        &mut img,
        20,
        &[
            (2, 2, "."),
            (2, 2, ".."),
            (12, 1, "hello.txt"),
            (0, 1, "gone"),
            (13, 1, "big.bin"),
            (11, 7, "link"),
            (14, 2, "boot"),
            (17, 7, "loop"),
        ],
    );

    let hello = hello_text();
    let raw = ext2_inode(&mut img, 12, 0o100644, hello.len() as u32);
    ext2_ptrs(raw, &[(0, 21), (1, 22)]);
    img[21 * EXT2_BLOCK..21 * EXT2_BLOCK + hello.len()].copy_from_slice(&hello);

    let raw = ext2_inode(&mut img, 13, 0o100644, EXT2_BIG_SIZE as u32);
    ext2_ptrs(raw, &[(0, 34), (14, 30)]);
    put_u32(ext2_block(&mut img, 30), 0, 31);
    put_u32(ext2_block(&mut img, 31), 0, 32);
    put_u32(ext2_block(&mut img, 32), 0, 33);
    ext2_block(&mut img, 33).copy_from_slice(&ext2_big_tail());
    ext2_block(&mut img, 34).copy_from_slice(&ext2_big_head());

    ext2_symlink(&mut img, 11, "hello.txt");

    let boot = ext2_inode(&mut img, 14, 0o040755, EXT2_BLOCK as u32);
    ext2_ptrs(boot, &[(0, 40)]);
    ext2_dir(
        &mut img,
        40,
        &[(14, 2, "."), (2, 2, ".."), (15, 1, "syslinux.cfg"), (16, 7, "up")],
    );
    let raw = ext2_inode(&mut img, 15, 0o100644, SYSLINUX_CFG.len() as u32);
    ext2_ptrs(raw, &[(0, 41)]);
    img[41 * EXT2_BLOCK..41 * EXT2_BLOCK + SYSLINUX_CFG.len()].copy_from_slice(SYSLINUX_CFG);

    ext2_symlink(&mut img, 16, "../hello.txt");
    ext2_symlink(&mut img, 17, "loop");

    RamDisk::new(img)
}

// ---------------------------------------------------------------------------
// FAT12：512 字节扇区，每簇 1 扇区，64 扇区
// ---------------------------------------------------------------------------

pub const FAT_SERIAL: u32 = 0x1234_ABCD;
pub const FAT_LONG_NAME: &str = "a_really_long_vfat_name_for_testing.cfg";
pub const FAT_README: &[u8] = b"read me, lower case.\n";
pub const LDLINUX_CFG: &[u8] = b"PROMPT 1\nTIMEOUT 50\n";
/// 2020-09-13
pub const FAT_DATE: u16 = (40 << 9) | (9 << 5) | 13;
pub const FAT_DATE_UNIX: u64 = 1_599_955_200;

const FAT_SECTOR: usize = 512;
const FAT_ROOT_SECTOR: usize = 3;
const FAT_DATA_SECTOR: usize = 4;
const FAT_EOC: u16 = 0xFFF;

/// 长文件名文件的内容，依次存放在簇 2、3、6
pub fn fat_long_file() -> Vec<u8> {
    pattern(1436, 3)
}

fn fat_cluster(img: &mut [u8], cluster: usize) -> &mut [u8] {
    let start = (FAT_DATA_SECTOR + cluster - 2) * FAT_SECTOR;
    &mut img[start..start + FAT_SECTOR]
}

/// 写 12 位 FAT 表项（两份 FAT 都写）
fn fat12_set(img: &mut [u8], cluster: usize, value: u16) {
    for fat in 1..=2 {
        let table = &mut img[fat * FAT_SECTOR..(fat + 1) * FAT_SECTOR];
        let off = cluster + cluster / 2;
        if cluster & 1 != 0 {
            table[off] = (table[off] & 0x0F) | ((value as u8 & 0x0F) << 4);
            table[off + 1] = (value >> 4) as u8;
        } else {
            table[off] = value as u8;
            table[off + 1] = (table[off + 1] & 0xF0) | ((value >> 8) as u8 & 0x0F);
        }
    }
}

fn fat_short(name: &[u8; 11], attr: u8, lcase: u8, cluster: u16, size: u32) -> [u8; 32] {
    let mut e = [0u8; 32];
    e[..11].copy_from_slice(name);
    e[11] = attr;
    e[12] = lcase;
    put_u16(&mut e, 16, FAT_DATE);
    put_u16(&mut e, 18, FAT_DATE);
    put_u16(&mut e, 24, FAT_DATE);
    put_u16(&mut e, 26, cluster);
    put_u32(&mut e, 28, size);
    e
}

fn lfn_checksum(name: &[u8; 11]) -> u8 {
    name.iter()
        .fold(0u8, |sum, &c| (((sum & 1) << 7) | (sum >> 1)).wrapping_add(c))
}

/// 长文件名目录项，按磁盘顺序（最后一片在前）
fn fat_long_entries(name: &str, short: &[u8; 11]) -> Vec<[u8; 32]> {
    let mut units: Vec<u16> = name.encode_utf16().collect();
    let slots = units.len().div_ceil(13);
    if units.len() < slots * 13 {
        units.push(0);
    }
    units.resize(slots * 13, 0xFFFF);
    let csum = lfn_checksum(short);

    (0..slots)
        .rev()
        .map(|slot| {
            let mut e = [0u8; 32];
            e[0] = (slot + 1) as u8 | if slot + 1 == slots { 0x40 } else { 0 };
            e[11] = 0x0F;
            e[13] = csum;
            let chars = &units[slot * 13..(slot + 1) * 13];
            let mut n = 0;
            for (off, count) in [(1usize, 5usize), (14, 6), (28, 2)] {
                for k in 0..count {
                    put_u16(&mut e, off + 2 * k, chars[n]);
                    n += 1;
                }
            }
            e
        })
        .collect()
}

fn fat_write_dir(img: &mut [u8], sector: usize, entries: &[[u8; 32]]) {
    let start = sector * FAT_SECTOR;
    for (i, e) in entries.iter().enumerate() {
        img[start + i * 32..start + (i + 1) * 32].copy_from_slice(e);
    }
}

/// FAT12 镜像
///
/// ```text
/// /a_really_long_vfat_name_for_testing.cfg   AREALL~1.CFG，簇 2 -> 3 -> 6
/// /README.TXT                                 小写标志，显示为 readme.txt
/// /SYSLINUX/LDLINUX.CFG
/// ```
/// 根目录另有卷标和一个已删除的目录项。
pub fn fat12_image() -> RamDisk {
    let mut img = vec![0u8; 64 * FAT_SECTOR];
    {
        let bs = &mut img[..FAT_SECTOR];
        bs[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        bs[3..11].copy_from_slice(b"MSDOS5.0");
        put_u16(bs, 11, FAT_SECTOR as u16);
        bs[13] = 1;
        put_u16(bs, 14, 1);
        bs[16] = 2;
        put_u16(bs, 17, 16);
        put_u16(bs, 19, 64);
        bs[21] = 0xF8;
        put_u16(bs, 22, 1);
        bs[38] = 0x29;
        put_u32(bs, 39, FAT_SERIAL);
        bs[43..54].copy_from_slice(b"SYSLINUX   ");
        bs[54..62].copy_from_slice(b"FAT12   ");
        put_u16(bs, 510, 0xAA55);
    }

    fat12_set(&mut img, 0, 0xFF8);
    fat12_set(&mut img, 1, FAT_EOC);
    fat12_set(&mut img, 2, 3);
    fat12_set(&mut img, 3, 6);
    fat12_set(&mut img, 4, FAT_EOC);
    fat12_set(&mut img, 5, FAT_EOC);
    fat12_set(&mut img, 6, FAT_EOC);
    fat12_set(&mut img, 7, FAT_EOC);

    let long = fat_long_file();
    let short_name = *b"AREALL~1CFG";
    let mut root = vec![fat_short(b"SYSLINUX   ", 0x08, 0, 0, 0)];
    root.extend(fat_long_entries(FAT_LONG_NAME, &short_name));
    root.push(fat_short(&short_name, 0x20, 0, 2, long.len() as u32));
    root.push(fat_short(b"README  TXT", 0x20, 0x18, 4, FAT_README.len() as u32));
    let mut deleted = fat_short(b"DELETED TXT", 0x20, 0, 8, 10);
    deleted[0] = 0xE5;
    root.push(deleted);
    root.push(fat_short(b"SYSLINUX   ", 0x10, 0, 5, 0));
    fat_write_dir(&mut img, FAT_ROOT_SECTOR, &root);

    fat_cluster(&mut img, 2).copy_from_slice(&long[..512]);
    fat_cluster(&mut img, 3).copy_from_slice(&long[512..1024]);
    fat_cluster(&mut img, 6)[..long.len() - 1024].copy_from_slice(&long[1024..]);
    fat_cluster(&mut img, 4)[..FAT_README.len()].copy_from_slice(FAT_README);

    let sub = [
        fat_short(b".          ", 0x10, 0, 5, 0),
        fat_short(b"..         ", 0x10, 0, 0, 0),
        fat_short(b"LDLINUX CFG", 0x20, 0, 7, LDLINUX_CFG.len() as u32),
    ];
    fat_write_dir(&mut img, FAT_DATA_SECTOR + 3, &sub);
    fat_cluster(&mut img, 7)[..LDLINUX_CFG.len()].copy_from_slice(LDLINUX_CFG);

    RamDisk::new(img)
}

// ---------------------------------------------------------------------------
// NTFS：512 字节扇区，4K 簇，1K MFT 记录，4K 索引块
// ---------------------------------------------------------------------------

pub const NTFS_CLUSTER: usize = 4096;
pub const NTFS_UNIX_TIME: u64 = 1_600_000_000;
pub const NTFS_SERIAL: u64 = 0x0123_4567_89AB_CDEF;
pub const NTFS_LDLINUX_SIZE: usize = 15384;

const NTFS_RECORD: usize = 1024;
const NTFS_MFT_LCN: usize = 4;
/// `boot` 目录 $INDEX_ALLOCATION 的起始簇
const NTFS_BOOT_INDX: usize = 24;
const NT_EPOCH_DELTA: u64 = 11_644_473_600;

/// ldlinux.sys：簇 10-11，一个稀疏簇，然后是簇 20 的开头
pub fn ntfs_ldlinux() -> Vec<u8> {
    let mut data = pattern(2 * NTFS_CLUSTER, 11);
    data.extend(std::iter::repeat(0).take(NTFS_CLUSTER));
    data.extend_from_slice(&pattern(NTFS_CLUSTER, 13)[..NTFS_LDLINUX_SIZE - 3 * NTFS_CLUSTER]);
    data
}

fn ntfs_resident(kind: u32, value: &[u8]) -> Vec<u8> {
    let len = (24 + value.len() + 7) & !7;
    let mut a = vec![0u8; len];
    put_u32(&mut a, 0, kind);
    put_u32(&mut a, 4, len as u32);
    put_u32(&mut a, 16, value.len() as u32);
    put_u16(&mut a, 20, 24);
    a[24..24 + value.len()].copy_from_slice(value);
    a
}

fn ntfs_non_resident(kind: u32, runs: &[u8], size: u64) -> Vec<u8> {
    ntfs_named_non_resident(kind, "", runs, size)
}

/// 带属性名的非常驻属性，名字紧跟在 64 字节头之后
fn ntfs_named_non_resident(kind: u32, name: &str, runs: &[u8], size: u64) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let pairs = (64 + 2 * units.len() + 7) & !7;
    let len = (pairs + runs.len() + 1 + 7) & !7;
    let mut a = vec![0u8; len];
    put_u32(&mut a, 0, kind);
    put_u32(&mut a, 4, len as u32);
    a[8] = 1;
    a[9] = units.len() as u8;
    put_u16(&mut a, 10, 64);
    put_u16(&mut a, 32, pairs as u16);
    put_u64(&mut a, 40, size.next_multiple_of(NTFS_CLUSTER as u64));
    put_u64(&mut a, 48, size);
    put_u64(&mut a, 56, size);
    for (i, &u) in units.iter().enumerate() {
        put_u16(&mut a, 64 + 2 * i, u);
    }
    a[pairs..pairs + runs.len()].copy_from_slice(runs);
    a
}

fn ntfs_std_info() -> Vec<u8> {
    let nt = (NTFS_UNIX_TIME + NT_EPOCH_DELTA) * 10_000_000;
    let mut v = vec![0u8; 48];
    for off in [0, 8, 16, 24] {
        put_u64(&mut v, off, nt);
    }
    ntfs_resident(0x10, &v)
}

fn ntfs_index_entry(parent: u64, mft: u64, name: &str, namespace: u8, dir: bool) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let key_len = 66 + 2 * units.len();
    let len = (16 + key_len + 7) & !7;
    let mut e = vec![0u8; len];
    put_u64(&mut e, 0, mft | (1 << 48));
    put_u16(&mut e, 8, len as u16);
    put_u16(&mut e, 10, key_len as u16);
    let key = &mut e[16..];
    put_u64(key, 0, parent | (1 << 48));
    if dir {
        put_u32(key, 56, 0x1000_0000);
    }
    key[64] = units.len() as u8;
    key[65] = namespace;
    for (i, &u) in units.iter().enumerate() {
        put_u16(key, 66 + 2 * i, u);
    }
    e
}

/// 索引节点的结束项；`child` 时带指向 VCN 0 的子节点指针
fn ntfs_index_end(child: bool) -> Vec<u8> {
    if child {
        let mut end = vec![0u8; 24];
        put_u16(&mut end, 8, 24);
        put_u16(&mut end, 12, 0x03);
        end
    } else {
        let mut end = vec![0u8; 16];
        put_u16(&mut end, 8, 16);
        put_u16(&mut end, 12, 0x02);
        end
    }
}

/// $INDEX_ROOT；`child` 时内容还在 $INDEX_ALLOCATION 中
fn ntfs_index_root(entries: &[Vec<u8>], child: bool) -> Vec<u8> {
    let mut body: Vec<u8> = entries.concat();
    body.extend_from_slice(&ntfs_index_end(child));

    let mut value = vec![0u8; 32];
    put_u32(&mut value, 0, 0x30);
    put_u32(&mut value, 4, 1);
    put_u32(&mut value, 8, NTFS_CLUSTER as u32);
    value[12] = 1;
    put_u32(&mut value, 16, 16);
    put_u32(&mut value, 20, (16 + body.len()) as u32);
    put_u32(&mut value, 24, (16 + body.len()) as u32);
    value[28] = child as u8;
    value.extend_from_slice(&body);
    ntfs_resident(0x90, &value)
}

/// 按更新序列数组保护每个 512 字节段的末尾，更新序列数组位于 `usa_ofs`
fn ntfs_protect(buf: &mut [u8], usa_ofs: usize) {
    let strides = buf.len() / 512;
    let usn = 0x0007;
    put_u16(buf, 4, usa_ofs as u16);
    put_u16(buf, 6, (strides + 1) as u16);
    put_u16(buf, usa_ofs, usn);
    for i in 1..=strides {
        let tail = i * 512 - 2;
        let saved = LittleEndian::read_u16(&buf[tail..]);
        put_u16(buf, usa_ofs + 2 * i, saved);
        put_u16(buf, tail, usn);
    }
}

/// 写入 `lcn` 处的一个 4K INDX 块（叶子节点）
fn ntfs_index_block(img: &mut [u8], lcn: usize, vcn: u64, entries: &[Vec<u8>]) {
    let mut block = vec![0u8; NTFS_CLUSTER];
    block[0..4].copy_from_slice(b"INDX");
    put_u64(&mut block, 16, vcn);
    let mut body: Vec<u8> = entries.concat();
    body.extend_from_slice(&ntfs_index_end(false));
    // 索引头在 24，项从 64 开始（更新序列数组之后）
    put_u32(&mut block, 24, 40);
    put_u32(&mut block, 28, (40 + body.len()) as u32);
    put_u32(&mut block, 32, (NTFS_CLUSTER - 24) as u32);
    block[64..64 + body.len()].copy_from_slice(&body);
    ntfs_protect(&mut block, 40);
    img[lcn * NTFS_CLUSTER..(lcn + 1) * NTFS_CLUSTER].copy_from_slice(&block);
}

/// 写入一条 MFT 记录
fn ntfs_record(img: &mut [u8], no: u32, flags: u16, attrs: &[Vec<u8>]) {
    let mut rec = vec![0u8; NTFS_RECORD];
    rec[0..4].copy_from_slice(b"FILE");
    put_u16(&mut rec, 16, 1);
    put_u16(&mut rec, 20, 56);
    put_u16(&mut rec, 22, flags);
    let mut off = 56;
    for a in attrs {
        rec[off..off + a.len()].copy_from_slice(a);
        off += a.len();
    }
    put_u32(&mut rec, off, 0xFFFF_FFFF);
    off += 8;
    put_u32(&mut rec, 24, off as u32);
    put_u32(&mut rec, 28, NTFS_RECORD as u32);
    put_u32(&mut rec, 44, no);
    ntfs_protect(&mut rec, 48);

    let start = NTFS_MFT_LCN * NTFS_CLUSTER + no as usize * NTFS_RECORD;
    img[start..start + NTFS_RECORD].copy_from_slice(&rec);
}

/// NTFS 3.1 镜像
///
/// 根目录索引只在 $INDEX_ROOT 中，按排序规则依次为 `$Secure`、`.`、`boot`（记录 8）、
/// `ldlinux.sys`（记录 6，非常驻、带稀疏段）和 `syslinux.cfg`（记录 7，常驻）。
/// `boot` 的 $INDEX_ROOT 只有带子节点指针的结束项，内容在簇 24-25 的
/// $INDEX_ALLOCATION 中：第 0 块是 INDX 叶子，含 `extlinux.conf`（记录 10）及其 DOS 短名；
/// 第 1 块未使用。
pub fn ntfs_image() -> RamDisk {
    let mut img = vec![0u8; 32 * NTFS_CLUSTER];
    {
        let bs = &mut img[..512];
        bs[0..3].copy_from_slice(&[0xEB, 0x52, 0x90]);
        bs[3..11].copy_from_slice(b"NTFS    ");
        put_u16(bs, 11, 512);
        bs[13] = 8;
        bs[21] = 0xF8;
        put_u64(bs, 40, 256);
        put_u64(bs, 48, NTFS_MFT_LCN as u64);
        put_u64(bs, 56, 8);
        bs[64] = (-10i8) as u8;
        bs[68] = 1;
        put_u64(bs, 72, NTFS_SERIAL);
        put_u16(bs, 510, 0xAA55);
    }

    // $MFT：三个簇，12 条记录
    ntfs_record(
        &mut img,
        0,
        0x01,
        &[ntfs_non_resident(0x80, &[0x11, 0x03, NTFS_MFT_LCN as u8], 12288)],
    );

    let mut vol = [0u8; 12];
    vol[8] = 3;
    vol[9] = 1;
    ntfs_record(&mut img, 3, 0x01, &[ntfs_resident(0x70, &vol)]);

    let entries = [
        ntfs_index_entry(5, 9, "$Secure", 3, false),
        ntfs_index_entry(5, 5, ".", 3, true),
        ntfs_index_entry(5, 8, "boot", 3, true),
        ntfs_index_entry(5, 6, "ldlinux.sys", 1, false),
        ntfs_index_entry(5, 7, "syslinux.cfg", 3, false),
    ];
    ntfs_record(&mut img, 5, 0x03, &[ntfs_std_info(), ntfs_index_root(&entries, false)]);

    ntfs_record(
        &mut img,
        8,
        0x03,
        &[
            ntfs_std_info(),
            ntfs_index_root(&[], true),
            ntfs_named_non_resident(0xA0, "$I30", &[0x11, 0x02, NTFS_BOOT_INDX as u8], 8192),
        ],
    );
    ntfs_index_block(
        &mut img,
        NTFS_BOOT_INDX,
        0,
        &[
            ntfs_index_entry(8, 10, "extlinux.conf", 1, false),
            ntfs_index_entry(8, 10, "EXTLIN~1.CON", 2, false),
        ],
    );
    ntfs_record(
        &mut img,
        10,
        0x01,
        &[ntfs_std_info(), ntfs_resident(0x80, EXTLINUX_CONF)],
    );

    // 簇 10-11，1 个稀疏簇，然后是簇 20（相对前一段 +10）
    let runs = [0x11, 0x02, 0x0A, 0x01, 0x01, 0x11, 0x01, 0x0A];
    ntfs_record(
        &mut img,
        6,
        0x01,
        &[
            ntfs_std_info(),
            ntfs_non_resident(0x80, &runs, NTFS_LDLINUX_SIZE as u64),
        ],
    );
    ntfs_record(
        &mut img,
        7,
        0x01,
        &[ntfs_std_info(), ntfs_resident(0x80, SYSLINUX_CFG)],
    );

    img[10 * NTFS_CLUSTER..12 * NTFS_CLUSTER].copy_from_slice(&pattern(2 * NTFS_CLUSTER, 11));
    img[20 * NTFS_CLUSTER..21 * NTFS_CLUSTER].copy_from_slice(&pattern(NTFS_CLUSTER, 13));

    RamDisk::new(img)
}

// ---------------------------------------------------------------------------
// UFS1/UFS2：4K 块，512 字节片段，单个柱面组
// ---------------------------------------------------------------------------

pub const UFS_MTIME: u64 = 1_500_000_000;
pub const EXTLINUX_CONF: &[u8] = b"DEFAULT linux\nLABEL linux\n  KERNEL /kernel\n";

const UFS_FRAG: usize = 512;
const UFS_BLOCK: usize = 4096;
const UFS_IBLKNO: usize = 160;

/// kernel：块 0、1 连续，块 2 为空洞，块 3 只用前 100 字节
pub fn ufs_kernel() -> Vec<u8> {
    let mut data = pattern(UFS_BLOCK, 31);
    data.extend_from_slice(&pattern(UFS_BLOCK, 37));
    data.extend(std::iter::repeat(0).take(UFS_BLOCK));
    data.extend_from_slice(&pattern(100, 41));
    data
}

/// 超过内联上限、存放在数据块中的符号链接目标
pub fn ufs_long_link_target() -> String {
    format!("/boot/{}extlinux.conf", "./".repeat(60))
}

fn ufs_inode(img: &mut [u8], kind: UfsType, ino: usize, mode: u16, size: u64) -> usize {
    let isize = match kind {
        UfsType::Ufs1 => 128,
        UfsType::Ufs2 => 256,
    };
    let off = UFS_IBLKNO * UFS_FRAG + ino * isize;
    put_u16(img, off, mode);
    match kind {
        UfsType::Ufs1 => {
            put_u64(img, off + 8, size);
            put_u32(img, off + 16, UFS_MTIME as u32 + 10);
            put_u32(img, off + 24, UFS_MTIME as u32);
            put_u32(img, off + 32, UFS_MTIME as u32 - 10);
        }
        UfsType::Ufs2 => {
            put_u64(img, off + 16, size);
            put_u64(img, off + 32, UFS_MTIME + 10);
            put_u64(img, off + 40, UFS_MTIME);
            put_u64(img, off + 48, UFS_MTIME - 10);
        }
    }
    off
}

/// 块指针区的偏移
fn ufs_ptr_area(kind: UfsType) -> usize {
    match kind {
        UfsType::Ufs1 => 40,
        UfsType::Ufs2 => 112,
    }
}

fn ufs_ptrs(img: &mut [u8], kind: UfsType, off: usize, ptrs: &[u64]) {
    let base = off + ufs_ptr_area(kind);
    for (i, &frag) in ptrs.iter().enumerate() {
        match kind {
            UfsType::Ufs1 => put_u32(img, base + i * 4, frag as u32),
            UfsType::Ufs2 => put_u64(img, base + i * 8, frag),
        }
    }
}

fn ufs_dir(img: &mut [u8], frag: usize, entries: &[(u32, u8, &str)]) {
    let start = frag * UFS_FRAG;
    let data = &mut img[start..start + UFS_BLOCK];
    let mut off = 0;
    for (i, &(ino, file_type, name)) in entries.iter().enumerate() {
        let reclen = if i + 1 == entries.len() {
            UFS_BLOCK - off
        } else {
            (8 + name.len() + 1 + 3) & !3
        };
        put_u32(data, off, ino);
        put_u16(data, off + 4, reclen as u16);
        data[off + 6] = file_type;
        data[off + 7] = name.len() as u8;
        data[off + 8..off + 8 + name.len()].copy_from_slice(name.as_bytes());
        off += reclen;
    }
}

/// UFS 镜像
///
/// ```text
/// /kernel
/// /vmlinuz -> kernel                  内联符号链接
/// /boot/extlinux.conf                 起始片段不按块对齐
/// /longlink -> /boot/./././.../extlinux.conf   存放在数据块中
/// ```
pub fn ufs_image(kind: UfsType) -> RamDisk {
    let mut img = vec![0u8; 160 * 1024];
    let (sb_offset, magic, maxlen) = match kind {
        UfsType::Ufs1 => (8192, 0x0001_1954u32, 60),
        UfsType::Ufs2 => (65536, 0x1954_0119u32, 120),
    };
    {
        let sb = &mut img[sb_offset..sb_offset + 1536];
        put_u32(sb, 16, UFS_IBLKNO as u32);
        put_u32(sb, 24, 0);
        put_u32(sb, 28, 0xFFFF_FFFF);
        put_u32(sb, 44, 1);
        put_u32(sb, 48, UFS_BLOCK as u32);
        put_u32(sb, 52, UFS_FRAG as u32);
        put_u32(sb, 80, 12);
        put_u32(sb, 96, 3);
        put_u32(sb, 184, 64);
        put_u32(sb, 188, 512);
        put_u32(sb, 1320, maxlen);
        put_u32(sb, 1372, magic);
    }

    let root = ufs_inode(&mut img, kind, 2, 0o040755, UFS_BLOCK as u64);
    ufs_ptrs(&mut img, kind, root, &[200]);
    ufs_dir(
        &mut img,
        200,
        &[
            (2, 4, "."),
            (2, 4, ".."),
            (0, 8, "old"),
            (3, 8, "kernel"),
            (4, 10, "vmlinuz"),
            (5, 4, "boot"),
            (7, 10, "longlink"),
        ],
    );

    let kernel = ufs_kernel();
    let off = ufs_inode(&mut img, kind, 3, 0o100644, kernel.len() as u64);
    ufs_ptrs(&mut img, kind, off, &[208, 216, 0, 232]);
    img[208 * UFS_FRAG..216 * UFS_FRAG].copy_from_slice(&kernel[..UFS_BLOCK]);
    img[216 * UFS_FRAG..224 * UFS_FRAG].copy_from_slice(&kernel[UFS_BLOCK..2 * UFS_BLOCK]);
    img[232 * UFS_FRAG..232 * UFS_FRAG + 100].copy_from_slice(&kernel[3 * UFS_BLOCK..]);

    let off = ufs_inode(&mut img, kind, 4, 0o120777, 6);
    let area = off + ufs_ptr_area(kind);
    img[area..area + 6].copy_from_slice(b"kernel");

    let boot = ufs_inode(&mut img, kind, 5, 0o040755, UFS_BLOCK as u64);
    ufs_ptrs(&mut img, kind, boot, &[240]);
    ufs_dir(
        &mut img,
        240,
        &[(5, 4, "."), (2, 4, ".."), (6, 8, "extlinux.conf")],
    );
    let off = ufs_inode(&mut img, kind, 6, 0o100644, EXTLINUX_CONF.len() as u64);
    ufs_ptrs(&mut img, kind, off, &[250]);
    img[250 * UFS_FRAG..250 * UFS_FRAG + EXTLINUX_CONF.len()].copy_from_slice(EXTLINUX_CONF);

    let target = ufs_long_link_target();
    let off = ufs_inode(&mut img, kind, 7, 0o120777, target.len() as u64);
    ufs_ptrs(&mut img, kind, off, &[256]);
    img[256 * UFS_FRAG..256 * UFS_FRAG + target.len()].copy_from_slice(target.as_bytes());

    RamDisk::new(img)
}

// ---------------------------------------------------------------------------
// btrfs：单设备，一个 1M 的 chunk，逻辑地址 16M 映射到物理 0
// ---------------------------------------------------------------------------

pub const BTRFS_FSID: [u8; 16] = *b"btrfs-test-fsid!";
pub const BTRFS_MTIME: u64 = 1_650_000_000;
pub const BTRFS_LDLINUX_SIZE: usize = 12288 + 500;
pub const SNAP_FILE: &[u8] = b"snap\n";

const BTRFS_NODESIZE: usize = 4096;
const BTRFS_HEADER: usize = 101;
const CHUNK_LOGICAL: u64 = 0x100_0000;
const CHUNK_LENGTH: u64 = 0x10_0000;
const CHUNK_TREE: u64 = CHUNK_LOGICAL + 0x2_0000;
const ROOT_TREE: u64 = CHUNK_LOGICAL + 0x2_1000;
const FS_TREE: u64 = CHUNK_LOGICAL + 0x2_2000;
const SNAP_TREE: u64 = CHUNK_LOGICAL + 0x2_3000;

const INODE_ITEM: u8 = 1;
const DIR_ITEM: u8 = 84;
const DIR_INDEX: u8 = 96;
const EXTENT_DATA: u8 = 108;
const ROOT_ITEM: u8 = 132;
const ROOT_REF: u8 = 156;
const CHUNK_ITEM: u8 = 228;

/// ldlinux.sys：8K 普通 extent，4K 空洞，最后一段取自另一个 extent 的第二个 4K
pub fn btrfs_ldlinux() -> Vec<u8> {
    let mut data = pattern(8192, 21);
    data.extend(std::iter::repeat(0).take(4096));
    data.extend_from_slice(&pattern(8192, 23)[4096..4596]);
    data
}

type LeafItem = (u64, u8, u64, Vec<u8>);

fn btrfs_leaf(img: &mut [u8], logical: u64, mut items: Vec<LeafItem>) {
    items.sort_by_key(|item| (item.0, item.1, item.2));
    let phys = (logical - CHUNK_LOGICAL) as usize;
    let node = &mut img[phys..phys + BTRFS_NODESIZE];
    node[32..48].copy_from_slice(&BTRFS_FSID);
    put_u64(node, 48, logical);
    put_u64(node, 80, 1);
    put_u32(node, 96, items.len() as u32);
    node[100] = 0;

    let mut data_end = BTRFS_NODESIZE - BTRFS_HEADER;
    for (i, (objectid, item_type, offset, data)) in items.iter().enumerate() {
        data_end -= data.len();
        let desc = BTRFS_HEADER + i * 25;
        put_u64(node, desc, *objectid);
        node[desc + 8] = *item_type;
        put_u64(node, desc + 9, *offset);
        put_u32(node, desc + 17, data_end as u32);
        put_u32(node, desc + 21, data.len() as u32);
        let start = BTRFS_HEADER + data_end;
        node[start..start + data.len()].copy_from_slice(data);
    }
}

fn btrfs_inode(mode: u32, size: u64) -> Vec<u8> {
    let mut v = vec![0u8; 160];
    put_u64(&mut v, 16, size);
    put_u32(&mut v, 52, mode);
    put_u64(&mut v, 112, BTRFS_MTIME);
    put_u64(&mut v, 124, BTRFS_MTIME);
    put_u64(&mut v, 136, BTRFS_MTIME);
    v
}

fn btrfs_dir_item(objectid: u64, name: &str, file_type: u8) -> Vec<u8> {
    let mut v = vec![0u8; 30];
    put_u64(&mut v, 0, objectid);
    v[8] = INODE_ITEM;
    put_u16(&mut v, 27, name.len() as u16);
    v[29] = file_type;
    v.extend_from_slice(name.as_bytes());
    v
}

/// 一个目录项对应的 DIR_ITEM 和 DIR_INDEX
fn btrfs_link(dir: u64, index: u64, objectid: u64, name: &str, file_type: u8) -> [LeafItem; 2] {
    [
        (dir, DIR_ITEM, name_hash(name.as_bytes()), btrfs_dir_item(objectid, name, file_type)),
        (dir, DIR_INDEX, index, btrfs_dir_item(objectid, name, file_type)),
    ]
}

fn btrfs_inline(data: &[u8]) -> Vec<u8> {
    let mut v = vec![0u8; 21];
    put_u64(&mut v, 8, data.len() as u64);
    v.extend_from_slice(data);
    v
}

fn btrfs_regular(disk_bytenr: u64, offset: u64, num_bytes: u64) -> Vec<u8> {
    let mut v = vec![0u8; 53];
    put_u64(&mut v, 8, num_bytes);
    v[20] = 1;
    put_u64(&mut v, 21, disk_bytenr);
    put_u64(&mut v, 29, offset + num_bytes);
    put_u64(&mut v, 37, offset);
    put_u64(&mut v, 45, num_bytes);
    v
}

fn btrfs_root_item(bytenr: u64) -> Vec<u8> {
    let mut v = vec![0u8; 439];
    put_u64(&mut v, 168, 256);
    put_u64(&mut v, 176, bytenr);
    v
}

fn btrfs_root_ref(name: &str) -> Vec<u8> {
    let mut v = vec![0u8; 18];
    put_u64(&mut v, 0, 256);
    put_u16(&mut v, 16, name.len() as u16);
    v.extend_from_slice(name.as_bytes());
    v
}

fn btrfs_chunk() -> Vec<u8> {
    let mut v = vec![0u8; 80];
    put_u64(&mut v, 0, CHUNK_LENGTH);
    put_u64(&mut v, 8, 2);
    put_u64(&mut v, 16, 0x1_0000);
    put_u64(&mut v, 24, 0x2);
    put_u32(&mut v, 32, 4096);
    put_u32(&mut v, 36, 4096);
    put_u32(&mut v, 40, 4096);
    put_u16(&mut v, 44, 1);
    put_u64(&mut v, 48, 1);
    put_u64(&mut v, 56, 0);
    v
}

/// btrfs 镜像
///
/// ```text
/// FS 树（5）：/ldlinux.sys  /extlinux.conf（内联）  /vmlinuz -> ldlinux.sys
/// 子卷 snap（257）：/only-in-snap（内联）
/// ```
pub fn btrfs_image() -> RamDisk {
    let mut img = vec![0u8; CHUNK_LENGTH as usize];

    {
        let sb = &mut img[0x1_0000..0x1_1000];
        sb[32..48].copy_from_slice(&BTRFS_FSID);
        put_u64(sb, 48, 0x1_0000);
        sb[64..72].copy_from_slice(b"_BHRfS_M");
        put_u64(sb, 72, 1);
        put_u64(sb, 80, ROOT_TREE);
        put_u64(sb, 88, CHUNK_TREE);
        put_u64(sb, 112, CHUNK_LENGTH);
        put_u64(sb, 136, 1);
        put_u32(sb, 144, 4096);
        put_u32(sb, 148, BTRFS_NODESIZE as u32);
        put_u32(sb, 160, 17 + 80);

        let array = &mut sb[811..];
        put_u64(array, 0, 256);
        array[8] = CHUNK_ITEM;
        put_u64(array, 9, CHUNK_LOGICAL);
        array[17..97].copy_from_slice(&btrfs_chunk());

        let csum = crc32c::crc32c(&sb[32..]);
        put_u32(sb, 0, csum);
    }

    // chunk 树里再出现一次同一个 system chunk
    btrfs_leaf(&mut img, CHUNK_TREE, vec![(256, CHUNK_ITEM, CHUNK_LOGICAL, btrfs_chunk())]);

    btrfs_leaf(
        &mut img,
        ROOT_TREE,
        vec![
            (5, ROOT_ITEM, 0, btrfs_root_item(FS_TREE)),
            (5, ROOT_REF, 257, btrfs_root_ref("snap")),
            (257, ROOT_ITEM, 0, btrfs_root_item(SNAP_TREE)),
        ],
    );

    let ldlinux = btrfs_ldlinux();
    let mut items: Vec<LeafItem> = vec![
        (256, INODE_ITEM, 0, btrfs_inode(0o040755, 0)),
        (257, INODE_ITEM, 0, btrfs_inode(0o100644, ldlinux.len() as u64)),
        (257, EXTENT_DATA, 0, btrfs_regular(CHUNK_LOGICAL + 0x4_0000, 0, 8192)),
        (257, EXTENT_DATA, 12288, btrfs_regular(CHUNK_LOGICAL + 0x5_0000, 4096, 4096)),
        (258, INODE_ITEM, 0, btrfs_inode(0o100644, EXTLINUX_CONF.len() as u64)),
        (258, EXTENT_DATA, 0, btrfs_inline(EXTLINUX_CONF)),
        (259, INODE_ITEM, 0, btrfs_inode(0o120777, 11)),
        (259, EXTENT_DATA, 0, btrfs_inline(b"ldlinux.sys")),
    ];
    items.extend(btrfs_link(256, 2, 257, "ldlinux.sys", 1));
    items.extend(btrfs_link(256, 3, 258, "extlinux.conf", 1));
    items.extend(btrfs_link(256, 4, 259, "vmlinuz", 7));
    btrfs_leaf(&mut img, FS_TREE, items);

    let mut items: Vec<LeafItem> = vec![
        (256, INODE_ITEM, 0, btrfs_inode(0o040755, 0)),
        (257, INODE_ITEM, 0, btrfs_inode(0o100644, SNAP_FILE.len() as u64)),
        (257, EXTENT_DATA, 0, btrfs_inline(SNAP_FILE)),
    ];
    items.extend(btrfs_link(256, 2, 257, "only-in-snap", 1));
    btrfs_leaf(&mut img, SNAP_TREE, items);

    img[0x4_0000..0x4_2000].copy_from_slice(&pattern(8192, 21));
    img[0x5_0000..0x5_2000].copy_from_slice(&pattern(8192, 23));

    RamDisk::new(img)
}

/// 全零镜像，任何驱动都不认识
pub fn blank_image() -> RamDisk {
    RamDisk::new(vec![0u8; 128 * 1024])
}

/// 把镜像放在设备中 `offset` 字节处
pub fn with_partition(disk: RamDisk, offset: usize) -> RamDisk {
    let mut img = vec![0u8; offset];
    img.extend_from_slice(disk.as_bytes());
    RamDisk::new(img)
}
