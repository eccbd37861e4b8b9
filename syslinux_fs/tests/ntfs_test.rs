//! NTFS 驱动的集成测试

mod common;

use common::*;
use syslinux_fs::{ErrorKind, FsType, InodeType, SeekFrom};

#[test]
fn test_mount_ntfs() {
    init_logger();
    let fs = mount(ntfs_image());

    assert_eq!(fs.fs_type(), FsType::Ntfs);
    let st = fs.statfs();
    assert_eq!(st.driver, "ntfs");
    assert_eq!(st.block_size, NTFS_CLUSTER as u32);
    assert_eq!(fs.root().ino, 5);

    println!("✅ Successfully mounted NTFS image!");
}

#[test]
fn test_read_fragmented_sparse_file() {
    init_logger();
    let mut fs = mount(ntfs_image());

    let data = read_file(&mut fs, "/ldlinux.sys");
    assert_eq!(data.len(), NTFS_LDLINUX_SIZE);
    assert_eq!(data, ntfs_ldlinux());

    // 从稀疏簇中间开始读，跨进最后一段
    let mut file = fs.open("/ldlinux.sys").expect("Failed to open ldlinux.sys");
    file.seek(SeekFrom::Start(3 * NTFS_CLUSTER as u64 - 10))
        .expect("Failed to seek");
    let mut buf = [0u8; 30];
    assert_eq!(file.read(&mut buf).expect("Failed to read"), 30);
    assert_eq!(&buf[..], &ntfs_ldlinux()[3 * NTFS_CLUSTER - 10..3 * NTFS_CLUSTER + 20]);
}

#[test]
fn test_resident_file() {
    init_logger();
    let mut fs = mount(ntfs_image());

    assert_eq!(read_file(&mut fs, "/syslinux.cfg"), SYSLINUX_CFG);

    let mut file = fs.open("/syslinux.cfg").expect("Failed to open syslinux.cfg");
    let mut buf = vec![0u8; 512];
    let (n, more) = file.getfssec(&mut buf, 1).expect("getfssec failed");
    assert_eq!((n, more), (SYSLINUX_CFG.len(), false));
    assert_eq!(&buf[..n], SYSLINUX_CFG);
}

#[test]
fn test_case_insensitive_lookup() {
    init_logger();
    let mut fs = mount(ntfs_image());

    assert_eq!(read_file(&mut fs, "/LDLINUX.SYS"), ntfs_ldlinux());
    assert_eq!(read_file(&mut fs, "SysLinux.Cfg"), SYSLINUX_CFG);
}

#[test]
fn test_readdir_hides_system_entries() {
    init_logger();
    let mut fs = mount(ntfs_image());

    assert_eq!(list_dir(&mut fs, "/"), ["boot", "ldlinux.sys", "syslinux.cfg"]);

    let entries: Vec<(u64, InodeType)> = fs
        .opendir("/")
        .expect("Failed to open root")
        .map(|e| e.expect("Failed to read entry"))
        .map(|e| (e.ino, e.kind))
        .collect();
    assert_eq!(
        entries,
        [
            (8, InodeType::Directory),
            (6, InodeType::RegularFile),
            (7, InodeType::RegularFile)
        ]
    );
}

#[test]
fn test_index_allocation_lookup() {
    init_logger();
    let mut fs = mount(ntfs_image());

    // 根节点只有结束项，必须进入 INDX 块查找
    assert_eq!(read_file(&mut fs, "/boot/extlinux.conf"), EXTLINUX_CONF);
    assert_eq!(read_file(&mut fs, "/BOOT/ExtLinux.Conf"), EXTLINUX_CONF);

    let md = fs.stat("/boot/extlinux.conf").expect("stat failed");
    assert_eq!(md.ino, 10);
    assert_eq!(md.size, EXTLINUX_CONF.len() as u64);

    // 两个 INDX 块都找不到，包括未使用的第二块
    assert_eq!(
        err_kind(fs.open("/boot/missing.cfg")),
        Some(ErrorKind::NotFound)
    );
}

#[test]
fn test_index_allocation_readdir() {
    init_logger();
    let mut fs = mount(ntfs_image());

    // DOS 短名不列出
    assert_eq!(list_dir(&mut fs, "/boot"), ["extlinux.conf"]);

    let entry = fs
        .opendir("/boot")
        .expect("Failed to open boot")
        .next()
        .expect("empty directory")
        .expect("Failed to read entry");
    assert_eq!(entry.ino, 10);
    assert_eq!(entry.kind, InodeType::RegularFile);
}

#[test]
fn test_root_miss_reads_nothing() {
    init_logger();
    let mut fs = mount(ntfs_image());

    // 根目录的结束项不带子节点指针，查不到时不应读盘
    let misses = fs.cache().misses();
    let reads = fs.cache().bdev().read_count();
    assert_eq!(err_kind(fs.open("/missing.sys")), Some(ErrorKind::NotFound));
    assert_eq!(err_kind(fs.open("/extlinux.conf")), Some(ErrorKind::NotFound));
    assert_eq!(fs.cache().misses(), misses);
    assert_eq!(fs.cache().bdev().read_count(), reads);

    // 带子节点的目录要读 MFT 记录和 INDX 块
    assert_eq!(
        err_kind(fs.open("/boot/missing.cfg")),
        Some(ErrorKind::NotFound)
    );
    assert!(fs.cache().misses() > misses);
    assert!(fs.cache().bdev().read_count() > reads);
}

#[test]
fn test_lookup_errors() {
    init_logger();
    let mut fs = mount(ntfs_image());

    assert_eq!(err_kind(fs.open("/missing.sys")), Some(ErrorKind::NotFound));
    assert_eq!(err_kind(fs.open("/")), Some(ErrorKind::NotFile));
    assert_eq!(
        err_kind(fs.open("/ldlinux.sys/x")),
        Some(ErrorKind::NotDirectory)
    );
}

#[test]
fn test_stat_nt_time() {
    init_logger();
    let mut fs = mount(ntfs_image());

    let md = fs.stat("/ldlinux.sys").expect("stat failed");
    assert_eq!(md.ino, 6);
    assert_eq!(md.size, NTFS_LDLINUX_SIZE as u64);
    assert_eq!(md.mtime, NTFS_UNIX_TIME);
    assert_eq!(md.atime, NTFS_UNIX_TIME);
    assert_eq!(md.ctime, NTFS_UNIX_TIME);

    assert_eq!(fs.stat("/").expect("stat failed").kind, InodeType::Directory);
}
