//! End-to-end scenarios and boundary cases driven directly through
//! `FileSystem`'s path-based API against a tempdir-backed block device.

use uxfs::constants::{BLOCK_SIZE, DIRECT_PTRS, INDIRECT_PTRS, MAX_FILENAME_LEN, PTRS_PER_BLOCK};
use uxfs::device::FileBlockDevice;
use uxfs::error::FsError;
use uxfs::fs::FileSystem;

fn mounted() -> FileSystem<FileBlockDevice> {
    let dir = tempfile::tempdir().unwrap();
    let dev = FileBlockDevice::new(dir.into_path());
    FileSystem::format(dev).unwrap()
}

#[test]
fn scenario_1_create_write_read() {
    let mut fs = mounted();
    fs.mkdir("/a").unwrap();
    fs.mknod("/a/f").unwrap();
    fs.write("/a/f", b"hello", 0, false).unwrap();
    assert_eq!(fs.getattr("/a/f").unwrap().size, 5);
    assert_eq!(fs.read("/a/f", 5, 0).unwrap(), b"hello");
}

#[test]
fn scenario_2_write_then_shrink_frees_exactly_one_block() {
    let mut fs = mounted();
    fs.mknod("/x").unwrap();
    let zeros = vec![0u8; BLOCK_SIZE];
    fs.write("/x", &zeros, 0, false).unwrap();
    let free_after_write = fs.statfs().free_blocks;
    fs.truncate("/x", 1).unwrap();
    assert_eq!(fs.getattr("/x").unwrap().size, 1);
    assert_eq!(fs.statfs().free_blocks, free_after_write + 1);
}

#[test]
fn scenario_3_directory_spills_into_indirect_entries() {
    let mut fs = mounted();
    for i in 0..13 {
        fs.mknod(&format!("/f{i}")).unwrap();
    }
    let entries = fs.readdir("/").unwrap();
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert!(names.contains(&"."));
    assert!(names.contains(&".."));
    for i in 0..13 {
        assert!(names.contains(&format!("f{i}").as_str()));
    }
}

#[test]
fn scenario_4_rename_then_read_and_source_gone() {
    let mut fs = mounted();
    fs.mknod("/a").unwrap();
    fs.write("/a", b"abcdef", 0, false).unwrap();
    fs.rename("/a", "/b").unwrap();
    assert_eq!(fs.read("/b", 6, 0).unwrap(), b"abcdef");
    assert!(matches!(fs.getattr("/a"), Err(FsError::NotFound)));
}

#[test]
fn scenario_5_rmdir_requires_empty_directory() {
    let mut fs = mounted();
    fs.mkdir("/d").unwrap();
    fs.mknod("/d/x").unwrap();
    assert!(matches!(fs.rmdir("/d"), Err(FsError::NotEmpty)));
    fs.unlink("/d/x").unwrap();
    assert!(fs.rmdir("/d").is_ok());
}

#[test]
fn scenario_6_missing_file_and_root_removal() {
    let mut fs = mounted();
    assert!(matches!(fs.write("/nf", b"x", 0, false), Err(FsError::NotFound)));
    assert!(matches!(fs.rmdir("/"), Err(FsError::Busy)));
}

#[test]
fn boundary_name_exactly_l_succeeds_l_plus_one_fails() {
    let mut fs = mounted();
    let exact = "n".repeat(MAX_FILENAME_LEN);
    fs.mknod(&format!("/{exact}")).unwrap();
    let over = "n".repeat(MAX_FILENAME_LEN + 1);
    assert!(matches!(
        fs.mknod(&format!("/{over}")),
        Err(FsError::NameTooLong)
    ));
}

#[test]
fn boundary_write_spans_last_direct_and_first_indirect_block() {
    let mut fs = mounted();
    fs.mknod("/s").unwrap();
    let offset = (DIRECT_PTRS as u64) * (BLOCK_SIZE as u64) - 1;
    fs.write("/s", &[1, 2], offset, false).unwrap();
    let attr = fs.getattr("/s").unwrap();
    assert_eq!(attr.size, offset + 2);
    let back = fs.read("/s", 2, offset).unwrap();
    assert_eq!(back, vec![1, 2]);
}

#[test]
fn boundary_write_at_max_file_size_minus_one_succeeds_two_bytes_overflow() {
    let mut fs = mounted();
    fs.mknod("/big").unwrap();
    let max_logical_blocks = DIRECT_PTRS + INDIRECT_PTRS * PTRS_PER_BLOCK;
    let last_byte = (max_logical_blocks as u64) * (BLOCK_SIZE as u64) - 1;
    fs.write("/big", &[9], last_byte, false).unwrap();
    assert_eq!(fs.getattr("/big").unwrap().size, last_byte + 1);

    let mut fs2 = mounted();
    fs2.mknod("/big2").unwrap();
    assert!(matches!(
        fs2.write("/big2", &[9, 9], last_byte, false),
        Err(FsError::FileTooBig)
    ));
}

#[test]
fn boundary_read_past_eof_is_empty_and_straddling_eof_is_clamped() {
    let mut fs = mounted();
    fs.mknod("/r").unwrap();
    fs.write("/r", b"abc", 0, false).unwrap();
    assert_eq!(fs.read("/r", 10, 10).unwrap(), Vec::<u8>::new());
    assert_eq!(fs.read("/r", 10, 1).unwrap(), b"bc");
}

#[test]
fn property_mkdir_rmdir_restores_counters() {
    let mut fs = mounted();
    let before = fs.statfs();
    fs.mkdir("/tmp_dir").unwrap();
    fs.rmdir("/tmp_dir").unwrap();
    let after = fs.statfs();
    assert_eq!(before.free_blocks, after.free_blocks);
    assert_eq!(before.free_inodes, after.free_inodes);
}

#[test]
fn property_rename_twice_is_identity() {
    let mut fs = mounted();
    fs.mknod("/a").unwrap();
    fs.write("/a", b"data", 0, false).unwrap();
    fs.rename("/a", "/b").unwrap();
    fs.rename("/b", "/a").unwrap();
    assert_eq!(fs.read("/a", 4, 0).unwrap(), b"data");
    assert!(matches!(fs.getattr("/b"), Err(FsError::NotFound)));
}

#[test]
fn property_write_read_roundtrip_at_arbitrary_offset() {
    let mut fs = mounted();
    fs.mknod("/rt").unwrap();
    fs.write("/rt", b"xyz", 0, false).unwrap();
    fs.write("/rt", b"123", 4096 + 10, false).unwrap();
    assert_eq!(fs.read("/rt", 3, 4096 + 10).unwrap(), b"123");
    assert_eq!(fs.read("/rt", 3, 0).unwrap(), b"xyz");
}

#[test]
fn reload_after_format_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.into_path();
    {
        let dev = FileBlockDevice::new(root.clone());
        let mut fs = FileSystem::format(dev).unwrap();
        fs.mknod("/persisted").unwrap();
        fs.write("/persisted", b"still here", 0, false).unwrap();
        fs.finalize().unwrap();
    }
    let dev = FileBlockDevice::new(root);
    let mut fs = FileSystem::load(dev).unwrap();
    assert_eq!(fs.read("/persisted", 10, 0).unwrap(), b"still here");
}
