//! End-to-end scenarios run against an image built by the in-tree image builder, rather than a
//! `Filesystem` constructed directly in memory.

use blockfs::device::FileBlockDevice;
use blockfs::{format, Error, Filesystem, BLOCK_SIZE, N_DIRECT};

fn fresh_image(num_blocks: u32) -> Filesystem<FileBlockDevice> {
	let file = tempfile::tempfile().unwrap();
	file.set_len(num_blocks as u64 * BLOCK_SIZE as u64).unwrap();
	let mut dev = FileBlockDevice::new(file, num_blocks);
	format::format(&mut dev, num_blocks, 128).unwrap();
	Filesystem::mount(dev).unwrap()
}

#[test]
fn scenario_1_mkdir_then_getattr() {
	let mut fs = fresh_image(64);
	fs.mkdir("/a", 0o755).unwrap();
	let stat = fs.getattr("/a").unwrap();
	assert_ne!(stat.mode & libc::S_IFDIR as u32, 0);
	assert_eq!(stat.nlink, 1);
}

#[test]
fn scenario_2_mknod_write_read_roundtrip() {
	let mut fs = fresh_image(64);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mknod("/a/f", 0o644).unwrap();
	fs.write("/a/f", b"hello", 0).unwrap();
	let mut buf = [0u8; 5];
	fs.read("/a/f", &mut buf, 0).unwrap();
	assert_eq!(&buf, b"hello");
	assert_eq!(fs.getattr("/a/f").unwrap().size, 5);
}

#[test]
fn scenario_3_write_past_direct_region_allocates_indirection() {
	let mut fs = fresh_image(4096);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mknod("/a/f", 0o644).unwrap();
	let free_before = fs.statfs().unwrap().free_blocks;
	let payload = vec![0u8; 1024 * 7 + 17];
	fs.write("/a/f", &payload, 0).unwrap();
	assert_eq!(fs.getattr("/a/f").unwrap().size, payload.len() as u64);
	let free_after = fs.statfs().unwrap().free_blocks;
	// 8 logical data blocks (6 direct + 2 via indir_1), plus the indir_1 pointer block itself.
	assert_eq!(free_before - free_after, 9);
}

#[test]
fn scenario_4_truncate_to_zero_reclaims_blocks_and_statfs_recovers() {
	let mut fs = fresh_image(4096);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mknod("/a/f", 0o644).unwrap();
	let free_before = fs.statfs().unwrap().free_blocks;
	fs.write("/a/f", &vec![0u8; 1024 * 7 + 17], 0).unwrap();
	fs.truncate("/a/f", 0).unwrap();
	let stat = fs.getattr("/a/f").unwrap();
	assert_eq!(stat.size, 0);
	assert_eq!(fs.statfs().unwrap().free_blocks, free_before);
}

#[test]
fn scenario_5_mknod_on_existing_path_is_exists() {
	let mut fs = fresh_image(64);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mknod("/a/f", 0o644).unwrap();
	assert!(matches!(fs.mknod("/a/f", 0o644), Err(Error::Exists)));
}

#[test]
fn scenario_6_rename_moves_the_entry() {
	let mut fs = fresh_image(64);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mknod("/a/f", 0o644).unwrap();
	fs.rename("/a/f", "/a/g").unwrap();
	assert!(fs.getattr("/a/g").is_ok());
	assert!(matches!(fs.getattr("/a/f"), Err(Error::NotFound)));
}

#[test]
fn boundary_write_at_direct_indirect_edge_allocates_indir_1() {
	let mut fs = fresh_image(4096);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mknod("/a/f", 0o644).unwrap();
	// Fill the direct region first; writes never leave holes, so the boundary can only be
	// reached by growing the file up to it.
	let boundary = N_DIRECT as u64 * BLOCK_SIZE as u64;
	fs.write("/a/f", &vec![0u8; boundary as usize], 0).unwrap();
	fs.write("/a/f", b"x", boundary).unwrap();
	assert_eq!(fs.getattr("/a/f").unwrap().size, boundary + 1);
}

#[test]
fn boundary_rmdir_on_nonempty_directory_is_not_empty() {
	let mut fs = fresh_image(64);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mknod("/a/f", 0o644).unwrap();
	assert!(matches!(fs.rmdir("/a"), Err(Error::NotEmpty)));
}

#[test]
fn boundary_rename_across_different_parents_is_invalid() {
	let mut fs = fresh_image(64);
	fs.mkdir("/a", 0o755).unwrap();
	fs.mkdir("/b", 0o755).unwrap();
	fs.mknod("/a/x", 0o644).unwrap();
	assert!(matches!(fs.rename("/a/x", "/b/y"), Err(Error::Invalid)));
}

#[test]
fn full_scenario_sequence_runs_in_order_against_one_image() {
	let mut fs = fresh_image(4096);

	fs.mkdir("/a", 0o755).unwrap();
	let stat = fs.getattr("/a").unwrap();
	assert_ne!(stat.mode & libc::S_IFDIR as u32, 0);
	assert_eq!(stat.nlink, 1);

	fs.mknod("/a/f", 0o644).unwrap();
	let free_before_any_write = fs.statfs().unwrap().free_blocks;
	fs.write("/a/f", b"hello", 0).unwrap();
	let mut buf = [0u8; 5];
	fs.read("/a/f", &mut buf, 0).unwrap();
	assert_eq!(&buf, b"hello");
	assert_eq!(fs.getattr("/a/f").unwrap().size, 5);

	let payload = vec![0u8; 1024 * 7 + 17];
	fs.write("/a/f", &payload, 0).unwrap();
	assert_eq!(fs.getattr("/a/f").unwrap().size, payload.len() as u64);
	// 1 block already held the "hello" write; 7 more data blocks (logical indices 1-7) plus
	// the indir_1 pointer block are newly allocated to reach this size.
	assert_eq!(free_before_any_write - fs.statfs().unwrap().free_blocks, 9);

	fs.truncate("/a/f", 0).unwrap();
	assert_eq!(fs.getattr("/a/f").unwrap().size, 0);
	assert_eq!(fs.statfs().unwrap().free_blocks, free_before_any_write);

	assert!(matches!(fs.mknod("/a/f", 0o644), Err(Error::Exists)));

	fs.rename("/a/f", "/a/g").unwrap();
	assert!(fs.getattr("/a/g").is_ok());
	assert!(matches!(fs.getattr("/a/f"), Err(Error::NotFound)));
}
