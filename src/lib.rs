//! A small Unix-style, block-based filesystem: on-disk layout, in-memory mount state, and the
//! file operations a bridge (FUSE or otherwise) would dispatch onto it.

pub mod bitmap;
pub mod device;
pub mod dirent;
pub mod error;
pub mod format;
pub mod fs;
pub mod inode;
pub mod path;
pub mod superblock;

pub use device::{BlockDevice, FileBlockDevice};
pub use dirent::DirEntry;
pub use error::{Error, Result};
pub use fs::{Filesystem, Handle, Stat, Statfs};
pub use inode::Inode;
pub use superblock::Superblock;

/// Size in bytes of every block on disk, including block 0.
pub const BLOCK_SIZE: u32 = 1024;

/// Sentinel written to the superblock's `magic` field.
pub const MAGIC: u32 = 0x3030_3635;

/// Number of block pointers stored directly in an inode.
pub const N_DIRECT: usize = 6;

/// Fixed size in bytes of one on-disk inode record.
pub const INODE_SIZE: u32 = 64;

/// Number of inode records packed into one block.
pub const INODES_PER_BLK: u32 = BLOCK_SIZE / INODE_SIZE;

/// Number of `u32` block pointers packed into one indirection block.
pub const PTRS_PER_BLK: u32 = BLOCK_SIZE / 4;

/// Fixed size in bytes of one directory entry.
pub const DIRENT_SIZE: u32 = 32;

/// Longest name a directory entry can store, including the terminating NUL.
pub const FS_FILENAME_SIZE: usize = 24;

/// Number of directory entry slots in one directory block.
pub const DIRENTS_PER_BLK: usize = (BLOCK_SIZE / DIRENT_SIZE) as usize;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn on_disk_sizes_match_constants() {
		assert_eq!(std::mem::size_of::<Inode>(), INODE_SIZE as usize);
		assert_eq!(std::mem::size_of::<DirEntry>(), DIRENT_SIZE as usize);
	}
}
