//! The on-disk superblock (block 0) and the layout constants it describes.

use crate::device::BlockDevice;
use crate::{BLOCK_SIZE, MAGIC};
use std::io;
use std::mem::size_of;
use std::slice;

/// Block 0 of the image. Sizes everything else on the disk.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Superblock {
	/// Sentinel identifying this filesystem type.
	pub magic: u32,
	/// Number of blocks holding the inode bitmap.
	pub inode_map_sz: u32,
	/// Number of blocks holding the block bitmap.
	pub block_map_sz: u32,
	/// Number of blocks holding the inode table.
	pub inode_region_sz: u32,
	/// Total number of blocks in the image.
	pub num_blocks: u32,
	/// Inode number of the root directory.
	pub root_inode: u32,
}

impl Superblock {
	/// The block index of the first block of the inode bitmap.
	pub fn inode_bitmap_start(&self) -> u32 {
		1
	}

	/// The block index of the first block of the block bitmap.
	pub fn block_bitmap_start(&self) -> u32 {
		1 + self.inode_map_sz
	}

	/// The block index of the first block of the inode table.
	pub fn inode_table_start(&self) -> u32 {
		1 + self.inode_map_sz + self.block_map_sz
	}

	/// The block index of the first block of the data region.
	pub fn first_data_block(&self) -> u32 {
		1 + self.inode_map_sz + self.block_map_sz + self.inode_region_sz
	}

	/// The upper bound (exclusive) on inode numbers addressable by the inode table.
	pub fn max_inodes(&self) -> u32 {
		self.inode_region_sz * crate::INODES_PER_BLK
	}

	/// Reads the superblock from block 0 of `dev`.
	pub fn read(dev: &mut dyn BlockDevice) -> io::Result<Self> {
		let mut buf = [0u8; BLOCK_SIZE as usize];
		dev.read_block(0, &mut buf)?;
		let mut sb: Self = unsafe { std::mem::zeroed() };
		let size = size_of::<Self>();
		unsafe {
			slice::from_raw_parts_mut(&mut sb as *mut Self as *mut u8, size)
				.copy_from_slice(&buf[..size]);
		}
		Ok(sb)
	}

	/// Writes the superblock to block 0 of `dev`, zero-padded to a full block.
	pub fn write(&self, dev: &mut dyn BlockDevice) -> io::Result<()> {
		let mut buf = [0u8; BLOCK_SIZE as usize];
		let size = size_of::<Self>();
		unsafe {
			buf[..size]
				.copy_from_slice(slice::from_raw_parts(self as *const Self as *const u8, size));
		}
		dev.write_block(0, &buf)
	}

	/// Whether `magic` matches this filesystem's sentinel.
	pub fn is_valid(&self) -> bool {
		self.magic == MAGIC
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::FileBlockDevice;

	#[test]
	fn write_then_read_round_trips() {
		let file = tempfile::tempfile().unwrap();
		file.set_len(BLOCK_SIZE as u64).unwrap();
		let mut dev = FileBlockDevice::new(file, 1);
		let sb = Superblock {
			magic: MAGIC,
			inode_map_sz: 2,
			block_map_sz: 3,
			inode_region_sz: 4,
			num_blocks: 100,
			root_inode: 1,
		};
		sb.write(&mut dev).unwrap();
		let read_back = Superblock::read(&mut dev).unwrap();
		assert!(read_back.is_valid());
		assert_eq!(read_back.inode_bitmap_start(), 1);
		assert_eq!(read_back.block_bitmap_start(), 3);
		assert_eq!(read_back.inode_table_start(), 6);
		assert_eq!(read_back.first_data_block(), 10);
	}
}
