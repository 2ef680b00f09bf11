//! Building a fresh, empty image: layout sizing and the initial superblock/bitmap/root-inode
//! writes. Used by the image builder tool and by this crate's own tests.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::superblock::Superblock;
use crate::{BLOCK_SIZE, INODES_PER_BLK, INODE_SIZE, MAGIC};
use log::info;
use std::time::{SystemTime, UNIX_EPOCH};

fn now() -> u32 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as u32
}

/// The root directory's inode number. Inode 0 is never issued; the reserved prefix of the inode
/// bitmap covers indices `0..=ROOT_INODE`.
pub const ROOT_INODE: u32 = 1;

/// Formats `dev`, sized at `num_blocks` blocks, with a fresh superblock, both bitmaps, an empty
/// inode table, and a root directory holding zero entries.
///
/// `min_inodes` is a lower bound on the inode table's capacity; it is rounded up to a whole
/// number of inode-table blocks. Fails with [`Error::NoSpace`] if `num_blocks` isn't large enough
/// to hold the computed layout plus at least one data block for the root directory.
pub fn format(dev: &mut dyn BlockDevice, num_blocks: u32, min_inodes: u32) -> Result<()> {
	let bits_per_block = BLOCK_SIZE * 8;
	let inode_region_sz = min_inodes.max(ROOT_INODE + 1).div_ceil(INODES_PER_BLK);
	let max_inodes = inode_region_sz * INODES_PER_BLK;
	let inode_map_sz = max_inodes.div_ceil(bits_per_block);
	let block_map_sz = num_blocks.div_ceil(bits_per_block);

	let sb = Superblock {
		magic: MAGIC,
		inode_map_sz,
		block_map_sz,
		inode_region_sz,
		num_blocks,
		root_inode: ROOT_INODE,
	};
	if sb.first_data_block() >= num_blocks {
		return Err(Error::NoSpace);
	}
	sb.write(dev)?;

	let mut inode_bitmap = Bitmap::zeroed(sb.inode_bitmap_start(), sb.inode_map_sz);
	for i in 0..=ROOT_INODE {
		inode_bitmap.set(i);
	}
	inode_bitmap.flush(dev)?;

	let mut block_bitmap = Bitmap::zeroed(sb.block_bitmap_start(), sb.block_map_sz);
	for b in 0..sb.first_data_block() {
		block_bitmap.set(b);
	}
	let root_dir_block = block_bitmap
		.alloc_lowest_free(sb.first_data_block(), sb.num_blocks)
		.ok_or(Error::NoSpace)?;
	block_bitmap.flush(dev)?;

	let when = now();
	let mut root = Inode::zeroed();
	root.mode = libc::S_IFDIR as u32 | 0o755;
	root.ctime = when;
	root.mtime = when;
	root.direct[0] = root_dir_block;

	let it_start = sb.inode_table_start();
	for b in 0..sb.inode_region_sz {
		let base_inum = b * INODES_PER_BLK;
		let mut raw = [0u8; BLOCK_SIZE as usize];
		for slot in 0..INODES_PER_BLK {
			let inum = base_inum + slot;
			let inode = if inum == sb.root_inode { root } else { Inode::zeroed() };
			let off = slot as usize * INODE_SIZE as usize;
			raw[off..off + INODE_SIZE as usize].copy_from_slice(&inode.to_bytes());
		}
		dev.write_block(it_start + b, &raw)?;
	}

	dev.write_block(root_dir_block, &[0u8; BLOCK_SIZE as usize])?;

	info!(
		"formatted {num_blocks} blocks, {max_inodes} inodes (layout: sb=1 im={inode_map_sz} bm={block_map_sz} ir={inode_region_sz})"
	);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::FileBlockDevice;
	use crate::superblock::Superblock as Sb;

	#[test]
	fn formats_a_valid_image() {
		let file = tempfile::tempfile().unwrap();
		file.set_len(64 * BLOCK_SIZE as u64).unwrap();
		let mut dev = FileBlockDevice::new(file.try_clone().unwrap(), 64);
		format(&mut dev, 64, 32).unwrap();

		let mut dev = FileBlockDevice::new(file, 64);
		let sb = Sb::read(&mut dev).unwrap();
		assert!(sb.is_valid());
		assert_eq!(sb.root_inode, ROOT_INODE);
		assert!(sb.max_inodes() >= 32);
	}

	#[test]
	fn rejects_an_image_too_small_for_its_own_layout() {
		let file = tempfile::tempfile().unwrap();
		file.set_len(4 * BLOCK_SIZE as u64).unwrap();
		let mut dev = FileBlockDevice::new(file, 4);
		assert!(matches!(format(&mut dev, 4, 1024), Err(Error::NoSpace)));
	}
}
