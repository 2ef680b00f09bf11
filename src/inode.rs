//! The inode record and the block indexer that maps logical file offsets to disk blocks.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::{BLOCK_SIZE, N_DIRECT, PTRS_PER_BLK};
use log::trace;

/// Fixed 64-byte on-disk inode record.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Inode {
	pub uid: u32,
	pub gid: u32,
	/// File-type and permission bits; directory iff `S_IFDIR` is set.
	pub mode: u32,
	pub ctime: u32,
	pub mtime: u32,
	pub size: u32,
	/// Block numbers of the first [`N_DIRECT`] logical blocks; zero means unused.
	pub direct: [u32; N_DIRECT],
	/// Block holding [`PTRS_PER_BLK`] pointers for logical blocks `[N_DIRECT, N_DIRECT+256)`.
	pub indir_1: u32,
	/// Block holding [`PTRS_PER_BLK`] pointers to indirect blocks, covering
	/// `[N_DIRECT+256, N_DIRECT+256+256*256)`.
	pub indir_2: u32,
	_reserved: [u8; 8],
}

impl Inode {
	/// An all-zero inode, as used for freshly allocated slots before the caller fills it in.
	pub const fn zeroed() -> Self {
		Self {
			uid: 0,
			gid: 0,
			mode: 0,
			ctime: 0,
			mtime: 0,
			size: 0,
			direct: [0; N_DIRECT],
			indir_1: 0,
			indir_2: 0,
			_reserved: [0; 8],
		}
	}

	/// Whether this inode is a directory.
	pub fn is_dir(&self) -> bool {
		self.mode & libc::S_IFDIR as u32 != 0
	}

	/// The number of logical blocks occupied by `size` bytes of content.
	pub fn block_count(&self) -> u32 {
		self.size.div_ceil(BLOCK_SIZE)
	}

	/// Serializes this inode to its fixed on-disk representation.
	pub fn to_bytes(&self) -> [u8; crate::INODE_SIZE as usize] {
		let mut buf = [0u8; crate::INODE_SIZE as usize];
		unsafe {
			buf.copy_from_slice(std::slice::from_raw_parts(
				self as *const Self as *const u8,
				crate::INODE_SIZE as usize,
			));
		}
		buf
	}

	/// Deserializes an inode from its fixed on-disk representation.
	pub fn from_bytes(buf: &[u8]) -> Self {
		let mut inode = Self::zeroed();
		unsafe {
			std::slice::from_raw_parts_mut(&mut inode as *mut Self as *mut u8, crate::INODE_SIZE as usize)
				.copy_from_slice(&buf[..crate::INODE_SIZE as usize]);
		}
		inode
	}
}

fn read_ptrs(buf: &[u8; BLOCK_SIZE as usize]) -> [u32; PTRS_PER_BLK as usize] {
	let mut out = [0u32; PTRS_PER_BLK as usize];
	for (i, slot) in out.iter_mut().enumerate() {
		*slot = u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
	}
	out
}

fn write_ptrs(ptrs: &[u32; PTRS_PER_BLK as usize]) -> [u8; BLOCK_SIZE as usize] {
	let mut buf = [0u8; BLOCK_SIZE as usize];
	for (i, ptr) in ptrs.iter().enumerate() {
		buf[i * 4..i * 4 + 4].copy_from_slice(&ptr.to_le_bytes());
	}
	buf
}

/// Reads and decodes a raw indirection block's pointer table.
///
/// Exposed for tools that walk an inode's indirection structure directly rather than through
/// [`lookup_block`]'s logical-offset interface, such as an offline consistency check.
pub fn read_ptr_block(dev: &mut dyn BlockDevice, block: u32) -> Result<[u32; PTRS_PER_BLK as usize]> {
	let mut raw = [0u8; BLOCK_SIZE as usize];
	dev.read_block(block, &mut raw)?;
	Ok(read_ptrs(&raw))
}

/// Looks up the disk block backing logical block `n` of `inode`, without allocating.
///
/// Returns 0 if the block is not (yet) allocated.
pub fn lookup_block(dev: &mut dyn BlockDevice, inode: &Inode, n: u32) -> Result<u32> {
	if n < N_DIRECT as u32 {
		return Ok(inode.direct[n as usize]);
	}
	if n < N_DIRECT as u32 + PTRS_PER_BLK {
		if inode.indir_1 == 0 {
			return Ok(0);
		}
		let mut raw = [0u8; BLOCK_SIZE as usize];
		dev.read_block(inode.indir_1, &mut raw)?;
		return Ok(read_ptrs(&raw)[(n - N_DIRECT as u32) as usize]);
	}
	let k = n - N_DIRECT as u32 - PTRS_PER_BLK;
	let (outer, inner) = ((k / PTRS_PER_BLK) as usize, (k % PTRS_PER_BLK) as usize);
	if inode.indir_2 == 0 {
		return Ok(0);
	}
	let mut raw = [0u8; BLOCK_SIZE as usize];
	dev.read_block(inode.indir_2, &mut raw)?;
	let outer_blk = read_ptrs(&raw)[outer];
	if outer_blk == 0 {
		return Ok(0);
	}
	dev.read_block(outer_blk, &mut raw)?;
	Ok(read_ptrs(&raw)[inner])
}

/// Translates logical block `n` of `inode` to a disk block number, allocating direct,
/// single-indirect, and double-indirect structures as needed to reach it.
///
/// Every logical block strictly between the inode's current block count and `n` is also
/// allocated, matching the source's "extend, don't leave holes" contract. Indirection blocks
/// are written back to `dev` only once they are either full or this is the final block of the
/// request, bounding indirection writes to O(1) per indirection block touched.
///
/// Returns the disk block number now backing logical block `n`.
pub fn resolve_block_alloc(
	dev: &mut dyn BlockDevice,
	block_bitmap: &mut Bitmap,
	first_data_block: u32,
	num_blocks: u32,
	inode: &mut Inode,
	n: u32,
) -> Result<u32> {
	let cur = inode.block_count();
	if n < cur {
		return lookup_block(dev, inode, n);
	}
	let mut indir1_buf: Option<[u32; PTRS_PER_BLK as usize]> = None;
	let mut indir2_buf: Option<[u32; PTRS_PER_BLK as usize]> = None;
	let mut inner_buf: Option<([u32; PTRS_PER_BLK as usize], usize)> = None;
	let mut result = 0u32;

	for i in cur..=n {
		let new_block = block_bitmap
			.alloc_lowest_free(first_data_block, num_blocks)
			.ok_or(Error::NoSpace)?;

		if i < N_DIRECT as u32 {
			inode.direct[i as usize] = new_block;
		} else if i < N_DIRECT as u32 + PTRS_PER_BLK {
			if indir1_buf.is_none() {
				indir1_buf = Some(if inode.indir_1 == 0 {
					inode.indir_1 = block_bitmap
						.alloc_lowest_free(first_data_block, num_blocks)
						.ok_or(Error::NoSpace)?;
					[0u32; PTRS_PER_BLK as usize]
				} else {
					let mut raw = [0u8; BLOCK_SIZE as usize];
					dev.read_block(inode.indir_1, &mut raw)?;
					read_ptrs(&raw)
				});
			}
			let slot = (i - N_DIRECT as u32) as usize;
			let buf = indir1_buf.as_mut().unwrap();
			buf[slot] = new_block;
			if slot == PTRS_PER_BLK as usize - 1 || i == n {
				trace!("inode: flushing indir_1 block {}", inode.indir_1);
				dev.write_block(inode.indir_1, &write_ptrs(buf))?;
			}
		} else {
			let k = i - N_DIRECT as u32 - PTRS_PER_BLK;
			let (outer, inner) = ((k / PTRS_PER_BLK) as usize, (k % PTRS_PER_BLK) as usize);
			if indir2_buf.is_none() {
				indir2_buf = Some(if inode.indir_2 == 0 {
					inode.indir_2 = block_bitmap
						.alloc_lowest_free(first_data_block, num_blocks)
						.ok_or(Error::NoSpace)?;
					[0u32; PTRS_PER_BLK as usize]
				} else {
					let mut raw = [0u8; BLOCK_SIZE as usize];
					dev.read_block(inode.indir_2, &mut raw)?;
					read_ptrs(&raw)
				});
			}
			let outer_table = indir2_buf.as_mut().unwrap();
			if inner_buf.as_ref().map(|(_, o)| *o) != Some(outer) {
				inner_buf = Some(if outer_table[outer] == 0 {
					outer_table[outer] = block_bitmap
						.alloc_lowest_free(first_data_block, num_blocks)
						.ok_or(Error::NoSpace)?;
					([0u32; PTRS_PER_BLK as usize], outer)
				} else {
					let mut raw = [0u8; BLOCK_SIZE as usize];
					dev.read_block(outer_table[outer], &mut raw)?;
					(read_ptrs(&raw), outer)
				});
			}
			let (inner_table, _) = inner_buf.as_mut().unwrap();
			inner_table[inner] = new_block;
			if inner == PTRS_PER_BLK as usize - 1 || i == n {
				trace!("inode: flushing indirect block {}", outer_table[outer]);
				dev.write_block(outer_table[outer], &write_ptrs(inner_table))?;
			}
		}

		if i == n {
			result = new_block;
		}
	}

	if let Some(outer_table) = indir2_buf {
		trace!("inode: flushing indir_2 block {}", inode.indir_2);
		dev.write_block(inode.indir_2, &write_ptrs(&outer_table))?;
	}
	Ok(result)
}

/// Frees every data and indirection block reachable from `inode`, and resets its block pointers.
///
/// Used by `truncate(path, 0)`; does not touch `mode`/`uid`/`gid`/timestamps.
pub fn free_content(
	dev: &mut dyn BlockDevice,
	block_bitmap: &mut Bitmap,
	inode: &mut Inode,
) -> Result<()> {
	for i in 0..inode.block_count() {
		let blk = lookup_block(dev, inode, i)?;
		if blk != 0 {
			block_bitmap.clear(blk);
		}
	}
	if inode.indir_1 != 0 {
		block_bitmap.clear(inode.indir_1);
		inode.indir_1 = 0;
	}
	if inode.indir_2 != 0 {
		let mut raw = [0u8; BLOCK_SIZE as usize];
		dev.read_block(inode.indir_2, &mut raw)?;
		for ptr in read_ptrs(&raw) {
			if ptr != 0 {
				block_bitmap.clear(ptr);
			}
		}
		block_bitmap.clear(inode.indir_2);
		inode.indir_2 = 0;
	}
	inode.direct = [0; N_DIRECT];
	inode.size = 0;
	Ok(())
}
