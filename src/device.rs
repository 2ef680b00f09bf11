//! The block device interface consumed by the filesystem core.

use crate::BLOCK_SIZE;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Synchronous block-addressed storage.
///
/// The filesystem core never touches the backing storage directly; every block read or write
/// goes through an implementation of this trait. Indexing is by block number, block 0 being the
/// superblock.
pub trait BlockDevice {
	/// Reads `count` consecutive blocks starting at `first_block` into `out`.
	///
	/// `out` must be exactly `count * BLOCK_SIZE` bytes.
	fn read(&mut self, first_block: u32, count: u32, out: &mut [u8]) -> io::Result<()>;

	/// Writes `count` consecutive blocks starting at `first_block` from `data`.
	///
	/// `data` must be exactly `count * BLOCK_SIZE` bytes.
	fn write(&mut self, first_block: u32, count: u32, data: &[u8]) -> io::Result<()>;

	/// Returns the total number of blocks the device holds.
	fn block_count(&self) -> u32;

	/// Reads a single block.
	fn read_block(&mut self, block: u32, out: &mut [u8; BLOCK_SIZE as usize]) -> io::Result<()> {
		self.read(block, 1, out)
	}

	/// Writes a single block.
	fn write_block(&mut self, block: u32, data: &[u8; BLOCK_SIZE as usize]) -> io::Result<()> {
		self.write(block, 1, data)
	}
}

/// A [`BlockDevice`] backed by a plain file, addressed with `seek` + `read_exact`/`write_all`.
///
/// The concrete adapter the companion tools and tests run against.
pub struct FileBlockDevice {
	file: File,
	block_count: u32,
}

impl FileBlockDevice {
	/// Wraps `file`, treating it as `block_count` blocks of [`BLOCK_SIZE`] bytes.
	pub fn new(file: File, block_count: u32) -> Self {
		Self { file, block_count }
	}

	fn offset(block: u32) -> u64 {
		block as u64 * BLOCK_SIZE as u64
	}
}

impl BlockDevice for FileBlockDevice {
	fn read(&mut self, first_block: u32, count: u32, out: &mut [u8]) -> io::Result<()> {
		debug_assert_eq!(out.len(), count as usize * BLOCK_SIZE as usize);
		self.file.seek(SeekFrom::Start(Self::offset(first_block)))?;
		self.file.read_exact(out)
	}

	fn write(&mut self, first_block: u32, count: u32, data: &[u8]) -> io::Result<()> {
		debug_assert_eq!(data.len(), count as usize * BLOCK_SIZE as usize);
		self.file.seek(SeekFrom::Start(Self::offset(first_block)))?;
		self.file.write_all(data)
	}

	fn block_count(&self) -> u32 {
		self.block_count
	}
}
