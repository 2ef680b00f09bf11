//! Directory entries and the fixed-slot single-block directory format.

use crate::{BLOCK_SIZE, DIRENTS_PER_BLK, FS_FILENAME_SIZE};

/// 32-byte fixed-slot directory entry.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct DirEntry {
	pub valid: u8,
	pub is_dir: u8,
	_pad: u16,
	pub inode: u32,
	name: [u8; FS_FILENAME_SIZE],
}

impl DirEntry {
	/// An empty, unused slot.
	pub const fn empty() -> Self {
		Self { valid: 0, is_dir: 0, _pad: 0, inode: 0, name: [0; FS_FILENAME_SIZE] }
	}

	/// Builds a new, valid entry. `name` is truncated to fit if it's too long to store.
	pub fn new(inode: u32, is_dir: bool, name: &str) -> Self {
		let mut entry = Self::empty();
		entry.valid = 1;
		entry.is_dir = is_dir as u8;
		entry.inode = inode;
		entry.set_name(name);
		entry
	}

	/// The entry's name, up to the first NUL byte.
	pub fn name(&self) -> &str {
		let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		std::str::from_utf8(&self.name[..end]).unwrap_or("")
	}

	/// Overwrites the entry's name, NUL-terminated, truncated to fit.
	pub fn set_name(&mut self, name: &str) {
		let bytes = name.as_bytes();
		let len = bytes.len().min(FS_FILENAME_SIZE - 1);
		self.name = [0; FS_FILENAME_SIZE];
		self.name[..len].copy_from_slice(&bytes[..len]);
	}
}

/// Parses a raw directory block into its fixed slots.
pub fn parse_block(buf: &[u8; BLOCK_SIZE as usize]) -> [DirEntry; DIRENTS_PER_BLK] {
	let mut entries = [DirEntry::empty(); DIRENTS_PER_BLK];
	let size = std::mem::size_of::<DirEntry>();
	for (i, entry) in entries.iter_mut().enumerate() {
		let raw = &buf[i * size..(i + 1) * size];
		*entry = unsafe { std::ptr::read_unaligned(raw.as_ptr() as *const DirEntry) };
	}
	entries
}

/// Serializes fixed slots back into a raw directory block.
pub fn write_block(entries: &[DirEntry; DIRENTS_PER_BLK]) -> [u8; BLOCK_SIZE as usize] {
	let mut buf = [0u8; BLOCK_SIZE as usize];
	let size = std::mem::size_of::<DirEntry>();
	for (i, entry) in entries.iter().enumerate() {
		let dst = &mut buf[i * size..(i + 1) * size];
		unsafe {
			std::ptr::copy_nonoverlapping(
				entry as *const DirEntry as *const u8,
				dst.as_mut_ptr(),
				size,
			);
		}
	}
	buf
}

/// Finds the slot holding a valid entry named exactly `name`.
pub fn find_in_dir(entries: &[DirEntry; DIRENTS_PER_BLK], name: &str) -> Option<usize> {
	entries.iter().position(|e| e.valid != 0 && e.name() == name)
}

/// Finds the first slot with no valid entry.
pub fn find_free_slot(entries: &[DirEntry; DIRENTS_PER_BLK]) -> Option<usize> {
	entries.iter().position(|e| e.valid == 0)
}

/// Whether no slot in the directory holds a valid entry.
pub fn is_empty(entries: &[DirEntry; DIRENTS_PER_BLK]) -> bool {
	entries.iter().all(|e| e.valid == 0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn name_round_trip() {
		let entry = DirEntry::new(5, true, "hello");
		assert_eq!(entry.name(), "hello");
		assert_eq!(entry.inode, 5);
		assert_eq!(entry.is_dir, 1);
	}

	#[test]
	fn long_name_is_truncated() {
		let long = "a".repeat(FS_FILENAME_SIZE + 10);
		let entry = DirEntry::new(1, false, &long);
		assert_eq!(entry.name().len(), FS_FILENAME_SIZE - 1);
	}

	#[test]
	fn block_round_trip() {
		let mut entries = [DirEntry::empty(); DIRENTS_PER_BLK];
		entries[0] = DirEntry::new(1, true, "a");
		entries[3] = DirEntry::new(2, false, "b");
		let buf = write_block(&entries);
		let parsed = parse_block(&buf);
		assert_eq!(parsed[0].name(), "a");
		assert_eq!(parsed[3].name(), "b");
		assert_eq!(find_in_dir(&parsed, "b"), Some(3));
		assert_eq!(find_free_slot(&parsed), Some(1));
		assert!(!is_empty(&parsed));
	}
}
