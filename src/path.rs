//! Path tokenization and resolution against the in-memory inode table.

use crate::device::BlockDevice;
use crate::dirent;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::BLOCK_SIZE;

/// Resolves an absolute path to its target inode number and whether it is a directory.
///
/// `.` and `..` are not interpreted. A trailing slash requires the final component to be a
/// directory; an intermediate component that is not a directory surfaces as
/// [`Error::NotADirectory`] rather than [`Error::NotFound`], since descending into a file's
/// first block as if it were directory data would be a type error.
pub fn resolve(
	path: &str,
	inodes: &[Inode],
	root_inode: u32,
	dev: &mut dyn BlockDevice,
) -> Result<(u32, bool)> {
	let requires_trailing_dir = path.ends_with('/');
	let names: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

	let mut current = root_inode;
	let mut is_dir = true;
	let last = names.len().saturating_sub(1);
	for (i, name) in names.iter().enumerate() {
		if !inodes[current as usize].is_dir() {
			return Err(Error::NotADirectory);
		}
		let dir_block = inodes[current as usize].direct[0];
		let mut raw = [0u8; BLOCK_SIZE as usize];
		dev.read_block(dir_block, &mut raw)?;
		let entries = dirent::parse_block(&raw);
		let slot = dirent::find_in_dir(&entries, name).ok_or(Error::NotFound)?;
		let entry = entries[slot];

		let requires_dir = i != last || requires_trailing_dir;
		if requires_dir && entry.is_dir == 0 {
			return Err(Error::NotADirectory);
		}
		current = entry.inode;
		is_dir = entry.is_dir != 0;
	}
	Ok((current, is_dir))
}

/// The parent directory of `path`: everything before the final component.
pub fn parent_of(path: &str) -> String {
	let trimmed = path.trim_end_matches('/');
	match trimmed.rfind('/') {
		Some(0) => "/".to_string(),
		Some(idx) => trimmed[..idx].to_string(),
		None => "/".to_string(),
	}
}

/// The final path component, without any trailing slash.
pub fn leaf_of(path: &str) -> String {
	let trimmed = path.trim_end_matches('/');
	match trimmed.rfind('/') {
		Some(idx) => trimmed[idx + 1..].to_string(),
		None => trimmed.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parent_and_leaf() {
		assert_eq!(parent_of("/a/f"), "/a");
		assert_eq!(leaf_of("/a/f"), "f");
		assert_eq!(parent_of("/a"), "/");
		assert_eq!(leaf_of("/a"), "a");
		assert_eq!(parent_of("/a/b/"), "/a");
		assert_eq!(leaf_of("/a/b/"), "b");
	}

	#[test]
	fn rename_parent_mismatch() {
		assert_ne!(parent_of("/a/x"), parent_of("/b/y"));
	}
}
