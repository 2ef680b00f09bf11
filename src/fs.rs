//! The filesystem core: mount, metadata persistence, and the public file-operation surface.

use crate::bitmap::Bitmap;
use crate::device::BlockDevice;
use crate::dirent::{self, DirEntry};
use crate::error::{Error, Result};
use crate::inode::{self, Inode};
use crate::path;
use crate::superblock::Superblock;
use crate::{BLOCK_SIZE, FS_FILENAME_SIZE, INODES_PER_BLK, INODE_SIZE};
use log::debug;
use std::time::{SystemTime, UNIX_EPOCH};

fn now() -> u32 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as u32
}

/// An opaque handle to an open file or directory, carrying its inode number.
///
/// The core only ever hands these back out; a bridge is free to use them as the `fh` field of
/// its own file-info structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handle(pub u32);

/// POSIX-like attributes returned by [`Filesystem::getattr`].
#[derive(Clone, Copy, Debug)]
pub struct Stat {
	pub ino: u32,
	pub mode: u32,
	pub nlink: u32,
	pub uid: u32,
	pub gid: u32,
	pub size: u64,
	pub mtime: u32,
	pub ctime: u32,
	pub atime: u32,
}

/// Filesystem-wide usage summary returned by [`Filesystem::statfs`].
#[derive(Clone, Copy, Debug)]
pub struct Statfs {
	pub block_size: u32,
	pub blocks: u32,
	pub free_blocks: u32,
	pub avail_blocks: u32,
	pub name_max: u32,
}

/// The mounted filesystem: in-memory mirrors of the superblock, both bitmaps, and the full
/// inode table, plus the dirty-block table used for write-through metadata persistence.
pub struct Filesystem<D: BlockDevice> {
	dev: D,
	sb: Superblock,
	inode_bitmap: Bitmap,
	block_bitmap: Bitmap,
	inodes: Vec<Inode>,
	/// One entry per block in `[0, first_data_block)`; `true` means the block needs writing out
	/// on the next [`Filesystem::flush`].
	dirty: Vec<bool>,
}

impl<D: BlockDevice> Filesystem<D> {
	/// Mounts an already-formatted image, reading the superblock, both bitmaps, and the entire
	/// inode table into memory.
	pub fn mount(mut dev: D) -> Result<Self> {
		let sb = Superblock::read(&mut dev)?;
		if !sb.is_valid() {
			return Err(Error::Invalid);
		}
		let inode_bitmap = Bitmap::read(&mut dev, sb.inode_bitmap_start(), sb.inode_map_sz)?;
		let block_bitmap = Bitmap::read(&mut dev, sb.block_bitmap_start(), sb.block_map_sz)?;

		let it_start = sb.inode_table_start();
		let mut inodes = Vec::with_capacity(sb.max_inodes() as usize);
		for b in 0..sb.inode_region_sz {
			let mut raw = [0u8; BLOCK_SIZE as usize];
			dev.read_block(it_start + b, &mut raw)?;
			for slot in 0..INODES_PER_BLK {
				let off = slot as usize * INODE_SIZE as usize;
				inodes.push(Inode::from_bytes(&raw[off..off + INODE_SIZE as usize]));
			}
		}

		debug!("mounted: {} blocks, {} inodes", sb.num_blocks, sb.max_inodes());
		Ok(Self { dev, sb, inode_bitmap, block_bitmap, inodes, dirty: vec![false; sb.first_data_block() as usize] })
	}

	fn mark_dirty(&mut self, block: u32) {
		self.dirty[block as usize] = true;
	}

	fn mark_inode(&mut self, inum: u32) {
		let blk = self.sb.inode_table_start() + inum / INODES_PER_BLK;
		self.mark_dirty(blk);
	}

	fn write_inode_table_block(&mut self, blk: u32) -> std::io::Result<()> {
		let rel = blk - self.sb.inode_table_start();
		let base_inum = rel * INODES_PER_BLK;
		let mut raw = [0u8; BLOCK_SIZE as usize];
		for slot in 0..INODES_PER_BLK {
			let off = slot as usize * INODE_SIZE as usize;
			raw[off..off + INODE_SIZE as usize]
				.copy_from_slice(&self.inodes[(base_inum + slot) as usize].to_bytes());
		}
		self.dev.write_block(blk, &raw)
	}

	/// Marks both bitmaps dirty and writes every dirty metadata block (bitmaps and inode table)
	/// back to the device, then clears the dirty table. Called at the end of every mutating
	/// operation; reads never call this.
	fn flush(&mut self) -> Result<()> {
		let im_range = self.sb.inode_bitmap_start()..self.sb.inode_bitmap_start() + self.sb.inode_map_sz;
		let bm_range = self.sb.block_bitmap_start()..self.sb.block_bitmap_start() + self.sb.block_map_sz;
		for b in im_range.clone() {
			self.mark_dirty(b);
		}
		for b in bm_range.clone() {
			self.mark_dirty(b);
		}

		let mut written = 0u32;
		if im_range.clone().any(|b| self.dirty[b as usize]) {
			self.inode_bitmap.flush(&mut self.dev)?;
			for b in im_range {
				self.dirty[b as usize] = false;
			}
			written += self.sb.inode_map_sz;
		}
		if bm_range.clone().any(|b| self.dirty[b as usize]) {
			self.block_bitmap.flush(&mut self.dev)?;
			for b in bm_range {
				self.dirty[b as usize] = false;
			}
			written += self.sb.block_map_sz;
		}
		let it_start = self.sb.inode_table_start();
		for b in it_start..it_start + self.sb.inode_region_sz {
			if self.dirty[b as usize] {
				self.write_inode_table_block(b)?;
				self.dirty[b as usize] = false;
				written += 1;
			}
		}
		debug!("flush: wrote {written} metadata blocks");
		Ok(())
	}

	fn resolve(&mut self, path: &str) -> Result<(u32, bool)> {
		path::resolve(path, &self.inodes, self.sb.root_inode, &mut self.dev)
	}

	fn read_dir_block(&mut self, dir_inum: u32) -> Result<(u32, [DirEntry; crate::DIRENTS_PER_BLK])> {
		let block = self.inodes[dir_inum as usize].direct[0];
		let mut raw = [0u8; BLOCK_SIZE as usize];
		self.dev.read_block(block, &mut raw)?;
		Ok((block, dirent::parse_block(&raw)))
	}

	fn write_dir_block(&mut self, block: u32, entries: &[DirEntry; crate::DIRENTS_PER_BLK]) -> Result<()> {
		self.dev.write_block(block, &dirent::write_block(entries))?;
		Ok(())
	}

	/// Resolves `path`, populating a POSIX-like attribute record.
	pub fn getattr(&mut self, path: &str) -> Result<Stat> {
		let (inum, _) = self.resolve(path)?;
		let inode = &self.inodes[inum as usize];
		Ok(Stat {
			ino: inum,
			mode: inode.mode,
			nlink: 1,
			uid: inode.uid,
			gid: inode.gid,
			size: inode.size as u64,
			mtime: inode.mtime,
			ctime: inode.ctime,
			atime: inode.ctime,
		})
	}

	/// Resolves `path` to a directory and returns a handle to it.
	pub fn opendir(&mut self, path: &str) -> Result<Handle> {
		let (inum, is_dir) = self.resolve(path)?;
		if !is_dir {
			return Err(Error::NotDirectoryTarget);
		}
		Ok(Handle(inum))
	}

	/// Lists the entries of the directory at `path`, each with its own attributes.
	pub fn readdir(&mut self, path: &str) -> Result<Vec<(String, Stat)>> {
		let (inum, is_dir) = self.resolve(path)?;
		if !is_dir {
			return Err(Error::NotDirectoryTarget);
		}
		let (_, entries) = self.read_dir_block(inum)?;
		let base = path.trim_end_matches('/').to_string();
		let mut out = Vec::new();
		for entry in entries.iter().filter(|e| e.valid != 0) {
			let child_path = format!("{base}/{}", entry.name());
			out.push((entry.name().to_string(), self.getattr(&child_path)?));
		}
		Ok(out)
	}

	/// Releases a directory handle. A no-op beyond dropping the value; directories carry no
	/// per-handle state.
	pub fn releasedir(&mut self, _handle: Handle) {}

	fn create_entry(&mut self, path: &str, mode: u32, is_dir: bool) -> Result<()> {
		match self.resolve(path) {
			Ok(_) => return Err(Error::Exists),
			Err(Error::NotFound) => {}
			Err(e) => return Err(e),
		}
		let parent_path = path::parent_of(path);
		let leaf = path::leaf_of(path);
		let (parent_inum, parent_is_dir) = self.resolve(&parent_path)?;
		if !parent_is_dir {
			return Err(Error::NotADirectory);
		}

		let new_inum = self
			.inode_bitmap
			.alloc_lowest_free(self.sb.root_inode, self.sb.max_inodes())
			.ok_or(Error::NoSpace)?;
		let when = now();
		let mut new_inode = Inode::zeroed();
		new_inode.mode = mode | if is_dir { libc::S_IFDIR as u32 } else { 0 };
		new_inode.ctime = when;
		new_inode.mtime = when;
		if is_dir {
			let data_block = self
				.block_bitmap
				.alloc_lowest_free(self.sb.first_data_block(), self.sb.num_blocks)
				.ok_or(Error::NoSpace)?;
			self.dev.write_block(data_block, &[0u8; BLOCK_SIZE as usize])?;
			new_inode.direct[0] = data_block;
		}
		self.inodes[new_inum as usize] = new_inode;
		self.mark_inode(new_inum);

		let (dir_block, mut entries) = self.read_dir_block(parent_inum)?;
		let slot = dirent::find_free_slot(&entries).ok_or(Error::NoSpace)?;
		entries[slot] = DirEntry::new(new_inum, is_dir, &leaf);
		self.write_dir_block(dir_block, &entries)?;

		self.flush()
	}

	/// Creates a new regular file at `path`. Fails with [`Error::Exists`] if it already resolves.
	pub fn mknod(&mut self, path: &str, mode: u32) -> Result<()> {
		self.create_entry(path, mode, false)
	}

	/// Creates a new directory at `path`, with a freshly zeroed data block for its entries.
	pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
		self.create_entry(path, mode, true)
	}

	fn remove_parent_entry(&mut self, path: &str) -> Result<()> {
		let parent_path = path::parent_of(path);
		let leaf = path::leaf_of(path);
		let (parent_inum, _) = self.resolve(&parent_path)?;
		let (dir_block, mut entries) = self.read_dir_block(parent_inum)?;
		let slot = dirent::find_in_dir(&entries, &leaf).ok_or(Error::NotFound)?;
		entries[slot].valid = 0;
		self.write_dir_block(dir_block, &entries)
	}

	fn truncate_inode(&mut self, inum: u32) -> Result<()> {
		let mut inode = self.inodes[inum as usize];
		inode::free_content(&mut self.dev, &mut self.block_bitmap, &mut inode)?;
		self.inodes[inum as usize] = inode;
		self.mark_inode(inum);
		Ok(())
	}

	/// Removes a regular file: truncates its content, frees its inode, and removes its directory
	/// entry.
	pub fn unlink(&mut self, path: &str) -> Result<()> {
		let (inum, is_dir) = self.resolve(path)?;
		if is_dir {
			return Err(Error::IsADirectory);
		}
		self.truncate_inode(inum)?;
		self.inode_bitmap.clear(inum);
		self.remove_parent_entry(path)?;
		self.flush()
	}

	/// Removes an empty directory.
	pub fn rmdir(&mut self, path: &str) -> Result<()> {
		let (inum, is_dir) = self.resolve(path)?;
		if !is_dir {
			return Err(Error::NotDirectoryTarget);
		}
		if inum == self.sb.root_inode {
			// The root directory can never be removed, even when empty.
			return Err(Error::Invalid);
		}
		let (dir_block, entries) = self.read_dir_block(inum)?;
		if !dirent::is_empty(&entries) {
			return Err(Error::NotEmpty);
		}
		self.block_bitmap.clear(dir_block);
		self.inode_bitmap.clear(inum);
		self.remove_parent_entry(path)?;
		self.flush()
	}

	/// Renames an entry within its own directory. Fails with [`Error::Invalid`] if `src` and
	/// `dst` don't share a parent, or [`Error::Exists`] if `dst` is already present.
	pub fn rename(&mut self, src: &str, dst: &str) -> Result<()> {
		if path::parent_of(src) != path::parent_of(dst) {
			return Err(Error::Invalid);
		}
		let (parent_inum, _) = self.resolve(&path::parent_of(src))?;
		let src_leaf = path::leaf_of(src);
		let dst_leaf = path::leaf_of(dst);

		let (dir_block, mut entries) = self.read_dir_block(parent_inum)?;
		if dirent::find_in_dir(&entries, &dst_leaf).is_some() {
			return Err(Error::Exists);
		}
		let slot = dirent::find_in_dir(&entries, &src_leaf).ok_or(Error::NotFound)?;
		entries[slot].set_name(&dst_leaf);
		self.write_dir_block(dir_block, &entries)?;
		self.flush()
	}

	/// Replaces the mode bits of the inode at `path`.
	pub fn chmod(&mut self, path: &str, mode: u32) -> Result<()> {
		let (inum, _) = self.resolve(path)?;
		self.inodes[inum as usize].mode = mode;
		self.mark_inode(inum);
		self.flush()
	}

	/// Sets the modification time of the inode at `path`.
	pub fn utime(&mut self, path: &str, mtime: u32) -> Result<()> {
		let (inum, _) = self.resolve(path)?;
		self.inodes[inum as usize].mtime = mtime;
		self.mark_inode(inum);
		self.flush()
	}

	/// Truncates a regular file. Only `len == 0` is supported.
	pub fn truncate(&mut self, path: &str, len: u64) -> Result<()> {
		if len != 0 {
			return Err(Error::Invalid);
		}
		let (inum, is_dir) = self.resolve(path)?;
		if is_dir {
			return Err(Error::IsADirectory);
		}
		self.truncate_inode(inum)?;
		self.flush()
	}

	/// Reads up to `buf.len()` bytes starting at `offset`. Returns the number of bytes read,
	/// which is `0` once `offset` reaches the file's size. Never flushes.
	pub fn read(&mut self, path: &str, buf: &mut [u8], offset: u64) -> Result<usize> {
		let (inum, is_dir) = self.resolve(path)?;
		if is_dir {
			return Err(Error::IsADirectory);
		}
		let size = self.inodes[inum as usize].size as u64;
		if offset >= size {
			return Ok(0);
		}
		let want = (buf.len() as u64).min(size - offset) as usize;

		let mut done = 0;
		let mut cursor = offset;
		while done < want {
			let logical = (cursor / BLOCK_SIZE as u64) as u32;
			let in_block = (cursor % BLOCK_SIZE as u64) as usize;
			let phys = inode::lookup_block(&mut self.dev, &self.inodes[inum as usize], logical)?;
			let mut raw = [0u8; BLOCK_SIZE as usize];
			if phys != 0 {
				self.dev.read_block(phys, &mut raw)?;
			}
			// Capped by what's left of the request, unlike the source's loop, which could copy
			// up to a full block past the requested length when offset % B != 0.
			let chunk = (BLOCK_SIZE as usize - in_block).min(want - done);
			buf[done..done + chunk].copy_from_slice(&raw[in_block..in_block + chunk]);
			done += chunk;
			cursor += chunk as u64;
		}
		Ok(done)
	}

	/// Writes `buf` starting at `offset`, extending the file contiguously if needed. Rejects
	/// `offset > size` since holes are not supported. Returns the number of bytes written.
	pub fn write(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
		let (inum, is_dir) = self.resolve(path)?;
		if is_dir {
			return Err(Error::IsADirectory);
		}
		let size = self.inodes[inum as usize].size as u64;
		if offset > size {
			return Err(Error::Invalid);
		}
		let end = offset + buf.len() as u64;
		let needed_blocks = end.div_ceil(BLOCK_SIZE as u64) as u32;
		let cur_blocks = self.inodes[inum as usize].block_count();
		if needed_blocks > cur_blocks {
			let mut inode_copy = self.inodes[inum as usize];
			inode::resolve_block_alloc(
				&mut self.dev,
				&mut self.block_bitmap,
				self.sb.first_data_block(),
				self.sb.num_blocks,
				&mut inode_copy,
				needed_blocks - 1,
			)?;
			self.inodes[inum as usize] = inode_copy;
		}
		self.inodes[inum as usize].size = self.inodes[inum as usize].size.max(end as u32);

		let mut done = 0;
		let mut cursor = offset;
		while done < buf.len() {
			let logical = (cursor / BLOCK_SIZE as u64) as u32;
			let in_block = (cursor % BLOCK_SIZE as u64) as usize;
			let phys = inode::lookup_block(&mut self.dev, &self.inodes[inum as usize], logical)?;
			let mut raw = [0u8; BLOCK_SIZE as usize];
			if phys != 0 {
				self.dev.read_block(phys, &mut raw)?;
			}
			let chunk = (BLOCK_SIZE as usize - in_block).min(buf.len() - done);
			raw[in_block..in_block + chunk].copy_from_slice(&buf[done..done + chunk]);
			self.dev.write_block(phys, &raw)?;
			done += chunk;
			cursor += chunk as u64;
		}
		self.mark_inode(inum);
		self.flush()?;
		Ok(done)
	}

	/// Resolves `path` to a non-directory and returns a handle to it.
	pub fn open(&mut self, path: &str) -> Result<Handle> {
		let (inum, is_dir) = self.resolve(path)?;
		if is_dir {
			return Err(Error::IsADirectory);
		}
		Ok(Handle(inum))
	}

	/// Releases a file handle. A no-op beyond dropping the value.
	pub fn release(&mut self, _handle: Handle) {}

	/// Reports filesystem-wide usage.
	pub fn statfs(&mut self) -> Result<Statfs> {
		let reserved = self.sb.first_data_block();
		let free = self.block_bitmap.count_free(reserved, self.sb.num_blocks);
		Ok(Statfs {
			block_size: BLOCK_SIZE,
			blocks: self.sb.num_blocks - reserved,
			free_blocks: free,
			avail_blocks: free,
			name_max: (FS_FILENAME_SIZE - 1) as u32,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::device::FileBlockDevice;
	use crate::format;

	fn fresh_fs(num_blocks: u32) -> Filesystem<FileBlockDevice> {
		let file = tempfile::tempfile().unwrap();
		file.set_len(num_blocks as u64 * BLOCK_SIZE as u64).unwrap();
		let mut dev = FileBlockDevice::new(file, num_blocks);
		format::format(&mut dev, num_blocks, 64).unwrap();
		Filesystem::mount(dev).unwrap()
	}

	#[test]
	fn mkdir_and_getattr() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		let stat = fs.getattr("/a").unwrap();
		assert_ne!(stat.mode & libc::S_IFDIR as u32, 0);
		assert_eq!(stat.nlink, 1);
	}

	#[test]
	fn mknod_write_read_roundtrip() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mknod("/a/f", 0o644).unwrap();
		let n = fs.write("/a/f", b"hello", 0).unwrap();
		assert_eq!(n, 5);
		let mut buf = [0u8; 5];
		let n = fs.read("/a/f", &mut buf, 0).unwrap();
		assert_eq!(n, 5);
		assert_eq!(&buf, b"hello");
		assert_eq!(fs.getattr("/a/f").unwrap().size, 5);
	}

	#[test]
	fn write_spans_indirect_region() {
		let mut fs = fresh_fs(4096);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mknod("/a/f", 0o644).unwrap();
		let payload = vec![0xabu8; 1024 * 7 + 17];
		fs.write("/a/f", &payload, 0).unwrap();
		assert_eq!(fs.getattr("/a/f").unwrap().size, payload.len() as u64);
		let mut buf = vec![0u8; payload.len()];
		fs.read("/a/f", &mut buf, 0).unwrap();
		assert_eq!(buf, payload);
	}

	#[test]
	fn truncate_frees_blocks() {
		let mut fs = fresh_fs(4096);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mknod("/a/f", 0o644).unwrap();
		let before = fs.statfs().unwrap().free_blocks;
		fs.write("/a/f", &vec![0u8; 1024 * 7 + 17], 0).unwrap();
		fs.truncate("/a/f", 0).unwrap();
		assert_eq!(fs.getattr("/a/f").unwrap().size, 0);
		assert_eq!(fs.statfs().unwrap().free_blocks, before);
	}

	#[test]
	fn mknod_existing_fails() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mknod("/a/f", 0o644).unwrap();
		assert!(matches!(fs.mknod("/a/f", 0o644), Err(Error::Exists)));
	}

	#[test]
	fn rename_moves_within_same_dir() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mknod("/a/f", 0o644).unwrap();
		fs.rename("/a/f", "/a/g").unwrap();
		assert!(fs.getattr("/a/g").is_ok());
		assert!(matches!(fs.getattr("/a/f"), Err(Error::NotFound)));
	}

	#[test]
	fn rename_across_parents_is_invalid() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mkdir("/b", 0o755).unwrap();
		fs.mknod("/a/x", 0o644).unwrap();
		assert!(matches!(fs.rename("/a/x", "/b/y"), Err(Error::Invalid)));
	}

	#[test]
	fn rmdir_requires_empty() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mknod("/a/f", 0o644).unwrap();
		assert!(matches!(fs.rmdir("/a"), Err(Error::NotEmpty)));
		fs.unlink("/a/f").unwrap();
		fs.rmdir("/a").unwrap();
		assert!(matches!(fs.getattr("/a"), Err(Error::NotFound)));
	}

	#[test]
	fn directory_full_reports_no_space() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		for i in 0..crate::DIRENTS_PER_BLK {
			fs.mknod(&format!("/a/f{i}"), 0o644).unwrap();
		}
		assert!(matches!(fs.mknod("/a/one-too-many", 0o644), Err(Error::NoSpace)));
	}

	#[test]
	fn write_rejects_holes() {
		let mut fs = fresh_fs(64);
		fs.mkdir("/a", 0o755).unwrap();
		fs.mknod("/a/f", 0o644).unwrap();
		assert!(matches!(fs.write("/a/f", b"x", 10), Err(Error::Invalid)));
	}
}
