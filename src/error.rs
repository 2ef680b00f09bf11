//! Error kinds returned by filesystem operations.

use std::io;
use thiserror::Error;

/// An error produced by a filesystem operation.
///
/// Every public operation in [`crate::fs::Filesystem`] returns one of these instead of a raw
/// integer; the POSIX-like negative code used by a bridge is obtained from [`Error::to_errno`].
#[derive(Error, Debug)]
pub enum Error {
	/// A path component does not exist.
	#[error("no such file or directory")]
	NotFound,
	/// An intermediate path component, or a trailing-slash leaf, is not a directory.
	#[error("not a directory")]
	NotADirectory,
	/// A file operation was invoked on a directory.
	#[error("is a directory")]
	IsADirectory,
	/// A directory operation was invoked on a non-directory.
	#[error("not a directory target")]
	NotDirectoryTarget,
	/// The creation target already exists.
	#[error("file exists")]
	Exists,
	/// `rmdir` was called on a non-empty directory.
	#[error("directory not empty")]
	NotEmpty,
	/// No free inode, no free block, or no free directory slot.
	#[error("no space left on device")]
	NoSpace,
	/// An argument was invalid for the requested operation.
	#[error("invalid argument")]
	Invalid,
	/// The underlying block device failed.
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),
}

impl Error {
	/// Maps this error onto the POSIX-like negative error code a bridge would return.
	pub fn to_errno(&self) -> i32 {
		let code = match self {
			Self::NotFound => libc::ENOENT,
			Self::NotADirectory => libc::ENOTDIR,
			Self::IsADirectory => libc::EISDIR,
			Self::NotDirectoryTarget => libc::ENOTDIR,
			Self::Exists => libc::EEXIST,
			Self::NotEmpty => libc::ENOTEMPTY,
			Self::NoSpace => libc::ENOSPC,
			Self::Invalid => libc::EINVAL,
			Self::Io(_) => libc::EIO,
		};
		-code
	}
}

/// Shorthand for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn to_errno_is_negative() {
		assert_eq!(Error::NotFound.to_errno(), -libc::ENOENT);
		assert_eq!(Error::NoSpace.to_errno(), -libc::ENOSPC);
	}
}
