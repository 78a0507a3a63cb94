use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// An exclusive, advisory lock on a directory, held for the lifetime of the value.
///
/// Used to guarantee that at most one process owns a given replica's data directory at a
/// time, so that two accidentally-launched instances of the same node id can't both open
/// and corrupt the same persistent store file.
pub struct DirLock {
	file: File,
	path: PathBuf,
}

impl DirLock {
	/// Acquires the lock on `dir/.lock`, creating `dir` if it doesn't exist.
	///
	/// Fails immediately (rather than blocking) if another live process already holds it.
	pub fn open(dir: &Path) -> io::Result<DirLock> {
		std::fs::create_dir_all(dir)?;

		let path = dir.join(".lock");
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.open(&path)?;

		file.try_lock_exclusive().map_err(|_| {
			io::Error::new(
				io::ErrorKind::WouldBlock,
				format!("directory {} is already locked by another process", dir.display()),
			)
		})?;

		Ok(DirLock { file, path })
	}
}

impl Drop for DirLock {
	fn drop(&mut self) {
		let _ = fs2::FileExt::unlock(&self.file);
	}
}

impl DirLock {
	pub fn path(&self) -> &Path {
		&self.path
	}
}
