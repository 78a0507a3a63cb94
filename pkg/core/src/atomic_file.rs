use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Overwrites `path` with `data` such that a concurrent crash never observes a partial write.
///
/// Writes to a sibling temp file, `fsync`s it, renames it over `path`, then `fsync`s the
/// containing directory so the rename itself is durable. `rename` within one directory is
/// already atomic on the filesystems this is written for (ext4, xfs, apfs); the two extra
/// syncs are what make the result durable across a power loss, not just atomic in memory.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
	let dir = path.parent().ok_or_else(|| {
		io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
	})?;

	let tmp_path = path.with_extension("tmp");

	{
		let mut tmp = OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.open(&tmp_path)?;
		tmp.write_all(data)?;
		tmp.sync_all()?;
	}

	fs::rename(&tmp_path, path)?;

	// Fsync the directory entry so the rename survives a crash right after it returns.
	// Not meaningful on all platforms (e.g. Windows), so a failure here is ignored.
	if let Ok(dir_file) = File::open(dir) {
		let _ = dir_file.sync_all();
	}

	Ok(())
}
