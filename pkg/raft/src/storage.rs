use std::fs;
use std::path::{Path, PathBuf};

use core::{write_atomic, DirLock};

use entries::ReplicatedLog;
use errors::*;
use ids::{NodeId, Term};

/// The durable record a replica restores `current_term`, `voted_for`, and `log` from on start.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistentState {
	pub current_term: Term,
	pub voted_for: Option<NodeId>,
	pub log: ReplicatedLog,
}

/// The capability interface for durably persisting one replica's `PersistentState`.
///
/// Like `MessageBus`, this is a thin trait so tests can swap in an in-memory fake
/// (`testing::MemStore`) without touching replica logic. A real implementation must not
/// consider a `save` complete until the write would survive a crash (I6): `FileStore` does this
/// with `core::write_atomic`, which fsyncs before renaming into place.
pub trait Store {
	fn save(&mut self, state: &PersistentState) -> Result<()>;
	fn get(&self) -> Result<PersistentState>;
	/// Whether a prior `save` has ever completed (used on construction to decide whether to
	/// restore from disk or start from `PersistentState::default()`).
	fn has_data(&self) -> bool;
}

/// One file per replica, at `logs/server_<id>/data`, encoded with MessagePack.
///
/// Holds an advisory `DirLock` on that replica's own subdirectory of `logs_dir` for the
/// lifetime of the store, so two accidentally-launched processes for the same replica id can't
/// both open and corrupt the same file. Each replica gets its own subdirectory (rather than all
/// replicas locking `logs_dir` itself) so that launching a whole cluster under one shared logs
/// directory doesn't have every replica but the first fail to start.
pub struct FileStore {
	path: PathBuf,
	_lock: DirLock,
}

impl FileStore {
	/// Opens (creating if needed) `logs_dir/server_<id>/` and acquires its lock. Fails if
	/// another live process already holds that replica's directory lock.
	pub fn open(logs_dir: &Path, id: NodeId) -> Result<Self> {
		let replica_dir = logs_dir.join(format!("server_{}", id));
		let lock = DirLock::open(&replica_dir)?;
		let path = replica_dir.join("data");
		Ok(FileStore { path, _lock: lock })
	}
}

impl Store for FileStore {
	fn save(&mut self, state: &PersistentState) -> Result<()> {
		let bytes = rmps::to_vec(state)?;
		write_atomic(&self.path, &bytes)?;
		Ok(())
	}

	fn get(&self) -> Result<PersistentState> {
		let bytes = fs::read(&self.path)?;
		let state = rmps::from_slice(&bytes)?;
		Ok(state)
	}

	fn has_data(&self) -> bool {
		match fs::metadata(&self.path) {
			Ok(meta) => meta.len() > 0,
			Err(_) => false,
		}
	}
}
