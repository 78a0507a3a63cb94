extern crate fs2;

pub mod atomic_file;
pub mod dir_lock;

pub use atomic_file::write_atomic;
pub use dir_lock::DirLock;
