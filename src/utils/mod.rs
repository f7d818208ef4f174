//! Shared utilities
//!
//! Only file system helpers live here for now; see [`fs`].

pub mod fs;

pub use fs::{atomic_write, ensure_dir, read_json_file, safe_write, write_json_file};
