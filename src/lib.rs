//! stratum: a small relational storage engine.
//!
//! The core is a layered stack: a transaction manager persisting xid
//! states, a buffer pool over an 8 KiB-paged data file, a checksummed
//! write-ahead log driving REDO/UNDO recovery, a data manager exposing
//! slotted-page items, an MVCC version manager with a deadlock-detecting
//! lock table, and B+-tree indexes whose nodes are themselves data items.
//! On top sit the catalog, a minimal SQL dialect and a line-oriented TCP
//! wire protocol.

pub mod dm;
pub mod error;
pub mod im;
pub mod pager;
pub mod primitives;
pub mod server;
pub mod sql;
pub mod tbm;
pub mod tm;
pub mod transport;
pub mod types;
pub mod vm;
pub mod wal;

use std::path::{Path, PathBuf};

pub use error::{Result, StratumError};

/// `<base><suffix>`: the engine's files live next to each other, named by
/// one base path plus a per-file suffix.
pub fn path_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
