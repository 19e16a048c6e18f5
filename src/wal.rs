//! Append-only write-ahead log.
//!
//! File layout: `[xchecksum(4)] [record]*` where each record is
//! `[size(4) | checksum(4) | body(size)]`. Both checksums are the same
//! Horner-style rolling hash; the header is the hash folded over the full
//! wrapped bytes of every record in order, and is rewritten and fsynced on
//! every append so recovery can find the last durable record boundary.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, StratumError};
use crate::primitives::io::{FileIo, StdFileIo};

pub const LOG_SUFFIX: &str = ".log";

const SEED: i32 = 13331;
const HEADER_LEN: u64 = 4;
const REC_HEADER_LEN: u64 = 8;

/// Folds `bytes` into the rolling checksum. Bytes are sign-extended, with
/// 32-bit wrapping arithmetic, to keep the on-disk value stable.
pub fn fold_checksum(mut check: i32, bytes: &[u8]) -> i32 {
    for &b in bytes {
        check = check.wrapping_mul(SEED).wrapping_add(b as i8 as i32);
    }
    check
}

struct WalState {
    xchecksum: i32,
    tail: u64,
}

pub struct Wal {
    io: Arc<dyn FileIo>,
    state: Mutex<WalState>,
}

impl Wal {
    /// Creates a fresh log containing only a zero header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::create(path)?);
        io.write_at(0, &0i32.to_be_bytes())?;
        io.sync_all()?;
        Ok(Self {
            io,
            state: Mutex::new(WalState {
                xchecksum: 0,
                tail: HEADER_LEN,
            }),
        })
    }

    /// Opens an existing log and removes any torn tail.
    ///
    /// The whole log is re-read and the running checksum recomputed; if it
    /// disagrees with the stored header the file is truncated to the last
    /// record that validated and the header is rewritten. A file too short
    /// to hold the header is `BadLogFile`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        if io.len()? < HEADER_LEN {
            return Err(StratumError::BadLogFile);
        }
        let mut buf = [0u8; 4];
        io.read_at(0, &mut buf)?;
        let stored = i32::from_be_bytes(buf);

        let mut iter = WalIter::new(Arc::clone(&io))?;
        let mut recomputed = 0i32;
        while let Some(wrapped) = iter.next_wrapped()? {
            recomputed = fold_checksum(recomputed, &wrapped);
        }
        let tail = iter.pos();

        if recomputed != stored {
            debug!(tail, "wal.truncate_torn_tail");
            io.truncate(tail)?;
            io.write_at(0, &recomputed.to_be_bytes())?;
            io.sync_all()?;
        } else if tail < io.len()? {
            // Header matches but trailing garbage survived a crash mid-append.
            io.truncate(tail)?;
            io.sync_all()?;
        }

        Ok(Self {
            io,
            state: Mutex::new(WalState {
                xchecksum: recomputed,
                tail,
            }),
        })
    }

    /// Appends one record and makes it durable before returning.
    pub fn append(&self, body: &[u8]) -> Result<()> {
        let wrapped = wrap(body);
        let mut state = self.state.lock();
        self.io.write_at(state.tail, &wrapped)?;
        state.tail += wrapped.len() as u64;
        state.xchecksum = fold_checksum(state.xchecksum, &wrapped);
        self.io.write_at(0, &state.xchecksum.to_be_bytes())?;
        self.io.sync_all()?;
        Ok(())
    }

    /// Cursor over record bodies in file order.
    pub fn iter(&self) -> Result<WalIter> {
        WalIter::new(Arc::clone(&self.io))
    }

    pub fn truncate(&self, len: u64) -> Result<()> {
        let mut state = self.state.lock();
        self.io.truncate(len)?;
        if state.tail > len {
            state.tail = len;
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.io.sync_all()
    }
}

fn wrap(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + REC_HEADER_LEN as usize);
    out.extend_from_slice(&(body.len() as i32).to_be_bytes());
    out.extend_from_slice(&fold_checksum(0, body).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Reads records until EOF or the first one that fails validation; either
/// way iteration simply ends. The position reached is the last good record
/// boundary.
pub struct WalIter {
    io: Arc<dyn FileIo>,
    pos: u64,
    end: u64,
}

impl WalIter {
    fn new(io: Arc<dyn FileIo>) -> Result<Self> {
        let end = io.len()?;
        Ok(Self {
            io,
            pos: HEADER_LEN,
            end,
        })
    }

    /// Next record body, or `None` at the end of the valid prefix.
    pub fn next(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.next_wrapped()?.map(|mut wrapped| {
            wrapped.drain(..REC_HEADER_LEN as usize);
            wrapped
        }))
    }

    fn next_wrapped(&mut self) -> Result<Option<Vec<u8>>> {
        if self.pos + REC_HEADER_LEN >= self.end {
            return Ok(None);
        }
        let mut buf = [0u8; 4];
        self.io.read_at(self.pos, &mut buf)?;
        let size = i32::from_be_bytes(buf);
        if size < 0 {
            return Ok(None);
        }
        let total = REC_HEADER_LEN + size as u64;
        if self.pos + total > self.end {
            return Ok(None);
        }
        let mut wrapped = vec![0u8; total as usize];
        self.io.read_at(self.pos, &mut wrapped)?;

        let stored = i32::from_be_bytes(wrapped[4..8].try_into().unwrap());
        if fold_checksum(0, &wrapped[8..]) != stored {
            return Ok(None);
        }
        self.pos += total;
        Ok(Some(wrapped))
    }

    /// File offset just past the last record that validated.
    pub fn pos(&self) -> u64 {
        self.pos
    }
}
