//! Transaction manager: persistent xid assignment and state.
//!
//! The XID file starts with an 8-byte little-endian count of issued xids,
//! followed by one status byte per xid indexed by `xid - 1`. A status byte
//! becomes durable before the header that accounts for it, so after a crash
//! the count can never claim more transactions than have status bytes.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Result, StratumError};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::Xid;

pub const XID_SUFFIX: &str = ".xid";

const HEADER_LEN: u64 = 8;

const STATUS_ACTIVE: u8 = 0;
const STATUS_COMMITTED: u8 = 1;
const STATUS_ABORTED: u8 = 2;

pub struct TxnManager {
    io: Arc<dyn FileIo>,
    count: Mutex<u64>,
}

impl TxnManager {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::create(path)?);
        io.write_at(0, &0u64.to_le_bytes())?;
        io.sync_all()?;
        Ok(Self {
            io,
            count: Mutex::new(0),
        })
    }

    /// Opens and validates an existing XID file: the file length must be
    /// exactly header + one byte per counted xid.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path)?);
        let len = io.len()?;
        if len < HEADER_LEN {
            return Err(StratumError::BadXidFile);
        }
        let mut buf = [0u8; 8];
        io.read_at(0, &mut buf)?;
        let count = u64::from_le_bytes(buf);
        if len != HEADER_LEN + count {
            return Err(StratumError::BadXidFile);
        }
        Ok(Self {
            io,
            count: Mutex::new(count),
        })
    }

    /// Issues the next xid, born active.
    pub fn begin(&self) -> Result<Xid> {
        let mut count = self.count.lock();
        let xid = Xid(*count + 1);
        // Status byte first, then the header; each made durable in turn.
        self.io
            .write_at(HEADER_LEN + (xid.0 - 1), &[STATUS_ACTIVE])?;
        self.io.sync_all()?;
        self.io.write_at(0, &(*count + 1).to_le_bytes())?;
        self.io.sync_all()?;
        *count += 1;
        debug!(xid = xid.0, "tm.begin");
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, STATUS_COMMITTED)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, STATUS_ABORTED)
    }

    fn set_status(&self, xid: Xid, status: u8) -> Result<()> {
        debug_assert!(!xid.is_super());
        let _count = self.count.lock();
        self.io.write_at(HEADER_LEN + (xid.0 - 1), &[status])?;
        self.io.sync_all()?;
        Ok(())
    }

    fn status(&self, xid: Xid) -> Result<u8> {
        let _count = self.count.lock();
        let mut buf = [0u8; 1];
        self.io.read_at(HEADER_LEN + (xid.0 - 1), &mut buf)?;
        Ok(buf[0])
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        if xid.is_super() {
            return Ok(false);
        }
        Ok(self.status(xid)? == STATUS_ACTIVE)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        if xid.is_super() {
            return Ok(true);
        }
        Ok(self.status(xid)? == STATUS_COMMITTED)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        if xid.is_super() {
            return Ok(false);
        }
        Ok(self.status(xid)? == STATUS_ABORTED)
    }

    pub fn close(&self) -> Result<()> {
        self.io.sync_all()
    }
}
