//! Version manager: MVCC stacked on the data manager.
//!
//! Every record is stored as `[xmin | xmax | bytes]`. Reads filter versions
//! through the visibility predicate for the reader's isolation level;
//! deletes serialise through the lock table and stamp `xmax` in place. A
//! transaction that loses a deadlock or a concurrent-update race is aborted
//! on the spot and poisoned, so every later operation (including commit)
//! re-raises the fault.

pub mod entry;
pub mod lock_table;
pub mod visibility;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::dm::DataManager;
use crate::error::{Result, StratumError};
use crate::types::{Uid, Xid};

use lock_table::LockTable;
pub use visibility::IsolationLevel;

#[derive(Copy, Clone, Debug)]
enum TxnFault {
    Deadlock,
    ConcurrentUpdate,
}

impl TxnFault {
    fn to_error(self) -> StratumError {
        match self {
            TxnFault::Deadlock => StratumError::Deadlock,
            TxnFault::ConcurrentUpdate => StratumError::ConcurrentUpdate,
        }
    }
}

struct Transaction {
    level: IsolationLevel,
    snapshot: HashSet<u64>,
    fault: Option<TxnFault>,
    auto_aborted: bool,
}

pub struct VersionManager {
    dm: Arc<DataManager>,
    lock_table: LockTable,
    active: Mutex<HashMap<u64, Transaction>>,
}

impl VersionManager {
    pub fn new(dm: Arc<DataManager>) -> Self {
        Self {
            dm,
            lock_table: LockTable::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn dm(&self) -> &Arc<DataManager> {
        &self.dm
    }

    /// Starts a transaction. A repeatable-read transaction snapshots the
    /// set of xids active right now; the snapshot and the xid assignment
    /// happen under one lock so no concurrent begin can slip between them.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.dm.tm().begin()?;
        let snapshot = if level == IsolationLevel::RepeatableRead {
            active.keys().copied().collect()
        } else {
            HashSet::new()
        };
        active.insert(
            xid.0,
            Transaction {
                level,
                snapshot,
                fault: None,
                auto_aborted: false,
            },
        );
        Ok(xid)
    }

    fn view(&self, xid: Xid) -> Result<(IsolationLevel, HashSet<u64>)> {
        if xid.is_super() {
            return Ok((IsolationLevel::ReadCommitted, HashSet::new()));
        }
        let active = self.active.lock();
        let txn = active.get(&xid.0).ok_or(StratumError::NullEntry)?;
        if let Some(fault) = txn.fault {
            return Err(fault.to_error());
        }
        Ok((txn.level, txn.snapshot.clone()))
    }

    /// Reads the record at `uid` if a version is visible to `xid`.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let (level, snapshot) = self.view(xid)?;
        let Some(item) = self.dm.read(uid)? else {
            return Ok(None);
        };
        let result = (|| -> Result<Option<Vec<u8>>> {
            let guard = item.read();
            let payload = guard.payload();
            let stamps = entry::parse_stamps(&payload);
            if visibility::is_visible(self.dm.tm(), xid, level, &snapshot, stamps)? {
                Ok(Some(payload[entry::OF_RECORD..].to_vec()))
            } else {
                Ok(None)
            }
        })();
        self.dm.release(&item);
        result
    }

    /// Stores `data` as a version created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.view(xid)?;
        self.dm.insert(xid, &entry::wrap_record(xid, data))
    }

    /// Logically deletes the version at `uid`.
    ///
    /// Returns false when the version is invisible or already deleted by
    /// this transaction. A deadlock aborts `xid` and surfaces `Deadlock`;
    /// a version another transaction deleted underneath us aborts `xid`
    /// and surfaces `ConcurrentUpdate`.
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let (level, snapshot) = self.view(xid)?;
        let Some(item) = self.dm.read(uid)? else {
            return Ok(false);
        };

        let result = (|| -> Result<bool> {
            let stamps = entry::stamps(&item);
            if !visibility::is_visible(self.dm.tm(), xid, level, &snapshot, stamps)? {
                return Ok(false);
            }

            if let Err(err) = self.lock_table.acquire(xid, uid) {
                debug_assert!(matches!(err, StratumError::Deadlock));
                self.poison(xid, TxnFault::Deadlock)?;
                return Err(err);
            }

            let stamps = entry::stamps(&item);
            if stamps.xmax == xid {
                return Ok(false);
            }
            // A competing delete that committed (or is still in flight)
            // while we waited loses us the race; an aborted one left only a
            // dead stamp that is ours to overwrite.
            if stamps.xmax.0 != 0 && !self.dm.tm().is_aborted(stamps.xmax)? {
                self.poison(xid, TxnFault::ConcurrentUpdate)?;
                return Err(StratumError::ConcurrentUpdate);
            }

            entry::set_xmax(&item, xid)?;
            Ok(true)
        })();

        self.dm.release(&item);
        result
    }

    /// Commits `xid`, making its status durable before returning. A
    /// poisoned transaction re-raises its fault instead.
    pub fn commit(&self, xid: Xid) -> Result<()> {
        {
            let mut active = self.active.lock();
            let txn = active.get(&xid.0).ok_or(StratumError::NullEntry)?;
            if let Some(fault) = txn.fault {
                return Err(fault.to_error());
            }
            active.remove(&xid.0);
        }
        debug!(xid = xid.0, "vm.commit");
        self.dm.tm().commit(xid)?;
        self.lock_table.release_all(xid);
        Ok(())
    }

    /// Rolls back `xid`. Aborted versions stay on disk; visibility hides
    /// them through the transaction state.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        let was_auto = {
            let mut active = self.active.lock();
            match active.remove(&xid.0) {
                Some(txn) => txn.auto_aborted,
                None => return Ok(()),
            }
        };
        if was_auto {
            return Ok(());
        }
        debug!(xid = xid.0, "vm.abort");
        // Status flips to aborted before any waiter can observe the freed
        // locks, so a woken deleter never sees this xid as still active.
        self.dm.tm().abort(xid)?;
        self.lock_table.release_all(xid);
        Ok(())
    }

    /// Unilateral abort: the transaction stays in the table, marked, so the
    /// client still observes the fault on its own commit/abort.
    fn poison(&self, xid: Xid, fault: TxnFault) -> Result<()> {
        {
            let mut active = self.active.lock();
            if let Some(txn) = active.get_mut(&xid.0) {
                if txn.auto_aborted {
                    return Ok(());
                }
                txn.fault = Some(fault);
                txn.auto_aborted = true;
            }
        }
        debug!(xid = xid.0, ?fault, "vm.auto_abort");
        self.dm.tm().abort(xid)?;
        self.lock_table.release_all(xid);
        Ok(())
    }
}
