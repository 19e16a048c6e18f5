//! Exclusive write locks on uids, with wait-for-graph deadlock detection.
//!
//! All bookkeeping lives under one mutex: `holders` (uid → owning xid),
//! `held` (xid → uids, for bulk release), `waiting` (uid → FIFO of xids)
//! and `waits_for` (xid → uid). A blocked acquirer parks on a per-xid
//! condvar slot; release hands the lock to the first waiter and wakes it.
//!
//! Deadlock is detected at enqueue time by walking `waits_for ∘ holders`
//! from the requester; reaching the requester again closes a cycle and the
//! enqueue is undone. A transaction can therefore only ever be aborted for
//! deadlock by its own acquire call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::{Result, StratumError};
use crate::types::{Uid, Xid};

struct WaitSlot {
    granted: Mutex<bool>,
    cv: Condvar,
}

#[derive(Default)]
struct Inner {
    holders: HashMap<u64, u64>,
    held: HashMap<u64, Vec<u64>>,
    waiting: HashMap<u64, VecDeque<u64>>,
    waits_for: HashMap<u64, u64>,
    parked: HashMap<u64, Arc<WaitSlot>>,
}

impl Inner {
    fn grant(&mut self, xid: u64, uid: u64) {
        self.holders.insert(uid, xid);
        self.held.entry(xid).or_default().push(uid);
    }

    /// Walks waits_for then holders alternately from `start`. Reaching
    /// `start` again is a cycle; revisiting any other xid means the chain
    /// merged into one already checked.
    fn closes_cycle(&self, start: u64) -> bool {
        let mut visited = HashSet::new();
        let mut xid = start;
        loop {
            let Some(&uid) = self.waits_for.get(&xid) else {
                return false;
            };
            let Some(&holder) = self.holders.get(&uid) else {
                return false;
            };
            if holder == start {
                return true;
            }
            if !visited.insert(holder) {
                return false;
            }
            xid = holder;
        }
    }
}

#[derive(Default)]
pub struct LockTable {
    inner: Mutex<Inner>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes the write lock on `uid` for `xid`, blocking behind the current
    /// holder. Re-acquiring a held lock is a no-op. Fails with `Deadlock`
    /// when this request would close a wait cycle, leaving the table as it
    /// was.
    pub fn acquire(&self, xid: Xid, uid: Uid) -> Result<()> {
        let slot = {
            let mut inner = self.inner.lock();
            match inner.holders.get(&uid.0) {
                None => {
                    inner.grant(xid.0, uid.0);
                    return Ok(());
                }
                Some(&holder) if holder == xid.0 => return Ok(()),
                Some(_) => {}
            }

            inner.waiting.entry(uid.0).or_default().push_back(xid.0);
            inner.waits_for.insert(xid.0, uid.0);
            if inner.closes_cycle(xid.0) {
                inner.waits_for.remove(&xid.0);
                if let Some(queue) = inner.waiting.get_mut(&uid.0) {
                    queue.retain(|&waiter| waiter != xid.0);
                }
                return Err(StratumError::Deadlock);
            }

            let slot = Arc::new(WaitSlot {
                granted: Mutex::new(false),
                cv: Condvar::new(),
            });
            inner.parked.insert(xid.0, Arc::clone(&slot));
            slot
        };

        let mut granted = slot.granted.lock();
        while !*granted {
            slot.cv.wait(&mut granted);
        }
        Ok(())
    }

    /// Releases every lock `xid` holds, handing each to its first waiter.
    pub fn release_all(&self, xid: Xid) {
        let mut inner = self.inner.lock();
        let uids = inner.held.remove(&xid.0).unwrap_or_default();
        for uid in uids {
            if inner.holders.get(&uid) != Some(&xid.0) {
                continue;
            }
            inner.holders.remove(&uid);
            let next = inner
                .waiting
                .get_mut(&uid)
                .and_then(|queue| queue.pop_front());
            if let Some(next) = next {
                inner.waits_for.remove(&next);
                inner.grant(next, uid);
                if let Some(slot) = inner.parked.remove(&next) {
                    *slot.granted.lock() = true;
                    slot.cv.notify_all();
                }
            }
        }
        inner.waits_for.remove(&xid.0);
        inner.parked.remove(&xid.0);
    }
}
