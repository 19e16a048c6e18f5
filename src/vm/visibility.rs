//! Version visibility rules.
//!
//! Read-committed sees any committed-created, not-committed-deleted
//! version. Repeatable-read additionally hides versions created by
//! transactions that began after the reader or were active when the reader
//! began, and treats such transactions' deletes as invisible. A version a
//! transaction is itself deleting stays visible to it until commit.

use std::collections::HashSet;

use crate::error::Result;
use crate::tm::TxnManager;
use crate::types::Xid;

use super::entry::Stamps;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
}

pub fn is_visible(
    tm: &TxnManager,
    reader: Xid,
    level: IsolationLevel,
    snapshot: &HashSet<u64>,
    stamps: Stamps,
) -> Result<bool> {
    let Stamps { xmin, xmax } = stamps;
    let in_snap = |x: Xid| level == IsolationLevel::RepeatableRead && snapshot.contains(&x.0);

    if xmin == reader && xmax.0 == 0 {
        return Ok(true);
    }
    if !tm.is_committed(xmin)? {
        return Ok(false);
    }
    if level == IsolationLevel::RepeatableRead && (xmin.0 >= reader.0 || in_snap(xmin)) {
        return Ok(false);
    }
    Ok(xmax.0 == 0
        || xmax == reader
        || !tm.is_committed(xmax)?
        || (level == IsolationLevel::RepeatableRead && (xmax.0 > reader.0 || in_snap(xmax))))
}
