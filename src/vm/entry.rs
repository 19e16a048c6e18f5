//! MVCC view over a data item's payload: `[xmin(8) | xmax(8) | record]`.
//!
//! `xmin` is the creating transaction, `xmax` the deleting one (0 while the
//! version is live), `record` the opaque user bytes.

use crate::dm::data_item::DataItem;
use crate::error::Result;
use crate::types::Xid;

pub const OF_XMIN: usize = 0;
pub const OF_XMAX: usize = 8;
pub const OF_RECORD: usize = 16;

/// Stamps a fresh version: created by `xid`, not deleted.
pub fn wrap_record(xid: Xid, record: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(OF_RECORD + record.len());
    payload.extend_from_slice(&xid.0.to_be_bytes());
    payload.extend_from_slice(&0u64.to_be_bytes());
    payload.extend_from_slice(record);
    payload
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stamps {
    pub xmin: Xid,
    pub xmax: Xid,
}

pub fn parse_stamps(payload: &[u8]) -> Stamps {
    Stamps {
        xmin: Xid(u64::from_be_bytes(
            payload[OF_XMIN..OF_XMAX].try_into().unwrap(),
        )),
        xmax: Xid(u64::from_be_bytes(
            payload[OF_XMAX..OF_RECORD].try_into().unwrap(),
        )),
    }
}

/// Reads the stamps under the item's read lock.
pub fn stamps(item: &DataItem) -> Stamps {
    parse_stamps(&item.read().payload())
}

/// The user record portion, read under the item's read lock.
pub fn record(item: &DataItem) -> Vec<u8> {
    let payload = item.read().payload();
    payload[OF_RECORD..].to_vec()
}

/// Marks the version deleted by `xid`, bracketed by before/after so the
/// mutation is WAL-logged.
pub fn set_xmax(item: &DataItem, xid: Xid) -> Result<()> {
    let mut guard = item.before();
    guard.mutate_payload(|payload| {
        payload[OF_XMAX..OF_RECORD].copy_from_slice(&xid.0.to_be_bytes());
    });
    guard.after(xid)
}
