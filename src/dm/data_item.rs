//! Data items: variable-length slotted records inside a page.
//!
//! On-page layout is `[valid(1) | size(2) | data(size)]`; `valid == 1`
//! means logically deleted. An item never moves and its size never changes;
//! mutations overwrite the data region in place.
//!
//! The write protocol is expressed as a guard: [`DataItem::before`] takes
//! the item's write lock, marks the page dirty and snapshots the item
//! image; the guard then either commits through [`ItemWriteGuard::after`]
//! (which emits the update WAL record while the lock is still held) or
//! rolls the image back through [`ItemWriteGuard::un_before`].

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::pager::page::Page;
use crate::types::{Uid, Xid};
use crate::wal::Wal;

use super::log_rec;

pub const OF_VALID: usize = 0;
pub const OF_SIZE: usize = 1;
pub const OF_DATA: usize = 3;

/// Wraps a payload into the on-page item format, born valid.
pub fn wrap_item(payload: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OF_DATA + payload.len());
    raw.push(0);
    raw.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    raw.extend_from_slice(payload);
    raw
}

/// Flips an item image to deleted.
pub fn set_item_invalid(raw: &mut [u8]) {
    raw[OF_VALID] = 1;
}

/// A handle over one item, pinned to its page for the handle's lifetime.
pub struct DataItem {
    uid: Uid,
    off: u16,
    len: usize,
    page: Arc<Page>,
    wal: Arc<Wal>,
    lock: RwLock<()>,
}

impl DataItem {
    /// Builds a handle by parsing the size header at `off` on `page`.
    pub(crate) fn parse(page: Arc<Page>, off: u16, uid: Uid, wal: Arc<Wal>) -> Arc<DataItem> {
        let size = page.with_data(|raw| {
            u16::from_be_bytes([raw[off as usize + OF_SIZE], raw[off as usize + OF_SIZE + 1]])
        });
        Arc::new(DataItem {
            uid,
            off,
            len: OF_DATA + size as usize,
            page,
            wal,
            lock: RwLock::new(()),
        })
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn page(&self) -> &Arc<Page> {
        &self.page
    }

    pub fn payload_len(&self) -> usize {
        self.len - OF_DATA
    }

    pub fn is_valid(&self) -> bool {
        self.page
            .with_data(|raw| raw[self.off as usize + OF_VALID] == 0)
    }

    fn raw_image(&self) -> Vec<u8> {
        self.page
            .with_data(|raw| raw[self.off as usize..self.off as usize + self.len].to_vec())
    }

    /// Shared read access to the payload.
    pub fn read(&self) -> ItemReadGuard<'_> {
        ItemReadGuard {
            item: self,
            _lock: self.lock.read(),
        }
    }

    /// Starts a mutation: write lock, dirty page, snapshot for rollback.
    pub fn before(&self) -> ItemWriteGuard<'_> {
        let lock = self.lock.write();
        self.page.set_dirty();
        let old_raw = self.raw_image();
        ItemWriteGuard {
            item: self,
            old_raw,
            _lock: lock,
        }
    }
}

pub struct ItemReadGuard<'a> {
    item: &'a DataItem,
    _lock: RwLockReadGuard<'a, ()>,
}

impl ItemReadGuard<'_> {
    pub fn payload(&self) -> Vec<u8> {
        let start = self.item.off as usize + OF_DATA;
        self.item
            .page
            .with_data(|raw| raw[start..start + self.item.payload_len()].to_vec())
    }
}

pub struct ItemWriteGuard<'a> {
    item: &'a DataItem,
    old_raw: Vec<u8>,
    _lock: RwLockWriteGuard<'a, ()>,
}

impl ItemWriteGuard<'_> {
    pub fn payload(&self) -> Vec<u8> {
        let start = self.item.off as usize + OF_DATA;
        self.item
            .page
            .with_data(|raw| raw[start..start + self.item.payload_len()].to_vec())
    }

    /// Overwrites part of the payload in place, under the page mutex.
    pub fn mutate_payload(&mut self, f: impl FnOnce(&mut [u8])) {
        let start = self.item.off as usize + OF_DATA;
        let len = self.item.payload_len();
        self.item
            .page
            .with_data_mut(|raw| f(&mut raw[start..start + len]));
    }

    /// Finishes the mutation: the update record is appended to the WAL
    /// while the write lock is still held, then the lock drops.
    pub fn after(self, xid: Xid) -> Result<()> {
        let new_raw = self.item.raw_image();
        let body = log_rec::encode_update(xid, self.item.uid, &self.old_raw, &new_raw);
        self.item.wal.append(&body)
    }

    /// Abandons the mutation, restoring the snapshotted image.
    pub fn un_before(self) {
        let off = self.item.off as usize;
        let old = &self.old_raw;
        self.item
            .page
            .with_data_mut(|raw| raw[off..off + old.len()].copy_from_slice(old));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_sets_header() {
        let raw = wrap_item(b"xyz");
        assert_eq!(raw[OF_VALID], 0);
        assert_eq!(u16::from_be_bytes([raw[1], raw[2]]), 3);
        assert_eq!(&raw[OF_DATA..], b"xyz");
    }

    #[test]
    fn invalid_flag_flips() {
        let mut raw = wrap_item(b"xyz");
        set_item_invalid(&mut raw);
        assert_eq!(raw[OF_VALID], 1);
    }
}
