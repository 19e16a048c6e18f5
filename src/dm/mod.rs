//! Data manager: the insert/read path over slotted pages, WAL-first
//! mutation ordering, and the recovery entry point.

pub mod data_item;
pub mod log_rec;
pub mod page_index;
pub mod recover;

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, StratumError};
use crate::pager::page::Page;
use crate::pager::{page_fmt, page_one, BufferPool, DB_SUFFIX};
use crate::path_with_suffix;
use crate::primitives::cache::RefCache;
use crate::tm::TxnManager;
use crate::types::{Pgno, Uid, Xid};
use crate::wal::{Wal, LOG_SUFFIX};

use data_item::DataItem;
use page_index::PageIndex;

pub struct DataManager {
    tm: Arc<TxnManager>,
    pc: Arc<BufferPool>,
    wal: Arc<Wal>,
    pindex: PageIndex,
    items: RefCache<Arc<DataItem>>,
    page_one: Mutex<Option<Arc<Page>>>,
}

impl DataManager {
    /// Initialises a fresh data file and log next to `base`.
    pub fn create(base: &Path, capacity: usize, tm: Arc<TxnManager>) -> Result<Self> {
        let pc = Arc::new(BufferPool::create(
            path_with_suffix(base, DB_SUFFIX),
            capacity,
        )?);
        let wal = Arc::new(Wal::create(path_with_suffix(base, LOG_SUFFIX))?);
        let dm = Self::assemble(tm, pc, wal);

        let pgno = dm.pc.new_page(&page_one::init_raw())?;
        debug_assert_eq!(pgno, Pgno(1));
        let first = dm.pc.get(pgno)?;
        dm.pc.flush_page(&first)?;
        *dm.page_one.lock() = Some(first);
        Ok(dm)
    }

    /// Opens an existing pair of files, recovering first if the last
    /// shutdown was not clean.
    pub fn open(base: &Path, capacity: usize, tm: Arc<TxnManager>) -> Result<Self> {
        let pc = Arc::new(BufferPool::open(path_with_suffix(base, DB_SUFFIX), capacity)?);
        let wal = Arc::new(Wal::open(path_with_suffix(base, LOG_SUFFIX))?);
        let dm = Self::assemble(tm, pc, wal);

        let first = dm.pc.get(Pgno(1))?;
        if !page_one::check(&first) {
            recover::recover(&dm.tm, &dm.wal, &dm.pc)?;
        }
        dm.fill_page_index()?;
        page_one::set_open(&first);
        dm.pc.flush_page(&first)?;
        *dm.page_one.lock() = Some(first);
        Ok(dm)
    }

    fn assemble(tm: Arc<TxnManager>, pc: Arc<BufferPool>, wal: Arc<Wal>) -> Self {
        Self {
            tm,
            pc,
            wal,
            pindex: PageIndex::new(),
            items: RefCache::new(0),
            page_one: Mutex::new(None),
        }
    }

    fn fill_page_index(&self) -> Result<()> {
        for no in 2..=self.pc.page_count() {
            let page = self.pc.get(Pgno(no))?;
            self.pindex.add(page.pgno(), page_fmt::free_space(&page));
            self.pc.release(&page);
        }
        Ok(())
    }

    pub fn tm(&self) -> &Arc<TxnManager> {
        &self.tm
    }

    /// Inserts a payload, returning its uid. The insert WAL record is
    /// durable before the page mutates.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let item = data_item::wrap_item(data);
        if item.len() > page_fmt::MAX_FREE_SPACE {
            return Err(StratumError::DataTooLarge);
        }

        let mut slot = None;
        for _ in 0..5 {
            slot = self.pindex.select(item.len());
            if slot.is_some() {
                break;
            }
            let pgno = self.pc.new_page(&page_fmt::init_raw())?;
            self.pindex.add(pgno, page_fmt::MAX_FREE_SPACE);
        }
        let slot = slot.ok_or(StratumError::DatabaseBusy)?;

        let page = match self.pc.get(slot.pgno) {
            Ok(page) => page,
            Err(err) => {
                // The descriptor must not leak even when the page fault fails.
                self.pindex.add(slot.pgno, slot.free);
                return Err(err);
            }
        };

        let result = (|| -> Result<Uid> {
            let body = log_rec::encode_insert(xid, slot.pgno, page_fmt::fso(&page), &item);
            self.wal.append(&body)?;
            let off = page_fmt::insert(&page, &item);
            Ok(Uid::new(slot.pgno, off))
        })();

        self.pindex.add(slot.pgno, page_fmt::free_space(&page));
        self.pc.release(&page);
        result
    }

    /// Fetches a live item; a deleted slot reads as `None`.
    pub fn read(&self, uid: Uid) -> Result<Option<Arc<DataItem>>> {
        let item = self.items.get_or_load(uid.0, || {
            let page = self.pc.get(uid.pgno())?;
            Ok(DataItem::parse(page, uid.off(), uid, Arc::clone(&self.wal)))
        })?;
        if !item.is_valid() {
            self.release(&item);
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Returns an item handle to the cache; the last release unpins the
    /// underlying page.
    pub fn release(&self, item: &Arc<DataItem>) {
        self.items
            .release(item.uid().0, |item| self.pc.release(item.page()));
    }

    /// Flushes everything and stamps page 1 with the clean-shutdown mark.
    pub fn close(&self) -> Result<()> {
        self.items.close(|item| self.pc.release(item.page()));
        self.wal.close()?;

        if let Some(first) = self.page_one.lock().take() {
            page_one::set_close(&first);
            self.pc.release(&first);
        }
        self.pc.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh(dir: &tempfile::TempDir) -> (Arc<TxnManager>, DataManager) {
        let base = dir.path().join("t");
        let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
        let dm = DataManager::create(&base, 16, Arc::clone(&tm)).unwrap();
        (tm, dm)
    }

    #[test]
    fn insert_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let (tm, dm) = fresh(&dir);
        let xid = tm.begin().unwrap();

        let uid = dm.insert(xid, b"hello item").unwrap();
        let item = dm.read(uid).unwrap().expect("live item");
        assert_eq!(item.read().payload(), b"hello item");
        dm.release(&item);
    }

    #[test]
    fn payload_size_boundaries() {
        let dir = tempdir().unwrap();
        let (tm, dm) = fresh(&dir);
        let xid = tm.begin().unwrap();

        // Wrapped size is payload + 3 and must fit in PAGE_SIZE - 2.
        assert!(dm.insert(xid, &vec![1u8; 8187]).is_ok());
        assert!(matches!(
            dm.insert(xid, &vec![1u8; 8188]),
            Err(StratumError::DataTooLarge)
        ));
        assert!(matches!(
            dm.insert(xid, &vec![1u8; 8190]),
            Err(StratumError::DataTooLarge)
        ));
    }

    #[test]
    fn update_via_guard_is_logged_and_applied() {
        let dir = tempdir().unwrap();
        let (tm, dm) = fresh(&dir);
        let xid = tm.begin().unwrap();

        let uid = dm.insert(xid, b"aaaaaa").unwrap();
        let item = dm.read(uid).unwrap().unwrap();
        let mut guard = item.before();
        guard.mutate_payload(|data| data.copy_from_slice(b"bbbbbb"));
        guard.after(xid).unwrap();

        assert_eq!(item.read().payload(), b"bbbbbb");
        dm.release(&item);

        let item = dm.read(uid).unwrap().unwrap();
        assert_eq!(item.read().payload(), b"bbbbbb");
        dm.release(&item);
    }

    #[test]
    fn un_before_rolls_the_image_back() {
        let dir = tempdir().unwrap();
        let (tm, dm) = fresh(&dir);
        let xid = tm.begin().unwrap();

        let uid = dm.insert(xid, b"stable").unwrap();
        let item = dm.read(uid).unwrap().unwrap();
        let mut guard = item.before();
        guard.mutate_payload(|data| data.copy_from_slice(b"mutant"));
        guard.un_before();

        assert_eq!(item.read().payload(), b"stable");
        dm.release(&item);
    }

    #[test]
    fn data_survives_clean_restart() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        let uid;
        {
            let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
            let dm = DataManager::create(&base, 16, Arc::clone(&tm)).unwrap();
            let xid = tm.begin().unwrap();
            uid = dm.insert(xid, b"durable bytes").unwrap();
            tm.commit(xid).unwrap();
            dm.close().unwrap();
            tm.close().unwrap();
        }
        let tm = Arc::new(TxnManager::open(path_with_suffix(&base, ".xid")).unwrap());
        let dm = DataManager::open(&base, 16, Arc::clone(&tm)).unwrap();
        let item = dm.read(uid).unwrap().expect("item survived restart");
        assert_eq!(item.read().payload(), b"durable bytes");
        dm.release(&item);
        dm.close().unwrap();
    }

    #[test]
    fn crash_mid_insert_rolls_back_on_recovery() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        let uid;
        {
            let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
            let dm = DataManager::create(&base, 16, Arc::clone(&tm)).unwrap();
            let xid = tm.begin().unwrap();
            uid = dm.insert(xid, b"never committed").unwrap();
            // Crash: the process dies with the transaction still active and
            // no clean-shutdown mark. The WAL record is already durable.
            drop(dm);
            tm.close().unwrap();
        }
        let tm = Arc::new(TxnManager::open(path_with_suffix(&base, ".xid")).unwrap());
        let dm = DataManager::open(&base, 16, Arc::clone(&tm)).unwrap();
        assert!(dm.read(uid).unwrap().is_none(), "insert was undone");
        assert!(tm.is_aborted(Xid(1)).unwrap());
        dm.close().unwrap();
    }

    #[test]
    fn crash_after_commit_replays_the_insert() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        let uid;
        {
            let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
            let dm = DataManager::create(&base, 16, Arc::clone(&tm)).unwrap();
            let xid = tm.begin().unwrap();
            uid = dm.insert(xid, b"committed bytes").unwrap();
            tm.commit(xid).unwrap();
            // Crash without close: the page itself may never have been
            // written, but the WAL record and commit status are durable.
            drop(dm);
            tm.close().unwrap();
        }
        let tm = Arc::new(TxnManager::open(path_with_suffix(&base, ".xid")).unwrap());
        let dm = DataManager::open(&base, 16, Arc::clone(&tm)).unwrap();
        let item = dm.read(uid).unwrap().expect("redo restored the item");
        assert_eq!(item.read().payload(), b"committed bytes");
        dm.release(&item);
        dm.close().unwrap();
    }
}
