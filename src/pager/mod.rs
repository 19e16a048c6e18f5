//! Buffer pool: pgno ↔ pinned in-memory page, bounded residency, dirty
//! write-back on eviction.

pub mod page;
pub mod page_fmt;
pub mod page_one;

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::error::{Result, StratumError};
use crate::primitives::cache::RefCache;
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{Pgno, PAGE_SIZE};

use page::Page;

pub const DB_SUFFIX: &str = ".db";

/// Below this many resident pages the engine cannot run.
pub const MIN_POOL_PAGES: usize = 10;

pub struct BufferPool {
    io: Arc<dyn FileIo>,
    cache: RefCache<Arc<Page>>,
    tail: AtomicU32,
    /// First write-back failure seen on an eviction path; surfaced at close.
    writeback_err: Mutex<Option<StratumError>>,
}

impl BufferPool {
    pub fn create(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        Self::with_io(Arc::new(StdFileIo::create(path)?), capacity)
    }

    pub fn open(path: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        Self::with_io(Arc::new(StdFileIo::open(path)?), capacity)
    }

    fn with_io(io: Arc<dyn FileIo>, capacity: usize) -> Result<Self> {
        if capacity < MIN_POOL_PAGES {
            return Err(StratumError::MemTooSmall);
        }
        let pages = (io.len()? / PAGE_SIZE as u64) as u32;
        Ok(Self {
            io,
            cache: RefCache::new(capacity),
            tail: AtomicU32::new(pages),
            writeback_err: Mutex::new(None),
        })
    }

    fn offset(pgno: Pgno) -> u64 {
        (pgno.0 as u64 - 1) * PAGE_SIZE as u64
    }

    /// Allocates a page at the tail of the file and writes `init` through to
    /// disk. The new page is not cached.
    pub fn new_page(&self, init: &[u8; PAGE_SIZE]) -> Result<Pgno> {
        let pgno = Pgno(self.tail.fetch_add(1, Ordering::SeqCst) + 1);
        self.io.write_at(Self::offset(pgno), init)?;
        self.io.sync_all()?;
        Ok(pgno)
    }

    /// Returns a pinned page, faulting it from disk if absent.
    pub fn get(&self, pgno: Pgno) -> Result<Arc<Page>> {
        self.cache.get_or_load(pgno.0 as u64, || {
            let mut buf = Box::new([0u8; PAGE_SIZE]);
            self.io.read_at(Self::offset(pgno), &mut buf[..])?;
            Ok(Arc::new(Page::new(pgno, buf)))
        })
    }

    /// Drops one pin. The last release evicts the page, writing it back
    /// first if dirty.
    pub fn release(&self, page: &Arc<Page>) {
        self.cache.release(page.pgno().0 as u64, |page| {
            if let Err(err) = self.write_back(page) {
                error!(pgno = page.pgno().0, %err, "pager.writeback_failed");
                let mut slot = self.writeback_err.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
        });
    }

    /// Write-through regardless of the dirty bit.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        let snapshot = page.snapshot();
        self.io.write_at(Self::offset(page.pgno()), &snapshot[..])?;
        self.io.sync_all()?;
        page.clear_dirty();
        Ok(())
    }

    fn write_back(&self, page: &Page) -> Result<()> {
        if page.is_dirty() {
            self.flush_page(page)?;
        }
        Ok(())
    }

    /// Cuts the file back to `max_pgno` pages and resets the tail counter.
    /// Only used during recovery, before the cache is populated.
    pub fn truncate_to(&self, max_pgno: Pgno) -> Result<()> {
        self.io
            .truncate(max_pgno.0 as u64 * PAGE_SIZE as u64)?;
        self.tail.store(max_pgno.0, Ordering::SeqCst);
        Ok(())
    }

    pub fn page_count(&self) -> u32 {
        self.tail.load(Ordering::SeqCst)
    }

    /// Flushes every dirty resident page and closes the file.
    pub fn close(&self) -> Result<()> {
        self.cache.close(|page| {
            if let Err(err) = self.write_back(page) {
                error!(pgno = page.pgno().0, %err, "pager.writeback_failed");
                let mut slot = self.writeback_err.lock();
                if slot.is_none() {
                    *slot = Some(err);
                }
            }
        });
        if let Some(err) = self.writeback_err.lock().take() {
            return Err(err);
        }
        self.io.sync_all()
    }
}
