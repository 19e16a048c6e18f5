use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::types::{Pgno, PAGE_SIZE};

/// One resident 8 KiB page. All access to the buffer goes through the
/// per-page mutex; mutation marks the page dirty.
pub struct Page {
    pgno: Pgno,
    buf: Mutex<Box<[u8; PAGE_SIZE]>>,
    dirty: AtomicBool,
}

impl Page {
    pub fn new(pgno: Pgno, buf: Box<[u8; PAGE_SIZE]>) -> Self {
        Self {
            pgno,
            buf: Mutex::new(buf),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn pgno(&self) -> Pgno {
        self.pgno
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn set_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let buf = self.buf.lock();
        f(&buf[..])
    }

    /// Runs `f` over the buffer under the page mutex and marks the page
    /// dirty.
    pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut buf = self.buf.lock();
        self.set_dirty();
        f(&mut buf[..])
    }

    pub fn snapshot(&self) -> Box<[u8; PAGE_SIZE]> {
        self.buf.lock().clone()
    }
}
