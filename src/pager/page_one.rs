//! Page 1 carries the clean-shutdown witness.
//!
//! At open an 8-byte random token is written at [100, 108); at clean close
//! it is copied to [108, 116). Equal ranges on the next open mean the last
//! shutdown was clean; unequal ranges trigger recovery.

use rand::RngCore;

use super::page::Page;
use crate::types::PAGE_SIZE;

const OF_MARK: usize = 100;
const MARK_LEN: usize = 8;

pub fn init_raw() -> Box<[u8; PAGE_SIZE]> {
    let mut raw = Box::new([0u8; PAGE_SIZE]);
    write_open_mark(&mut raw[..]);
    raw
}

fn write_open_mark(raw: &mut [u8]) {
    let mut token = [0u8; MARK_LEN];
    rand::thread_rng().fill_bytes(&mut token);
    raw[OF_MARK..OF_MARK + MARK_LEN].copy_from_slice(&token);
}

pub fn set_open(page: &Page) {
    page.with_data_mut(|raw| write_open_mark(raw));
}

pub fn set_close(page: &Page) {
    page.with_data_mut(|raw| {
        let (open, close) = raw.split_at_mut(OF_MARK + MARK_LEN);
        close[..MARK_LEN].copy_from_slice(&open[OF_MARK..OF_MARK + MARK_LEN]);
    });
}

/// True when the last shutdown was clean.
pub fn check(page: &Page) -> bool {
    page.with_data(|raw| {
        raw[OF_MARK..OF_MARK + MARK_LEN] == raw[OF_MARK + MARK_LEN..OF_MARK + 2 * MARK_LEN]
    })
}
