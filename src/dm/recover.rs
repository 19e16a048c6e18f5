//! Crash recovery: scan, REDO, UNDO.
//!
//! Runs when page 1's open/close marks disagree at open. The data file is
//! first cut back to the highest page any log record touches (pages beyond
//! that were half-written with no surviving record). Committed and aborted
//! transactions are then replayed in file order; still-active transactions
//! are rolled back in reverse and marked aborted.

use std::collections::HashMap;

use tracing::info;

use crate::error::Result;
use crate::pager::{page_fmt, BufferPool};
use crate::tm::TxnManager;
use crate::types::Pgno;
use crate::wal::Wal;

use super::data_item;
use super::log_rec::{self, LogRecord};

pub fn recover(tm: &TxnManager, wal: &Wal, pc: &BufferPool) -> Result<()> {
    info!("recovery started");

    let mut max_pgno = Pgno(1);
    let mut iter = wal.iter()?;
    while let Some(body) = iter.next()? {
        let rec = log_rec::parse(&body)?;
        if rec.pgno().0 > max_pgno.0 {
            max_pgno = rec.pgno();
        }
    }
    pc.truncate_to(max_pgno)?;
    info!(pages = max_pgno.0, "recovery truncated data file");

    redo(tm, wal, pc)?;
    undo(tm, wal, pc)?;

    info!("recovery finished");
    Ok(())
}

/// Replays every record of a non-active transaction, in file order.
fn redo(tm: &TxnManager, wal: &Wal, pc: &BufferPool) -> Result<()> {
    let mut iter = wal.iter()?;
    while let Some(body) = iter.next()? {
        match log_rec::parse(&body)? {
            LogRecord::Insert(rec) => {
                if !tm.is_active(rec.xid)? {
                    let page = pc.get(rec.pgno)?;
                    page_fmt::recover_insert(&page, &rec.item, rec.off);
                    pc.release(&page);
                }
            }
            LogRecord::Update(rec) => {
                if !tm.is_active(rec.xid)? {
                    let page = pc.get(rec.uid.pgno())?;
                    page_fmt::recover_update(&page, &rec.new, rec.uid.off());
                    pc.release(&page);
                }
            }
        }
    }
    Ok(())
}

/// Applies the inverse of every record of a still-active transaction, per
/// transaction in reverse order, then marks the transaction aborted.
fn undo(tm: &TxnManager, wal: &Wal, pc: &BufferPool) -> Result<()> {
    let mut pending: HashMap<u64, Vec<Vec<u8>>> = HashMap::new();
    let mut iter = wal.iter()?;
    while let Some(body) = iter.next()? {
        let rec = log_rec::parse(&body)?;
        if tm.is_active(rec.xid())? {
            pending.entry(rec.xid().0).or_default().push(body);
        }
    }

    for (xid_raw, bodies) in pending {
        for body in bodies.iter().rev() {
            match log_rec::parse(body)? {
                LogRecord::Insert(rec) => {
                    let page = pc.get(rec.pgno)?;
                    let mut item = rec.item;
                    data_item::set_item_invalid(&mut item);
                    page_fmt::recover_insert(&page, &item, rec.off);
                    pc.release(&page);
                }
                LogRecord::Update(rec) => {
                    let page = pc.get(rec.uid.pgno())?;
                    page_fmt::recover_update(&page, &rec.old, rec.uid.off());
                    pc.release(&page);
                }
            }
        }
        tm.abort(crate::types::Xid(xid_raw))?;
        info!(xid = xid_raw, "recovery rolled back transaction");
    }
    Ok(())
}
