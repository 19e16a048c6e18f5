//! WAL record bodies. Two kinds, discriminated by the first byte:
//!
//! - insert: `[0 | xid(8) | pgno(4) | off(2) | item]`
//! - update: `[1 | xid(8) | uid(8) | old_item | new_item]`, the two item
//!   images being the same length.

use crate::error::{Result, StratumError};
use crate::types::{Pgno, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

const OF_XID: usize = 1;
const OF_INSERT_PGNO: usize = OF_XID + 8;
const OF_INSERT_OFF: usize = OF_INSERT_PGNO + 4;
const OF_INSERT_ITEM: usize = OF_INSERT_OFF + 2;
const OF_UPDATE_UID: usize = OF_XID + 8;
const OF_UPDATE_ITEMS: usize = OF_UPDATE_UID + 8;

#[derive(Debug)]
pub enum LogRecord {
    Insert(InsertRec),
    Update(UpdateRec),
}

impl LogRecord {
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert(rec) => rec.xid,
            LogRecord::Update(rec) => rec.xid,
        }
    }

    pub fn pgno(&self) -> Pgno {
        match self {
            LogRecord::Insert(rec) => rec.pgno,
            LogRecord::Update(rec) => rec.uid.pgno(),
        }
    }
}

#[derive(Debug)]
pub struct InsertRec {
    pub xid: Xid,
    pub pgno: Pgno,
    pub off: u16,
    pub item: Vec<u8>,
}

#[derive(Debug)]
pub struct UpdateRec {
    pub xid: Xid,
    pub uid: Uid,
    pub old: Vec<u8>,
    pub new: Vec<u8>,
}

pub fn encode_insert(xid: Xid, pgno: Pgno, off: u16, item: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(OF_INSERT_ITEM + item.len());
    body.push(TYPE_INSERT);
    body.extend_from_slice(&xid.0.to_be_bytes());
    body.extend_from_slice(&pgno.0.to_be_bytes());
    body.extend_from_slice(&off.to_be_bytes());
    body.extend_from_slice(item);
    body
}

pub fn encode_update(xid: Xid, uid: Uid, old: &[u8], new: &[u8]) -> Vec<u8> {
    debug_assert_eq!(old.len(), new.len());
    let mut body = Vec::with_capacity(OF_UPDATE_ITEMS + old.len() + new.len());
    body.push(TYPE_UPDATE);
    body.extend_from_slice(&xid.0.to_be_bytes());
    body.extend_from_slice(&uid.0.to_be_bytes());
    body.extend_from_slice(old);
    body.extend_from_slice(new);
    body
}

pub fn parse(body: &[u8]) -> Result<LogRecord> {
    match body.first() {
        Some(&TYPE_INSERT) if body.len() > OF_INSERT_ITEM => {
            let xid = Xid(u64::from_be_bytes(
                body[OF_XID..OF_INSERT_PGNO].try_into().unwrap(),
            ));
            let pgno = Pgno(u32::from_be_bytes(
                body[OF_INSERT_PGNO..OF_INSERT_OFF].try_into().unwrap(),
            ));
            let off = u16::from_be_bytes(body[OF_INSERT_OFF..OF_INSERT_ITEM].try_into().unwrap());
            Ok(LogRecord::Insert(InsertRec {
                xid,
                pgno,
                off,
                item: body[OF_INSERT_ITEM..].to_vec(),
            }))
        }
        Some(&TYPE_UPDATE) if body.len() > OF_UPDATE_ITEMS => {
            let xid = Xid(u64::from_be_bytes(
                body[OF_XID..OF_UPDATE_UID].try_into().unwrap(),
            ));
            let uid = Uid(u64::from_be_bytes(
                body[OF_UPDATE_UID..OF_UPDATE_ITEMS].try_into().unwrap(),
            ));
            let half = (body.len() - OF_UPDATE_ITEMS) / 2;
            Ok(LogRecord::Update(UpdateRec {
                xid,
                uid,
                old: body[OF_UPDATE_ITEMS..OF_UPDATE_ITEMS + half].to_vec(),
                new: body[OF_UPDATE_ITEMS + half..OF_UPDATE_ITEMS + 2 * half].to_vec(),
            }))
        }
        _ => Err(StratumError::BadLogFile),
    }
}
