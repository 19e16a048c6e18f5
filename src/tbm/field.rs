//! Field metadata: `[name][type][index_boot(8)]`, stored through the VM.
//! An indexed field owns a B+-tree whose boot uid is persisted with it.

use std::sync::Arc;

use crate::dm::DataManager;
use crate::error::{Result, StratumError};
use crate::im::BPlusTree;
use crate::sql::ast::CmpOp;
use crate::types::{Uid, Xid, SUPER_XID};
use crate::vm::VersionManager;

use super::codec::{self, FieldType, Value};

pub struct Field {
    pub uid: Uid,
    pub name: String,
    pub ftype: FieldType,
    index_boot: Uid,
    tree: Option<BPlusTree>,
}

impl Field {
    pub fn load(vm: &VersionManager, dm: &Arc<DataManager>, uid: Uid) -> Result<Field> {
        let raw = vm
            .read(SUPER_XID, uid)?
            .ok_or(StratumError::FieldNotFound)?;
        let (name, used) = codec::decode_string(&raw)?;
        let (type_name, used2) = codec::decode_string(&raw[used..])?;
        let at = used + used2;
        let index_boot = Uid(u64::from_be_bytes(raw[at..at + 8].try_into().unwrap()));
        let ftype = FieldType::parse(&type_name)?;

        let tree = if index_boot.is_null() {
            None
        } else {
            Some(BPlusTree::load(index_boot, Arc::clone(dm))?)
        };
        Ok(Field {
            uid,
            name,
            ftype,
            index_boot,
            tree,
        })
    }

    pub fn create(
        vm: &VersionManager,
        dm: &Arc<DataManager>,
        xid: Xid,
        name: &str,
        type_name: &str,
        indexed: bool,
    ) -> Result<Field> {
        let ftype = FieldType::parse(type_name)?;
        let (index_boot, tree) = if indexed {
            let boot = BPlusTree::create(dm)?;
            (boot, Some(BPlusTree::load(boot, Arc::clone(dm))?))
        } else {
            (Uid(0), None)
        };

        let mut body = codec::encode_string(name);
        body.extend_from_slice(&codec::encode_string(ftype.name()));
        body.extend_from_slice(&index_boot.0.to_be_bytes());
        let uid = vm.insert(xid, &body)?;

        Ok(Field {
            uid,
            name: name.to_string(),
            ftype,
            index_boot,
            tree,
        })
    }

    pub fn is_indexed(&self) -> bool {
        !self.index_boot.is_null()
    }

    pub fn parse_literal(&self, literal: &str) -> Result<Value> {
        Value::parse(self.ftype, literal)
    }

    pub fn index_insert(&self, value: &Value, uid: Uid) -> Result<()> {
        let tree = self.tree.as_ref().ok_or(StratumError::FieldNotIndexed)?;
        tree.insert(value.to_key(), uid)
    }

    pub fn index_search(&self, lo: i64, hi: i64) -> Result<Vec<Uid>> {
        let tree = self.tree.as_ref().ok_or(StratumError::FieldNotIndexed)?;
        tree.search_range(lo, hi)
    }

    /// Key range matched by `<field> <op> <literal>`.
    pub fn calc_range(&self, op: CmpOp, literal: &str) -> Result<(i64, i64)> {
        let key = self.parse_literal(literal)?.to_key();
        Ok(match op {
            CmpOp::Eq => (key, key),
            CmpOp::Lt => (0, if key > 0 { key - 1 } else { key }),
            CmpOp::Gt => (key.saturating_add(1), i64::MAX),
        })
    }

    pub fn describe(&self) -> String {
        format!(
            "({}, {}, {})",
            self.name,
            self.ftype.name(),
            if self.is_indexed() { "Index" } else { "NoIndex" }
        )
    }

    pub fn close(&self) {
        if let Some(tree) = &self.tree {
            tree.close();
        }
    }
}
