//! Table metadata and row operations.
//!
//! A table record is `[name][next_uid(8)][field_uid(8)]*`; tables chain
//! newest-first from the boot file. Rows are the fields' values encoded in
//! declaration order. Row lookups always go through one indexed field.

use std::sync::Arc;

use crate::dm::DataManager;
use crate::error::{Result, StratumError};
use crate::sql::ast::{Delete, Insert, LogicOp, Select, Update, Where};
use crate::types::{Uid, Xid, SUPER_XID};
use crate::vm::VersionManager;

use super::codec::{self, Value};
use super::field::Field;

pub struct Table {
    pub uid: Uid,
    pub name: String,
    pub next_uid: Uid,
    pub fields: Vec<Field>,
}

impl Table {
    pub fn load(vm: &VersionManager, dm: &Arc<DataManager>, uid: Uid) -> Result<Arc<Table>> {
        let raw = vm
            .read(SUPER_XID, uid)?
            .ok_or(StratumError::TableNotFound)?;
        let (name, mut at) = codec::decode_string(&raw)?;
        let next_uid = Uid(u64::from_be_bytes(raw[at..at + 8].try_into().unwrap()));
        at += 8;

        let mut fields = Vec::new();
        while at < raw.len() {
            let field_uid = Uid(u64::from_be_bytes(raw[at..at + 8].try_into().unwrap()));
            at += 8;
            fields.push(Field::load(vm, dm, field_uid)?);
        }
        Ok(Arc::new(Table {
            uid,
            name,
            next_uid,
            fields,
        }))
    }

    pub fn create(
        vm: &VersionManager,
        dm: &Arc<DataManager>,
        xid: Xid,
        next_uid: Uid,
        stmt: &crate::sql::ast::Create,
    ) -> Result<Arc<Table>> {
        let mut fields = Vec::new();
        for (fname, ftype) in &stmt.fields {
            let indexed = stmt.indexes.iter().any(|ix| ix == fname);
            fields.push(Field::create(vm, dm, xid, fname, ftype, indexed)?);
        }

        let uid = persist(vm, xid, &stmt.table, next_uid, &fields)?;
        Ok(Arc::new(Table {
            uid,
            name: stmt.table.clone(),
            next_uid,
            fields,
        }))
    }

    /// Re-persists this table's record with a different chain link. Used
    /// when a successor is dropped. The old record is deleted; field
    /// records are shared by uid and stay in place.
    pub fn relink(
        &self,
        vm: &VersionManager,
        dm: &Arc<DataManager>,
        xid: Xid,
        new_next: Uid,
    ) -> Result<Arc<Table>> {
        let new_uid = persist(vm, xid, &self.name, new_next, &self.fields)?;
        vm.delete(xid, self.uid)?;
        let fields = self
            .fields
            .iter()
            .map(|f| Field::load(vm, dm, f.uid))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(Table {
            uid: new_uid,
            name: self.name.clone(),
            next_uid: new_next,
            fields,
        }))
    }

    pub fn insert(&self, vm: &VersionManager, xid: Xid, stmt: &Insert) -> Result<()> {
        if stmt.values.len() != self.fields.len() {
            return Err(StratumError::InvalidValues);
        }
        let mut row = Vec::with_capacity(self.fields.len());
        for (field, literal) in self.fields.iter().zip(&stmt.values) {
            row.push(field.parse_literal(literal)?);
        }

        let uid = vm.insert(xid, &encode_row(&row))?;
        for (field, value) in self.fields.iter().zip(&row) {
            if field.is_indexed() {
                field.index_insert(value, uid)?;
            }
        }
        Ok(())
    }

    pub fn select(&self, vm: &VersionManager, xid: Xid, stmt: &Select) -> Result<String> {
        let uids = self.resolve_where(stmt.where_clause.as_ref())?;
        let mut out = String::new();
        for uid in uids {
            let Some(raw) = vm.read(xid, uid)? else {
                continue;
            };
            let row = self.decode_row(&raw)?;
            out.push_str(&render_row(&row));
            out.push('\n');
        }
        Ok(out)
    }

    pub fn update(&self, vm: &VersionManager, xid: Xid, stmt: &Update) -> Result<usize> {
        let target = self
            .fields
            .iter()
            .position(|f| f.name == stmt.field)
            .ok_or(StratumError::FieldNotFound)?;
        let new_value = self.fields[target].parse_literal(&stmt.value)?;

        let uids = self.resolve_where(stmt.where_clause.as_ref())?;
        let mut count = 0;
        for uid in uids {
            let Some(raw) = vm.read(xid, uid)? else {
                continue;
            };
            vm.delete(xid, uid)?;

            let mut row = self.decode_row(&raw)?;
            row[target] = new_value.clone();
            let new_uid = vm.insert(xid, &encode_row(&row))?;
            count += 1;

            for (field, value) in self.fields.iter().zip(&row) {
                if field.is_indexed() {
                    field.index_insert(value, new_uid)?;
                }
            }
        }
        Ok(count)
    }

    pub fn delete(&self, vm: &VersionManager, xid: Xid, stmt: &Delete) -> Result<usize> {
        let uids = self.resolve_where(Some(&stmt.where_clause))?;
        let mut count = 0;
        for uid in uids {
            if vm.delete(xid, uid)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Turns a where clause into row uids via one indexed field's tree.
    fn resolve_where(&self, clause: Option<&Where>) -> Result<Vec<Uid>> {
        let Some(clause) = clause else {
            let field = self
                .fields
                .iter()
                .find(|f| f.is_indexed())
                .ok_or(StratumError::TableNoIndex)?;
            return field.index_search(0, i64::MAX);
        };

        let field = self
            .fields
            .iter()
            .find(|f| f.name == clause.first.field)
            .ok_or(StratumError::FieldNotFound)?;
        if !field.is_indexed() {
            return Err(StratumError::FieldNotIndexed);
        }

        let (lo, hi) = field.calc_range(clause.first.op, &clause.first.value)?;
        match &clause.rest {
            None => field.index_search(lo, hi),
            Some((LogicOp::And, second)) => {
                let (lo2, hi2) = field.calc_range(second.op, &second.value)?;
                field.index_search(lo.max(lo2), hi.min(hi2))
            }
            Some((LogicOp::Or, second)) => {
                let (lo2, hi2) = field.calc_range(second.op, &second.value)?;
                let mut uids = field.index_search(lo, hi)?;
                uids.extend(field.index_search(lo2, hi2)?);
                Ok(uids)
            }
        }
    }

    fn decode_row(&self, raw: &[u8]) -> Result<Vec<Value>> {
        let mut at = 0;
        let mut row = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let (value, used) = Value::decode(field.ftype, &raw[at..])?;
            row.push(value);
            at += used;
        }
        Ok(row)
    }

    pub fn describe(&self) -> String {
        let fields: Vec<String> = self.fields.iter().map(|f| f.describe()).collect();
        format!("{{{}: {}}}", self.name, fields.join(", "))
    }

    pub fn close(&self) {
        for field in &self.fields {
            field.close();
        }
    }
}

fn persist(
    vm: &VersionManager,
    xid: Xid,
    name: &str,
    next_uid: Uid,
    fields: &[Field],
) -> Result<Uid> {
    let mut body = codec::encode_string(name);
    body.extend_from_slice(&next_uid.0.to_be_bytes());
    for field in fields {
        body.extend_from_slice(&field.uid.0.to_be_bytes());
    }
    vm.insert(xid, &body)
}

fn encode_row(row: &[Value]) -> Vec<u8> {
    let mut raw = Vec::new();
    for value in row {
        raw.extend_from_slice(&value.encode());
    }
    raw
}

fn render_row(row: &[Value]) -> String {
    let rendered: Vec<String> = row.iter().map(Value::render).collect();
    format!("[{}]", rendered.join(", "))
}
