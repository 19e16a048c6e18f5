//! Table manager: the catalog plus statement execution against it.
//!
//! The boot file points at the newest table; tables chain through
//! `next_uid`. Creating a table prepends to the chain and rewrites the
//! boot file; dropping one relinks the chain by re-persisting the
//! predecessor records.

pub mod booter;
pub mod codec;
pub mod field;
pub mod table;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::dm::DataManager;
use crate::error::{Result, StratumError};
use crate::sql::ast;
use crate::types::{Uid, Xid};
use crate::vm::VersionManager;

use booter::Booter;
use table::Table;

pub struct TableManager {
    vm: Arc<VersionManager>,
    dm: Arc<DataManager>,
    booter: Booter,
    tables: Mutex<HashMap<String, Arc<Table>>>,
}

impl TableManager {
    pub fn create(base: &Path, vm: Arc<VersionManager>, dm: Arc<DataManager>) -> Result<Self> {
        let booter = Booter::create(base)?;
        booter.update(&0u64.to_be_bytes())?;
        Ok(Self {
            vm,
            dm,
            booter,
            tables: Mutex::new(HashMap::new()),
        })
    }

    pub fn open(base: &Path, vm: Arc<VersionManager>, dm: Arc<DataManager>) -> Result<Self> {
        let tbm = Self {
            vm,
            dm,
            booter: Booter::open(base)?,
            tables: Mutex::new(HashMap::new()),
        };
        tbm.load_tables()?;
        Ok(tbm)
    }

    fn first_table_uid(&self) -> Result<Uid> {
        let raw = self.booter.load()?;
        if raw.len() < 8 {
            return Ok(Uid(0));
        }
        Ok(Uid(u64::from_be_bytes(raw[..8].try_into().unwrap())))
    }

    fn load_tables(&self) -> Result<()> {
        let mut tables = self.tables.lock();
        let mut uid = self.first_table_uid()?;
        while !uid.is_null() {
            let table = Table::load(&self.vm, &self.dm, uid)?;
            uid = table.next_uid;
            tables.insert(table.name.clone(), table);
        }
        info!(tables = tables.len(), "catalog loaded");
        Ok(())
    }

    pub fn begin(&self, stmt: &ast::Begin) -> Result<(Xid, Vec<u8>)> {
        let xid = self.vm.begin(stmt.level)?;
        Ok((xid, b"begin".to_vec()))
    }

    pub fn commit(&self, xid: Xid) -> Result<Vec<u8>> {
        self.vm.commit(xid)?;
        Ok(b"commit".to_vec())
    }

    pub fn abort(&self, xid: Xid) -> Result<Vec<u8>> {
        self.vm.abort(xid)?;
        Ok(b"abort".to_vec())
    }

    pub fn show(&self, _xid: Xid) -> Result<Vec<u8>> {
        let tables = self.tables.lock();
        let mut names: Vec<&String> = tables.keys().collect();
        names.sort();
        let mut out = String::new();
        for name in names {
            out.push_str(&tables[name].describe());
            out.push('\n');
        }
        Ok(out.into_bytes())
    }

    pub fn create_table(&self, xid: Xid, stmt: &ast::Create) -> Result<Vec<u8>> {
        let mut tables = self.tables.lock();
        if tables.contains_key(&stmt.table) {
            return Err(StratumError::DuplicatedTable);
        }
        let first = self.first_table_uid()?;
        let table = Table::create(&self.vm, &self.dm, xid, first, stmt)?;
        self.booter.update(&table.uid.0.to_be_bytes())?;
        info!(table = %table.name, "table created");
        tables.insert(table.name.clone(), table);
        Ok(format!("create {}", stmt.table).into_bytes())
    }

    /// Unlinks a table from the catalog chain. Every table between the
    /// chain head and the victim is re-persisted with its link moved one
    /// step past the victim, newest last so each rewrite knows its
    /// successor's fresh uid.
    pub fn drop_table(&self, xid: Xid, stmt: &ast::Drop) -> Result<Vec<u8>> {
        let mut tables = self.tables.lock();
        let target = tables
            .get(&stmt.table)
            .cloned()
            .ok_or(StratumError::TableNotFound)?;

        let by_uid: HashMap<u64, Arc<Table>> =
            tables.values().map(|t| (t.uid.0, Arc::clone(t))).collect();
        let mut prefix = Vec::new();
        let mut cur = self.first_table_uid()?;
        while cur != target.uid {
            let table = by_uid
                .get(&cur.0)
                .cloned()
                .ok_or(StratumError::TableNotFound)?;
            cur = table.next_uid;
            prefix.push(table);
        }

        let mut new_next = target.next_uid;
        for table in prefix.iter().rev() {
            let relinked = table.relink(&self.vm, &self.dm, xid, new_next)?;
            new_next = relinked.uid;
            tables.insert(relinked.name.clone(), relinked);
        }
        self.booter.update(&new_next.0.to_be_bytes())?;

        self.vm.delete(xid, target.uid)?;
        tables.remove(&stmt.table);
        // The replaced handles held pins on their index boot items.
        for table in &prefix {
            table.close();
        }
        target.close();
        info!(table = %stmt.table, "table dropped");
        Ok(format!("drop {}", stmt.table).into_bytes())
    }

    fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .lock()
            .get(name)
            .cloned()
            .ok_or(StratumError::TableNotFound)
    }

    pub fn insert(&self, xid: Xid, stmt: &ast::Insert) -> Result<Vec<u8>> {
        self.table(&stmt.table)?.insert(&self.vm, xid, stmt)?;
        Ok(b"insert".to_vec())
    }

    pub fn select(&self, xid: Xid, stmt: &ast::Select) -> Result<Vec<u8>> {
        let rows = self.table(&stmt.table)?.select(&self.vm, xid, stmt)?;
        Ok(rows.into_bytes())
    }

    pub fn update(&self, xid: Xid, stmt: &ast::Update) -> Result<Vec<u8>> {
        let count = self.table(&stmt.table)?.update(&self.vm, xid, stmt)?;
        Ok(format!("update {count}").into_bytes())
    }

    pub fn delete(&self, xid: Xid, stmt: &ast::Delete) -> Result<Vec<u8>> {
        let count = self.table(&stmt.table)?.delete(&self.vm, xid, stmt)?;
        Ok(format!("delete {count}").into_bytes())
    }

    pub fn vm(&self) -> &Arc<VersionManager> {
        &self.vm
    }

    /// Releases the catalog's pinned tree boot items.
    pub fn close(&self) {
        let tables = self.tables.lock();
        for table in tables.values() {
            table.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_with_suffix;
    use crate::sql::{parse, Statement};
    use crate::tm::TxnManager;
    use tempfile::tempdir;

    fn stack(dir: &tempfile::TempDir) -> TableManager {
        let base = dir.path().join("t");
        let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
        let dm = Arc::new(DataManager::create(&base, 64, tm).unwrap());
        let vm = Arc::new(VersionManager::new(dm.clone()));
        TableManager::create(&base, vm, dm).unwrap()
    }

    fn run(tbm: &TableManager, xid: Xid, sql: &str) -> Result<Vec<u8>> {
        match parse(sql.as_bytes())? {
            Statement::Create(stmt) => tbm.create_table(xid, &stmt),
            Statement::Drop(stmt) => tbm.drop_table(xid, &stmt),
            Statement::Insert(stmt) => tbm.insert(xid, &stmt),
            Statement::Select(stmt) => tbm.select(xid, &stmt),
            Statement::Update(stmt) => tbm.update(xid, &stmt),
            Statement::Delete(stmt) => tbm.delete(xid, &stmt),
            Statement::Show => tbm.show(xid),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    fn begin(tbm: &TableManager) -> Xid {
        tbm.begin(&ast::Begin {
            level: crate::vm::IsolationLevel::ReadCommitted,
        })
        .unwrap()
        .0
    }

    #[test]
    fn create_insert_select_roundtrip() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let xid = begin(&tbm);

        run(&tbm, xid, "create table users id int32, name string (index id)").unwrap();
        run(&tbm, xid, "insert into users values 1 'ada'").unwrap();
        run(&tbm, xid, "insert into users values 2 'grace'").unwrap();

        let rows = run(&tbm, xid, "select * from users where id = 2").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[2, grace]\n");

        let all = run(&tbm, xid, "select * from users").unwrap();
        assert_eq!(String::from_utf8(all).unwrap(), "[1, ada]\n[2, grace]\n");
        tbm.commit(xid).unwrap();
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let xid = begin(&tbm);
        run(&tbm, xid, "create table t a int64 (index a)").unwrap();
        assert!(matches!(
            run(&tbm, xid, "create table t a int64 (index a)"),
            Err(StratumError::DuplicatedTable)
        ));
    }

    #[test]
    fn update_rewrites_and_reindexes() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let xid = begin(&tbm);
        run(&tbm, xid, "create table t id int32, score int64 (index id)").unwrap();
        run(&tbm, xid, "insert into t values 1 100").unwrap();

        let out = run(&tbm, xid, "update t set score = 250 where id = 1").unwrap();
        assert_eq!(out, b"update 1");
        let rows = run(&tbm, xid, "select * from t where id = 1").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[1, 250]\n");
        tbm.commit(xid).unwrap();
    }

    #[test]
    fn delete_counts_and_hides_rows() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let xid = begin(&tbm);
        run(&tbm, xid, "create table t id int32 (index id)").unwrap();
        for i in 0..5 {
            run(&tbm, xid, &format!("insert into t values {i}")).unwrap();
        }
        let out = run(&tbm, xid, "delete from t where id > 2").unwrap();
        assert_eq!(out, b"delete 2");
        let rows = run(&tbm, xid, "select * from t").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[0]\n[1]\n[2]\n");
        tbm.commit(xid).unwrap();
    }

    #[test]
    fn where_ranges_and_or() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let xid = begin(&tbm);
        run(&tbm, xid, "create table t id int32 (index id)").unwrap();
        for i in 0..10 {
            run(&tbm, xid, &format!("insert into t values {i}")).unwrap();
        }
        let rows = run(&tbm, xid, "select * from t where id > 3 and id < 6").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[4]\n[5]\n");

        let rows = run(&tbm, xid, "select * from t where id < 1 or id > 8").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[0]\n[9]\n");
        tbm.commit(xid).unwrap();
    }

    #[test]
    fn string_index_lookup() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let xid = begin(&tbm);
        run(&tbm, xid, "create table t name string (index name)").unwrap();
        run(&tbm, xid, "insert into t values 'ada'").unwrap();
        run(&tbm, xid, "insert into t values 'grace'").unwrap();
        let rows = run(&tbm, xid, "select * from t where name = 'grace'").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[grace]\n");
        tbm.commit(xid).unwrap();
    }

    #[test]
    fn unindexed_field_in_where_is_an_error() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let xid = begin(&tbm);
        run(&tbm, xid, "create table t id int32, note string (index id)").unwrap();
        assert!(matches!(
            run(&tbm, xid, "select * from t where note = 'x'"),
            Err(StratumError::FieldNotIndexed)
        ));
        assert!(matches!(
            run(&tbm, xid, "select * from t where ghost = 'x'"),
            Err(StratumError::FieldNotFound)
        ));
    }

    #[test]
    fn drop_table_relinks_the_chain() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
        let dm = Arc::new(DataManager::create(&base, 64, tm).unwrap());
        let vm = Arc::new(VersionManager::new(dm.clone()));
        let tbm = TableManager::create(&base, vm.clone(), dm.clone()).unwrap();

        let xid = begin(&tbm);
        run(&tbm, xid, "create table a x int32 (index x)").unwrap();
        run(&tbm, xid, "create table b x int32 (index x)").unwrap();
        run(&tbm, xid, "create table c x int32 (index x)").unwrap();
        run(&tbm, xid, "insert into a values 1").unwrap();
        run(&tbm, xid, "drop table b").unwrap();
        tbm.commit(xid).unwrap();

        let show = String::from_utf8(tbm.show(Xid(0)).unwrap()).unwrap();
        assert!(show.contains("{a:"));
        assert!(!show.contains("{b:"));
        assert!(show.contains("{c:"));

        // A fresh manager over the same files sees the relinked chain.
        let tbm2 = TableManager::open(&base, vm, dm).unwrap();
        let show = String::from_utf8(tbm2.show(Xid(0)).unwrap()).unwrap();
        assert!(show.contains("{a:"));
        assert!(!show.contains("{b:"));
        assert!(show.contains("{c:"));

        let xid = begin(&tbm2);
        let rows = run(&tbm2, xid, "select * from a").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[1]\n");
        tbm2.commit(xid).unwrap();
    }

    #[test]
    fn catalog_survives_restart() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        {
            let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
            let dm = Arc::new(DataManager::create(&base, 64, tm.clone()).unwrap());
            let vm = Arc::new(VersionManager::new(dm.clone()));
            let tbm = TableManager::create(&base, vm, dm.clone()).unwrap();
            let xid = begin(&tbm);
            run(&tbm, xid, "create table t id int32 (index id)").unwrap();
            run(&tbm, xid, "insert into t values 7").unwrap();
            tbm.commit(xid).unwrap();
            tbm.close();
            dm.close().unwrap();
            tm.close().unwrap();
        }
        let tm = Arc::new(TxnManager::open(path_with_suffix(&base, ".xid")).unwrap());
        let dm = Arc::new(DataManager::open(&base, 64, tm).unwrap());
        let vm = Arc::new(VersionManager::new(dm.clone()));
        let tbm = TableManager::open(&base, vm, dm).unwrap();
        let xid = begin(&tbm);
        let rows = run(&tbm, xid, "select * from t").unwrap();
        assert_eq!(String::from_utf8(rows).unwrap(), "[7]\n");
        tbm.commit(xid).unwrap();
    }
}
