//! Per-connection statement execution.
//!
//! Each session holds at most one open transaction. Statements outside an
//! explicit transaction run inside an implicit one that commits on success
//! and aborts on error. A session dropped with a transaction still open
//! aborts it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Result, StratumError};
use crate::sql::{self, ast, Statement};
use crate::tbm::TableManager;
use crate::types::Xid;
use crate::vm::IsolationLevel;

pub struct Session {
    tbm: Arc<TableManager>,
    xid: Option<Xid>,
}

impl Session {
    pub fn new(tbm: Arc<TableManager>) -> Self {
        Self { tbm, xid: None }
    }

    pub fn execute(&mut self, statement: &[u8]) -> Result<Vec<u8>> {
        debug!(sql = %String::from_utf8_lossy(statement), "session.execute");
        match sql::parse(statement)? {
            Statement::Begin(stmt) => {
                if self.xid.is_some() {
                    return Err(StratumError::NestedTransaction);
                }
                let (xid, result) = self.tbm.begin(&stmt)?;
                self.xid = Some(xid);
                Ok(result)
            }
            Statement::Commit => {
                let xid = self.xid.ok_or(StratumError::NoTransaction)?;
                let result = self.tbm.commit(xid)?;
                self.xid = None;
                Ok(result)
            }
            Statement::Abort => {
                let xid = self.xid.ok_or(StratumError::NoTransaction)?;
                let result = self.tbm.abort(xid)?;
                self.xid = None;
                Ok(result)
            }
            other => self.execute_dml(other),
        }
    }

    fn execute_dml(&mut self, stmt: Statement) -> Result<Vec<u8>> {
        let implicit = self.xid.is_none();
        let xid = match self.xid {
            Some(xid) => xid,
            None => {
                let (xid, _) = self.tbm.begin(&ast::Begin {
                    level: IsolationLevel::ReadCommitted,
                })?;
                xid
            }
        };

        let result = match &stmt {
            Statement::Show => self.tbm.show(xid),
            Statement::Create(stmt) => self.tbm.create_table(xid, stmt),
            Statement::Drop(stmt) => self.tbm.drop_table(xid, stmt),
            Statement::Insert(stmt) => self.tbm.insert(xid, stmt),
            Statement::Select(stmt) => self.tbm.select(xid, stmt),
            Statement::Update(stmt) => self.tbm.update(xid, stmt),
            Statement::Delete(stmt) => self.tbm.delete(xid, stmt),
            Statement::Begin(_) | Statement::Commit | Statement::Abort => unreachable!(),
        };

        if implicit {
            if result.is_ok() {
                self.tbm.commit(xid)?;
            } else {
                let _ = self.tbm.abort(xid);
            }
        }
        result
    }

    /// Rolls back a transaction abandoned by a disconnecting client.
    pub fn close(&mut self) {
        if let Some(xid) = self.xid.take() {
            warn!(xid = xid.0, "session closed with open transaction, aborting");
            let _ = self.tbm.abort(xid);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dm::DataManager;
    use crate::path_with_suffix;
    use crate::tm::TxnManager;
    use crate::vm::VersionManager;
    use tempfile::tempdir;

    fn stack(dir: &tempfile::TempDir) -> Arc<TableManager> {
        let base = dir.path().join("t");
        let tm = Arc::new(TxnManager::create(path_with_suffix(&base, ".xid")).unwrap());
        let dm = Arc::new(DataManager::create(&base, 64, tm).unwrap());
        let vm = Arc::new(VersionManager::new(dm.clone()));
        Arc::new(TableManager::create(&base, vm, dm).unwrap())
    }

    #[test]
    fn implicit_transactions_autocommit() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let mut session = Session::new(Arc::clone(&tbm));

        session
            .execute(b"create table t id int32 (index id)")
            .unwrap();
        session.execute(b"insert into t values 4").unwrap();

        // A second session sees the committed row right away.
        let mut other = Session::new(tbm);
        let rows = other.execute(b"select * from t").unwrap();
        assert_eq!(rows, b"[4]\n");
    }

    #[test]
    fn explicit_transaction_spans_statements() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let mut session = Session::new(Arc::clone(&tbm));
        session
            .execute(b"create table t id int32 (index id)")
            .unwrap();

        assert_eq!(session.execute(b"begin").unwrap(), b"begin");
        session.execute(b"insert into t values 9").unwrap();

        let mut other = Session::new(Arc::clone(&tbm));
        assert_eq!(other.execute(b"select * from t").unwrap(), b"");

        assert_eq!(session.execute(b"commit").unwrap(), b"commit");
        assert_eq!(other.execute(b"select * from t").unwrap(), b"[9]\n");
    }

    #[test]
    fn nested_begin_and_stray_commit_are_errors() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let mut session = Session::new(tbm);
        assert!(matches!(
            session.execute(b"commit"),
            Err(StratumError::NoTransaction)
        ));
        session.execute(b"begin").unwrap();
        assert!(matches!(
            session.execute(b"begin"),
            Err(StratumError::NestedTransaction)
        ));
        session.execute(b"abort").unwrap();
    }

    #[test]
    fn dropped_session_aborts_its_transaction() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let mut setup = Session::new(Arc::clone(&tbm));
        setup
            .execute(b"create table t id int32 (index id)")
            .unwrap();

        {
            let mut session = Session::new(Arc::clone(&tbm));
            session.execute(b"begin").unwrap();
            session.execute(b"insert into t values 1").unwrap();
        }

        let mut reader = Session::new(tbm);
        assert_eq!(reader.execute(b"select * from t").unwrap(), b"");
    }

    #[test]
    fn failed_implicit_statement_rolls_back() {
        let dir = tempdir().unwrap();
        let tbm = stack(&dir);
        let mut session = Session::new(tbm);
        session
            .execute(b"create table t id int32 (index id)")
            .unwrap();
        // Wrong arity: the implicit transaction aborts, nothing sticks.
        assert!(session.execute(b"insert into t values 1 2").is_err());
        assert_eq!(session.execute(b"select * from t").unwrap(), b"");
    }
}
