use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StratumError>;

/// Every failure the engine can surface, as one closed enumeration.
///
/// The fatal class (`BadLogFile`, `BadXidFile`, the file-open failures and
/// `MemTooSmall`) is only ever produced at init time; the launcher logs it
/// and terminates. Everything else crosses layer boundaries as a value and
/// reaches the client as a type-1 wire frame.
#[derive(Debug, Error)]
pub enum StratumError {
    #[error("I/O: {0}")]
    Io(#[from] io::Error),

    #[error("cache is full")]
    CacheFull,
    #[error("file already exists")]
    FileExists,
    #[error("file does not exist")]
    FileNotExists,
    #[error("file cannot be read or written")]
    FileCannotRw,

    #[error("bad log file")]
    BadLogFile,
    #[error("memory too small")]
    MemTooSmall,
    #[error("data too large")]
    DataTooLarge,
    #[error("database is busy")]
    DatabaseBusy,

    #[error("bad xid file")]
    BadXidFile,

    #[error("deadlock")]
    Deadlock,
    #[error("concurrent update issue")]
    ConcurrentUpdate,
    #[error("null entry")]
    NullEntry,

    #[error("invalid field type")]
    InvalidField,
    #[error("field not found")]
    FieldNotFound,
    #[error("field not indexed")]
    FieldNotIndexed,
    #[error("invalid logic operation")]
    InvalidLogOp,
    #[error("invalid values")]
    InvalidValues,
    #[error("duplicated table")]
    DuplicatedTable,
    #[error("table not found")]
    TableNotFound,
    #[error("table has no index")]
    TableNoIndex,

    #[error("invalid command")]
    InvalidCommand,
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    #[error("invalid package data")]
    InvalidPkgData,

    #[error("nested transaction not supported")]
    NestedTransaction,
    #[error("not in transaction")]
    NoTransaction,

    #[error("invalid memory size")]
    InvalidMem,
}

impl StratumError {
    /// True for errors that should terminate the process at init time.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StratumError::BadLogFile
                | StratumError::BadXidFile
                | StratumError::FileExists
                | StratumError::FileNotExists
                | StratumError::FileCannotRw
                | StratumError::MemTooSmall
        )
    }
}
