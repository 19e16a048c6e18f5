//! Server launcher.
//!
//! `stratumd -create <dbpath>` initialises a fresh database and exits;
//! `stratumd -open <dbpath> [-mem <N>{KB|MB|GB}]` opens it (recovering if
//! needed) and serves the wire protocol on port 9999.

use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

use tracing::error;

use stratum::dm::DataManager;
use stratum::error::{Result, StratumError};
use stratum::path_with_suffix;
use stratum::server::{Server, DEFAULT_PORT};
use stratum::tbm::TableManager;
use stratum::tm::{TxnManager, XID_SUFFIX};
use stratum::types::PAGE_SIZE;
use stratum::vm::VersionManager;

const DEFAULT_MEM: u64 = 64 << 20;

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;

fn usage() -> ! {
    eprintln!("usage:");
    eprintln!("    stratumd -create <dbpath>");
    eprintln!("    stratumd -open <dbpath> [-mem <N>{{KB|MB|GB}}]");
    process::exit(1);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let outcome = match args.first().map(String::as_str) {
        Some("-create") if args.len() == 2 => create_db(Path::new(&args[1])),
        Some("-open") => {
            let mem = match args.len() {
                2 => Ok(DEFAULT_MEM),
                4 if args[2] == "-mem" => parse_mem(&args[3]),
                _ => usage(),
            };
            match mem {
                Ok(mem) => open_db(Path::new(&args[1]), mem),
                Err(err) => Err(err),
            }
        }
        _ => usage(),
    };

    if let Err(err) = outcome {
        error!(%err, "fatal");
        process::exit(1);
    }
}

/// Memory sizes read like `64MB`; anything else is `InvalidMem`.
fn parse_mem(arg: &str) -> Result<u64> {
    if arg.len() < 3 {
        return Err(StratumError::InvalidMem);
    }
    let (number, unit) = arg.split_at(arg.len() - 2);
    let number: u64 = number.parse().map_err(|_| StratumError::InvalidMem)?;
    match unit {
        "KB" => Ok(number * KB),
        "MB" => Ok(number * MB),
        "GB" => Ok(number * GB),
        _ => Err(StratumError::InvalidMem),
    }
}

fn pages_for(mem: u64) -> usize {
    (mem / PAGE_SIZE as u64) as usize
}

fn create_db(base: &Path) -> Result<()> {
    let tm = Arc::new(TxnManager::create(path_with_suffix(base, XID_SUFFIX))?);
    let dm = Arc::new(DataManager::create(base, pages_for(DEFAULT_MEM), Arc::clone(&tm))?);
    let vm = Arc::new(VersionManager::new(Arc::clone(&dm)));
    let tbm = TableManager::create(base, vm, Arc::clone(&dm))?;

    tbm.close();
    dm.close()?;
    tm.close()?;
    Ok(())
}

fn open_db(base: &Path, mem: u64) -> Result<()> {
    let tm = Arc::new(TxnManager::open(path_with_suffix(base, XID_SUFFIX))?);
    let dm = Arc::new(DataManager::open(base, pages_for(mem), Arc::clone(&tm))?);
    let vm = Arc::new(VersionManager::new(Arc::clone(&dm)));
    let tbm = Arc::new(TableManager::open(base, vm, Arc::clone(&dm))?);

    Server::bind(DEFAULT_PORT, tbm)?.serve()
}
