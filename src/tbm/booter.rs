//! The boot file: 8 bytes naming the most recently created table's uid.
//!
//! Updates are atomic: the new content is written to a temp file, fsynced,
//! then renamed over the real file. A temp file left behind by a crash is
//! discarded on open.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, StratumError};
use crate::path_with_suffix;

pub const BOOTER_SUFFIX: &str = ".bt";
pub const BOOTER_TMP_SUFFIX: &str = ".bt_tmp";

pub struct Booter {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl Booter {
    pub fn create(base: &Path) -> Result<Self> {
        let booter = Self::paths(base);
        booter.remove_stale_tmp();
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&booter.path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StratumError::FileExists,
                _ => StratumError::Io(e),
            })?;
        Ok(booter)
    }

    pub fn open(base: &Path) -> Result<Self> {
        let booter = Self::paths(base);
        booter.remove_stale_tmp();
        if !booter.path.exists() {
            return Err(StratumError::FileNotExists);
        }
        Ok(booter)
    }

    fn paths(base: &Path) -> Self {
        Self {
            path: path_with_suffix(base, BOOTER_SUFFIX),
            tmp_path: path_with_suffix(base, BOOTER_TMP_SUFFIX),
        }
    }

    fn remove_stale_tmp(&self) {
        let _ = fs::remove_file(&self.tmp_path);
    }

    pub fn load(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    pub fn update(&self, data: &[u8]) -> Result<()> {
        let mut tmp = File::create(&self.tmp_path)?;
        tmp.write_all(data)?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_update_load_roundtrip() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        let booter = Booter::create(&base).unwrap();
        booter.update(&42u64.to_be_bytes()).unwrap();
        assert_eq!(booter.load().unwrap(), 42u64.to_be_bytes());

        let reopened = Booter::open(&base).unwrap();
        assert_eq!(reopened.load().unwrap(), 42u64.to_be_bytes());
    }

    #[test]
    fn stale_tmp_file_is_discarded_on_open() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        let booter = Booter::create(&base).unwrap();
        booter.update(&7u64.to_be_bytes()).unwrap();

        fs::write(path_with_suffix(&base, BOOTER_TMP_SUFFIX), b"torn").unwrap();
        let reopened = Booter::open(&base).unwrap();
        assert_eq!(reopened.load().unwrap(), 7u64.to_be_bytes());
        assert!(!path_with_suffix(&base, BOOTER_TMP_SUFFIX).exists());
    }

    #[test]
    fn double_create_fails() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("t");
        Booter::create(&base).unwrap();
        assert!(matches!(
            Booter::create(&base),
            Err(StratumError::FileExists)
        ));
    }
}
