//! Connection management and the cross-process advisory lock
//! (`fs2::FileExt` over a `.write.lock` file beside the database), so two
//! daemons sharing one index directory cannot corrupt each other.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rusqlite::Connection;

use crate::error::{CoreError, CoreResult};

/// Held for the process lifetime; dropping it releases the flock.
pub struct WriteLock {
    _file: File,
}

impl WriteLock {
    pub fn acquire(db_path: &Path) -> CoreResult<Self> {
        let lock_path = lock_path_for(db_path);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| CoreError::Io { path: lock_path.clone(), source: e })?;
        file.try_lock_exclusive().map_err(|_| CoreError::WriterLockHeld {
            path: lock_path.clone(),
        })?;
        Ok(Self { _file: file })
    }
}

fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_os_string();
    s.push(".write.lock");
    PathBuf::from(s)
}

pub fn open_writer(db_path: &Path) -> CoreResult<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CoreError::Io { path: parent.to_path_buf(), source: e })?;
    }
    let conn = Connection::open(db_path).map_err(CoreError::Sql)?;
    super::schema::apply(&conn).map_err(CoreError::Sql)?;
    Ok(conn)
}

/// A second, read-only connection so queries can proceed concurrently with
/// the writer under SQLite's WAL MVCC guarantees.
pub fn open_reader(db_path: &Path) -> CoreResult<Connection> {
    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(CoreError::Sql)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_writer_creates_schema() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("index.db");
        let conn = open_writer(&db_path).unwrap();
        let v: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap();
        assert_eq!(v, super::super::schema::SCHEMA_VERSION);
    }

    #[test]
    fn write_lock_rejects_second_holder() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("index.db");
        let _lock1 = WriteLock::acquire(&db_path).unwrap();
        assert!(WriteLock::acquire(&db_path).is_err());
    }
}
