//! End-to-end scan scenarios: a real temp workspace, a real SQLite file,
//! the full watcher/scheduler/writer pipeline.

mod common;

use std::fs;
use std::time::Duration;

use codewatch::daemon::Daemon;
use codewatch::search::{self, SearchOptions, TotalMode};
use tempfile::TempDir;

const IDLE: Duration = Duration::from_secs(60);

fn opts() -> SearchOptions {
    SearchOptions { limit: 10, offset: 0, use_regex: false, snippet_lines: 5 }
}

#[test]
fn definition_ranks_above_reference() {
    let ws = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    fs::write(ws.path().join("models.py"), "class User:\n    pass\n").unwrap();
    fs::write(ws.path().join("main.py"), "from models import User\nu = User()\n").unwrap();
    fs::write(ws.path().join("README.md"), "About the User class...\n").unwrap();

    let daemon = Daemon::start(common::test_settings(ws.path(), data.path())).unwrap();
    assert!(daemon.wait_until_idle(IDLE), "pipeline did not drain");

    let result = {
        let conn = daemon.reader();
        search::search(&conn, daemon.engine().as_ref(), "User", &opts()).unwrap()
    };

    assert_eq!(result.hits.len(), 3);
    assert!(result.hits[0].path.ends_with("models.py"), "definition should rank first, got {:?}",
        result.hits.iter().map(|h| h.path.clone()).collect::<Vec<_>>());
    assert!(result.hits.iter().any(|h| h.path.ends_with("main.py")));
    assert!(result.hits.iter().any(|h| h.path.ends_with("README.md")));
    assert_eq!(result.total_mode, TotalMode::Exact);

    daemon.stop(Duration::from_secs(10));
}

#[test]
fn rename_propagates_through_rescan() {
    let ws = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    fs::write(ws.path().join("a.py"), "def old(): pass\n").unwrap();

    let daemon = Daemon::start(common::test_settings(ws.path(), data.path())).unwrap();
    assert!(daemon.wait_until_idle(IDLE));

    {
        let conn = daemon.reader();
        let hits = search::search_symbols(&conn, "old", 50, 0).unwrap();
        assert_eq!(hits.len(), 1);
    }

    fs::write(ws.path().join("a.py"), "new content without symbols\n").unwrap();
    daemon.rescan(None).unwrap();
    assert!(daemon.wait_until_idle(IDLE));

    {
        let conn = daemon.reader();
        let hits = search::search_symbols(&conn, "old", 50, 0).unwrap();
        assert_eq!(hits.len(), 0);
    }

    daemon.stop(Duration::from_secs(10));
}

#[test]
fn two_scans_converge_to_identical_row_counts() {
    let ws = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    fs::write(ws.path().join("a.py"), "def alpha():\n    beta()\n\ndef beta():\n    pass\n").unwrap();
    fs::write(ws.path().join("b.py"), "class Gamma:\n    def delta(self):\n        pass\n").unwrap();

    let daemon = Daemon::start(common::test_settings(ws.path(), data.path())).unwrap();
    assert!(daemon.wait_until_idle(IDLE));

    let counts = |daemon: &Daemon| -> (i64, i64, i64) {
        let conn = daemon.reader();
        let q = |sql: &str| conn.query_row(sql, [], |r| r.get(0)).unwrap();
        (
            q("SELECT count(*) FROM files"),
            q("SELECT count(*) FROM symbols"),
            q("SELECT count(*) FROM symbol_relations"),
        )
    };

    let first = counts(&daemon);
    assert!(first.0 >= 2 && first.1 >= 4, "expected files and symbols, got {first:?}");
    assert!(first.2 >= 1, "expected at least the alpha→beta call relation, got {first:?}");

    // The committed relations drive the caller lookup end-to-end.
    {
        let conn = daemon.reader();
        let callers = codewatch::services::get_callers(&conn, "beta").unwrap();
        assert_eq!(callers.len(), 1);
        assert_eq!(callers[0].from_symbol, "alpha");
        assert!(callers[0].from_path.ends_with("a.py"));
    }

    daemon.rescan(None).unwrap();
    assert!(daemon.wait_until_idle(IDLE));
    let second = counts(&daemon);
    assert_eq!(first, second);

    daemon.stop(Duration::from_secs(10));
}

#[test]
fn deleted_file_is_pruned_by_the_next_scan() {
    let ws = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    fs::write(ws.path().join("keep.py"), "def kept(): pass\n").unwrap();
    fs::write(ws.path().join("gone.py"), "def dropped(): pass\n").unwrap();

    let daemon = Daemon::start(common::test_settings(ws.path(), data.path())).unwrap();
    assert!(daemon.wait_until_idle(IDLE));

    fs::remove_file(ws.path().join("gone.py")).unwrap();
    // Sleep past one clock second so the rescan's scan_started_ts strictly
    // exceeds the first scan's last_seen stamps (prune is `<`, not `<=`).
    std::thread::sleep(Duration::from_millis(1500));
    daemon.rescan(None).unwrap();
    assert!(daemon.wait_until_idle(IDLE));

    {
        let conn = daemon.reader();
        let gone: i64 = conn
            .query_row("SELECT count(*) FROM files WHERE rel_path = 'gone.py'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(gone, 0);
        let kept: i64 = conn
            .query_row("SELECT count(*) FROM files WHERE rel_path = 'keep.py'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kept, 1);
        let scan_floor: i64 = conn
            .query_row("SELECT min(last_seen) FROM files", [], |r| r.get(0))
            .unwrap();
        assert!(scan_floor > 0);
    }

    daemon.stop(Duration::from_secs(10));
}
