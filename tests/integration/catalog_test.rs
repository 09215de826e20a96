use std::fs;
use std::thread;
use std::time::Duration;

use etwdeck::core::catalog::TraceCatalog;
use etwdeck::error::EtwError;
use tempfile::TempDir;

use super::support::write_trace;

#[test]
fn test_list_traces_most_recent_first() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());

    write_trace(temp.path(), "2024-01-01_10-00-00_a", 10);
    thread::sleep(Duration::from_millis(20));
    write_trace(temp.path(), "2024-01-01_11-00-00_b", 10);
    fs::write(temp.path().join("2024-01-01_11-00-00_b.txt"), "notes").unwrap();
    fs::write(temp.path().join("unrelated.log"), "x").unwrap();

    assert_eq!(
        catalog.list_traces().unwrap(),
        vec!["2024-01-01_11-00-00_b", "2024-01-01_10-00-00_a"]
    );
}

#[test]
fn test_list_reflects_disk_without_caching() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    assert!(catalog.list_traces().unwrap().is_empty());

    write_trace(temp.path(), "t", 1);
    assert_eq!(catalog.list_traces().unwrap(), vec!["t"]);

    fs::remove_file(temp.path().join("t.etl")).unwrap();
    assert!(catalog.list_traces().unwrap().is_empty());
}

#[test]
fn test_entries_carry_size_and_notes_path() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    write_trace(temp.path(), "sized", 42);

    let entries = catalog.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].size, 42);
    assert_eq!(entries[0].notes_path, temp.path().join("sized.txt"));
    assert!(entries[0].created.is_some());
}

#[test]
fn test_rename_keeps_prefix_and_moves_sidecars() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    write_trace(temp.path(), "2015-03-21_08-52-11_Bruce", 10);
    fs::write(temp.path().join("2015-03-21_08-52-11_Bruce.txt"), "slow scroll").unwrap();
    fs::write(temp.path().join("2015-03-21_08-52-11_Bruce.flame.svg"), "<svg/>").unwrap();

    let renamed = catalog
        .rename_trace("2015-03-21_08-52-11_Bruce", "NewName", false)
        .unwrap();
    assert_eq!(renamed, "2015-03-21_08-52-11_NewName");

    assert!(catalog.contains("2015-03-21_08-52-11_NewName"));
    assert!(!catalog.contains("2015-03-21_08-52-11_Bruce"));
    assert_eq!(
        fs::read_to_string(temp.path().join("2015-03-21_08-52-11_NewName.txt")).unwrap(),
        "slow scroll"
    );
    assert!(temp
        .path()
        .join("2015-03-21_08-52-11_NewName.flame.svg")
        .exists());
    assert!(!temp.path().join("2015-03-21_08-52-11_Bruce.txt").exists());
}

#[test]
fn test_full_rename() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    write_trace(temp.path(), "2015-03-21_08-52-11_Bruce", 10);

    let renamed = catalog
        .rename_trace("2015-03-21_08-52-11_Bruce", "jank repro", true)
        .unwrap();
    assert_eq!(renamed, "jank repro");
    assert_eq!(catalog.list_traces().unwrap(), vec!["jank repro"]);
}

#[test]
fn test_rename_collision_is_invalid_name() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    write_trace(temp.path(), "2015-03-21_08-52-11_a", 10);
    write_trace(temp.path(), "2015-03-21_08-52-11_b", 10);

    let err = catalog
        .rename_trace("2015-03-21_08-52-11_a", "b", false)
        .unwrap_err();
    assert!(matches!(err, EtwError::InvalidName(_)));
    assert_eq!(catalog.list_traces().unwrap().len(), 2);
}

#[test]
fn test_rename_rejects_separators() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    write_trace(temp.path(), "t", 10);

    for bad in ["../escape", "a\\b", ""] {
        let err = catalog.rename_trace("t", bad, true).unwrap_err();
        assert!(matches!(err, EtwError::InvalidName(_)), "{bad:?}");
    }
    assert!(catalog.contains("t"));
}

#[test]
fn test_rename_missing_is_not_found() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    assert!(matches!(
        catalog.rename_trace("ghost", "x", false),
        Err(EtwError::NotFound(_))
    ));
}

#[test]
fn test_delete_removes_trace_and_notes() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    write_trace(temp.path(), "doomed", 10);
    fs::write(temp.path().join("doomed.txt"), "bye").unwrap();
    write_trace(temp.path(), "kept", 10);

    catalog.delete_trace("doomed").unwrap();
    assert_eq!(catalog.list_traces().unwrap(), vec!["kept"]);
    assert!(!temp.path().join("doomed.txt").exists());
}

#[test]
fn test_delete_missing_leaves_catalog_unchanged() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());
    write_trace(temp.path(), "kept", 10);

    assert!(matches!(
        catalog.delete_trace("ghost"),
        Err(EtwError::NotFound(_))
    ));
    assert_eq!(catalog.list_traces().unwrap(), vec!["kept"]);
}

#[test]
fn test_order_follows_name_timestamp_not_file_time() {
    let temp = TempDir::new().unwrap();
    let catalog = TraceCatalog::new(temp.path());

    write_trace(temp.path(), "2015-03-22_08-52-11_new", 10);
    thread::sleep(Duration::from_millis(20));
    // Rewritten later, as compression does
    write_trace(temp.path(), "2015-03-21_08-52-11_old", 5);

    assert_eq!(
        catalog.list_traces().unwrap(),
        vec!["2015-03-22_08-52-11_new", "2015-03-21_08-52-11_old"]
    );
}
