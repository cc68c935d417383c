//! Tests for sent-ledger persistence.

use std::fs;

use tempfile::TempDir;
use vigia_core::ledger::SentLedger;

fn ledger_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("chamados_enviados.json")
}

#[test]
fn test_persist_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);

    let mut ledger = SentLedger::load(&path).unwrap();
    ledger.record(["101".to_string(), "102".to_string()]);
    ledger.persist().unwrap();

    let reloaded = SentLedger::load(&path).unwrap();
    assert_eq!(reloaded.len(), 2);
    assert!(reloaded.contains("101"));
    assert!(reloaded.contains("102"));
    assert!(!reloaded.contains("103"));
}

#[test]
fn test_missing_file_is_empty_ledger() {
    let dir = TempDir::new().unwrap();
    let ledger = SentLedger::load(ledger_path(&dir)).unwrap();
    assert!(ledger.is_empty());
}

#[test]
fn test_persist_overwrites_instead_of_appending() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);

    let mut ledger = SentLedger::load(&path).unwrap();
    ledger.record(["1".to_string()]);
    ledger.persist().unwrap();
    ledger.record(["2".to_string()]);
    ledger.persist().unwrap();
    ledger.persist().unwrap();

    // Repeated persists must not grow the file.
    let raw: Vec<String> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw, vec!["1".to_string(), "2".to_string()]);
}

#[test]
fn test_legacy_duplicates_collapse_on_load() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);
    fs::write(&path, r#"["7", "8", "7", "7"]"#).unwrap();

    let ledger = SentLedger::load(&path).unwrap();
    assert_eq!(ledger.len(), 2);
    assert!(ledger.contains("7"));
    assert!(ledger.contains("8"));

    // Persisting writes the collapsed set back.
    ledger.persist().unwrap();
    let raw: Vec<String> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw, vec!["7".to_string(), "8".to_string()]);
}

#[test]
fn test_file_is_readable_utf8() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);

    let mut ledger = SentLedger::load(&path).unwrap();
    ledger.record(["Impressão sem tinta".to_string()]);
    ledger.persist().unwrap();

    // Human-readable: indented, and non-ASCII stays literal instead of
    // \u-escaped.
    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("Impressão sem tinta"));
    assert!(raw.contains('\n'));
}

#[test]
fn test_second_run_skips_already_sent() {
    let dir = TempDir::new().unwrap();
    let path = ledger_path(&dir);

    // First run notifies ticket 55 and persists.
    let mut first_run = SentLedger::load(&path).unwrap();
    assert!(!first_run.contains("55"));
    first_run.record(["55".to_string()]);
    first_run.persist().unwrap();

    // Second process run sees it as already sent.
    let second_run = SentLedger::load(&path).unwrap();
    assert!(second_run.contains("55"));
}

#[test]
fn test_failed_persist_keeps_memory_state() {
    let dir = TempDir::new().unwrap();

    // Point the ledger at a path that cannot be written (it is a
    // directory).
    let mut ledger = SentLedger::load(dir.path().join("blocked")).unwrap();
    fs::create_dir(dir.path().join("blocked")).unwrap();
    ledger.record(["9".to_string()]);

    assert!(ledger.persist().is_err());
    assert!(ledger.contains("9"));
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_creates_parent_directory_on_persist() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("chamados_enviados.json");

    let mut ledger = SentLedger::load(&path).unwrap();
    ledger.record(["1".to_string()]);
    ledger.persist().unwrap();

    assert!(path.exists());
}
