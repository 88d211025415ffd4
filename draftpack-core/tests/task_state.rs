use tempfile::tempdir;

use draftpack_core::{TaskPhase, TaskStateStore};

fn open_store(dir: &std::path::Path) -> TaskStateStore {
    let store = TaskStateStore::new(dir.join("tasks.db")).unwrap();
    store.initialize().unwrap();
    store
}

#[test]
fn unknown_ids_report_not_found() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    let state = store.query("dft_missing").unwrap();
    assert_eq!(state.phase, TaskPhase::NotFound);
    assert_eq!(state.percent, 0);
    assert!(state.last_modified.is_none());
}

#[test]
fn updates_overwrite_the_single_row() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    store
        .update("dft_a", TaskPhase::Initialized, 0, "queued")
        .unwrap();
    store
        .update("dft_a", TaskPhase::Processing, 40, "downloading 3/6")
        .unwrap();
    let state = store.query("dft_a").unwrap();
    assert_eq!(state.phase, TaskPhase::Processing);
    assert_eq!(state.percent, 40);
    assert_eq!(state.message, "downloading 3/6");

    store
        .update("dft_a", TaskPhase::Completed, 100, "https://signed")
        .unwrap();
    let state = store.query("dft_a").unwrap();
    assert_eq!(state.phase, TaskPhase::Completed);
    assert_eq!(state.percent, 100);
    assert!(state.phase.is_terminal());
}

#[test]
fn percent_is_clamped_to_one_hundred() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    store
        .update("dft_a", TaskPhase::Processing, 250, "overrun")
        .unwrap();
    assert_eq!(store.query("dft_a").unwrap().percent, 100);
}

#[test]
fn phase_strings_round_trip() {
    for phase in [
        TaskPhase::Initialized,
        TaskPhase::Processing,
        TaskPhase::Completed,
        TaskPhase::Failed,
        TaskPhase::NotFound,
    ] {
        assert_eq!(phase.as_str().parse::<TaskPhase>().unwrap(), phase);
    }
    assert!("bogus".parse::<TaskPhase>().is_err());
}
