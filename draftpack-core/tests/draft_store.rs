use tempfile::tempdir;

use draftpack_core::{DraftDocument, DraftError, DraftStore, Material, MediaKind, SqliteDraftStore};

fn open_store(path: &std::path::Path, capacity: usize) -> DraftStore {
    let durable = SqliteDraftStore::builder().path(path).build().unwrap();
    durable.initialize().unwrap();
    DraftStore::with_capacity(durable, capacity)
}

fn document_named(name: &str) -> DraftDocument {
    let mut document = DraftDocument::new();
    document
        .push_material(Material::new("m1", name, MediaKind::Video))
        .unwrap();
    document
}

#[test]
fn put_then_get_round_trips() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("drafts.db"), 16);

    let document = document_named("clip.mp4");
    store.put("dft_a", &document, 1080, 1920).unwrap();

    let loaded = store.get("dft_a").unwrap().unwrap();
    assert_eq!(loaded.material_by_id("m1").unwrap().material_name, "clip.mp4");
    assert!(store.exists("dft_a").unwrap());
    assert!(store.get("dft_missing").unwrap().is_none());
}

#[test]
fn invalid_ids_and_duplicate_names_are_rejected() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("drafts.db"), 16);

    let document = document_named("a.mp4");
    assert!(matches!(
        store.put("bad id!", &document, 100, 100),
        Err(DraftError::InvalidId(_))
    ));

    let mut clashing = document_named("same.mp4");
    clashing.videos.push(Material::new("m2", "same.mp4", MediaKind::Video));
    assert!(matches!(
        store.put("dft_a", &clashing, 100, 100),
        Err(DraftError::DuplicateMaterialName(_))
    ));
}

#[test]
fn eviction_follows_access_recency() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("drafts.db"), 2);

    for id in ["dft_x", "dft_y"] {
        store.put(id, &document_named("a.mp4"), 100, 100).unwrap();
    }
    // Touch x so y becomes least recently used.
    store.get("dft_x").unwrap().unwrap();
    store.put("dft_z", &document_named("b.mp4"), 100, 100).unwrap();

    assert!(store.is_cached("dft_x"));
    assert!(store.is_cached("dft_z"));
    assert!(!store.is_cached("dft_y"));

    // Evicted drafts re-hydrate from sqlite on the next read.
    assert!(store.get("dft_y").unwrap().is_some());
    assert!(store.is_cached("dft_y"));
}

#[test]
fn upsert_preserves_created_at() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("drafts.db"), 4);

    store.put("dft_a", &document_named("a.mp4"), 100, 100).unwrap();
    let first = store.durable().fetch("dft_a").unwrap().unwrap();
    store.put("dft_a", &document_named("b.mp4"), 200, 200).unwrap();
    let second = store.durable().fetch("dft_a").unwrap().unwrap();

    assert_eq!(first.created_at, second.created_at);
    assert_eq!(second.canvas_width, 200);
}

#[tokio::test]
async fn with_draft_applies_edits_under_the_draft_lock() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir.path().join("drafts.db"), 4);
    store.put("dft_a", &document_named("a.mp4"), 1080, 1920).unwrap();

    store
        .with_draft("dft_a", |document| {
            document.push_material(Material::new("m9", "extra.mp3", MediaKind::Audio))
        })
        .await
        .unwrap();

    let loaded = store.get("dft_a").unwrap().unwrap();
    assert!(loaded.material_by_id("m9").is_some());
    // Canvas dimensions survive the write-through.
    let record = store.durable().fetch("dft_a").unwrap().unwrap();
    assert_eq!((record.canvas_width, record.canvas_height), (1080, 1920));
}
