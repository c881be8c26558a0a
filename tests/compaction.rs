//! Region rotation and the compactor: space reclamation, live-set
//! preservation, and the GC state machine.

use std::time::Duration;

use tempfile::tempdir;

use ridgedb::{Binary, GcState, Options, Store, StoreError, Text};

fn region_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != "index.rdb" && name.ends_with(".rdb"))
        .collect();
    names.sort();
    names
}

fn data_bytes(dir: &std::path::Path) -> u64 {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().metadata().unwrap().len())
        .sum()
}

#[test]
fn writes_rotate_regions_at_the_threshold() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        Options::new(dir.path())
            .gc_enabled(false)
            .rotation_threshold_bytes(1 << 20),
    )
    .unwrap();

    let value = Binary::new(vec![7u8; 1024]);
    for i in 0..10_000 {
        store.put(&format!("key-{i:05}"), &value.clone().into(), 0).unwrap();
    }

    let regions = region_files(dir.path());
    assert!(
        regions.len() >= 9,
        "expected at least 9 regions, found {}",
        regions.len()
    );
    assert_eq!(store.key_count(), 10_000);

    for i in 0..10_000 {
        assert!(store.get(&format!("key-{i:05}")).is_ok(), "key-{i:05} lost");
    }
}

#[test]
fn rotation_resets_the_active_region() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        Options::new(dir.path())
            .gc_enabled(false)
            .rotation_threshold_bytes(128),
    )
    .unwrap();

    store.put("a", &Binary::new(vec![1u8; 128]).into(), 0).unwrap();

    let regions = region_files(dir.path());
    assert_eq!(regions, vec!["00000001.rdb", "00000002.rdb"]);

    // The write crossed the threshold, so a fresh active region exists and
    // holds nothing but its magic header.
    let active = dir.path().join("00000002.rdb");
    assert_eq!(std::fs::metadata(active).unwrap().len(), 4);

    // The rotated-out record is still readable.
    assert!(store.get("a").is_ok());
}

#[test]
fn compaction_reclaims_dead_regions_and_preserves_the_live_set() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        Options::new(dir.path())
            .gc_enabled(false)
            .rotation_threshold_bytes(8 * 1024),
    )
    .unwrap();

    let value = Binary::new(vec![3u8; 512]);
    for i in 0..100 {
        store.put(&format!("key-{i:03}"), &value.clone().into(), 0).unwrap();
    }
    let regions_before = region_files(dir.path());
    assert!(regions_before.len() >= 6, "setup needs several regions");

    // Overwrite the older keys so the early regions are mostly dead.
    for i in 0..60 {
        store
            .put(&format!("key-{i:03}"), &Binary::new(vec![9u8; 512]).into(), 0)
            .unwrap();
    }
    let count_before = store.key_count();
    let bytes_before = data_bytes(dir.path());
    let region_count_before = region_files(dir.path()).len();

    store.compact_now().unwrap();

    let regions_after = region_files(dir.path());
    assert!(
        regions_after.len() < region_count_before,
        "compaction removed no region"
    );
    // The oldest region is always in the dirty set and must be gone.
    assert!(!regions_after.contains(&"00000001.rdb".to_string()));

    assert_eq!(store.key_count(), count_before);
    assert!(data_bytes(dir.path()) <= bytes_before);

    for i in 0..100 {
        let doc = store.get(&format!("key-{i:03}")).unwrap().into_binary().unwrap();
        let expected = if i < 60 { 9u8 } else { 3u8 };
        assert_eq!(doc.bytes, vec![expected; 512], "key-{i:03} has wrong bytes");
    }
}

#[test]
fn compaction_survives_a_restart() {
    let dir = tempdir().unwrap();
    {
        let store = Store::open(
            Options::new(dir.path())
                .gc_enabled(false)
                .rotation_threshold_bytes(4 * 1024),
        )
        .unwrap();
        for i in 0..50 {
            store
                .put(&format!("key-{i:02}"), &Binary::new(vec![1u8; 256]).into(), 0)
                .unwrap();
        }
        for i in 0..30 {
            store
                .put(&format!("key-{i:02}"), &Binary::new(vec![2u8; 256]).into(), 0)
                .unwrap();
        }
        store.compact_now().unwrap();
        store.close().unwrap();
    }

    let store = Store::open(Options::new(dir.path()).gc_enabled(false)).unwrap();
    assert_eq!(store.key_count(), 50);
    for i in 0..50 {
        let doc = store.get(&format!("key-{i:02}")).unwrap().into_binary().unwrap();
        let expected = if i < 30 { 2u8 } else { 1u8 };
        assert_eq!(doc.bytes, vec![expected; 256]);
    }
}

#[test]
fn compaction_is_a_noop_below_the_region_minimum() {
    let dir = tempdir().unwrap();
    let store = Store::open(quiet(dir.path())).unwrap();

    store.put("a", &Text::new("1").into(), 0).unwrap();
    store.put("a", &Text::new("2").into(), 0).unwrap();

    let regions_before = region_files(dir.path());
    store.compact_now().unwrap();
    assert_eq!(region_files(dir.path()), regions_before);
    assert_eq!(store.get("a").unwrap().into_text().unwrap().as_str(), "2");
}

#[test]
fn compaction_drops_deleted_records() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        Options::new(dir.path())
            .gc_enabled(false)
            .gc_min_regions(2)
            .rotation_threshold_bytes(2 * 1024),
    )
    .unwrap();

    for i in 0..40 {
        store
            .put(&format!("dead-{i:02}"), &Binary::new(vec![0u8; 128]).into(), 0)
            .unwrap();
    }
    for i in 0..40 {
        store.delete(&format!("dead-{i:02}")).unwrap();
    }
    store.put("alive", &Text::new("still here").into(), 0).unwrap();

    let bytes_before = data_bytes(dir.path());
    store.compact_now().unwrap();

    assert!(data_bytes(dir.path()) < bytes_before);
    assert_eq!(store.key_count(), 1);
    assert_eq!(
        store.get("alive").unwrap().into_text().unwrap().as_str(),
        "still here"
    );
    assert!(matches!(store.get("dead-00"), Err(StoreError::NotFound)));
}

#[test]
fn gc_state_machine_transitions() {
    let dir = tempdir().unwrap();
    let store = Store::open(quiet(dir.path())).unwrap();

    assert_eq!(store.gc_state(), GcState::Init);

    store.start_gc(Duration::from_secs(3600)).unwrap();
    assert_eq!(store.gc_state(), GcState::Stopped);

    // Idempotent once started.
    store.start_gc(Duration::from_secs(1)).unwrap();
    assert_eq!(store.gc_state(), GcState::Stopped);

    store.stop_gc();
    assert_eq!(store.gc_state(), GcState::Init);

    // Stop is also safe to repeat.
    store.stop_gc();
    assert_eq!(store.gc_state(), GcState::Init);
}

#[test]
fn gc_starts_automatically_when_enabled() {
    let dir = tempdir().unwrap();
    let store = Store::open(Options::new(dir.path()).gc_period_secs(3600)).unwrap();
    assert_ne!(store.gc_state(), GcState::Init);
    store.close().unwrap();
    assert_eq!(store.gc_state(), GcState::Init);
}

#[test]
fn timed_gc_pass_runs_and_returns_to_stopped() {
    let dir = tempdir().unwrap();
    let store = Store::open(
        Options::new(dir.path())
            .gc_enabled(false)
            .gc_min_regions(2)
            .rotation_threshold_bytes(2 * 1024),
    )
    .unwrap();

    for i in 0..40 {
        store
            .put(&format!("key-{i:02}"), &Binary::new(vec![1u8; 128]).into(), 0)
            .unwrap();
    }
    for i in 0..40 {
        store
            .put(&format!("key-{i:02}"), &Binary::new(vec![2u8; 128]).into(), 0)
            .unwrap();
    }
    let regions_before = region_files(dir.path()).len();

    store.start_gc(Duration::from_secs(1)).unwrap();
    std::thread::sleep(Duration::from_millis(2500));
    store.stop_gc();

    assert_eq!(store.gc_state(), GcState::Init);
    assert!(region_files(dir.path()).len() < regions_before);
    assert_eq!(store.key_count(), 40);
}

fn quiet(path: &std::path::Path) -> Options {
    Options::new(path).gc_enabled(false)
}
