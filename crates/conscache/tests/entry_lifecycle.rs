use conscache::{CacheConfig, CacheError, ConsensusCache, Labels, StorageError};

fn config(tmp: &tempfile::TempDir) -> CacheConfig {
    CacheConfig {
        data_dir_override: Some(tmp.path().to_path_buf()),
    }
}

fn labels(flavor: &str) -> Labels {
    [("type", "consensus"), ("flavor", flavor)]
        .into_iter()
        .collect()
}

#[test]
fn refcount_tracks_holders_exactly() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cache = ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap();
    let entry = cache.add(&labels("ns"), b"body").unwrap();
    assert_eq!(entry.refcount(), 1);

    let held: Vec<_> = (0..7).map(|_| entry.incref()).collect();
    let entry = &cache.entries()[0];
    assert_eq!(entry.refcount(), 8);

    let mut held = held.into_iter();
    for _ in 0..3 {
        held.next().unwrap().decref();
    }
    assert_eq!(entry.refcount(), 5);

    drop(held);
    assert_eq!(entry.refcount(), 1);
}

#[test]
fn body_is_mapped_once_and_stays_put() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cache = ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap();
    let entry = cache
        .add(&labels("ns"), b"network-status-version 3\n")
        .unwrap()
        .incref();
    assert!(!entry.is_mapped());

    let first = entry.get_body().unwrap();
    assert!(entry.is_mapped());
    let second = entry.get_body().unwrap();
    assert_eq!(first, b"network-status-version 3\n");
    assert_eq!(first.as_ptr(), second.as_ptr());
    assert_eq!(first.len(), second.len());

    // Other holders share the same mapping.
    let other = entry.incref();
    assert_eq!(other.get_body().unwrap().as_ptr(), first.as_ptr());
}

#[test]
fn missing_file_is_a_mapping_failure_but_labels_still_work() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cache = ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap();
    let entry = cache.add(&labels("ns"), b"body").unwrap().incref();

    std::fs::remove_file(cache.path().join(entry.filename())).unwrap();

    let err = entry.get_body().unwrap_err();
    assert!(err.is_mapping_failure());
    match err {
        CacheError::Map { filename, source } => {
            assert_eq!(filename, entry.filename());
            match source {
                StorageError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::NotFound),
                other => panic!("unexpected storage error: {other:?}"),
            }
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(!entry.is_mapped());
    assert_eq!(entry.get_value("flavor"), Some("ns"));
    assert!(cache.find_first("flavor", "ns").unwrap().ptr_eq(&entry));
    // Still failing on retry.
    assert!(entry.get_body().is_err());
}

#[test]
fn closing_the_cache_orphans_held_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cache = ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap();
    let unmapped = cache.add(&labels("ns"), b"unmapped").unwrap().incref();
    let mapped = cache.add(&labels("microdesc"), b"mapped").unwrap().incref();
    cache.add(&labels("bridge"), b"released").unwrap();

    let mapped_ptr = mapped.get_body().unwrap().as_ptr();
    assert_eq!(unmapped.refcount(), 2);

    cache.close();

    // The cache's units are gone; ours remain.
    assert_eq!(unmapped.refcount(), 1);
    assert_eq!(mapped.refcount(), 1);
    assert!(unmapped.is_orphaned());

    // Labels stay readable.
    assert_eq!(unmapped.get_value("flavor"), Some("ns"));
    assert_eq!(unmapped.get_labels().len(), 2);

    // No mapping yet and no cache to map through.
    match unmapped.get_body().unwrap_err() {
        CacheError::Orphaned { filename } => assert_eq!(filename, unmapped.filename()),
        other => panic!("unexpected error: {other:?}"),
    }

    // An established mapping outlives the cache.
    let body = mapped.get_body().unwrap();
    assert_eq!(body, b"mapped");
    assert_eq!(body.as_ptr(), mapped_ptr);
}

#[test]
fn closing_the_cache_unbinds_the_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap();
    match ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap_err() {
        CacheError::Storage(StorageError::Locked(_)) => {}
        other => panic!("unexpected error: {other:?}"),
    }

    drop(cache);
    ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap();
}

#[test]
fn delete_pending_only_removes_unheld_marked_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cache = ConsensusCache::open_with_config(&config(&tmp), "c", 0).unwrap();

    let keep = cache.add(&labels("ns"), b"keep").unwrap().filename().to_owned();
    let marked = cache.add(&labels("microdesc"), b"marked").unwrap();
    marked.mark_for_removal();
    let marked = marked.filename().to_owned();
    let held = cache.add(&labels("bridge"), b"held").unwrap().incref();
    held.mark_for_removal();
    held.mark_for_removal();

    // Marking alone changes nothing on disk or in the index.
    assert_eq!(cache.len(), 3);
    assert!(cache.path().join(&marked).is_file());

    assert_eq!(cache.delete_pending(), 1);
    assert_eq!(cache.len(), 2);
    assert!(cache.path().join(&keep).is_file());
    assert!(!cache.path().join(&marked).exists());
    assert!(cache.path().join(held.filename()).is_file());
    assert!(cache.find_first("flavor", "microdesc").is_none());

    // Once the last outside holder lets go, the next pass deletes it.
    let held_name = held.filename().to_owned();
    held.decref();
    assert_eq!(cache.delete_pending(), 1);
    assert!(!cache.path().join(&held_name).exists());
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.entries()[0].filename(), keep);
}
