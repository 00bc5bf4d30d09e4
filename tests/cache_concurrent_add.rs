// Several writers race to add the same key; exactly one wins and every loser gets
// AlreadyExists without disturbing the winner's payload.

use std::fs;
use std::sync::Barrier;
use std::thread;

use pog_cache::{CacheError, SharedFileCache, SourcePackageMetadata, TmpDirectory};
use tempfile::tempdir;

const KEY: &str = "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08";

#[test]
fn concurrent_add_has_exactly_one_winner() {
    let td = tempdir().unwrap();
    let cache = SharedFileCache::new(td.path().join("cache"), TmpDirectory::new(td.path().join("tmp")));
    cache.create_dirs().unwrap();

    const WRITERS: usize = 8;
    let barrier = Barrier::new(WRITERS);

    let results: Vec<Result<String, CacheError>> = thread::scope(|s| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|i| {
                let cache = &cache;
                let barrier = &barrier;
                s.spawn(move || {
                    let staging = cache.tmp_directory().temporary_path();
                    fs::create_dir_all(&staging).unwrap();
                    fs::write(staging.join("setup.exe"), b"test").unwrap();
                    let consumer = SourcePackageMetadata::new(format!("Writer{i}"));
                    let entry = cache.prepare_new_entry(&staging, &consumer).unwrap();

                    barrier.wait();
                    cache
                        .add_entry_locked(KEY, &entry)
                        .map(|lock| fs::read_to_string(lock.path()).unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter(|r| r.is_ok()).collect();
    assert_eq!(winners.len(), 1, "results: {results:?}");
    assert_eq!(winners[0].as_ref().unwrap(), "test");
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(r, Err(CacheError::AlreadyExists(k)) if k == KEY), "got {r:?}");
    }

    let payload = cache.path().join(KEY).join("setup.exe");
    assert_eq!(fs::read(payload).unwrap(), b"test");
}
