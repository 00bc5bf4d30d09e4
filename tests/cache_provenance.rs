// Provenance log: one record per distinct consumer; repeat uses only refresh mtime.

use std::fs;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use pog_cache::{SharedFileCache, SourcePackageMetadata, TmpDirectory, METADATA_FILE_NAME};
use tempfile::tempdir;

fn foo() -> SourcePackageMetadata {
    SourcePackageMetadata::new("Foo").with_manifest(Some("foo".into()), Some("1.0".into()))
}

#[test]
fn repeated_use_refreshes_last_use_without_duplicating() {
    let td = tempdir().unwrap();
    let cache = SharedFileCache::new(td.path().join("cache"), TmpDirectory::new(td.path().join("tmp")));
    cache.create_dirs().unwrap();

    let staging = cache.tmp_directory().temporary_path();
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("foo.zip"), b"foo").unwrap();
    let entry = cache.prepare_new_entry(&staging, &foo()).unwrap();
    cache.add_entry_locked("FOO", &entry).unwrap().unlock();

    let log = cache.path().join("FOO").join(METADATA_FILE_NAME);
    let week_ago = SystemTime::now() - Duration::from_secs(7 * 24 * 3600);
    filetime::set_file_mtime(&log, FileTime::from_system_time(week_ago)).unwrap();
    let before = fs::read(&log).unwrap();

    cache.get_entry_locked("FOO", &foo()).unwrap().unwrap().unlock();

    assert_eq!(fs::read(&log).unwrap(), before, "the same consumer must not be appended twice");
    let mtime = fs::metadata(&log).unwrap().modified().unwrap();
    assert!(mtime > week_ago + Duration::from_secs(24 * 3600), "last use time was not refreshed");

    let listed = cache.enumerate_entries(|e| panic!("{e}")).unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].last_use_time > week_ago + Duration::from_secs(24 * 3600));
}

#[test]
fn new_consumer_is_appended_on_its_own_line() {
    let td = tempdir().unwrap();
    let cache = SharedFileCache::new(td.path().join("cache"), TmpDirectory::new(td.path().join("tmp")));
    cache.create_dirs().unwrap();

    let staging = cache.tmp_directory().temporary_path();
    fs::create_dir_all(&staging).unwrap();
    fs::write(staging.join("foo.zip"), b"foo").unwrap();
    let entry = cache.prepare_new_entry(&staging, &foo()).unwrap();
    cache.add_entry_locked("FOO", &entry).unwrap().unlock();

    let bar = SourcePackageMetadata::new("Bar");
    cache.get_entry_locked("FOO", &bar).unwrap().unwrap().unlock();
    cache.get_entry_locked("FOO", &bar).unwrap().unwrap().unlock();

    let log = fs::read_to_string(cache.path().join("FOO").join(METADATA_FILE_NAME)).unwrap();
    let lines: Vec<_> = log.lines().collect();
    assert_eq!(
        lines,
        vec![
            r#"{"PackageName":"Foo","ManifestName":"foo","ManifestVersion":"1.0"}"#,
            r#"{"PackageName":"Bar","ManifestName":null,"ManifestVersion":null}"#,
        ]
    );

    let listed = cache.enumerate_entries(|e| panic!("{e}")).unwrap();
    assert_eq!(listed[0].source_packages, vec![foo(), bar]);
}

#[test]
fn malformed_log_lines_are_ignored() {
    let td = tempdir().unwrap();
    let cache = SharedFileCache::new(td.path().join("cache"), TmpDirectory::new(td.path().join("tmp")));
    cache.create_dirs().unwrap();
    let dir = cache.path().join("MIXED");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("x.bin"), b"x").unwrap();
    fs::write(
        dir.join(METADATA_FILE_NAME),
        "not json\n{\"PackageName\":\"Ok\",\"ManifestName\":null,\"ManifestVersion\":null}\n\n",
    )
    .unwrap();

    let listed = cache.enumerate_entries(|e| panic!("{e}")).unwrap();
    assert_eq!(listed[0].source_packages, vec![SourcePackageMetadata::new("Ok")]);
}
