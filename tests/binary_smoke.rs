// Runs the pog_cache binary end to end against a throwaway cache root.

use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

fn pog_cache(config_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pog_cache"));
    // keep the user's real config out of it
    cmd.env("POG_CACHE_CONFIG", config_dir.join("absent.xml"));
    cmd
}

#[test]
fn help_succeeds() {
    let td = tempdir().unwrap();
    let out = pog_cache(td.path()).arg("--help").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("clear"));
}

#[test]
fn print_config_reports_env_override() {
    let td = tempdir().unwrap();
    let out = pog_cache(td.path()).arg("--print-config").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("absent.xml"));
}

#[test]
fn list_on_empty_cache() {
    let td = tempdir().unwrap();
    let root = td.path().join("root");
    let out = pog_cache(td.path())
        .args(["list", "--json", "--cache-root"])
        .arg(&root)
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let listed: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(listed, serde_json::json!([]));
    assert!(root.join("download_cache").is_dir());
}

#[test]
fn list_shows_an_entry() {
    let td = tempdir().unwrap();
    let root = td.path().join("root");
    let entry = root.join("download_cache").join("ABCDEF");
    fs::create_dir_all(&entry).unwrap();
    fs::write(entry.join("tool.zip"), b"zip").unwrap();
    fs::write(
        entry.join("referencingPackages.json-list"),
        r#"{"PackageName":"Tool","ManifestName":null,"ManifestVersion":null}"#,
    )
    .unwrap();

    let out = pog_cache(td.path()).arg("--cache-root").arg(&root).arg("list").output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("ABCDEF") && stdout.contains("Tool"), "stdout: {stdout}");
}

#[test]
fn delete_and_invalid_key() {
    let td = tempdir().unwrap();
    let root = td.path().join("root");
    pog_cache(td.path())
        .arg("--cache-root")
        .arg(&root)
        .args(["delete", "MISSING"])
        .assert()
        .success();
    pog_cache(td.path())
        .arg("--cache-root")
        .arg(&root)
        .args(["delete", "CON"])
        .assert()
        .failure();
}

#[test]
fn recover_consistent_directory() {
    let td = tempdir().unwrap();
    let pkg = td.path().join("pkg");
    fs::create_dir_all(pkg.join("app")).unwrap();
    let out = pog_cache(td.path()).arg("recover").arg(&pkg).output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("nothing to recover"));
}

#[test]
fn forced_clear_of_empty_cache() {
    let td = tempdir().unwrap();
    let root = td.path().join("root");
    pog_cache(td.path())
        .arg("--cache-root")
        .arg(&root)
        .args(["clear", "--days", "0", "--force"])
        .assert()
        .success();
}
