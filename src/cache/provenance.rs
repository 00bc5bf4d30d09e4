//! The per-entry provenance log (`referencingPackages.json-list`).
//!
//! One JSON object per line, so records must never be pretty-printed. Readers take a
//! shared lock over the whole file, writers an exclusive one; both block, since the
//! critical sections are a few small reads and writes.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

use filetime::FileTime;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::FsError;
use crate::platform::open_metadata_file;

/// Which package used a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourcePackageMetadata {
    pub package_name: String,
    pub manifest_name: Option<String>,
    pub manifest_version: Option<String>,
}

impl SourcePackageMetadata {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            manifest_name: None,
            manifest_version: None,
        }
    }

    pub fn with_manifest(mut self, name: Option<String>, version: Option<String>) -> Self {
        self.manifest_name = name;
        self.manifest_version = version;
        self
    }

    /// `None` for unparsable lines and lines without a `PackageName`.
    pub fn parse_line(line: &str) -> Option<Self> {
        serde_json::from_str(line).ok()
    }

    /// Single-line JSON, no trailing newline.
    pub fn to_line(&self) -> Vec<u8> {
        // serializing a struct of strings cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// "Name vVersion", as shown in listings.
    pub fn display_name(&self) -> String {
        match &self.manifest_version {
            Some(v) => format!("{} v{}", self.package_name, v),
            None => self.package_name.clone(),
        }
    }
}

fn parse_records(reader: impl Read) -> Vec<SourcePackageMetadata> {
    BufReader::new(reader)
        .lines()
        .map_while(Result::ok)
        .filter(|l| !l.is_empty())
        .filter_map(|l| SourcePackageMetadata::parse_line(&l))
        .collect()
}

/// Read all valid records. `Ok(None)` if the log does not exist.
pub fn read_metadata_file(path: &Path) -> Result<Option<Vec<SourcePackageMetadata>>, FsError> {
    let file = match open_metadata_file(path, false) {
        Ok(f) => f,
        Err(FsError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    FileExt::lock_shared(&file).map_err(|e| FsError::io("lock metadata file", path, e))?;
    let records = parse_records(&file);
    // closing the file releases the lock
    Ok(Some(records))
}

/// Append `record` unless an equal one is already present; in that case only the
/// modification time (the entry's last use time) is refreshed.
pub fn add_record(path: &Path, record: &SourcePackageMetadata) -> Result<(), FsError> {
    let mut file = open_metadata_file(path, true)?;
    FileExt::lock_exclusive(&file).map_err(|e| FsError::io("lock metadata file", path, e))?;
    append_locked(&mut file, path, record)
}

fn append_locked(file: &mut File, path: &Path, record: &SourcePackageMetadata) -> Result<(), FsError> {
    let io_err = |e| FsError::io("update metadata file", path, e);

    let existing = parse_records(&*file);
    if existing.iter().any(|r| r == record) {
        // already recorded, but this still counts as a use of the entry
        filetime::set_file_handle_times(file, None, Some(FileTime::now())).map_err(io_err)?;
        trace!(path = %path.display(), "refreshed provenance record");
        return Ok(());
    }

    let len = file.seek(SeekFrom::End(0)).map_err(io_err)?;
    if len > 0 {
        file.seek(SeekFrom::End(-1)).map_err(io_err)?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last).map_err(io_err)?;
        if last[0] != b'\n' {
            file.write_all(b"\n").map_err(io_err)?;
        }
    }
    file.write_all(&record.to_line()).map_err(io_err)?;
    trace!(path = %path.display(), package = %record.package_name, "appended provenance record");
    Ok(())
}

/// Create a new log holding a single record. Fails if the file already exists.
pub fn create_metadata_file(path: &Path, record: &SourcePackageMetadata) -> Result<(), FsError> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| FsError::io("create metadata file", path, e))?;
    file.write_all(&record.to_line())
        .map_err(|e| FsError::io("write metadata file", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn foo() -> SourcePackageMetadata {
        SourcePackageMetadata::new("Foo").with_manifest(Some("foo".into()), Some("1.2.0".into()))
    }

    #[test]
    fn serialized_form_is_one_line() {
        let line = String::from_utf8(foo().to_line()).unwrap();
        assert_eq!(
            line,
            r#"{"PackageName":"Foo","ManifestName":"foo","ManifestVersion":"1.2.0"}"#
        );
    }

    #[test]
    fn lines_without_package_name_are_discarded() {
        assert!(SourcePackageMetadata::parse_line(r#"{"ManifestName":"x"}"#).is_none());
        assert!(SourcePackageMetadata::parse_line(r#"{"PackageName":null}"#).is_none());
        assert!(SourcePackageMetadata::parse_line("not json").is_none());
        let p = SourcePackageMetadata::parse_line(r#"{"PackageName":"Bar"}"#).unwrap();
        assert_eq!(p, SourcePackageMetadata::new("Bar"));
    }

    #[test]
    fn append_adds_missing_newline() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("log");
        create_metadata_file(&p, &foo()).unwrap();
        add_record(&p, &SourcePackageMetadata::new("Bar")).unwrap();
        add_record(&p, &foo()).unwrap();

        let text = fs::read_to_string(&p).unwrap();
        assert_eq!(text.lines().count(), 2);
        let records = read_metadata_file(&p).unwrap().unwrap();
        assert_eq!(records, vec![foo(), SourcePackageMetadata::new("Bar")]);
    }

    #[test]
    fn garbage_lines_are_skipped_on_read() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("log");
        fs::write(&p, "{\"PackageName\":\"A\"}\n\ngarbage\n{\"Nope\":1}\n").unwrap();
        let records = read_metadata_file(&p).unwrap().unwrap();
        assert_eq!(records, vec![SourcePackageMetadata::new("A")]);
    }

    #[test]
    fn missing_log_reads_as_none() {
        let td = tempfile::tempdir().unwrap();
        assert!(read_metadata_file(&td.path().join("absent")).unwrap().is_none());
    }
}
