//! CSV persistence for the pod ledger
//!
//! The active table is read in full and rewritten in full each cycle through a
//! temp file and a rename, so a reader never sees a half-written table. The
//! archive is only ever appended to.

use super::record::{PodRecord, COLUMNS};
use crate::error::LedgerError;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Location of the active table and its archive
#[derive(Debug, Clone)]
pub struct LedgerStore {
    table_path: PathBuf,
    archive_path: PathBuf,
}

impl LedgerStore {
    pub fn new(table_path: impl Into<PathBuf>, archive_path: impl Into<PathBuf>) -> Self {
        Self {
            table_path: table_path.into(),
            archive_path: archive_path.into(),
        }
    }

    /// Store whose archive sits next to the table as `<stem>.archive.csv`
    pub fn beside(table_path: impl Into<PathBuf>) -> Self {
        let table_path = table_path.into();
        let archive_path = default_archive_path(&table_path);
        Self::new(table_path, archive_path)
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Load the active table; a missing file is an empty table
    pub fn load_active(&self) -> Result<Vec<PodRecord>, LedgerError> {
        read_records(&self.table_path)
    }

    /// Load every archived row
    pub fn load_archive(&self) -> Result<Vec<PodRecord>, LedgerError> {
        read_records(&self.archive_path)
    }

    /// Archive keys of the `departed` rows that the archive already holds.
    ///
    /// The archive is streamed and only keys of `departed` are kept. Rows
    /// without a uid are never reported.
    pub fn archived_among(
        &self,
        departed: &[PodRecord],
    ) -> Result<HashSet<(String, String)>, LedgerError> {
        let mut wanted: HashSet<(String, String)> =
            departed.iter().filter_map(PodRecord::archive_key).collect();
        let mut found = HashSet::new();
        if wanted.is_empty() {
            return Ok(found);
        }

        let Some(mut reader) = open_reader(&self.archive_path)? else {
            return Ok(found);
        };
        for row in reader.deserialize::<PodRecord>() {
            let record = row.map_err(|source| LedgerError::Read {
                path: self.archive_path.clone(),
                source,
            })?;
            if let Some(key) = record.archive_key() {
                if let Some(key) = wanted.take(&key) {
                    found.insert(key);
                    if wanted.is_empty() {
                        break;
                    }
                }
            }
        }
        Ok(found)
    }

    /// Replace the active table with `records`
    pub fn write_active(&self, records: &[PodRecord]) -> Result<(), LedgerError> {
        let path = &self.table_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| write_error(parent, source))?;
        }

        let data = encode(path, records, true)?;

        // Write atomically using temp file
        let temp_path = temp_path_for(path);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|source| write_error(&temp_path, source))?;

        file.write_all(&data)
            .map_err(|source| write_error(&temp_path, source))?;
        file.sync_all()
            .map_err(|source| write_error(&temp_path, source))?;

        std::fs::rename(&temp_path, path).map_err(|source| write_error(path, source))?;

        debug!(path = %path.display(), rows = records.len(), "Ledger table rewritten");
        Ok(())
    }

    /// Append `records` to the archive, writing the header if the file is new
    pub fn append_archive(&self, records: &[PodRecord]) -> Result<(), LedgerError> {
        if records.is_empty() {
            return Ok(());
        }

        let path = &self.archive_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| write_error(parent, source))?;
        }

        let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        let data = encode(path, records, needs_header)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| write_error(path, source))?;

        file.write_all(&data).map_err(|source| write_error(path, source))?;
        file.sync_all().map_err(|source| write_error(path, source))?;

        debug!(path = %path.display(), rows = records.len(), "Archived departed pods");
        Ok(())
    }
}

/// `<dir>/<stem>.archive.csv` for a table at `<dir>/<stem>.<ext>`
pub fn default_archive_path(table_path: &Path) -> PathBuf {
    let stem = table_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pods".to_string());
    table_path.with_file_name(format!("{stem}.archive.csv"))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_error(path: &Path, source: std::io::Error) -> LedgerError {
    LedgerError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn encode(path: &Path, records: &[PodRecord], header: bool) -> Result<Vec<u8>, LedgerError> {
    let encode_error = |source| LedgerError::Encode {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    if header {
        writer.write_record(COLUMNS).map_err(encode_error)?;
    }
    for record in records {
        writer.serialize(record).map_err(encode_error)?;
    }

    writer
        .into_inner()
        .map_err(|e| write_error(path, e.into_error()))
}

/// Reader positioned after a validated header; `None` for a missing or empty file
fn open_reader(path: &Path) -> Result<Option<csv::Reader<File>>, LedgerError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(LedgerError::Read {
                path: path.to_path_buf(),
                source: source.into(),
            })
        }
    };

    let read_error = |source| LedgerError::Read {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers = reader.headers().map_err(read_error)?.clone();
    if headers.is_empty() {
        return Ok(None);
    }
    if !headers.iter().eq(COLUMNS.iter().copied()) {
        return Err(LedgerError::SchemaMismatch {
            path: path.to_path_buf(),
            found: headers.iter().collect::<Vec<_>>().join(","),
            expected: COLUMNS.join(","),
        });
    }

    Ok(Some(reader))
}

fn read_records(path: &Path) -> Result<Vec<PodRecord>, LedgerError> {
    let Some(mut reader) = open_reader(path)? else {
        return Ok(Vec::new());
    };

    reader
        .deserialize::<PodRecord>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| LedgerError::Read {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str) -> PodRecord {
        PodRecord {
            pod_name: name.to_string(),
            uid: Some(format!("{name}-uid")),
            phase: Some("Running".to_string()),
            restart_count: Some(0),
            message: Some("back-off, restarting \"main\"".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_table_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::beside(dir.path().join("pods.csv"));
        assert!(store.load_active().unwrap().is_empty());
        assert!(store.load_archive().unwrap().is_empty());
    }

    #[test]
    fn test_write_and_load_active() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::beside(dir.path().join("pods.csv"));

        store.write_active(&[record("a"), record("b")]).unwrap();
        let loaded = store.load_active().unwrap();

        assert_eq!(loaded, vec![record("a"), record("b")]);
        assert!(!temp_path_for(store.table_path()).exists());
    }

    #[test]
    fn test_empty_table_keeps_header() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::beside(dir.path().join("pods.csv"));

        store.write_active(&[]).unwrap();
        let contents = std::fs::read_to_string(store.table_path()).unwrap();

        assert_eq!(contents.trim_end(), COLUMNS.join(","));
        assert!(store.load_active().unwrap().is_empty());
    }

    #[test]
    fn test_archive_appends_with_single_header() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::beside(dir.path().join("pods.csv"));

        store.append_archive(&[record("a")]).unwrap();
        store.append_archive(&[record("b")]).unwrap();

        let contents = std::fs::read_to_string(store.archive_path()).unwrap();
        assert_eq!(contents.matches("pod_name,uid").count(), 1);
        assert_eq!(store.load_archive().unwrap(), vec![record("a"), record("b")]);
    }

    #[test]
    fn test_archived_among_only_reports_departed_rows_with_uid() {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::beside(dir.path().join("pods.csv"));

        let mut anonymous = record("c");
        anonymous.uid = None;
        store
            .append_archive(&[record("a"), record("b"), anonymous.clone()])
            .unwrap();

        let found = store
            .archived_among(&[record("a"), record("d"), anonymous])
            .unwrap();

        assert_eq!(found.len(), 1);
        assert!(found.contains(&("a".to_string(), "a-uid".to_string())));
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pods.csv");
        std::fs::write(&path, "name,uid\nweb,1\n").unwrap();

        let store = LedgerStore::beside(&path);
        assert!(matches!(
            store.load_active(),
            Err(LedgerError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_default_archive_path() {
        assert_eq!(
            default_archive_path(Path::new("/var/lib/podscope/pods.csv")),
            PathBuf::from("/var/lib/podscope/pods.archive.csv")
        );
    }
}
