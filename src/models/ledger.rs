use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Provenance of the last successful install of one key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StateRecord {
    pub installed_version: String,
    pub sha256: String,
    pub zip_size: u64,
    pub unpack_to: String,
    /// Milliseconds since the Unix epoch.
    pub installed_at: i64,
}

impl StateRecord {
    pub fn stamped_now(version: &str, sha256: &str, zip_size: u64, unpack_to: &str) -> Self {
        Self {
            installed_version: version.to_string(),
            sha256: sha256.to_string(),
            zip_size,
            unpack_to: unpack_to.to_string(),
            installed_at: now_millis(),
        }
    }
}

pub type StateMap = BTreeMap<String, StateRecord>;

/// Durable key -> [`StateRecord`] document under the install root.
///
/// The document is replaced whole via a sibling temp file, so readers see
/// either the previous or the next version. Read-modify-write cycles from this
/// process are serialized.
pub struct StateLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateLedger {
    pub fn new(root: &Path, file_name: &str) -> Self {
        Self {
            path: root.join(file_name),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Loads the mapping; an absent, empty or unreadable document is empty.
    pub fn read(&self) -> StateMap {
        match load_state(&self.path) {
            Ok(state) => state,
            Err(error) => {
                tracing::warn!("Ignoring unreadable state ledger {}: {error:#}", self.path.display());
                StateMap::new()
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<StateRecord> {
        self.read().remove(key)
    }

    pub fn write_record(&self, key: &str, record: StateRecord) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut state = self.read();
        state.insert(key.to_string(), record);
        let serialized = serde_json::to_vec(&state).context("serialize state ledger")?;
        write_atomic(&self.path, &serialized)
    }

    /// Best-effort variant of [`write_record`](Self::write_record): failures
    /// are logged and dropped, never surfaced to the install outcome.
    pub fn record(&self, key: &str, record: StateRecord) {
        if let Err(error) = self.write_record(key, record) {
            tracing::warn!("Failed to persist state record for {key}: {error:#}");
        }
    }
}

fn load_state(path: &Path) -> Result<StateMap> {
    if !path.exists() {
        return Ok(StateMap::new());
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(StateMap::new());
    }
    serde_json::from_slice(&bytes).context("parse state ledger")
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().context("state ledger has no parent directory")?;
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;

    let file_name = path
        .file_name()
        .context("state ledger has no file name")?
        .to_string_lossy();
    let tmp = dir.join(format!("{file_name}.tmp"));
    {
        let mut file = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        file.write_all(contents).context("write state tmp")?;
        file.sync_all().context("sync state tmp")?;
    }

    if fs::rename(&tmp, path).is_err() {
        // some platforms refuse to rename over an existing file
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        }
        fs::rename(&tmp, path).context("rename state tmp failed")?;
    }
    Ok(())
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: &str) -> StateRecord {
        StateRecord::stamped_now(version, "abc123", 42, "stt/en")
    }

    #[test]
    fn absent_document_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StateLedger::new(dir.path(), "state.json");
        assert!(ledger.read().is_empty());
        assert!(ledger.get("m1").is_none());
    }

    #[test]
    fn empty_or_garbage_document_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StateLedger::new(dir.path(), "state.json");
        fs::write(ledger.path(), b"").unwrap();
        assert!(ledger.read().is_empty());
        fs::write(ledger.path(), b"{\"m1\": [trunc").unwrap();
        assert!(ledger.read().is_empty());
    }

    #[test]
    fn upserts_keep_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StateLedger::new(dir.path(), "state.json");
        ledger.write_record("m1", record("1.0")).unwrap();
        ledger.write_record("m2", record("2.0")).unwrap();
        ledger.write_record("m1", record("1.1")).unwrap();

        let state = ledger.read();
        assert_eq!(state.len(), 2);
        assert_eq!(state["m1"].installed_version, "1.1");
        assert_eq!(state["m2"].installed_version, "2.0");
        assert!(state["m1"].installed_at > 0);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn document_uses_camel_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StateLedger::new(dir.path(), "state.json");
        ledger.write_record("m1", record("1.0")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(ledger.path()).unwrap()).unwrap();
        let entry = &raw["m1"];
        assert_eq!(entry["installedVersion"], "1.0");
        assert_eq!(entry["zipSize"], 42);
        assert_eq!(entry["unpackTo"], "stt/en");
        assert!(entry["installedAt"].is_i64());
    }

    #[test]
    fn best_effort_write_swallows_failures() {
        let dir = tempfile::tempdir().unwrap();
        // a plain file in place of the root directory makes every write fail
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();
        let ledger = StateLedger::new(&blocker, "state.json");

        ledger.record("m1", record("1.0"));
        assert!(ledger.write_record("m1", record("1.0")).is_err());
        assert!(ledger.read().is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_records() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = std::sync::Arc::new(StateLedger::new(dir.path(), "state.json"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.write_record(&format!("m{i}"), record("1.0")))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(ledger.read().len(), 8);
    }
}
