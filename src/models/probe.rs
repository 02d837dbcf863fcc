use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::path::{confined_join, safe_rel};

pub const MIN_FILE_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Missing,
    Corrupt,
    Installed,
}

impl InstallStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::Missing => "missing",
            InstallStatus::Corrupt => "corrupt",
            InstallStatus::Installed => "installed",
        }
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies `dir` against an optional manifest of must-exist files.
///
/// Plain files smaller than `min_size` count as corrupt; this is a cheap
/// truncation heuristic, not an integrity check. Entries are sanitized like
/// any other caller path and always resolve inside `dir`; entries that
/// sanitize to nothing are ignored.
pub fn check_installed(dir: &Path, check_files: &[String], min_size: u64) -> InstallStatus {
    if !dir.is_dir() {
        return InstallStatus::Missing;
    }

    let entries = check_files.iter().map(|rel| safe_rel(rel));
    for rel in entries.filter(|rel| !rel.is_empty()) {
        let file = confined_join(dir, &rel);
        let Ok(metadata) = fs::metadata(&file) else {
            return InstallStatus::Corrupt;
        };
        if metadata.is_file() && metadata.len() < min_size {
            return InstallStatus::Corrupt;
        }
    }

    InstallStatus::Installed
}
