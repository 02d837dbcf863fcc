use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::models::MIN_FILE_SIZE;

const CONFIG_FILE: &str = "modelhub.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct HubSettings {
    /// Install root; the platform data directory when unset.
    pub root: Option<PathBuf>,
    /// Directory standing in for the packaged-resource store.
    pub bundle_dir: Option<PathBuf>,
    pub workers: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub progress_interval_ms: u64,
    pub min_file_size: u64,
    pub state_file_name: String,
    pub scratch_dir_name: String,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            root: None,
            bundle_dir: None,
            workers: 4,
            connect_timeout_secs: 20,
            read_timeout_secs: 600,
            progress_interval_ms: 250,
            min_file_size: MIN_FILE_SIZE,
            state_file_name: "state.json".into(),
            scratch_dir_name: "_tmp".into(),
        }
    }
}

impl HubSettings {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).with_context(|| format!("failed reading {path:?}"))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(&bytes).context("config json could not be parsed")
    }

    /// Loads the per-user config file, falling back to defaults when absent.
    pub fn load_default() -> Result<Self> {
        Self::load(&default_config_path()?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create dir {parent:?}"))?;
        }
        let serialized =
            serde_json::to_vec_pretty(self).context("serialize settings to json failed")?;
        fs::write(path, serialized).with_context(|| format!("write settings to {path:?}"))?;
        Ok(())
    }

    pub fn resolve_root(&self) -> Result<PathBuf> {
        match &self.root {
            Some(root) => Ok(root.clone()),
            None => {
                let project_dirs = project_dirs()?;
                Ok(project_dirs.data_dir().join("models"))
            }
        }
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let project_dirs = project_dirs()?;
    Ok(project_dirs.config_dir().join(CONFIG_FILE))
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "ModelHub", "ModelHub").context("missing project directories")
}
