use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{
    error::{HubError, HubResult},
    events::{emit_done, emit_phase, Phase, ProgressSink},
    settings::HubSettings,
};

use super::{
    bundle::{copy_bundled_zip, BundleStore},
    download::RemoteFetcher,
    install::{promote, remove_path, unpack_to_staging},
    ledger::{StateLedger, StateRecord},
    locks::KeyedLocks,
    metadata::{compute_sha256, digests_match},
    path::{confined_join, resolve_install_dir},
    probe::{check_installed, InstallStatus},
};

/// Which sources an ensure call may draw from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AcquisitionPolicy {
    #[default]
    BundleThenDownload,
    BundleOnly,
    DownloadOnly,
}

impl AcquisitionPolicy {
    #[must_use]
    pub fn allows_bundle(&self) -> bool {
        !matches!(self, AcquisitionPolicy::DownloadOnly)
    }

    #[must_use]
    pub fn allows_download(&self) -> bool {
        !matches!(self, AcquisitionPolicy::BundleOnly)
    }
}

impl FromStr for AcquisitionPolicy {
    type Err = HubError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "bundleThenDownload" => Ok(AcquisitionPolicy::BundleThenDownload),
            "bundleOnly" => Ok(AcquisitionPolicy::BundleOnly),
            "downloadOnly" => Ok(AcquisitionPolicy::DownloadOnly),
            other => Err(HubError::bad_args(format!("unknown policy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsedSource {
    Bundle,
    Download,
    None,
}

impl fmt::Display for UsedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UsedSource::Bundle => "bundle",
            UsedSource::Download => "download",
            UsedSource::None => "none",
        })
    }
}

/// One installable unit as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetItem {
    pub key: String,
    pub unpack_to: String,
    pub password: Option<String>,
    pub sha256: Option<String>,
    pub remote_url: Option<String>,
    pub version: Option<String>,
    pub check_files: Vec<String>,
}

impl AssetItem {
    pub fn new(key: impl Into<String>, unpack_to: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            unpack_to: unpack_to.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }

    #[must_use]
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_check_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.check_files = files.into_iter().map(Into::into).collect();
        self
    }

    fn expected_sha256(&self) -> Option<&str> {
        non_empty(self.sha256.as_deref())
    }

    fn remote(&self) -> Option<&str> {
        non_empty(self.remote_url.as_deref())
    }

    fn reported_version(&self) -> Option<String> {
        non_empty(self.version.as_deref()).map(ToOwned::to_owned)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckItem {
    pub key: String,
    pub unpack_to: String,
    pub check_files: Vec<String>,
}

impl From<&AssetItem> for CheckItem {
    fn from(item: &AssetItem) -> Self {
        Self {
            key: item.key.clone(),
            unpack_to: item.unpack_to.clone(),
            check_files: item.check_files.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub key: String,
    pub installed_path: PathBuf,
    pub has_bundled_zip: bool,
    pub status: InstallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureResult {
    pub key: String,
    pub ok: bool,
    pub installed_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub has_bundled_zip: bool,
    pub used_source: UsedSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    pub zip_size: u64,
    pub unpack_to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateRecord>,
}

/// Drives the probe -> acquire -> verify -> unpack -> promote -> record
/// pipeline for one item at a time.
pub struct ModelManager {
    root: PathBuf,
    settings: HubSettings,
    ledger: StateLedger,
    bundles: Arc<dyn BundleStore>,
    fetcher: RemoteFetcher,
    locks: KeyedLocks,
    sink: Arc<dyn ProgressSink>,
}

impl ModelManager {
    pub fn new(
        settings: HubSettings,
        bundles: Arc<dyn BundleStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let root = settings.resolve_root()?;
        let ledger = StateLedger::new(&root, &settings.state_file_name);
        let fetcher = RemoteFetcher::new(&settings);
        let manager = Self {
            root,
            settings,
            ledger,
            bundles,
            fetcher,
            locks: KeyedLocks::new(),
            sink,
        };
        manager.ensure_directory()?;
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        self.root.as_path()
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn ledger(&self) -> &StateLedger {
        &self.ledger
    }

    pub fn ensure_directory(&self) -> Result<()> {
        fs::create_dir_all(&self.root).context("create model directory")?;
        Ok(())
    }

    /// Absolute directory `unpack_to` resolves to; never fails.
    #[must_use]
    pub fn path_for(&self, unpack_to: &str) -> PathBuf {
        confined_join(&self.root, unpack_to)
    }

    #[must_use]
    pub fn has_bundled_zip(&self, key: &str) -> bool {
        is_plain_key(key) && self.bundles.exists(key)
    }

    pub fn check(&self, items: &[CheckItem]) -> Vec<CheckResult> {
        let state = self.ledger.read();
        items
            .iter()
            .map(|item| {
                let installed_path = self.path_for(&item.unpack_to);
                CheckResult {
                    key: item.key.clone(),
                    status: self.probe(&installed_path, &item.check_files),
                    installed_path,
                    has_bundled_zip: self.has_bundled_zip(&item.key),
                    state: state.get(&item.key).cloned(),
                }
            })
            .collect()
    }

    /// Ensures one item is installed, propagating the first error.
    ///
    /// Concurrent calls for the same key are serialized; the later one
    /// usually finds the earlier install and short-circuits.
    pub fn ensure_one(&self, item: &AssetItem, policy: AcquisitionPolicy) -> HubResult<EnsureResult> {
        let outcome = validate(item, &self.root, &self.settings.scratch_dir_name).and_then(|dest| {
            self.locks
                .with_lock(&item.key, || self.run_pipeline(item, policy, &dest))
        });
        if let Err(error) = &outcome {
            tracing::warn!("Ensure {} failed: {}", item.key, error.message());
            emit_phase(&*self.sink, &item.key, Phase::Error, Some(&error.message()));
        }
        outcome
    }

    /// Failure entry for a batch slot, classified with the stable codes.
    pub fn failure_result(&self, item: &AssetItem, error: &HubError) -> EnsureResult {
        EnsureResult {
            key: item.key.clone(),
            ok: false,
            installed_path: self.path_for(&item.unpack_to),
            installed_version: None,
            code: Some(error.code()),
            message: Some(error.message()),
            has_bundled_zip: self.has_bundled_zip(&item.key),
            used_source: UsedSource::None,
            sha256: String::new(),
            zip_size: 0,
            unpack_to: item.unpack_to.clone(),
            state: None,
        }
    }

    fn run_pipeline(
        &self,
        item: &AssetItem,
        policy: AcquisitionPolicy,
        dest: &Path,
    ) -> HubResult<EnsureResult> {
        let key = item.key.as_str();
        let expected = item.expected_sha256().unwrap_or_default().to_string();

        emit_phase(&*self.sink, key, Phase::Checking, Some("checking installed"));
        if self.probe(dest, &item.check_files) == InstallStatus::Installed {
            tracing::debug!("{key} already installed at {}", dest.display());
            emit_done(&*self.sink, key, "already installed");
            return Ok(EnsureResult {
                key: key.to_string(),
                ok: true,
                installed_path: dest.to_path_buf(),
                installed_version: item.reported_version(),
                code: Some("installed".into()),
                message: Some("already installed".into()),
                has_bundled_zip: self.has_bundled_zip(key),
                used_source: UsedSource::None,
                sha256: expected,
                zip_size: 0,
                unpack_to: item.unpack_to.clone(),
                state: self.ledger.get(key),
            });
        }

        let has_bundled = self.has_bundled_zip(key);
        let source = select_source(policy, has_bundled, item.remote())?;
        tracing::info!("Installing {key} from {source}");

        for area in [SCRATCH_ZIPS, SCRATCH_STAGING, SCRATCH_PREVIOUS] {
            fs::create_dir_all(self.scratch_dir().join(area))
                .context("create scratch directory")?;
        }
        let scratch = Scratch {
            zip: self.scratch_zip(key),
            staging: self.staging_dir(key),
        };

        let zip_size = self.acquire(item, source, &scratch.zip)?;

        if let Some(expected) = item.expected_sha256() {
            emit_phase(&*self.sink, key, Phase::Verifying, Some("sha256 verifying"));
            let actual = compute_sha256(&scratch.zip)?;
            if !digests_match(expected, &actual) {
                return Err(HubError::Sha256Mismatch {
                    origin: source,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        emit_phase(&*self.sink, key, Phase::Unpacking, Some("unpacking zip"));
        let password = non_empty(item.password.as_deref());
        unpack_to_staging(&scratch.zip, &scratch.staging, password)?;

        let staged = self.probe(&scratch.staging, &item.check_files);
        if staged != InstallStatus::Installed {
            return Err(HubError::UnpackInvalid { status: staged });
        }

        emit_phase(&*self.sink, key, Phase::Finalizing, Some("finalizing"));
        promote(&scratch.staging, dest, &self.backup_dir(key))?;
        tracing::info!("Installed {key} into {}", dest.display());

        self.ledger.record(
            key,
            StateRecord::stamped_now(
                &item.reported_version().unwrap_or_default(),
                &expected,
                zip_size,
                &item.unpack_to,
            ),
        );
        let state = self.ledger.get(key);
        scratch.clear();

        let message = match source {
            UsedSource::Bundle => "installed from bundle",
            _ => "installed from download",
        };
        emit_done(&*self.sink, key, "installed");
        Ok(EnsureResult {
            key: key.to_string(),
            ok: true,
            installed_path: dest.to_path_buf(),
            installed_version: item.reported_version(),
            code: Some("installed".into()),
            message: Some(message.into()),
            has_bundled_zip: has_bundled,
            used_source: source,
            sha256: expected,
            zip_size,
            unpack_to: item.unpack_to.clone(),
            state,
        })
    }

    /// Produces the scratch archive and returns its size in bytes.
    fn acquire(&self, item: &AssetItem, source: UsedSource, zip: &Path) -> HubResult<u64> {
        let key = item.key.as_str();
        match source {
            UsedSource::Bundle => {
                emit_phase(&*self.sink, key, Phase::Copying, Some("copying bundled zip"));
                copy_bundled_zip(&*self.bundles, key, zip)?;
            }
            UsedSource::Download => {
                let url = item.remote().ok_or(HubError::MissingRemoteUrl)?;
                self.fetcher.download_to(key, url, zip, &*self.sink)?;
            }
            UsedSource::None => return Err(HubError::MissingRemoteUrl),
        }
        let size = fs::metadata(zip).context("stat scratch zip")?.len();
        Ok(size)
    }

    fn probe(&self, dir: &Path, check_files: &[String]) -> InstallStatus {
        check_installed(dir, check_files, self.settings.min_file_size)
    }

    fn scratch_dir(&self) -> PathBuf {
        self.root.join(&self.settings.scratch_dir_name)
    }

    fn scratch_zip(&self, key: &str) -> PathBuf {
        self.scratch_dir().join(SCRATCH_ZIPS).join(format!("{key}.zip"))
    }

    fn staging_dir(&self, key: &str) -> PathBuf {
        self.scratch_dir().join(SCRATCH_STAGING).join(key)
    }

    fn backup_dir(&self, key: &str) -> PathBuf {
        self.scratch_dir().join(SCRATCH_PREVIOUS).join(key)
    }
}

// scratch sub-directories; entries inside are named by key alone
const SCRATCH_ZIPS: &str = "zip";
const SCRATCH_STAGING: &str = "unpack";
const SCRATCH_PREVIOUS: &str = "previous";

/// Scratch archive and staging tree of one pipeline run, removed on drop.
struct Scratch {
    zip: PathBuf,
    staging: PathBuf,
}

impl Scratch {
    fn clear(&self) {
        for path in [&self.zip, &self.staging] {
            if let Err(error) = remove_path(path) {
                tracing::warn!("Failed to remove scratch {}: {error:#}", path.display());
            }
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        self.clear();
    }
}

fn select_source(
    policy: AcquisitionPolicy,
    has_bundled: bool,
    remote_url: Option<&str>,
) -> HubResult<UsedSource> {
    if policy.allows_bundle() && has_bundled {
        return Ok(UsedSource::Bundle);
    }
    if !policy.allows_download() {
        return Err(HubError::MissingBundled);
    }
    match remote_url {
        Some(_) => Ok(UsedSource::Download),
        None => Err(HubError::MissingRemoteUrl),
    }
}

fn validate(item: &AssetItem, root: &Path, scratch_dir_name: &str) -> HubResult<PathBuf> {
    if item.key.is_empty() || item.unpack_to.is_empty() {
        return Err(HubError::bad_args("key/unpackTo is required"));
    }
    if !is_plain_key(&item.key) {
        return Err(HubError::bad_args(format!(
            "key must be a plain name: {}",
            item.key
        )));
    }
    resolve_install_dir(root, &item.unpack_to, scratch_dir_name)
}

/// Keys name scratch entries directly, so they must be a single plain name.
fn is_plain_key(key: &str) -> bool {
    !key.is_empty() && !key.contains(['/', '\\']) && !key.contains("..")
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use super::*;
    use crate::core::events::{ChannelSink, ProgressEvent};
    use crate::models::bundle::{DirBundleStore, NoBundles};

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            for (name, data) in files {
                writer
                    .start_file(*name, zip::write::FileOptions::default())
                    .unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        bundle_dir: PathBuf,
        manager: ModelManager,
        events: crossbeam_channel::Receiver<ProgressEvent>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let bundle_dir = dir.path().join("bundle");
        fs::create_dir_all(bundle_dir.join("models")).unwrap();
        let (sink, events) = ChannelSink::new();
        let manager = ModelManager::new(
            HubSettings::with_root(dir.path().join("models")),
            Arc::new(DirBundleStore::new(&bundle_dir)),
            Arc::new(sink),
        )
        .unwrap();
        Fixture {
            _dir: dir,
            bundle_dir,
            manager,
            events,
        }
    }

    impl Fixture {
        fn bundle(&self, key: &str, bytes: &[u8]) {
            fs::write(self.bundle_dir.join(format!("models/{key}.zip")), bytes).unwrap();
        }

        fn phases(&self) -> Vec<Phase> {
            self.events.try_iter().map(|event| event.phase).collect()
        }
    }

    fn model_item() -> AssetItem {
        AssetItem::new("m1", "stt/m1")
            .with_version(" 1.0 ")
            .with_check_files(["encoder.onnx", "tokens.txt"])
    }

    fn model_zip() -> Vec<u8> {
        zip_bytes(&[
            ("encoder.onnx", &[3u8; 64]),
            ("tokens.txt", b"a b c d e f g h i j k"),
        ])
    }

    #[test]
    fn policy_parses_host_strings() {
        assert_eq!(
            "".parse::<AcquisitionPolicy>().unwrap(),
            AcquisitionPolicy::BundleThenDownload
        );
        assert_eq!(
            "bundleOnly".parse::<AcquisitionPolicy>().unwrap(),
            AcquisitionPolicy::BundleOnly
        );
        assert_eq!(
            "downloadOnly".parse::<AcquisitionPolicy>().unwrap(),
            AcquisitionPolicy::DownloadOnly
        );
        assert_eq!(
            "sometimes".parse::<AcquisitionPolicy>().unwrap_err().code(),
            "BAD_ARGS"
        );
    }

    #[test]
    fn source_selection_follows_policy() {
        use AcquisitionPolicy::*;
        let url = Some("https://example/m1.zip");
        assert_eq!(select_source(BundleThenDownload, true, url).unwrap(), UsedSource::Bundle);
        assert_eq!(select_source(BundleThenDownload, false, url).unwrap(), UsedSource::Download);
        assert_eq!(select_source(DownloadOnly, true, url).unwrap(), UsedSource::Download);
        assert_eq!(select_source(BundleOnly, true, None).unwrap(), UsedSource::Bundle);
        assert_eq!(
            select_source(BundleOnly, false, url).unwrap_err().code(),
            "MODEL_MISSING_BUNDLED"
        );
        assert_eq!(
            select_source(BundleThenDownload, false, None).unwrap_err().code(),
            "MODEL_MISSING_REMOTE_URL"
        );
    }

    #[test]
    fn missing_fields_are_rejected_before_io() {
        let fx = fixture();
        let error = fx
            .manager
            .ensure_one(&AssetItem::new("", "stt/m1"), AcquisitionPolicy::default())
            .unwrap_err();
        assert_eq!(error.code(), "BAD_ARGS");

        let error = fx
            .manager
            .ensure_one(&AssetItem::new("m1", ""), AcquisitionPolicy::default())
            .unwrap_err();
        assert_eq!(error.code(), "BAD_ARGS");
        assert_eq!(fx.phases(), vec![Phase::Error, Phase::Error]);
        assert!(!fx.manager.root().join("_tmp").exists());
    }

    #[test]
    fn keys_with_separators_are_rejected() {
        let fx = fixture();
        for key in ["../m1", "a/b", "a\\b"] {
            let error = fx
                .manager
                .ensure_one(&AssetItem::new(key, "stt/m1"), AcquisitionPolicy::default())
                .unwrap_err();
            assert_eq!(error.code(), "BAD_ARGS", "{key}");
        }
    }

    #[test]
    fn unpack_target_may_not_be_the_root() {
        let fx = fixture();
        fs::write(fx.manager.root().join("keep.bin"), b"keep me").unwrap();
        let error = fx
            .manager
            .ensure_one(&AssetItem::new("m1", "../.."), AcquisitionPolicy::default())
            .unwrap_err();
        assert_eq!(error.code(), "BAD_ARGS");
        assert!(fx.manager.root().join("keep.bin").exists());
    }

    #[test]
    fn installs_from_bundle_and_records_state() {
        let fx = fixture();
        let bytes = model_zip();
        fx.bundle("m1", &bytes);

        let result = fx
            .manager
            .ensure_one(&model_item(), AcquisitionPolicy::BundleOnly)
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.used_source, UsedSource::Bundle);
        assert_eq!(result.zip_size, bytes.len() as u64);
        assert_eq!(result.installed_version.as_deref(), Some("1.0"));
        assert_eq!(result.installed_path, fx.manager.root().join("stt/m1"));
        assert!(result.installed_path.join("encoder.onnx").is_file());

        let state = result.state.unwrap();
        assert_eq!(state.zip_size, bytes.len() as u64);
        assert_eq!(state.unpack_to, "stt/m1");
        assert!(!fx.manager.root().join("_tmp/zip/m1.zip").exists());
        assert!(!fx.manager.root().join("_tmp/unpack/m1").exists());

        assert_eq!(
            fx.phases(),
            vec![
                Phase::Checking,
                Phase::Copying,
                Phase::Unpacking,
                Phase::Finalizing,
                Phase::Done
            ]
        );
    }

    #[test]
    fn second_call_is_a_pure_read() {
        let fx = fixture();
        fx.bundle("m1", &model_zip());
        let first = fx
            .manager
            .ensure_one(&model_item(), AcquisitionPolicy::default())
            .unwrap();

        // with the bundle gone, any acquisition attempt would fail
        fs::remove_file(fx.bundle_dir.join("models/m1.zip")).unwrap();
        fx.phases();

        let second = fx
            .manager
            .ensure_one(&model_item(), AcquisitionPolicy::BundleOnly)
            .unwrap();
        assert_eq!(second.used_source, UsedSource::None);
        assert_eq!(second.installed_path, first.installed_path);
        assert_eq!(second.state, first.state);
        assert_eq!(second.message.as_deref(), Some("already installed"));
        assert_eq!(fx.phases(), vec![Phase::Checking, Phase::Done]);
    }

    #[test]
    fn digest_mismatch_removes_scratch_archive() {
        let fx = fixture();
        fx.bundle("m1", &model_zip());
        let item = model_item().with_sha256("00".repeat(32));

        let error = fx
            .manager
            .ensure_one(&item, AcquisitionPolicy::BundleOnly)
            .unwrap_err();
        assert_eq!(error.code(), "SHA256_MISMATCH");
        assert!(!fx.manager.root().join("_tmp/zip/m1.zip").exists());
        assert!(!fx.manager.root().join("stt/m1").exists());
        assert!(fx.manager.ledger().get("m1").is_none());
        assert_eq!(fx.phases().last(), Some(&Phase::Error));
    }

    #[test]
    fn matching_digest_is_accepted_case_insensitively() {
        let fx = fixture();
        let bytes = model_zip();
        fx.bundle("m1", &bytes);
        let scratch = fx.manager.root().join("digest.zip");
        fs::write(&scratch, &bytes).unwrap();
        let digest = compute_sha256(&scratch).unwrap();

        let result = fx
            .manager
            .ensure_one(
                &model_item().with_sha256(digest.to_uppercase()),
                AcquisitionPolicy::default(),
            )
            .unwrap();
        assert_eq!(result.sha256, digest.to_uppercase());
        assert_eq!(result.state.unwrap().sha256, digest.to_uppercase());
    }

    #[test]
    fn incomplete_archive_is_unpack_invalid() {
        let fx = fixture();
        fx.bundle("m1", &zip_bytes(&[("encoder.onnx", &[3u8; 64]), ("tokens.txt", b"short")]));

        let error = fx
            .manager
            .ensure_one(&model_item(), AcquisitionPolicy::default())
            .unwrap_err();
        assert_eq!(error.code(), "UNPACK_INVALID");
        assert_eq!(error.message(), "UNPACK_INVALID:corrupt");
        assert!(!fx.manager.root().join("_tmp/unpack/m1").exists());
    }

    #[test]
    fn failed_update_keeps_previous_install() {
        let fx = fixture();
        fx.bundle("m1", &model_zip());
        fx.manager
            .ensure_one(&model_item(), AcquisitionPolicy::default())
            .unwrap();

        // corrupt the live install so the probe forces a reinstall
        let dest = fx.manager.root().join("stt/m1");
        fs::write(dest.join("tokens.txt"), b"tiny").unwrap();
        fx.bundle("m1", b"not a zip at all");

        let error = fx
            .manager
            .ensure_one(&model_item(), AcquisitionPolicy::default())
            .unwrap_err();
        assert_eq!(error.code(), "ERROR");
        assert!(dest.join("encoder.onnx").is_file());
    }

    #[test]
    fn bundle_only_without_bundle_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::new(
            HubSettings::with_root(dir.path()),
            Arc::new(NoBundles),
            Arc::new(crate::core::events::NullSink),
        )
        .unwrap();
        let item = model_item().with_remote_url("http://127.0.0.1:9/m1.zip");

        let error = manager
            .ensure_one(&item, AcquisitionPolicy::BundleOnly)
            .unwrap_err();
        assert_eq!(error.code(), "MODEL_MISSING_BUNDLED");
        assert!(manager.ledger().read().is_empty());

        let error = manager
            .ensure_one(&model_item(), AcquisitionPolicy::DownloadOnly)
            .unwrap_err();
        assert_eq!(error.code(), "MODEL_MISSING_REMOTE_URL");
    }

    #[test]
    fn check_reports_status_and_state() {
        let fx = fixture();
        fx.bundle("m1", &model_zip());
        fx.manager
            .ensure_one(&model_item(), AcquisitionPolicy::default())
            .unwrap();

        let results = fx.manager.check(&[
            CheckItem::from(&model_item()),
            CheckItem {
                key: "m2".into(),
                unpack_to: "stt/m2".into(),
                check_files: vec![],
            },
        ]);
        assert_eq!(results[0].status, InstallStatus::Installed);
        assert!(results[0].has_bundled_zip);
        assert!(results[0].state.is_some());
        assert_eq!(results[1].status, InstallStatus::Missing);
        assert!(!results[1].has_bundled_zip);
        assert!(results[1].state.is_none());
    }

    #[test]
    fn failure_result_carries_diagnostics() {
        let fx = fixture();
        fx.bundle("m1", &model_zip());
        let result = fx
            .manager
            .failure_result(&model_item(), &HubError::Http { status: 503 });
        assert!(!result.ok);
        assert_eq!(result.code.as_deref(), Some("HTTP_503"));
        assert!(result.has_bundled_zip);
        assert_eq!(result.used_source, UsedSource::None);
        assert_eq!(result.unpack_to, "stt/m1");
        assert_eq!(result.installed_path, fx.manager.root().join("stt/m1"));
    }

    #[test]
    fn manifest_entries_resolve_inside_the_install() {
        let fx = fixture();
        fx.bundle("m1", &zip_bytes(&[("encoder.onnx", &[3u8; 64])]));

        for entry in ["/etc/passwd", "../../../../../../../etc/passwd"] {
            let item = AssetItem::new("m1", "stt/m1").with_check_files([entry]);
            let error = fx
                .manager
                .ensure_one(&item, AcquisitionPolicy::BundleOnly)
                .unwrap_err();
            assert_eq!(error.message(), "UNPACK_INVALID:corrupt", "{entry}");
            assert!(!fx.manager.root().join("stt/m1").exists());
        }

        let item = AssetItem::new("m1", "stt/m1").with_check_files(["/encoder.onnx"]);
        let result = fx
            .manager
            .ensure_one(&item, AcquisitionPolicy::BundleOnly)
            .unwrap();
        assert!(result.installed_path.join("encoder.onnx").is_file());
    }

    #[test]
    fn encrypted_bundle_installs_with_its_password() {
        let fx = fixture();
        fx.bundle("m1", crate::models::archive::SECRET_ZIP);
        let item = AssetItem::new("m1", "stt/m1").with_check_files(["weights.bin"]);

        let error = fx
            .manager
            .ensure_one(&item.clone().with_password("hunter2"), AcquisitionPolicy::BundleOnly)
            .unwrap_err();
        assert_eq!(error.code(), "ERROR");
        assert!(!fx.manager.root().join("stt/m1").exists());
        assert!(!fx.manager.root().join("_tmp/unpack/m1").exists());
        assert!(fx.manager.ledger().get("m1").is_none());

        let error = fx
            .manager
            .ensure_one(&item, AcquisitionPolicy::BundleOnly)
            .unwrap_err();
        assert_eq!(error.code(), "ERROR");
        assert!(!fx.manager.root().join("stt/m1").exists());

        let result = fx
            .manager
            .ensure_one(&item.with_password("secret"), AcquisitionPolicy::BundleOnly)
            .unwrap();
        assert_eq!(
            fs::read_to_string(result.installed_path.join("weights.bin")).unwrap(),
            "encrypted weights payload 0123456789"
        );
    }

    #[test]
    fn unsafe_keys_never_reach_the_bundle_store() {
        let fx = fixture();
        fs::write(fx.bundle_dir.join("x.zip"), model_zip()).unwrap();

        assert!(!fx.manager.has_bundled_zip("../x"));
        let results = fx.manager.check(&[CheckItem {
            key: "../x".into(),
            unpack_to: "stt/x".into(),
            check_files: vec![],
        }]);
        assert!(!results[0].has_bundled_zip);

        let failure = fx
            .manager
            .failure_result(&AssetItem::new("../x", "stt/x"), &HubError::MissingBundled);
        assert!(!failure.has_bundled_zip);
    }

    #[test]
    fn scratch_paths_of_different_keys_never_alias() {
        let fx = fixture();
        let keys = ["m1", "m1.zip", "unpack_m1", "previous_m1", "zip", "unpack"];
        let mut seen = std::collections::HashSet::new();
        for key in keys {
            for path in [
                fx.manager.scratch_zip(key),
                fx.manager.staging_dir(key),
                fx.manager.backup_dir(key),
            ] {
                assert!(seen.insert(path.clone()), "{} reused", path.display());
            }
        }
    }
}
