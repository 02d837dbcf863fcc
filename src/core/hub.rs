use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use crossbeam_channel::Receiver;

use crate::core::{
    error::HubResult,
    events::{EventBus, ProgressEvent, ProgressSink},
    settings::HubSettings,
};
use crate::models::{
    AcquisitionPolicy, AssetItem, BundleStore, CheckItem, CheckResult, DirBundleStore,
    EnsureResult, InstallService, ModelManager, NoBundles, Ticket,
};

/// Host-facing entry point: owns the install manager, its worker pool and
/// the progress bus.
pub struct ModelHub {
    manager: Arc<ModelManager>,
    service: InstallService,
    events: Arc<EventBus>,
}

impl ModelHub {
    /// Builds a hub from settings, reading bundled archives from
    /// `settings.bundle_dir` when one is configured.
    pub fn new(settings: HubSettings) -> Result<Self> {
        let bundles: Arc<dyn BundleStore> = match &settings.bundle_dir {
            Some(dir) => Arc::new(DirBundleStore::new(dir)),
            None => Arc::new(NoBundles),
        };
        Self::with_bundles(settings, bundles)
    }

    /// Builds a hub from the per-user config file (see
    /// [`default_config_path`](crate::core::settings::default_config_path)).
    pub fn from_default_config() -> Result<Self> {
        Self::new(HubSettings::load_default()?)
    }

    pub fn with_bundles(settings: HubSettings, bundles: Arc<dyn BundleStore>) -> Result<Self> {
        let events = Arc::new(EventBus::new());
        let workers = settings.worker_count();
        let manager = Arc::new(ModelManager::new(settings, bundles, events.clone())?);
        let service = InstallService::new(manager.clone(), workers)?;
        tracing::info!("Model hub ready at {}", manager.root().display());
        Ok(Self {
            manager,
            service,
            events,
        })
    }

    /// Absolute install root, created if needed.
    pub fn get_root(&self) -> Result<PathBuf> {
        self.manager.ensure_directory()?;
        Ok(self.manager.root().to_path_buf())
    }

    pub fn get_path(&self, unpack_to: &str) -> PathBuf {
        self.manager.path_for(unpack_to)
    }

    pub fn check(&self, items: &[CheckItem]) -> Vec<CheckResult> {
        self.manager.check(items)
    }

    pub fn ensure_installed(
        &self,
        item: AssetItem,
        policy: AcquisitionPolicy,
    ) -> Ticket<HubResult<EnsureResult>> {
        self.service.ensure_installed(item, policy)
    }

    pub fn ensure_installed_many(
        &self,
        items: Vec<AssetItem>,
        policy: AcquisitionPolicy,
    ) -> Ticket<Vec<EnsureResult>> {
        self.service.ensure_installed_many(items, policy)
    }

    /// Blocking form of [`ModelHub::ensure_installed`] for plain threads.
    pub fn ensure_installed_blocking(
        &self,
        item: AssetItem,
        policy: AcquisitionPolicy,
    ) -> HubResult<EnsureResult> {
        self.ensure_installed(item, policy).wait()?
    }

    pub fn subscribe(&self) -> Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn add_sink(&self, sink: Arc<dyn ProgressSink>) {
        self.events.add_sink(sink);
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }
}
