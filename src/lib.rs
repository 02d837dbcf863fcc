//! Installs on-device model assets from bundled or remote zip archives.
//!
//! Each asset is probed, acquired, optionally checked against a SHA-256
//! digest, unpacked into a staging area and promoted into place, with the
//! provenance of every install kept in a JSON ledger under the install root.

pub mod core;
pub mod models;

pub use crate::core::{
    error::{HubError, HubResult},
    events::{ChannelSink, EventBus, FnSink, NullSink, Phase, ProgressEvent, ProgressSink},
    hub::ModelHub,
    logging::setup_logging,
    settings::HubSettings,
};
pub use crate::models::{
    AcquisitionPolicy, AssetItem, BundleStore, CheckItem, CheckResult, DirBundleStore,
    EnsureResult, InstallStatus, NoBundles, StateRecord, Ticket, UsedSource,
};
