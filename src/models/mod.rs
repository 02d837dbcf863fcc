mod archive;
mod bundle;
mod download;
mod install;
mod ledger;
mod locks;
mod manager;
mod metadata;
mod path;
mod probe;
mod service;

pub use archive::extract_zip;
pub use bundle::{bundle_asset_path, copy_bundled_zip, BundleStore, DirBundleStore, NoBundles};
pub use download::RemoteFetcher;
pub use install::promote;
pub use ledger::{StateLedger, StateMap, StateRecord};
pub use locks::KeyedLocks;
pub use manager::{
    AcquisitionPolicy, AssetItem, CheckItem, CheckResult, EnsureResult, ModelManager, UsedSource,
};
pub use metadata::{compute_sha256, digests_match};
pub use path::{confined_join, resolve_install_dir, safe_rel};
pub use probe::{check_installed, InstallStatus, MIN_FILE_SIZE};
pub use service::{ensure_batch, Abandoned, InstallService, Ticket};
