use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

const COPY_CHUNK: usize = 1024 * 1024;

/// Packaged-resource store holding archives addressed as `models/<key>.zip`.
pub trait BundleStore: Send + Sync {
    /// Cheap availability probe; must not copy anything.
    fn exists(&self, key: &str) -> bool;

    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send>>;
}

#[must_use]
pub fn bundle_asset_path(key: &str) -> String {
    format!("models/{key}.zip")
}

/// Store with no bundled resources at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBundles;

impl BundleStore for NoBundles {
    fn exists(&self, _key: &str) -> bool {
        false
    }

    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send>> {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no bundled resource {}", bundle_asset_path(key)),
        ))
    }
}

/// Directory-backed store: `<base>/models/<key>.zip`.
#[derive(Debug, Clone)]
pub struct DirBundleStore {
    base: PathBuf,
}

impl DirBundleStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn asset(&self, key: &str) -> PathBuf {
        self.base.join(bundle_asset_path(key))
    }
}

impl BundleStore for DirBundleStore {
    fn exists(&self, key: &str) -> bool {
        File::open(self.asset(key)).is_ok()
    }

    fn open(&self, key: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.asset(key))?;
        Ok(Box::new(file))
    }
}

/// Streams the bundled archive for `key` into `dst`, returning bytes copied.
pub fn copy_bundled_zip(store: &dyn BundleStore, key: &str, dst: &Path) -> Result<u64> {
    let source = store
        .open(key)
        .with_context(|| format!("open bundled {}", bundle_asset_path(key)))?;
    let mut reader = BufReader::with_capacity(COPY_CHUNK, source);
    let out = File::create(dst).with_context(|| format!("create {}", dst.display()))?;
    let mut writer = BufWriter::with_capacity(COPY_CHUNK, out);
    let copied = io::copy(&mut reader, &mut writer).context("copy bundled zip")?;
    writer.flush().context("flush bundled zip")?;
    Ok(copied)
}
