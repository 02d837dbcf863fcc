use std::{
    fs::{self, File},
    io::{self, BufReader},
    path::Path,
};

use anyhow::{anyhow, Context, Result};
use zip::read::ZipArchive;

/// Extracts every entry of the zip at `archive_path` into `dest`, preserving
/// relative paths. A non-empty `password` decrypts encrypted entries
/// (ZipCrypto or AES); entries whose names would escape `dest` are skipped.
///
/// Returns the number of files written.
pub fn extract_zip(archive_path: &Path, dest: &Path, password: Option<&str>) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("open archive {}", archive_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).context("open zip archive")?;
    let password = password.filter(|password| !password.is_empty());

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = match password {
            Some(password) => archive
                .by_index_decrypt(i, password.as_bytes())
                .with_context(|| format!("read zip entry {i}"))?
                .map_err(|_| anyhow!("invalid password for zip entry {i}"))?,
            None => archive
                .by_index(i)
                .with_context(|| format!("read zip entry {i}"))?,
        };

        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!("Skipping zip entry with unsafe name: {}", entry.name());
            continue;
        };
        let target = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).context("create zip dir")?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).context("create zip file parent")?;
        }
        let mut outfile = File::create(&target)
            .with_context(|| format!("create zip file {}", target.display()))?;
        io::copy(&mut entry, &mut outfile).context("write zip file")?;
        written += 1;
    }
    Ok(written)
}

/// ZipCrypto archive holding `weights.bin`
/// (`encrypted weights payload 0123456789`) under the password `secret`.
#[cfg(test)]
pub(crate) const SECRET_ZIP: &[u8] = &[
    0x50, 0x4b, 0x03, 0x04, 0x14, 0x00, 0x01, 0x00, 0x00, 0x00, 0x55, 0x7d,
    0x52, 0x5d, 0x11, 0x7c, 0x12, 0x4e, 0x30, 0x00, 0x00, 0x00, 0x24, 0x00,
    0x00, 0x00, 0x0b, 0x00, 0x00, 0x00, 0x77, 0x65, 0x69, 0x67, 0x68, 0x74,
    0x73, 0x2e, 0x62, 0x69, 0x6e, 0x92, 0x6d, 0xc1, 0xad, 0xbd, 0x32, 0xbe,
    0xb1, 0x20, 0xfb, 0xb4, 0xdf, 0x2b, 0x69, 0x13, 0xdc, 0x57, 0xa9, 0x7b,
    0x1c, 0xbd, 0xe1, 0x08, 0xbc, 0x1b, 0xee, 0xb9, 0x14, 0xcc, 0x69, 0x9a,
    0xac, 0xe0, 0x69, 0x89, 0xfc, 0x06, 0xe0, 0x91, 0x30, 0x27, 0x56, 0x87,
    0x0e, 0x3a, 0x61, 0x91, 0xbd, 0x50, 0x4b, 0x01, 0x02, 0x14, 0x00, 0x14,
    0x00, 0x01, 0x00, 0x00, 0x00, 0x55, 0x7d, 0x52, 0x5d, 0x11, 0x7c, 0x12,
    0x4e, 0x30, 0x00, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x0b, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xa4, 0x81, 0x00,
    0x00, 0x00, 0x00, 0x77, 0x65, 0x69, 0x67, 0x68, 0x74, 0x73, 0x2e, 0x62,
    0x69, 0x6e, 0x50, 0x4b, 0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
    0x01, 0x00, 0x39, 0x00, 0x00, 0x00, 0x59, 0x00, 0x00, 0x00, 0x00, 0x00,
];
