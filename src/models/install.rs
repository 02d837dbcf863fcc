use std::{
    fs, io,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use super::archive::extract_zip;

/// Recreates `staging` empty and extracts `zip` into it.
pub fn unpack_to_staging(zip: &Path, staging: &Path, password: Option<&str>) -> Result<usize> {
    remove_path(staging)?;
    fs::create_dir_all(staging).with_context(|| format!("create {}", staging.display()))?;
    extract_zip(zip, staging, password)
}

/// Replaces `dest` with the validated `staging` tree.
pub fn promote(staging: &Path, dest: &Path, backup: &Path) -> Result<()> {
    promote_with(staging, dest, backup, |from, to| fs::rename(from, to))
}

/// Promotion with an injectable rename.
///
/// The prior `dest` is moved aside to `backup` (deleted outright if even that
/// rename is refused), then `staging` is renamed into place, falling back to a
/// recursive copy. If placement fails the partial tree is removed and the
/// backup restored; the backup is dropped only after placement succeeds.
pub fn promote_with<R>(staging: &Path, dest: &Path, backup: &Path, rename: R) -> Result<()>
where
    R: Fn(&Path, &Path) -> io::Result<()>,
{
    remove_path(backup)?;
    if path_exists(dest) {
        if let Err(error) = rename(dest, backup) {
            tracing::debug!("Cannot move {} aside ({error}); deleting it", dest.display());
            remove_path(dest)?;
        }
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }

    let placed = match rename(staging, dest) {
        Ok(()) => Ok(()),
        Err(error) => {
            tracing::debug!("Rename into {} rejected ({error}); copying", dest.display());
            copy_dir(staging, dest).map(|()| {
                if let Err(error) = remove_path(staging) {
                    tracing::warn!("Failed to clean staging {}: {error:#}", staging.display());
                }
            })
        }
    };

    match placed {
        Ok(()) => {
            if let Err(error) = remove_path(backup) {
                tracing::warn!("Failed to drop previous install {}: {error:#}", backup.display());
            }
            Ok(())
        }
        Err(error) => {
            // the previous install only goes back over a fully cleared dest
            if let Err(cleanup) = remove_path(dest) {
                tracing::warn!("Failed to clear partial install {}: {cleanup:#}", dest.display());
                return Err(error.context(format!(
                    "partial install left at {} ({cleanup:#}); previous install kept at {}",
                    dest.display(),
                    backup.display()
                )));
            }
            if path_exists(backup) {
                if let Err(restore) = rename(backup, dest) {
                    tracing::warn!(
                        "Failed to restore previous install into {}: {restore}",
                        dest.display()
                    );
                    return Err(error.context(format!(
                        "restore failed ({restore}); previous install kept at {}",
                        backup.display()
                    )));
                }
            }
            Err(error)
        }
    }
}

pub fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("read dir {}", src.display()))? {
        let entry = entry.context("read dir entry")?;
        let path = entry.path();
        let target: PathBuf = dst.join(entry.file_name());
        if entry.file_type().context("stat dir entry")?.is_dir() {
            copy_dir(&path, &target)?;
        } else {
            fs::copy(&path, &target)
                .with_context(|| format!("copy {} -> {}", path.display(), target.display()))?;
        }
    }
    Ok(())
}

/// Removes a file or directory tree; absence is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(error) => {
            return Err(error).with_context(|| format!("stat {}", path.display()));
        }
    };
    if metadata.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))
    } else {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))
    }
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}
