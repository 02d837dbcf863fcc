use std::path::{Component, Path, PathBuf};

use crate::core::error::{HubError, HubResult};

/// Normalizes an untrusted relative install path.
///
/// Backslashes become `/`, leading separators are dropped and every literal
/// `..` is removed. Never fails; empty input maps to the install root.
#[must_use]
pub fn safe_rel(rel: &str) -> String {
    let normalized = rel.replace('\\', "/");
    let stripped = normalized.trim_start_matches('/').replace("..", "");
    // removing `..` can expose a fresh leading separator ("/../etc" -> "/etc")
    stripped.trim_start_matches('/').to_string()
}

/// Joins the sanitized form of `rel` onto `root`, keeping only plain name
/// components so the result can never leave `root`.
#[must_use]
pub fn confined_join(root: &Path, rel: &str) -> PathBuf {
    let sanitized = safe_rel(rel);
    let mut path = root.to_path_buf();
    for component in Path::new(&sanitized).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}

/// Resolves the destination directory for an install, rejecting anything that
/// is not a strict descendant of `root` or that falls inside the scratch area.
pub fn resolve_install_dir(root: &Path, rel: &str, scratch_dir_name: &str) -> HubResult<PathBuf> {
    let resolved = confined_join(root, rel);
    let relative = resolved
        .strip_prefix(root)
        .map_err(|_| HubError::bad_args(format!("unpackTo escapes the install root: {rel}")))?;

    let mut components = relative.components();
    match components.next() {
        None => Err(HubError::bad_args(format!(
            "unpackTo resolves to the install root: {rel}"
        ))),
        Some(Component::Normal(first)) if first == scratch_dir_name => Err(HubError::bad_args(
            format!("unpackTo points into the scratch area: {rel}"),
        )),
        Some(_) => Ok(resolved),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_separators_and_parent_tokens() {
        assert_eq!(safe_rel("stt/en_kroko"), "stt/en_kroko");
        assert_eq!(safe_rel("\\stt\\en"), "stt/en");
        assert_eq!(safe_rel("///abs/path"), "abs/path");
        assert_eq!(safe_rel("../../etc"), "etc");
        assert_eq!(safe_rel("/../etc/passwd"), "etc/passwd");
        assert_eq!(safe_rel(""), "");
    }

    #[test]
    fn hostile_inputs_stay_under_root() {
        let root = Path::new("/data/models");
        for input in [
            "../../etc",
            "..\\..\\windows\\system32",
            "/etc/passwd",
            "\\\\server\\share",
            "a/../../b",
            "....//....//x",
        ] {
            let joined = confined_join(root, input);
            assert!(joined.starts_with(root), "{input} escaped to {joined:?}");
        }
    }

    #[test]
    fn empty_path_is_the_root() {
        let root = Path::new("/data/models");
        assert_eq!(confined_join(root, ""), root);
        assert_eq!(confined_join(root, ".."), root);
    }

    #[test]
    fn install_dir_must_be_a_strict_descendant() {
        let root = Path::new("/data/models");
        assert_eq!(
            resolve_install_dir(root, "stt/en", "_tmp").unwrap(),
            root.join("stt").join("en")
        );

        let error = resolve_install_dir(root, "..", "_tmp").unwrap_err();
        assert_eq!(error.code(), "BAD_ARGS");

        let error = resolve_install_dir(root, "_tmp/unpack_m1", "_tmp").unwrap_err();
        assert_eq!(error.code(), "BAD_ARGS");
    }
}
