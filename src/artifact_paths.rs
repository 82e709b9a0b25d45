//! Purpose: Shared artifact-directory and base-name resolution helpers.
//! Exports: `INLINE_MODEL_BASE`, `artifact_base`, `artifact_dir`.
//! Role: Keep library and CLI artifact placement aligned from one source.
//! Invariants: Base names contain only `[A-Za-z0-9_-]`.
//! Invariants: An explicit directory always wins; `keep` places artifacts next to the model file.
use std::path::{Path, PathBuf};

/// Base name used when the model is given as inline text.
pub(crate) const INLINE_MODEL_BASE: &str = "mznpipe";

pub(crate) fn artifact_base(model: Option<&Path>) -> String {
    let stem = model
        .and_then(Path::file_stem)
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sanitized = stem
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    if sanitized.is_empty() {
        INLINE_MODEL_BASE.to_string()
    } else {
        sanitized
    }
}

pub(crate) fn artifact_dir(explicit: Option<&Path>, model: Option<&Path>, keep: bool) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if keep {
        if let Some(parent) = model.and_then(Path::parent) {
            if !parent.as_os_str().is_empty() {
                return parent.to_path_buf();
            }
        }
    }
    std::env::temp_dir()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{INLINE_MODEL_BASE, artifact_base, artifact_dir};

    #[test]
    fn base_comes_from_the_model_stem() {
        assert_eq!(artifact_base(Some(Path::new("/work/n queens.mzn"))), "n_queens");
        assert_eq!(artifact_base(Some(Path::new("golomb-11.mzn"))), "golomb-11");
        assert_eq!(artifact_base(None), INLINE_MODEL_BASE);
    }

    #[test]
    fn keep_places_artifacts_next_to_the_model() {
        let model = Path::new("/work/models/queens.mzn");
        assert_eq!(artifact_dir(None, Some(model), true), Path::new("/work/models"));
        assert_eq!(artifact_dir(None, Some(model), false), std::env::temp_dir());
        assert_eq!(
            artifact_dir(Some(Path::new("/out")), Some(model), true),
            Path::new("/out")
        );
        assert_eq!(artifact_dir(None, Some(Path::new("queens.mzn")), true), std::env::temp_dir());
    }
}
