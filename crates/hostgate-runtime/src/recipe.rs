//! Playbook selection for a host group.
//!
//! A group may have its own playbook, `<dir>/<group>.yml` (or `.yaml`), and
//! the directory may hold a fallback `default.yml` (or `.yaml`). The most
//! specific existing playbook wins; falling back or shadowing the default is
//! reported as a warning so that it shows up in the caller's output.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_RECIPE: &str = "default";

const EXTENSIONS: [&str; 2] = ["yml", "yaml"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipeWarning {
    /// No group playbook; the default is used.
    GroupMissing { group: String },
    /// Both exist; the group playbook shadows the default.
    BothPresent { group: String },
}

impl fmt::Display for RecipeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipeWarning::GroupMissing { group } => write!(
                f,
                "hostgroup playbook missing: {group}.{{yml|yaml}}; fallback to default"
            ),
            RecipeWarning::BothPresent { group } => write!(
                f,
                "both default and hostgroup ({group}) playbooks exist; prefer hostgroup"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipeSelection {
    pub path: PathBuf,
    pub warning: Option<RecipeWarning>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecipeError {
    #[error(
        "neither default nor hostgroup playbook for '{group}' exists under {} (tried .yml/.yaml)",
        dir.display()
    )]
    NotFound { dir: PathBuf, group: String },
    #[error("ambiguous playbook: both {} and {} exist", first.display(), second.display())]
    Ambiguous { first: PathBuf, second: PathBuf },
}

fn is_file(path: &Path) -> bool {
    path.metadata().is_ok_and(|m| m.is_file())
}

/// Look up `<dir>/<base>.yml` and `<dir>/<base>.yaml`. Both existing is an
/// error: neither spelling is preferred over the other.
pub fn find_recipe(dir: &Path, base: &str) -> Result<Option<PathBuf>, RecipeError> {
    let mut found = EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{base}.{ext}")))
        .filter(|p| is_file(p));
    match (found.next(), found.next()) {
        (Some(first), Some(second)) => Err(RecipeError::Ambiguous { first, second }),
        (first, _) => Ok(first),
    }
}

/// Choose the playbook for `group` under `dir`.
pub fn select_recipe(dir: &Path, group: &str) -> Result<RecipeSelection, RecipeError> {
    let default = find_recipe(dir, DEFAULT_RECIPE)?;
    let specific = find_recipe(dir, group)?;

    match (specific, default) {
        (Some(path), None) => Ok(RecipeSelection {
            path,
            warning: None,
        }),
        (Some(path), Some(_)) => Ok(RecipeSelection {
            path,
            warning: Some(RecipeWarning::BothPresent {
                group: group.to_owned(),
            }),
        }),
        (None, Some(path)) => Ok(RecipeSelection {
            path,
            warning: Some(RecipeWarning::GroupMissing {
                group: group.to_owned(),
            }),
        }),
        (None, None) => Err(RecipeError::NotFound {
            dir: dir.to_path_buf(),
            group: group.to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), "- hosts: all\n").unwrap();
    }

    #[test]
    fn only_default_falls_back_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "default.yml");
        let sel = select_recipe(dir.path(), "prod-goods-ms").unwrap();
        assert_eq!(sel.path, dir.path().join("default.yml"));
        assert_eq!(
            sel.warning,
            Some(RecipeWarning::GroupMissing {
                group: "prod-goods-ms".to_owned()
            })
        );
    }

    #[test]
    fn only_group_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "prod-goods-ms.yaml");
        let sel = select_recipe(dir.path(), "prod-goods-ms").unwrap();
        assert_eq!(sel.path, dir.path().join("prod-goods-ms.yaml"));
        assert_eq!(sel.warning, None);
    }

    #[test]
    fn both_prefers_group_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "default.yaml");
        touch(dir.path(), "prod-goods-ms.yml");
        let sel = select_recipe(dir.path(), "prod-goods-ms").unwrap();
        assert_eq!(sel.path, dir.path().join("prod-goods-ms.yml"));
        assert!(matches!(
            sel.warning,
            Some(RecipeWarning::BothPresent { .. })
        ));
    }

    #[test]
    fn neither_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "other-group.yml");
        let err = select_recipe(dir.path(), "prod-goods-ms").unwrap_err();
        assert!(matches!(err, RecipeError::NotFound { .. }));
        assert!(err.to_string().contains("prod-goods-ms"));
    }

    #[test]
    fn both_extensions_for_group_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "default.yml");
        touch(dir.path(), "prod-goods-ms.yml");
        touch(dir.path(), "prod-goods-ms.yaml");
        let err = select_recipe(dir.path(), "prod-goods-ms").unwrap_err();
        assert_eq!(
            err,
            RecipeError::Ambiguous {
                first: dir.path().join("prod-goods-ms.yml"),
                second: dir.path().join("prod-goods-ms.yaml"),
            }
        );
    }

    #[test]
    fn both_extensions_for_default_is_ambiguous() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "default.yml");
        touch(dir.path(), "default.yaml");
        assert!(matches!(
            select_recipe(dir.path(), "prod-goods-ms"),
            Err(RecipeError::Ambiguous { .. })
        ));
    }

    #[test]
    fn directories_do_not_count() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("prod-goods-ms.yml")).unwrap();
        touch(dir.path(), "default.yml");
        let sel = select_recipe(dir.path(), "prod-goods-ms").unwrap();
        assert_eq!(sel.path, dir.path().join("default.yml"));
    }

    #[test]
    fn selection_is_pure() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "default.yml");
        let a = select_recipe(dir.path(), "prod-goods-ms").unwrap();
        let b = select_recipe(dir.path(), "prod-goods-ms").unwrap();
        assert_eq!(a, b);
    }
}
