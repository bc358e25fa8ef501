//! Settings file load/save and the `apply_settings` patch plumbing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::types::{AppSettings, METADATA_DIR, SETTINGS_FILE};

pub const SETTINGS_VERSION: u32 = 1;

/// On-disk settings document: `{version, root_path, exclude_dirs,
/// include_docstrings}` under the root's metadata directory.
#[derive(Debug, Serialize, Deserialize)]
struct SettingsDoc {
    version: u32,
    root_path: String,
    exclude_dirs: BTreeSet<String>,
    include_docstrings: bool,
}

pub fn settings_path(root: &Path) -> PathBuf {
    root.join(METADATA_DIR).join(SETTINGS_FILE)
}

/// Load settings stored under `root`. Missing, corrupt, or version-mismatched
/// files yield `None`; the stored `root_path` is informative only — the
/// directory the file lives under wins.
pub fn load_settings(root: &Path) -> Option<AppSettings> {
    let path = settings_path(root);
    let raw = fs::read_to_string(&path).ok()?;
    let doc: SettingsDoc = match serde_json::from_str(&raw) {
        Ok(doc) => doc,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "settings file corrupt; using defaults");
            return None;
        }
    };
    if doc.version != SETTINGS_VERSION {
        warn!(found = doc.version, "settings schema mismatch; using defaults");
        return None;
    }
    Some(AppSettings {
        root_path: root.to_path_buf(),
        exclude_dirs: doc.exclude_dirs,
        include_docstrings: doc.include_docstrings,
    })
}

/// Persist settings under their root's metadata directory.
pub fn save_settings(settings: &AppSettings) -> std::io::Result<()> {
    let path = settings_path(&settings.root_path);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let doc = SettingsDoc {
        version: SETTINGS_VERSION,
        root_path: settings.root_path.to_string_lossy().replace('\\', "/"),
        exclude_dirs: settings.exclude_dirs.clone(),
        include_docstrings: settings.include_docstrings,
    };
    fs::write(path, serde_json::to_vec(&doc)?)
}

/// Root must exist, be a directory, and be readable.
pub fn validate_root(root: &Path) -> Result<()> {
    let meta = fs::metadata(root).map_err(|e| {
        EngineError::InvalidSettings(format!("root path '{}' is not accessible: {e}", root.display()))
    })?;
    if !meta.is_dir() {
        return Err(EngineError::InvalidSettings(format!(
            "root path '{}' is not a directory",
            root.display()
        )));
    }
    fs::read_dir(root).map_err(|e| {
        EngineError::InvalidSettings(format!("root path '{}' is not readable: {e}", root.display()))
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// A partial settings update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub root_path: Option<PathBuf>,
    pub exclude_dirs: Option<BTreeSet<String>>,
    pub include_docstrings: Option<bool>,
}

/// Outcome of `apply_settings`: which fields actually changed, and the full
/// resulting settings.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedSettings {
    pub changed: Vec<String>,
    pub settings: AppSettings,
}

/// Merge a patch over current settings, reporting the fields whose values
/// actually differ.
pub fn merge_patch(current: &AppSettings, patch: &SettingsPatch) -> (AppSettings, Vec<String>) {
    let mut next = current.clone();
    let mut changed = Vec::new();

    if let Some(root) = &patch.root_path {
        if root != &current.root_path {
            next.root_path = root.clone();
            changed.push("root_path".to_string());
        }
    }
    if let Some(excludes) = &patch.exclude_dirs {
        if excludes != &current.exclude_dirs {
            next.exclude_dirs = excludes.clone();
            changed.push("exclude_dirs".to_string());
        }
    }
    if let Some(flag) = patch.include_docstrings {
        if flag != current.include_docstrings {
            next.include_docstrings = flag;
            changed.push("include_docstrings".to_string());
        }
    }

    (next, changed)
}
