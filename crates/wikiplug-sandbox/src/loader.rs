//! Plugin discovery.
//!
//! [`discover`] scans a directory for `.lua` and `.wasm` files and returns
//! them sorted by file name (byte-wise, guest kind ignored).  That order is
//! the order in which a [`PluginManager`](crate::manager::PluginManager)
//! registers them and therefore the order `apply_all` runs them in.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{PluginError, Result};
use crate::plugin::PluginKind;

/// A candidate plugin file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// Runtime implied by the extension.
    pub kind: PluginKind,
}

/// A file that was found but could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPlugin {
    /// Path of the file.
    pub path: PathBuf,
    /// Rendered load error.
    pub error: String,
}

/// Report returned by a directory load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryLoad {
    /// Names registered, in registration order.
    pub loaded: Vec<String>,
    /// Files skipped because they failed to load.
    pub skipped: Vec<SkippedPlugin>,
}

/// Map a path to the runtime its extension selects.
pub fn kind_for_path(path: &Path) -> Option<PluginKind> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("lua") => Some(PluginKind::Scripted),
        Some("wasm") => Some(PluginKind::Compiled),
        _ => None,
    }
}

/// Derive a plugin name from a file stem (`upper.lua` becomes `"upper"`).
pub fn plugin_name_from_path(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            PluginError::load_failed(
                &path.display().to_string(),
                "cannot derive a plugin name from the file name",
            )
        })
}

/// List plugin files in `dir`, sorted by file name.
///
/// Subdirectories and files with other extensions are ignored.  A missing
/// path or a path that is not a directory is [`PluginError::LoadFailed`].
pub fn discover(dir: &Path) -> Result<Vec<PluginFile>> {
    if !dir.is_dir() {
        return Err(PluginError::load_failed(
            &dir.display().to_string(),
            "plugin path does not exist or is not a directory",
        ));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            tracing::debug!(path = %path.display(), "skipping non-file entry");
            continue;
        }
        match kind_for_path(&path) {
            Some(kind) => files.push(PluginFile { path, kind }),
            None => tracing::debug!(path = %path.display(), "skipping non-plugin file"),
        }
    }

    files.sort_by(|a, b| a.path.file_name().cmp(&b.path.file_name()));

    tracing::info!(
        dir = %dir.display(),
        count = files.len(),
        "discovered plugin files"
    );
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn kind_from_extension() {
        assert_eq!(kind_for_path(Path::new("a.lua")), Some(PluginKind::Scripted));
        assert_eq!(kind_for_path(Path::new("a.wasm")), Some(PluginKind::Compiled));
        assert_eq!(kind_for_path(Path::new("a.txt")), None);
        assert_eq!(kind_for_path(Path::new("lua")), None);
    }

    #[test]
    fn name_from_stem() {
        assert_eq!(plugin_name_from_path(Path::new("/p/upper.lua")).unwrap(), "upper");
        assert_eq!(
            plugin_name_from_path(Path::new("strip.links.wasm")).unwrap(),
            "strip.links"
        );
        assert!(plugin_name_from_path(Path::new("/")).is_err());
    }

    #[test]
    fn discovery_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.lua", "a.wasm", "b.lua", "notes.txt", "B.wasm"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("nested.lua")).unwrap();

        let files = discover(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["B.wasm", "a.wasm", "b.lua", "c.lua"]);
        assert_eq!(files[0].kind, PluginKind::Compiled);
        assert_eq!(files[2].kind, PluginKind::Scripted);
    }

    #[test]
    fn missing_directory_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, PluginError::LoadFailed { .. }));
    }

    #[test]
    fn file_path_is_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.lua");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            discover(&file).unwrap_err(),
            PluginError::LoadFailed { .. }
        ));
    }

    #[test]
    fn empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path()).unwrap().is_empty());
    }
}
