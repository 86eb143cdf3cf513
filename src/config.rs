//! Artifact location fallback.

use std::path::{Path, PathBuf};

/// Fallback artifact location, relative to the user's home directory.
const DEFAULT_ARTIFACT: &str = "Desktop/in.jar";

/// The artifact given on the command line (or via `$ARTIFACT`), else
/// `~/Desktop/in.jar`.
pub fn resolve_artifact(given: Option<&Path>) -> PathBuf {
    resolve_artifact_from(given, dirs::home_dir())
}

fn resolve_artifact_from(given: Option<&Path>, home: Option<PathBuf>) -> PathBuf {
    match given.filter(|p| !p.as_os_str().is_empty()) {
        Some(p) => p.to_path_buf(),
        None => home.unwrap_or_else(|| PathBuf::from(".")).join(DEFAULT_ARTIFACT),
    }
}
