//! On-disk state of the debug manager.
//!
//! Breakpoints and launch configurations live in two JSON files under the
//! state directory. Every write goes to a temporary sibling first and is
//! renamed into place.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::breakpoint::Breakpoint;
use crate::error::DebugError;
use crate::launch::LaunchConfiguration;

pub const BREAKPOINTS_FILE: &str = "breakpoints.json";
pub const LAUNCHES_FILE: &str = "launches.json";

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct BreakpointFile {
    version: u32,
    breakpoints: Vec<Breakpoint>,
}

#[derive(Serialize, Deserialize)]
struct LaunchFile {
    version: u32,
    launches: Vec<LaunchConfiguration>,
}

/// Reads and writes the persisted catalogs.
#[derive(Debug, Clone)]
pub struct DebugStore {
    dir: PathBuf,
}

impl DebugStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn breakpoints_path(&self) -> PathBuf {
        self.dir.join(BREAKPOINTS_FILE)
    }

    pub fn launches_path(&self) -> PathBuf {
        self.dir.join(LAUNCHES_FILE)
    }

    /// Persisted breakpoints, empty when the file does not exist yet.
    pub fn load_breakpoints(&self) -> Result<Vec<Breakpoint>, DebugError> {
        Ok(read_json::<BreakpointFile>(&self.breakpoints_path())?
            .map(|file| file.breakpoints)
            .unwrap_or_default())
    }

    pub fn save_breakpoints<'a>(
        &self,
        breakpoints: impl IntoIterator<Item = &'a Breakpoint>,
    ) -> Result<(), DebugError> {
        let file = BreakpointFile {
            version: FORMAT_VERSION,
            breakpoints: breakpoints
                .into_iter()
                .map(|bp| Breakpoint {
                    verification: None,
                    ..bp.clone()
                })
                .collect(),
        };
        write_json(&self.breakpoints_path(), &file)
    }

    /// Persisted launch configurations, empty when the file does not
    /// exist yet.
    pub fn load_launches(&self) -> Result<Vec<LaunchConfiguration>, DebugError> {
        Ok(read_json::<LaunchFile>(&self.launches_path())?
            .map(|file| file.launches)
            .unwrap_or_default())
    }

    pub fn save_launches<'a>(
        &self,
        launches: impl IntoIterator<Item = &'a LaunchConfiguration>,
    ) -> Result<(), DebugError> {
        let file = LaunchFile {
            version: FORMAT_VERSION,
            launches: launches.into_iter().cloned().collect(),
        };
        write_json(&self.launches_path(), &file)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DebugError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| DebugError::Persistence(format!("{}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), DebugError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DebugError::Persistence(format!("{}: {e}", path.display())))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)?;
    tracing::debug!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::{BreakpointCatalog, BreakpointKind};
    use crate::launch::{LaunchAttribute, LaunchCatalog, LaunchMode};
    use std::collections::BTreeSet;

    #[test]
    fn missing_files_load_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DebugStore::new(dir.path().join("state"));
        assert!(store.load_breakpoints().unwrap().is_empty());
        assert!(store.load_launches().unwrap().is_empty());
    }

    #[test]
    fn breakpoints_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DebugStore::new(dir.path().join("state"));

        let mut catalog = BreakpointCatalog::new();
        catalog.add_line("demo", Path::new("/src/A.java"), 10, None, None);
        catalog.add_line("demo", Path::new("/src/B.java"), 3, Some(5), None);
        catalog.set_exception(false, true);
        store.save_breakpoints(catalog.all()).unwrap();

        let reloaded = BreakpointCatalog::from_breakpoints(store.load_breakpoints().unwrap());
        let lines = |c: &BreakpointCatalog| -> BTreeSet<(PathBuf, u32)> {
            c.all()
                .filter_map(|bp| Some((bp.path()?.to_path_buf(), bp.line()?)))
                .collect()
        };
        assert_eq!(lines(&catalog), lines(&reloaded));
        assert_eq!(
            reloaded.exception().map(|bp| bp.kind.clone()),
            Some(BreakpointKind::Exception {
                caught: false,
                uncaught: true
            })
        );
    }

    #[test]
    fn breakpoints_and_launches_use_separate_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DebugStore::new(dir.path());
        let mut catalog = BreakpointCatalog::new();
        catalog.set_exception(true, true);
        store.save_breakpoints(catalog.all()).unwrap();

        assert!(store.breakpoints_path().exists());
        assert!(!store.launches_path().exists());
        assert!(store.load_launches().unwrap().is_empty());
    }

    #[test]
    fn launches_round_trip_only_saved() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DebugStore::new(dir.path());

        let mut catalog = LaunchCatalog::new();
        let saved = catalog.create("Run", "java", "demo", LaunchMode::Launch);
        catalog
            .working_copy(saved)
            .unwrap()
            .set_attribute(LaunchAttribute::MainClass, "app.Main");
        catalog.save(saved).unwrap();
        catalog.create("Scratch", "java", "demo", LaunchMode::Attach);
        store.save_launches(catalog.saved()).unwrap();

        let reloaded = LaunchCatalog::from_saved(store.load_launches().unwrap());
        assert_eq!(reloaded.len(), 1);
        let config = reloaded.get(saved).unwrap();
        assert_eq!(config.attribute(LaunchAttribute::MainClass), Some("app.Main"));
        assert!(config.saved);
    }

    #[test]
    fn corrupt_file_is_persistence_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DebugStore::new(dir.path());
        fs::write(store.breakpoints_path(), "{not json").unwrap();
        assert!(matches!(
            store.load_breakpoints(),
            Err(DebugError::Persistence(_))
        ));
    }
}
