//! Breakpoint model and catalog.
//!
//! Breakpoints are a tagged variant: line breakpoints carry a file
//! location, the exception breakpoint carries caught/uncaught flags. The
//! catalog keeps line breakpoints unique per (file, line) and holds at
//! most one exception breakpoint.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use relay_core::Anchor;
use serde::{Deserialize, Serialize};

use crate::error::DebugError;
use crate::protocol::{BreakpointResponse, SourceBreakpoint};

pub type BreakpointId = u64;

/// Variant-specific part of a breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakpointKind {
    Line {
        /// Project the file belongs to.
        project: String,
        /// Source file path.
        path: PathBuf,
        /// Line number (1-based).
        line: u32,
        /// Column (1-based), if the breakpoint is column-precise.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<u32>,
        /// Edit-stable location in the open buffer.
        #[serde(skip)]
        anchor: Option<Anchor>,
    },
    Exception {
        /// Break when a caught exception is thrown.
        caught: bool,
        /// Break when an exception is not caught.
        uncaught: bool,
    },
}

/// Adapter acknowledgement of the last synchronization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: bool,
    /// Adapter-assigned ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_id: Option<i64>,
    /// Line the adapter actually placed the breakpoint on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&BreakpointResponse> for Verification {
    fn from(resp: &BreakpointResponse) -> Self {
        Self {
            verified: resp.verified,
            adapter_id: resp.id,
            line: resp.line,
            message: resp.message.clone(),
        }
    }
}

/// A client-side breakpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: BreakpointId,
    pub enabled: bool,
    /// Condition expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// The condition is kept but not sent while this is false.
    #[serde(default = "enabled_by_default")]
    pub condition_enabled: bool,
    /// Hit condition expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    /// Log message (logpoint).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
    #[serde(flatten)]
    pub kind: BreakpointKind,
    /// Not persisted: only meaningful for the running adapter.
    #[serde(default, skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
}

fn enabled_by_default() -> bool {
    true
}

impl Breakpoint {
    fn new(id: BreakpointId, kind: BreakpointKind) -> Self {
        Self {
            id,
            enabled: true,
            condition: None,
            condition_enabled: true,
            hit_condition: None,
            log_message: None,
            kind,
            verification: None,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self.kind, BreakpointKind::Exception { .. })
    }

    /// File of a line breakpoint.
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            BreakpointKind::Line { path, .. } => Some(path),
            BreakpointKind::Exception { .. } => None,
        }
    }

    /// Project of a line breakpoint.
    pub fn project(&self) -> Option<&str> {
        match &self.kind {
            BreakpointKind::Line { project, .. } => Some(project),
            BreakpointKind::Exception { .. } => None,
        }
    }

    pub fn line(&self) -> Option<u32> {
        match self.kind {
            BreakpointKind::Line { line, .. } => Some(line),
            BreakpointKind::Exception { .. } => None,
        }
    }

    /// Wire form of an enabled line breakpoint. Disabled conditions are
    /// left out.
    pub fn to_source_breakpoint(&self) -> Option<SourceBreakpoint> {
        if !self.enabled {
            return None;
        }
        let BreakpointKind::Line { line, column, .. } = self.kind else {
            return None;
        };
        let condition = if self.condition_enabled {
            self.condition.clone()
        } else {
            None
        };
        Some(SourceBreakpoint {
            line,
            column,
            condition,
            hit_condition: self.hit_condition.clone(),
            log_message: self.log_message.clone(),
        })
    }

    /// Apply one property edit. [`BreakpointProperty::Clear`] is handled
    /// by the catalog and rejected here.
    pub fn apply(&mut self, property: BreakpointProperty, value: &str) -> Result<(), DebugError> {
        match property {
            BreakpointProperty::Clear => {
                return Err(DebugError::Configuration(
                    "CLEAR cannot be applied to a breakpoint in place".into(),
                ))
            }
            BreakpointProperty::Enabled => self.enabled = parse_flag(property, value)?,
            BreakpointProperty::Condition => self.condition = non_empty(value),
            BreakpointProperty::ConditionEnabled => {
                self.condition_enabled = parse_flag(property, value)?
            }
            BreakpointProperty::HitCondition => self.hit_condition = non_empty(value),
            BreakpointProperty::LogMessage => self.log_message = non_empty(value),
            BreakpointProperty::Caught | BreakpointProperty::Uncaught => {
                let flag = parse_flag(property, value)?;
                let BreakpointKind::Exception { caught, uncaught } = &mut self.kind else {
                    return Err(DebugError::Configuration(format!(
                        "{} only applies to the exception breakpoint",
                        property.as_str()
                    )));
                };
                if property == BreakpointProperty::Caught {
                    *caught = flag;
                } else {
                    *uncaught = flag;
                }
            }
        }
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_flag(property: BreakpointProperty, value: &str) -> Result<bool, DebugError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(DebugError::Configuration(format!(
            "{} expects a boolean, got '{other}'",
            property.as_str()
        ))),
    }
}

/// Editable breakpoint properties, named as the editor sends them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointProperty {
    /// Delete the breakpoint; later edits in the same batch are ignored.
    Clear,
    Enabled,
    Condition,
    ConditionEnabled,
    HitCondition,
    LogMessage,
    Caught,
    Uncaught,
}

impl BreakpointProperty {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakpointProperty::Clear => "CLEAR",
            BreakpointProperty::Enabled => "ENABLED",
            BreakpointProperty::Condition => "CONDITION",
            BreakpointProperty::ConditionEnabled => "CONDITION_ENABLED",
            BreakpointProperty::HitCondition => "HIT_CONDITION",
            BreakpointProperty::LogMessage => "LOG_MESSAGE",
            BreakpointProperty::Caught => "CAUGHT",
            BreakpointProperty::Uncaught => "UNCAUGHT",
        }
    }
}

impl FromStr for BreakpointProperty {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CLEAR" => Ok(BreakpointProperty::Clear),
            "ENABLED" => Ok(BreakpointProperty::Enabled),
            "CONDITION" => Ok(BreakpointProperty::Condition),
            "CONDITION_ENABLED" => Ok(BreakpointProperty::ConditionEnabled),
            "HIT_CONDITION" => Ok(BreakpointProperty::HitCondition),
            "LOG_MESSAGE" => Ok(BreakpointProperty::LogMessage),
            "CAUGHT" => Ok(BreakpointProperty::Caught),
            "UNCAUGHT" => Ok(BreakpointProperty::Uncaught),
            _ => Err(DebugError::Configuration(format!(
                "unknown breakpoint property: {s}"
            ))),
        }
    }
}

/// All breakpoints known to the manager.
#[derive(Debug, Clone)]
pub struct BreakpointCatalog {
    next_id: BreakpointId,
    entries: BTreeMap<BreakpointId, Breakpoint>,
    exception: Option<BreakpointId>,
}

impl Default for BreakpointCatalog {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
            exception: None,
        }
    }
}

impl BreakpointCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted entries. Duplicate locations and extra
    /// exception breakpoints are dropped, first one wins.
    pub fn from_breakpoints(breakpoints: Vec<Breakpoint>) -> Self {
        let mut catalog = Self::new();
        for bp in breakpoints {
            let duplicate = match &bp.kind {
                BreakpointKind::Line { path, line, .. } => catalog.find_line(path, *line).is_some(),
                BreakpointKind::Exception { .. } => catalog.exception.is_some(),
            };
            if duplicate || catalog.entries.contains_key(&bp.id) {
                tracing::warn!("dropping duplicate persisted breakpoint {}", bp.id);
                continue;
            }
            if bp.is_exception() {
                catalog.exception = Some(bp.id);
            }
            catalog.next_id = catalog.next_id.max(bp.id + 1);
            catalog.entries.insert(bp.id, bp);
        }
        catalog
    }

    fn allocate(&mut self) -> BreakpointId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Add a line breakpoint. `None` when one already exists at
    /// (`path`, `line`).
    pub fn add_line(
        &mut self,
        project: &str,
        path: &Path,
        line: u32,
        column: Option<u32>,
        anchor: Option<Anchor>,
    ) -> Option<BreakpointId> {
        if self.find_line(path, line).is_some() {
            return None;
        }
        let id = self.allocate();
        let kind = BreakpointKind::Line {
            project: project.to_string(),
            path: path.to_path_buf(),
            line,
            column,
            anchor,
        };
        self.entries.insert(id, Breakpoint::new(id, kind));
        Some(id)
    }

    pub fn find_line(&self, path: &Path, line: u32) -> Option<&Breakpoint> {
        self.entries.values().find(|bp| {
            matches!(&bp.kind, BreakpointKind::Line { path: p, line: l, .. } if p == path && *l == line)
        })
    }

    /// Set the exception breakpoint flags, creating it when absent.
    /// Returns the id and whether it was created.
    pub fn set_exception(&mut self, caught: bool, uncaught: bool) -> (BreakpointId, bool) {
        if let Some(id) = self.exception {
            if let Some(bp) = self.entries.get_mut(&id) {
                bp.kind = BreakpointKind::Exception { caught, uncaught };
                return (id, false);
            }
        }
        let id = self.allocate();
        self.entries.insert(
            id,
            Breakpoint::new(id, BreakpointKind::Exception { caught, uncaught }),
        );
        self.exception = Some(id);
        (id, true)
    }

    pub fn exception(&self) -> Option<&Breakpoint> {
        self.exception.and_then(|id| self.entries.get(&id))
    }

    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: BreakpointId) -> Option<&mut Breakpoint> {
        self.entries.get_mut(&id)
    }

    /// Remove one breakpoint, clearing the exception slot if it was the
    /// exception breakpoint.
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        let removed = self.entries.remove(&id)?;
        if self.exception == Some(id) {
            self.exception = None;
        }
        Some(removed)
    }

    /// Remove everything, returning the removed entries in id order.
    pub fn clear(&mut self) -> Vec<Breakpoint> {
        let ids: Vec<BreakpointId> = self.entries.keys().copied().collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Line breakpoints of one file, ordered by line.
    pub fn for_file(&self, path: &Path) -> Vec<&Breakpoint> {
        let mut list: Vec<&Breakpoint> = self
            .entries
            .values()
            .filter(|bp| bp.path() == Some(path))
            .collect();
        list.sort_by_key(|bp| bp.line());
        list
    }

    /// Distinct (project, file) pairs that have line breakpoints.
    pub fn files(&self) -> Vec<(String, PathBuf)> {
        let mut seen = HashSet::new();
        let mut files: Vec<(String, PathBuf)> = self
            .entries
            .values()
            .filter_map(|bp| match &bp.kind {
                BreakpointKind::Line { project, path, .. } => Some((project.clone(), path.clone())),
                BreakpointKind::Exception { .. } => None,
            })
            .filter(|(_, path)| seen.insert(path.clone()))
            .collect();
        files.sort();
        files
    }

    /// Move a line breakpoint to `line`, replacing its anchor when one is
    /// given. Refused when another breakpoint already sits on that line.
    pub fn relocate(&mut self, id: BreakpointId, line: u32, new_anchor: Option<Anchor>) -> bool {
        let Some(path) = self.get(id).and_then(|bp| bp.path()).map(Path::to_path_buf) else {
            return false;
        };
        if self.find_line(&path, line).is_some_and(|other| other.id != id) {
            return false;
        }
        match self.entries.get_mut(&id).map(|bp| &mut bp.kind) {
            Some(BreakpointKind::Line {
                line: current,
                anchor,
                ..
            }) => {
                *current = line;
                if new_anchor.is_some() {
                    *anchor = new_anchor;
                }
                true
            }
            _ => false,
        }
    }

    /// Record the adapter's answers for `ids`, matched by position.
    /// Returns the ids whose verification changed.
    pub fn apply_verification(
        &mut self,
        ids: &[BreakpointId],
        responses: &[BreakpointResponse],
    ) -> Vec<BreakpointId> {
        if ids.len() != responses.len() {
            tracing::warn!(
                "adapter acknowledged {} of {} breakpoints",
                responses.len(),
                ids.len()
            );
        }
        let mut changed = Vec::new();
        for (id, resp) in ids.iter().zip(responses) {
            if let Some(bp) = self.entries.get_mut(id) {
                let verification = Some(Verification::from(resp));
                if bp.verification != verification {
                    bp.verification = verification;
                    changed.push(*id);
                }
            }
        }
        changed
    }

    pub fn all(&self) -> impl Iterator<Item = &Breakpoint> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(name: &str) -> PathBuf {
        PathBuf::from(format!("/src/{name}"))
    }

    #[test]
    fn line_breakpoint_deduplicated_by_file_and_line() {
        let mut catalog = BreakpointCatalog::new();
        let path = test_path("Main.java");
        let first = catalog.add_line("demo", &path, 10, None, None);
        let second = catalog.add_line("demo", &path, 10, Some(4), None);
        assert_eq!(first, Some(1));
        assert_eq!(second, None);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.add_line("demo", &path, 11, None, None).is_some());
    }

    #[test]
    fn exception_breakpoint_merges_flags() {
        let mut catalog = BreakpointCatalog::new();
        let (id, created) = catalog.set_exception(false, true);
        assert!(created);
        let (again, created) = catalog.set_exception(true, false);
        assert!(!created);
        assert_eq!(id, again);

        let exceptions: Vec<_> = catalog.all().filter(|bp| bp.is_exception()).collect();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(
            exceptions[0].kind,
            BreakpointKind::Exception {
                caught: true,
                uncaught: false
            }
        );
    }

    #[test]
    fn removing_exception_clears_slot() {
        let mut catalog = BreakpointCatalog::new();
        let (id, _) = catalog.set_exception(true, true);
        assert!(catalog.remove(id).is_some());
        assert!(catalog.exception().is_none());
        let (new_id, created) = catalog.set_exception(true, true);
        assert!(created);
        assert_ne!(id, new_id);
    }

    #[test]
    fn source_breakpoint_skips_disabled() {
        let mut catalog = BreakpointCatalog::new();
        let id = catalog.add_line("demo", &test_path("a.rs"), 3, None, None).unwrap();
        let bp = catalog.get_mut(id).unwrap();
        bp.apply(BreakpointProperty::Condition, "x > 1").unwrap();
        assert_eq!(
            bp.to_source_breakpoint().unwrap().condition.as_deref(),
            Some("x > 1")
        );

        bp.apply(BreakpointProperty::ConditionEnabled, "false").unwrap();
        assert_eq!(bp.to_source_breakpoint().unwrap().condition, None);

        bp.apply(BreakpointProperty::Enabled, "false").unwrap();
        assert!(bp.to_source_breakpoint().is_none());
    }

    #[test]
    fn apply_rejects_bad_values() {
        let mut catalog = BreakpointCatalog::new();
        let id = catalog.add_line("demo", &test_path("a.rs"), 3, None, None).unwrap();
        let bp = catalog.get_mut(id).unwrap();
        assert!(bp.apply(BreakpointProperty::Enabled, "maybe").is_err());
        assert!(bp.apply(BreakpointProperty::Caught, "true").is_err());
        assert!(bp.apply(BreakpointProperty::Clear, "").is_err());
        bp.apply(BreakpointProperty::HitCondition, "  ").unwrap();
        assert_eq!(bp.hit_condition, None);
    }

    #[test]
    fn property_names_parse_case_insensitively() {
        assert_eq!(
            "condition_enabled".parse::<BreakpointProperty>().unwrap(),
            BreakpointProperty::ConditionEnabled
        );
        assert_eq!("CLEAR".parse::<BreakpointProperty>().unwrap().as_str(), "CLEAR");
        assert!("COLOR".parse::<BreakpointProperty>().is_err());
    }

    #[test]
    fn verification_matched_by_position() {
        let mut catalog = BreakpointCatalog::new();
        let path = test_path("a.rs");
        let a = catalog.add_line("demo", &path, 3, None, None).unwrap();
        let b = catalog.add_line("demo", &path, 9, None, None).unwrap();
        let responses = vec![
            BreakpointResponse {
                id: Some(100),
                verified: true,
                message: None,
                line: Some(4),
                column: None,
            },
            BreakpointResponse {
                id: None,
                verified: false,
                message: Some("no code".into()),
                line: None,
                column: None,
            },
        ];
        let changed = catalog.apply_verification(&[a, b], &responses);
        assert_eq!(changed, vec![a, b]);
        assert_eq!(catalog.get(a).unwrap().verification.as_ref().unwrap().line, Some(4));
        assert!(!catalog.get(b).unwrap().verification.as_ref().unwrap().verified);

        // Same answer again changes nothing.
        assert!(catalog.apply_verification(&[a, b], &responses).is_empty());
    }

    #[test]
    fn files_and_for_file() {
        let mut catalog = BreakpointCatalog::new();
        catalog.add_line("demo", &test_path("b.rs"), 20, None, None);
        catalog.add_line("demo", &test_path("b.rs"), 5, None, None);
        catalog.add_line("demo", &test_path("a.rs"), 1, None, None);
        catalog.set_exception(true, false);

        assert_eq!(
            catalog.files(),
            vec![
                ("demo".to_string(), test_path("a.rs")),
                ("demo".to_string(), test_path("b.rs"))
            ]
        );
        let lines: Vec<_> = catalog
            .for_file(&test_path("b.rs"))
            .iter()
            .map(|bp| bp.line())
            .collect();
        assert_eq!(lines, vec![Some(5), Some(20)]);
    }

    #[test]
    fn serde_round_trip_keeps_kind_and_skips_runtime_state() {
        let mut catalog = BreakpointCatalog::new();
        let id = catalog
            .add_line("demo", &test_path("a.rs"), 7, Some(2), Some(Anchor::at(40)))
            .unwrap();
        catalog.set_exception(false, true);
        catalog.apply_verification(
            &[id],
            &[BreakpointResponse {
                id: Some(1),
                verified: true,
                message: None,
                line: None,
                column: None,
            }],
        );

        let all: Vec<Breakpoint> = catalog.all().cloned().collect();
        let json = serde_json::to_string(&all).unwrap();
        assert!(json.contains(r#""type":"line""#));
        assert!(json.contains(r#""type":"exception""#));

        let decoded: Vec<Breakpoint> = serde_json::from_str(&json).unwrap();
        let reloaded = BreakpointCatalog::from_breakpoints(decoded);
        let bp = reloaded.get(id).unwrap();
        assert_eq!(bp.line(), Some(7));
        assert!(bp.verification.is_none());
        assert!(matches!(bp.kind, BreakpointKind::Line { anchor: None, .. }));
        assert!(reloaded.exception().is_some());
    }

    #[test]
    fn files_are_distinct_across_projects() {
        let mut catalog = BreakpointCatalog::new();
        catalog.add_line("demo", &test_path("b.rs"), 1, None, None);
        catalog.add_line("lib", &test_path("a.rs"), 1, None, None);
        catalog.add_line("zeta", &test_path("b.rs"), 2, None, None);
        assert_eq!(
            catalog.files(),
            vec![
                ("demo".to_string(), test_path("b.rs")),
                ("lib".to_string(), test_path("a.rs"))
            ]
        );
    }

    #[test]
    fn relocate_refuses_occupied_lines() {
        let mut catalog = BreakpointCatalog::new();
        let a = catalog.add_line("demo", &test_path("a.rs"), 1, None, None).unwrap();
        catalog.add_line("demo", &test_path("a.rs"), 5, None, None);
        assert!(!catalog.relocate(a, 5, None));
        assert!(catalog.relocate(a, 3, Some(Anchor::at(40))));
        assert_eq!(catalog.get(a).unwrap().line(), Some(3));
        assert!(matches!(
            catalog.get(a).unwrap().kind,
            BreakpointKind::Line { anchor: Some(anchor), .. } if anchor.offset() == 40
        ));
        let exception = catalog.set_exception(true, false).0;
        assert!(!catalog.relocate(exception, 2, None));
    }

    #[test]
    fn from_breakpoints_continues_id_sequence_and_drops_duplicates() {
        let mut catalog = BreakpointCatalog::new();
        catalog.add_line("demo", &test_path("a.rs"), 1, None, None);
        catalog.add_line("demo", &test_path("a.rs"), 2, None, None);
        let mut entries: Vec<Breakpoint> = catalog.all().cloned().collect();
        let mut dup = entries[0].clone();
        dup.id = 9;
        entries.push(dup);

        let mut reloaded = BreakpointCatalog::from_breakpoints(entries);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.add_line("demo", &test_path("a.rs"), 3, None, None), Some(3));
    }

    #[test]
    fn clear_returns_everything() {
        let mut catalog = BreakpointCatalog::new();
        catalog.add_line("demo", &test_path("a.rs"), 1, None, None);
        catalog.set_exception(true, true);
        let removed = catalog.clear();
        assert_eq!(removed.len(), 2);
        assert!(catalog.is_empty());
        assert!(catalog.exception().is_none());
    }
}
