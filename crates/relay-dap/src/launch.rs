//! Launch configurations and their catalog.
//!
//! Edits never touch a saved configuration directly: they go through a
//! working copy that is folded back by [`LaunchCatalog::commit`]. A
//! configuration that has never been saved is its own working copy.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DebugError;
use crate::template::TemplateVars;

pub type LaunchId = u64;

/// Attribute keys a launch configuration may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchAttribute {
    WorkingDirectory,
    Program,
    MainClass,
    ProgramArguments,
    VmArguments,
    ToolArguments,
    /// `KEY=VALUE` pairs separated by newlines or `;`.
    Environment,
    Port,
    ProcessId,
    StopOnEntry,
}

impl LaunchAttribute {
    pub const ALL: [LaunchAttribute; 10] = [
        LaunchAttribute::WorkingDirectory,
        LaunchAttribute::Program,
        LaunchAttribute::MainClass,
        LaunchAttribute::ProgramArguments,
        LaunchAttribute::VmArguments,
        LaunchAttribute::ToolArguments,
        LaunchAttribute::Environment,
        LaunchAttribute::Port,
        LaunchAttribute::ProcessId,
        LaunchAttribute::StopOnEntry,
    ];

    /// Template token name, also the serialized key.
    pub fn token(&self) -> &'static str {
        match self {
            LaunchAttribute::WorkingDirectory => "workingDirectory",
            LaunchAttribute::Program => "program",
            LaunchAttribute::MainClass => "mainClass",
            LaunchAttribute::ProgramArguments => "programArguments",
            LaunchAttribute::VmArguments => "vmArguments",
            LaunchAttribute::ToolArguments => "toolArguments",
            LaunchAttribute::Environment => "environment",
            LaunchAttribute::Port => "port",
            LaunchAttribute::ProcessId => "processId",
            LaunchAttribute::StopOnEntry => "stopOnEntry",
        }
    }

    /// Typed template value of a raw attribute string.
    fn template_value(&self, raw: &str) -> Value {
        match self {
            LaunchAttribute::Port | LaunchAttribute::ProcessId => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| Value::from(raw)),
            LaunchAttribute::StopOnEntry => Value::Bool(matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            )),
            LaunchAttribute::Environment => Value::Object(
                raw.split(['\n', ';'])
                    .filter_map(|pair| {
                        let (key, value) = pair.split_once('=')?;
                        let key = key.trim();
                        (!key.is_empty()).then(|| (key.to_string(), Value::from(value.trim())))
                    })
                    .collect(),
            ),
            _ => Value::from(raw),
        }
    }
}

impl fmt::Display for LaunchAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for LaunchAttribute {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|attr| attr.token().eq_ignore_ascii_case(s))
            .ok_or_else(|| DebugError::Configuration(format!("unknown launch attribute: {s}")))
    }
}

/// Start a new process or connect to a running one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    #[default]
    Launch,
    Attach,
}

impl LaunchMode {
    /// Request command sent to the adapter.
    pub fn command(&self) -> &'static str {
        match self {
            LaunchMode::Launch => "launch",
            LaunchMode::Attach => "attach",
        }
    }
}

impl FromStr for LaunchMode {
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "launch" => Ok(LaunchMode::Launch),
            "attach" => Ok(LaunchMode::Attach),
            _ => Err(DebugError::Configuration(format!("unknown launch mode: {s}"))),
        }
    }
}

/// A named recipe for starting a debug target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchConfiguration {
    pub id: LaunchId,
    pub name: String,
    /// Language id selecting the debug adapter.
    pub language: String,
    /// Free-form type tag, e.g. "application" or "test".
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub mode: LaunchMode,
    pub project: String,
    #[serde(default)]
    pub attributes: BTreeMap<LaunchAttribute, String>,
    /// Persisted by `save`. Entries loaded from disk are saved.
    #[serde(skip)]
    pub saved: bool,
}

impl LaunchConfiguration {
    pub fn attribute(&self, attr: LaunchAttribute) -> Option<&str> {
        self.attributes.get(&attr).map(String::as_str)
    }

    /// Set or (with an empty value) remove an attribute.
    pub fn set_attribute(&mut self, attr: LaunchAttribute, value: &str) {
        if value.is_empty() {
            self.attributes.remove(&attr);
        } else {
            self.attributes.insert(attr, value.to_string());
        }
    }

    /// Values for `${token}` placeholders. The working directory falls
    /// back to the project root.
    pub fn template_vars(&self, project_root: Option<&Path>) -> TemplateVars {
        let mut vars = TemplateVars::new();
        vars.set("project", self.project.as_str());
        vars.set("name", self.name.as_str());
        if let Some(root) = project_root {
            let root = root.to_string_lossy().into_owned();
            vars.set("projectRoot", root.clone());
            vars.set(LaunchAttribute::WorkingDirectory.token(), root);
        }
        for (attr, raw) in &self.attributes {
            vars.set(attr.token(), attr.template_value(raw));
        }
        if let Some(args) = self.attribute(LaunchAttribute::ProgramArguments) {
            let list: Vec<Value> = args.split_whitespace().map(Value::from).collect();
            vars.set("programArgumentList", list);
        }
        vars
    }
}

/// Every launch configuration, plus pending working copies.
#[derive(Debug, Clone)]
pub struct LaunchCatalog {
    next_id: LaunchId,
    entries: BTreeMap<LaunchId, LaunchConfiguration>,
    working: HashMap<LaunchId, LaunchConfiguration>,
}

impl Default for LaunchCatalog {
    fn default() -> Self {
        Self {
            next_id: 1,
            entries: BTreeMap::new(),
            working: HashMap::new(),
        }
    }
}

impl LaunchCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted configurations, all marked saved.
    pub fn from_saved(configs: Vec<LaunchConfiguration>) -> Self {
        let mut catalog = Self::new();
        for mut config in configs {
            if catalog.entries.contains_key(&config.id) {
                tracing::warn!("dropping duplicate launch configuration {}", config.id);
                continue;
            }
            config.saved = true;
            catalog.next_id = catalog.next_id.max(config.id + 1);
            catalog.entries.insert(config.id, config);
        }
        catalog
    }

    /// Create an unsaved configuration.
    pub fn create(&mut self, name: &str, language: &str, project: &str, mode: LaunchMode) -> LaunchId {
        let id = self.allocate();
        self.entries.insert(
            id,
            LaunchConfiguration {
                id,
                name: name.to_string(),
                language: language.to_string(),
                kind: String::new(),
                mode,
                project: project.to_string(),
                attributes: BTreeMap::new(),
                saved: false,
            },
        );
        id
    }

    fn allocate(&mut self) -> LaunchId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn get(&self, id: LaunchId) -> Option<&LaunchConfiguration> {
        self.entries.get(&id)
    }

    fn require(&self, id: LaunchId) -> Result<&LaunchConfiguration, DebugError> {
        self.entries.get(&id).ok_or_else(|| unknown(id))
    }

    pub fn list(&self) -> Vec<&LaunchConfiguration> {
        self.entries.values().collect()
    }

    /// Copy `id` under a fresh identity. The clone is saved.
    pub fn clone_config(&mut self, id: LaunchId) -> Result<LaunchId, DebugError> {
        let source = self.require(id)?.clone();
        let new_id = self.allocate();
        self.entries.insert(
            new_id,
            LaunchConfiguration {
                id: new_id,
                name: format!("{} (copy)", source.name),
                saved: true,
                ..source
            },
        );
        Ok(new_id)
    }

    /// Editable view of `id`: the configuration itself when unsaved,
    /// otherwise a copy kept until commit.
    pub fn working_copy(&mut self, id: LaunchId) -> Result<&mut LaunchConfiguration, DebugError> {
        if !self.require(id)?.saved {
            return self.entries.get_mut(&id).ok_or_else(|| unknown(id));
        }
        if !self.working.contains_key(&id) {
            let copy = self.require(id)?.clone();
            self.working.insert(id, copy);
        }
        self.working.get_mut(&id).ok_or_else(|| unknown(id))
    }

    /// Fold the working copy of `id` back into the saved configuration.
    /// Returns false when there was nothing to commit.
    pub fn commit(&mut self, id: LaunchId) -> Result<bool, DebugError> {
        self.require(id)?;
        let Some(copy) = self.working.remove(&id) else {
            return Ok(false);
        };
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.name = copy.name;
            entry.kind = copy.kind;
            entry.mode = copy.mode;
            entry.project = copy.project;
            entry.attributes = copy.attributes;
        }
        Ok(true)
    }

    /// Mark `id` saved, committing any pending edits first.
    pub fn save(&mut self, id: LaunchId) -> Result<(), DebugError> {
        self.commit(id)?;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.saved = true;
        }
        Ok(())
    }

    pub fn delete(&mut self, id: LaunchId) -> Result<LaunchConfiguration, DebugError> {
        self.working.remove(&id);
        self.entries.remove(&id).ok_or_else(|| unknown(id))
    }

    /// Configurations that belong on disk.
    pub fn saved(&self) -> Vec<&LaunchConfiguration> {
        self.entries.values().filter(|c| c.saved).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn unknown(id: LaunchId) -> DebugError {
    DebugError::Configuration(format!("unknown launch configuration {id}"))
}
