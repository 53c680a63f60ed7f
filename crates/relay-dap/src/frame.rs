//! Stack frames, scopes and variables of a suspended thread.
//!
//! Which scopes count as local or static and which type names are
//! primitive or string are per-language data read from the capability
//! map, so nothing here branches on the language itself.

use std::path::PathBuf;

use relay_core::{Position, SourceResolver};
use relay_rpc::CapabilityMap;
use serde::Serialize;

use crate::protocol;

const DEFAULT_LOCAL_SCOPES: &[&str] = &["Locals", "Local", "Arguments"];
const DEFAULT_STATIC_SCOPES: &[&str] = &["Statics", "Static", "Globals"];
const DEFAULT_PRIMITIVE_TYPES: &[&str] = &[
    "bool", "boolean", "byte", "char", "short", "int", "long", "float", "double", "i8", "i16",
    "i32", "i64", "u8", "u16", "u32", "u64", "usize", "isize", "f32", "f64",
];
const DEFAULT_STRING_TYPES: &[&str] = &["String", "string", "str", "&str", "java.lang.String"];

/// What a variable holds, as far as the editor cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableKind {
    Primitive,
    String,
    Array,
    Object,
    /// A collapsed scope whose children have not been fetched.
    ScopePlaceholder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeClass {
    Local,
    Static,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugVariable {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    /// Expression that evaluates to this variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// Handle for children, 0 for leaves.
    pub reference: i64,
    pub kind: VariableKind,
    pub is_local: bool,
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugScope {
    pub name: String,
    pub class: ScopeClass,
    pub reference: i64,
    /// Children are only fetched on demand.
    pub delayable: bool,
    pub expensive: bool,
}

impl DebugScope {
    /// The single variable standing in for a delayed scope.
    pub fn placeholder(&self) -> DebugVariable {
        DebugVariable {
            name: self.name.clone(),
            value: String::new(),
            declared_type: None,
            expression: None,
            reference: self.reference,
            kind: VariableKind::ScopePlaceholder,
            is_local: self.class == ScopeClass::Local,
            is_static: self.class == ScopeClass::Static,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugFrame {
    /// Position in the thread's stack, 0 is innermost.
    pub index: usize,
    /// Adapter frame id.
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// 1-based.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Character offset in the file, when it could be opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    /// Adapter-generated label rather than real code.
    pub synthetic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<DebugScope>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<DebugVariable>>,
}

impl DebugFrame {
    pub fn from_protocol(index: usize, frame: protocol::StackFrame) -> Self {
        let path = frame
            .source
            .and_then(|s| s.path)
            .map(PathBuf::from);
        let has_location = path.is_some() && frame.line > 0;
        Self {
            index,
            id: frame.id,
            name: frame.name,
            line: has_location.then_some(frame.line),
            column: (has_location && frame.column > 0).then_some(frame.column),
            path,
            offset: None,
            synthetic: frame.presentation_hint.as_deref() == Some("label"),
            scopes: None,
            variables: None,
        }
    }

    /// Fill in `offset` from the file. Failures leave it unset.
    pub fn locate(&mut self, resolver: &dyn SourceResolver, project: &str) {
        let (Some(path), Some(line)) = (self.path.as_deref(), self.line) else {
            return;
        };
        let position = Position::from_one_based(line, self.column.unwrap_or(1));
        match resolver
            .open(project, path)
            .and_then(|file| file.offset_of(position))
        {
            Ok(offset) => self.offset = Some(offset),
            Err(e) => tracing::debug!("frame {} has no offset: {}", self.id, e),
        }
    }
}

/// Per-language scope and type classification.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageRules {
    pub local_scopes: Vec<String>,
    pub static_scopes: Vec<String>,
    pub primitive_types: Vec<String>,
    pub string_types: Vec<String>,
}

impl Default for LanguageRules {
    fn default() -> Self {
        Self::from_capabilities(&CapabilityMap::default())
    }
}

impl LanguageRules {
    /// Read `debug.scopes.{local,static}` and
    /// `debug.types.{primitive,string}`.
    pub fn from_capabilities(caps: &CapabilityMap) -> Self {
        Self {
            local_scopes: caps.get_strings("debug.scopes.local", DEFAULT_LOCAL_SCOPES),
            static_scopes: caps.get_strings("debug.scopes.static", DEFAULT_STATIC_SCOPES),
            primitive_types: caps.get_strings("debug.types.primitive", DEFAULT_PRIMITIVE_TYPES),
            string_types: caps.get_strings("debug.types.string", DEFAULT_STRING_TYPES),
        }
    }

    pub fn classify_scope(&self, name: &str) -> ScopeClass {
        let name = name.trim();
        if self.local_scopes.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            ScopeClass::Local
        } else if self.static_scopes.iter().any(|s| s.eq_ignore_ascii_case(name)) {
            ScopeClass::Static
        } else {
            ScopeClass::Other
        }
    }

    pub fn scope(&self, scope: &protocol::Scope) -> DebugScope {
        let class = self.classify_scope(&scope.name);
        DebugScope {
            name: scope.name.clone(),
            class,
            reference: scope.variables_reference,
            delayable: class != ScopeClass::Local,
            expensive: scope.expensive,
        }
    }

    /// Declared types go through the type-name sets; untyped variables
    /// are classified by their children.
    pub fn classify(&self, var: &protocol::Variable) -> VariableKind {
        match var.variable_type.as_deref().map(str::trim) {
            Some(ty) if !ty.is_empty() => {
                if self.primitive_types.iter().any(|t| t == ty) {
                    VariableKind::Primitive
                } else if self.string_types.iter().any(|t| t == ty) {
                    VariableKind::String
                } else {
                    VariableKind::Object
                }
            }
            _ => {
                if var.indexed_variables.unwrap_or(0) > 0 {
                    VariableKind::Array
                } else if var.named_variables.unwrap_or(0) > 0 || var.variables_reference != 0 {
                    VariableKind::Object
                } else {
                    VariableKind::Primitive
                }
            }
        }
    }

    pub fn variable(&self, var: &protocol::Variable, scope: ScopeClass) -> DebugVariable {
        DebugVariable {
            name: var.name.clone(),
            value: var.value.clone(),
            declared_type: var.variable_type.clone(),
            expression: var.evaluate_name.clone(),
            reference: var.variables_reference,
            kind: self.classify(var),
            is_local: scope == ScopeClass::Local,
            is_static: scope == ScopeClass::Static,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use relay_core::FsResolver;
    use serde_json::json;

    fn var(value: serde_json::Value) -> protocol::Variable {
        serde_json::from_value(value).unwrap()
    }

    fn java_rules() -> LanguageRules {
        LanguageRules::from_capabilities(&CapabilityMap::new(json!({
            "debug": {
                "scopes": {"local": ["Local"], "static": ["Static"]},
                "types": {"primitive": ["int", "boolean"], "string": ["String"]}
            }
        })))
    }

    #[test]
    fn declared_type_uses_name_sets() {
        let rules = java_rules();
        assert_eq!(rules.classify(&var(json!({"name": "i", "type": "int"}))), VariableKind::Primitive);
        assert_eq!(rules.classify(&var(json!({"name": "s", "type": "String"}))), VariableKind::String);
        // A declared type outside both sets is an object, even if it has
        // no children.
        assert_eq!(rules.classify(&var(json!({"name": "x", "type": "long"}))), VariableKind::Object);
    }

    #[test]
    fn untyped_variables_classified_by_children() {
        let rules = java_rules();
        assert_eq!(
            rules.classify(&var(json!({"name": "a", "indexedVariables": 3, "variablesReference": 9}))),
            VariableKind::Array
        );
        assert_eq!(
            rules.classify(&var(json!({"name": "o", "namedVariables": 2}))),
            VariableKind::Object
        );
        assert_eq!(
            rules.classify(&var(json!({"name": "r", "variablesReference": 4}))),
            VariableKind::Object
        );
        assert_eq!(rules.classify(&var(json!({"name": "p", "value": "1"}))), VariableKind::Primitive);
    }

    #[test]
    fn scopes_other_than_local_are_delayable() {
        let rules = java_rules();
        let local = rules.scope(&protocol::Scope {
            name: "Local".into(),
            variables_reference: 5,
            expensive: false,
        });
        assert_eq!(local.class, ScopeClass::Local);
        assert!(!local.delayable);

        let statics = rules.scope(&protocol::Scope {
            name: "static".into(),
            variables_reference: 6,
            expensive: true,
        });
        assert_eq!(statics.class, ScopeClass::Static);
        assert!(statics.delayable);

        let placeholder = statics.placeholder();
        assert_eq!(placeholder.kind, VariableKind::ScopePlaceholder);
        assert_eq!(placeholder.reference, 6);
        assert!(placeholder.is_static);
    }

    #[test]
    fn default_rules_without_capabilities() {
        let rules = LanguageRules::default();
        assert_eq!(rules.classify_scope("Locals"), ScopeClass::Local);
        assert_eq!(rules.classify_scope("Registers"), ScopeClass::Other);
        assert!(rules.primitive_types.iter().any(|t| t == "i32"));
    }

    #[test]
    fn variable_carries_scope_flags() {
        let rules = java_rules();
        let v = rules.variable(
            &var(json!({"name": "count", "value": "3", "type": "int", "evaluateName": "this.count"})),
            ScopeClass::Local,
        );
        assert!(v.is_local);
        assert!(!v.is_static);
        assert_eq!(v.expression.as_deref(), Some("this.count"));
        assert_eq!(serde_json::to_value(&v).unwrap()["kind"], "PRIMITIVE");
    }

    #[test]
    fn frame_from_protocol() {
        let frame: protocol::StackFrame = serde_json::from_value(json!({
            "id": 11,
            "name": "Main.run",
            "source": {"path": "/src/Main.java"},
            "line": 12,
            "column": 3
        }))
        .unwrap();
        let frame = DebugFrame::from_protocol(0, frame);
        assert_eq!(frame.line, Some(12));
        assert_eq!(frame.column, Some(3));
        assert!(!frame.synthetic);
        assert_eq!(frame.path.as_deref(), Some(Path::new("/src/Main.java")));

        let label: protocol::StackFrame = serde_json::from_value(json!({
            "id": 12,
            "name": "[async boundary]",
            "line": 0,
            "presentationHint": "label"
        }))
        .unwrap();
        let label = DebugFrame::from_protocol(1, label);
        assert!(label.synthetic);
        assert_eq!(label.line, None);
        assert_eq!(label.path, None);
    }

    #[test]
    fn frame_locate_sets_offset() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("Main.java");
        std::fs::write(&file, "class Main {\n  void run() {}\n}\n").unwrap();
        let resolver = FsResolver::new().with_fallback_root(dir.path());

        let mut frame = DebugFrame::from_protocol(
            0,
            serde_json::from_value(json!({
                "id": 1,
                "name": "run",
                "source": {"path": file.to_string_lossy()},
                "line": 2,
                "column": 3
            }))
            .unwrap(),
        );
        frame.locate(&resolver, "demo");
        assert_eq!(frame.offset, Some(15));

        frame.line = Some(99);
        frame.offset = None;
        frame.locate(&resolver, "demo");
        assert_eq!(frame.offset, None);
    }
}
