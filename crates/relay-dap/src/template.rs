//! `${token}` substitution in adapter request templates.
//!
//! A string that consists of a single token is replaced by the token's
//! JSON value, so `"${port}"` can become a number and `"${env}"` an
//! object. Tokens embedded in longer strings are replaced by their text.
//! A whole-string token with no value removes the enclosing entry.

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::DebugError;

/// Values available to a template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateVars {
    values: BTreeMap<String, Value>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Renders JSON templates against [`TemplateVars`].
#[derive(Debug, Clone)]
pub struct Template {
    token: Regex,
}

impl Template {
    pub fn new() -> Result<Self, DebugError> {
        let token = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}")
            .map_err(|e| DebugError::Configuration(format!("invalid template pattern: {e}")))?;
        Ok(Self { token })
    }

    /// Substitute every token in `template`.
    pub fn render(&self, template: &Value, vars: &TemplateVars) -> Value {
        self.render_value(template, vars).unwrap_or(Value::Null)
    }

    /// `None` drops the value from its container.
    fn render_value(&self, value: &Value, vars: &TemplateVars) -> Option<Value> {
        match value {
            Value::String(s) => self.render_str(s, vars),
            Value::Array(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| self.render_value(item, vars))
                    .collect(),
            )),
            Value::Object(map) => Some(Value::Object(
                map.iter()
                    .filter_map(|(k, v)| self.render_value(v, vars).map(|v| (k.clone(), v)))
                    .collect(),
            )),
            other => Some(other.clone()),
        }
    }

    fn render_str(&self, s: &str, vars: &TemplateVars) -> Option<Value> {
        if let Some(caps) = self.token.captures(s) {
            let whole = caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len());
            if whole {
                let value = vars.get(&caps[1]).cloned();
                if value.is_none() {
                    tracing::debug!("template token '{}' has no value, dropping", &caps[1]);
                }
                return value;
            }
        }
        let replaced = self.token.replace_all(s, |caps: &Captures| {
            vars.get(&caps[1]).map(text_of).unwrap_or_default()
        });
        Some(Value::String(replaced.into_owned()))
    }
}

/// Text form of a value spliced into a longer string.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(text_of).collect::<Vec<_>>().join(" "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(template: Value, vars: &TemplateVars) -> Value {
        Template::new().unwrap().render(&template, vars)
    }

    #[test]
    fn whole_token_keeps_json_type() {
        let vars = TemplateVars::new()
            .with("port", 5005)
            .with("stopOnEntry", true)
            .with("env", json!({"A": "1"}));
        let out = render(
            json!({"port": "${port}", "stopOnEntry": "${stopOnEntry}", "env": "${env}"}),
            &vars,
        );
        assert_eq!(out, json!({"port": 5005, "stopOnEntry": true, "env": {"A": "1"}}));
    }

    #[test]
    fn embedded_tokens_become_text() {
        let vars = TemplateVars::new()
            .with("workingDirectory", "/work")
            .with("args", json!(["-v", "--fast"]));
        let out = render(json!("${workingDirectory}/bin: ${args} ${missing}!"), &vars);
        assert_eq!(out, json!("/work/bin: -v --fast !"));
    }

    #[test]
    fn missing_whole_token_drops_entry() {
        let vars = TemplateVars::new().with("mainClass", "app.Main");
        let out = render(
            json!({
                "request": "launch",
                "mainClass": "${mainClass}",
                "vmArgs": "${vmArguments}",
                "extra": ["${vmArguments}", "keep"]
            }),
            &vars,
        );
        assert_eq!(
            out,
            json!({"request": "launch", "mainClass": "app.Main", "extra": ["keep"]})
        );
    }

    #[test]
    fn non_string_values_pass_through() {
        let out = render(json!({"n": 3, "b": false, "z": null}), &TemplateVars::new());
        assert_eq!(out, json!({"n": 3, "b": false, "z": null}));
    }

    #[test]
    fn strings_without_tokens_unchanged() {
        let out = render(json!("plain $ text {x}"), &TemplateVars::new());
        assert_eq!(out, json!("plain $ text {x}"));
    }
}
