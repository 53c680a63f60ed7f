use crate::config::Config;
use crate::error::ConfigError;

/// Validate a [`Config`], returning every violation found.
pub fn validate(config: &Config) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.rpc.deferred_workers == 0 || config.rpc.deferred_workers > 16 {
        errors.push(ConfigError::Validation {
            field: "rpc.deferred_workers".to_string(),
            message: format!("must be 1-16, got {}", config.rpc.deferred_workers),
        });
    }

    for (id, lang) in &config.languages {
        for ext in &lang.extensions {
            if ext.is_empty() || ext.contains('.') {
                errors.push(ConfigError::Validation {
                    field: format!("languages.{id}.extensions"),
                    message: format!("'{ext}' must be a bare extension without dots"),
                });
            }
        }
        if let Some(server) = &lang.analysis {
            if server.command.trim().is_empty() {
                errors.push(ConfigError::Validation {
                    field: format!("languages.{id}.analysis.command"),
                    message: "must not be empty".to_string(),
                });
            }
        }
        if let Some(adapter) = &lang.debug {
            if adapter.command.trim().is_empty() {
                errors.push(ConfigError::Validation {
                    field: format!("languages.{id}.debug.command"),
                    message: "must not be empty".to_string(),
                });
            }
            if adapter.adapter_id.trim().is_empty() {
                errors.push(ConfigError::Validation {
                    field: format!("languages.{id}.debug.adapter_id"),
                    message: "must not be empty".to_string(),
                });
            }
        }
    }

    for (name, project) in &config.projects {
        if let Some(lang) = &project.language {
            if !config.languages.contains_key(lang) {
                errors.push(ConfigError::Validation {
                    field: format!("projects.{name}.language"),
                    message: format!("unknown language '{lang}'"),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DebugAdapterEntry, LanguageConfig, ProjectEntry};
    use std::path::PathBuf;

    fn adapter(command: &str, adapter_id: &str) -> DebugAdapterEntry {
        DebugAdapterEntry {
            command: command.into(),
            args: vec![],
            adapter_id: adapter_id.into(),
            configuration_done: None,
            initialize: None,
            launch: Default::default(),
            attach: Default::default(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut cfg = Config::default();
        cfg.rpc.deferred_workers = 0;
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].to_string().contains("rpc.deferred_workers"));
    }

    #[test]
    fn dotted_extension_rejected() {
        let mut cfg = Config::default();
        cfg.languages.insert(
            "rust".into(),
            LanguageConfig {
                extensions: vec![".rs".into()],
                ..Default::default()
            },
        );
        let errs = validate(&cfg).unwrap_err();
        assert!(errs[0].to_string().contains("languages.rust.extensions"));
    }

    #[test]
    fn empty_adapter_fields_all_reported() {
        let mut cfg = Config::default();
        cfg.languages.insert(
            "java".into(),
            LanguageConfig {
                debug: Some(adapter("", " ")),
                ..Default::default()
            },
        );
        let errs = validate(&cfg).unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn project_with_unknown_language_rejected() {
        let mut cfg = Config::default();
        cfg.projects.insert(
            "demo".into(),
            ProjectEntry {
                root: PathBuf::from("/work/demo"),
                language: Some("cobol".into()),
            },
        );
        let errs = validate(&cfg).unwrap_err();
        assert!(errs[0].to_string().contains("unknown language 'cobol'"));
    }

    #[test]
    fn valid_language_and_project_pass() {
        let mut cfg = Config::default();
        cfg.languages.insert(
            "java".into(),
            LanguageConfig {
                extensions: vec!["java".into()],
                debug: Some(adapter("java-debug", "java")),
                ..Default::default()
            },
        );
        cfg.projects.insert(
            "demo".into(),
            ProjectEntry {
                root: PathBuf::from("/work/demo"),
                language: Some("java".into()),
            },
        );
        assert!(validate(&cfg).is_ok());
    }
}
