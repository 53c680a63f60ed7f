use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::ConfigError;
use crate::merge::merge_configs;
use crate::validate::validate;

/// Content written into a newly-created default config file.
const DEFAULT_CONFIG_CONTENT: &str = r#"# relay configuration
# Uncomment and edit settings below to override defaults.

# [log]
# level = "info"

# [rpc]
# request_timeout_secs = 0     # 0 waits until the peer answers
# prefetch_delay_ms = 150
# deferred_workers = 2

# [languages.python]
# extensions = ["py"]
#
# [languages.python.analysis]
# command = "pylsp"
#
# [languages.python.debug]
# command = "python"
# args = ["-m", "debugpy.adapter"]
# adapter_id = "debugpy"
#
# [languages.python.debug.launch]
# request = "launch"
# program = "${program}"
# args = "${programArguments}"
# cwd = "${workingDirectory}"
# env = "${environment}"
#
# [languages.python.capabilities.debug.scopes]
# local = ["Locals"]
# static = ["Globals"]

# [projects.demo]
# root = "/path/to/demo"
# language = "python"
"#;

/// Load and merge configuration.
///
/// 1. Reads the global config from `config_dir/config.toml`, creating it
///    with commented-out defaults if missing.
/// 2. Optionally reads a project config from `.relay/config.toml`,
///    searched upward from `project_dir`.
/// 3. Merges `Config::default() <- global <- project` and validates.
pub fn load_config(config_dir: &Path, project_dir: Option<&Path>) -> Result<Config, ConfigError> {
    let global_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)?;
    }

    if !global_path.exists() {
        std::fs::write(&global_path, DEFAULT_CONFIG_CONTENT)
            .map_err(|e| ConfigError::CreateDefault(e.to_string()))?;
        tracing::info!("created default config at {}", global_path.display());
    }

    let mut config = Config::default();

    let global_content = std::fs::read_to_string(&global_path)?;
    if has_non_comment_content(&global_content) {
        config = merge_configs(&config, &global_content)?;
    }

    if let Some(project_path) = project_dir.and_then(find_project_config) {
        tracing::debug!("merging project config {}", project_path.display());
        let project_content = std::fs::read_to_string(&project_path)?;
        config = merge_configs(&config, &project_content)?;
    }

    check(&config)?;
    Ok(config)
}

/// Parse a TOML string directly into a validated [`Config`].
pub fn load_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    check(&config)?;
    Ok(config)
}

fn check(config: &Config) -> Result<(), ConfigError> {
    validate(config).map_err(|errors| {
        errors
            .into_iter()
            .next()
            .unwrap_or_else(|| ConfigError::Validation {
                field: "unknown".to_string(),
                message: "validation failed".to_string(),
            })
    })
}

/// Walk from `start` upward looking for `.relay/config.toml`.
fn find_project_config(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".relay").join("config.toml"))
        .find(|candidate| candidate.exists())
}

fn has_non_comment_content(content: &str) -> bool {
    content.lines().any(|l| {
        let trimmed = l.trim();
        !trimmed.is_empty() && !trimmed.starts_with('#')
    })
}
