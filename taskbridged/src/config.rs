use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use taskbridge_connector::ConnectorConfig;
use taskbridge_executor::WorkflowSettings;
use taskbridge_orchestrator::{ChatConfig, OrchestratorConfig};
use taskbridge_policy::{ExecutionPolicyConfig, PlanningPolicyConfig};
use tracing::debug;

pub const CONFIG_FILE: &str = "taskbridge.toml";
pub const CONFIG_ENV: &str = "TASKBRIDGE_CONFIG";
pub const SIGNING_KEY_ENV: &str = "TASKBRIDGE_SIGNING_KEY";
pub const ORCHESTRATOR_PUBKEY_ENV: &str = "TASKBRIDGE_ORCHESTRATOR_PUBKEY";

#[cfg(unix)]
pub const DEFAULT_ORCHESTRATOR_SOCK: &str = "/tmp/taskbridge-orchestrator.sock";
#[cfg(not(unix))]
pub const DEFAULT_ORCHESTRATOR_SOCK: &str = "taskbridge-orchestrator.sock";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorSection {
    pub socket: PathBuf,
    /// Private key as hex. Takes precedence over `key_dir`.
    pub signing_key_hex: Option<String>,
    pub key_dir: Option<PathBuf>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_ORCHESTRATOR_SOCK),
            signing_key_hex: None,
            key_dir: None,
        }
    }
}

/// Everything `taskbridge.toml` can hold. Every section and field is
/// optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TaskbridgeConfig {
    pub orchestrator: OrchestratorSection,
    pub connector: ConnectorConfig,
    pub planning: PlanningPolicyConfig,
    pub execution: ExecutionPolicyConfig,
    pub chat: ChatConfig,
    pub workflows: WorkflowSettings,
}

impl TaskbridgeConfig {
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            planning: self.planning.clone(),
            chat: self.chat.clone(),
        }
    }

    /// Secrets from the environment win over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(SIGNING_KEY_ENV) {
            self.orchestrator.signing_key_hex = Some(key);
        }
        if let Some(key) = non_empty(ORCHESTRATOR_PUBKEY_ENV) {
            self.connector.orchestrator_public_key_hex = Some(key);
        }
    }
}

/// `--config`, then `$TASKBRIDGE_CONFIG`, then `./taskbridge.toml` if it
/// exists.
pub fn resolve_config_path(cli: Option<PathBuf>) -> Option<PathBuf> {
    cli.or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .or_else(|| {
            let candidate = std::env::current_dir().ok()?.join(CONFIG_FILE);
            if candidate.is_file() {
                Some(candidate)
            } else {
                None
            }
        })
}

/// Reads the config file. With no file at all the defaults apply; a file
/// that was named but cannot be read or parsed is an error.
pub fn load_config(config_path: Option<&Path>) -> Result<TaskbridgeConfig> {
    let Some(path) = config_path else {
        debug!("No config file; using defaults");
        return Ok(TaskbridgeConfig::default());
    };

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn no_path_gives_defaults() -> anyhow::Result<()> {
        assert_eq!(load_config(None)?, TaskbridgeConfig::default());
        Ok(())
    }

    #[test]
    fn named_but_missing_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/taskbridge.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config file"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join(CONFIG_FILE);
        fs::write(
            &path,
            r#"
[connector]
user_id = "alice"
device_id = "laptop"
orchestrator_address = "/tmp/orch.sock"

[planning]
rate_limit_per_minute = 3

[chat]
cooldown_secs = 5
local_fallback = true

[execution]
allowed_roots = ["/srv/code"]

[workflows]
default_scan_path = "/srv/code"
"#,
        )?;

        let config = load_config(Some(&path))?;
        assert_eq!(config.connector.user_id, "alice");
        assert_eq!(
            config.connector.orchestrator_address.as_deref(),
            Some("/tmp/orch.sock")
        );
        assert!(!config.connector.allow_unverified_dispatch);
        assert_eq!(config.planning.rate_limit_per_minute, 3);
        assert_eq!(config.planning.max_steps_per_plan, 20);
        assert_eq!(config.chat.guard.cooldown_secs, 5);
        assert_eq!(config.chat.guard.dedup_window_secs, 120);
        assert!(config.chat.local_fallback);
        assert!(config.chat.fallback_to_any_device);
        assert_eq!(config.execution.allowed_roots, vec!["/srv/code"]);
        assert_eq!(config.execution.path_params, vec!["path"]);
        assert_eq!(config.workflows.default_scan_path, PathBuf::from("/srv/code"));
        Ok(())
    }

    #[test]
    fn unparsable_file_is_an_error() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[execution\nallowed_roots = [\"/srv/code\"]")?;
        let err = load_config(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"));
        Ok(())
    }

    #[test]
    fn mistyped_field_is_an_error() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join(CONFIG_FILE);
        fs::write(&path, "[execution]\nallowed_roots = \"/srv/code\"\n")?;
        assert!(load_config(Some(&path)).is_err());
        Ok(())
    }

    #[test]
    fn env_secrets_override_file() {
        let env: HashMap<&str, &str> = HashMap::from([
            (SIGNING_KEY_ENV, "aa"),
            (ORCHESTRATOR_PUBKEY_ENV, "  "),
        ]);
        let mut config = TaskbridgeConfig::default();
        config.connector.orchestrator_public_key_hex = Some("from-file".into());
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.orchestrator.signing_key_hex.as_deref(), Some("aa"));
        assert_eq!(
            config.connector.orchestrator_public_key_hex.as_deref(),
            Some("from-file")
        );
    }

    #[test]
    fn explicit_path_wins() {
        let explicit = PathBuf::from("/etc/taskbridge/custom.toml");
        assert_eq!(resolve_config_path(Some(explicit.clone())), Some(explicit));
    }
}
