use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::event::ANSWER_EVENT;

/// Top-level qrouter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub router: RouterOptions,
    #[serde(default)]
    pub log: LogConfig,
}

/// How cascade detection decides that a section routes on another
/// section's answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeDetection {
    /// Collect the section ids a guard references by walking its tree.
    #[default]
    Structural,
    /// Look for `.<sectionId>.` anywhere in the serialized guard.
    Textual,
}

/// Behaviour shared by the single-task and parallel routers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterOptions {
    /// Event fired by `next` when the caller names none.
    #[serde(default = "default_event")]
    pub default_event: String,
    #[serde(default)]
    pub cascade_detection: CascadeDetection,
    /// Ceiling on event-queue iterations per parallel call.
    #[serde(default = "default_max_event_iterations")]
    pub max_event_iterations: usize,
    /// Answer keys that are not sections (case references and the like).
    #[serde(default = "default_system_answer_keys")]
    pub system_answer_keys: Vec<String>,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            default_event: default_event(),
            cascade_detection: CascadeDetection::default(),
            max_event_iterations: default_max_event_iterations(),
            system_answer_keys: default_system_answer_keys(),
        }
    }
}

impl RouterOptions {
    pub fn is_system_key(&self, key: &str) -> bool {
        self.system_answer_keys.iter().any(|k| k == key)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_event() -> String { ANSWER_EVENT.to_string() }
fn default_max_event_iterations() -> usize { 10_000 }
fn default_system_answer_keys() -> Vec<String> { vec!["system".to_string()] }
fn default_log_filter() -> String { "qrouter=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| RouterError::ConfigNotFound(path.display().to_string()))?;

        let expanded = expand_env_vars(&content);

        let config: AppConfig =
            toml::from_str(&expanded).map_err(|e| RouterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.router.default_event.trim().is_empty() {
            return Err(RouterError::Config("router.default_event is empty".into()));
        }
        if self.router.max_event_iterations == 0 {
            return Err(RouterError::Config(
                "router.max_event_iterations must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string. Unset variables are left as
/// written.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();
        let name: String = chars.by_ref().take_while(|c| *c != '}').collect();
        match std::env::var(&name) {
            Ok(value) => result.push_str(&value),
            Err(_) => result.push_str(&format!("${{{name}}}")),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_QROUTER_EVENT", "SUBMIT");
        let result = expand_env_vars("default_event = \"${TEST_QROUTER_EVENT}\"");
        assert_eq!(result, "default_event = \"SUBMIT\"");
        std::env::remove_var("TEST_QROUTER_EVENT");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_QROUTER_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_QROUTER_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.router.default_event, "ANSWER");
        assert_eq!(config.router.cascade_detection, CascadeDetection::Structural);
        assert_eq!(config.router.max_event_iterations, 10_000);
        assert!(config.router.is_system_key("system"));
        assert!(!config.router.is_system_key("p-applicant-name"));
        assert_eq!(config.log.filter, "qrouter=info,warn");
    }

    #[test]
    fn test_textual_detection_from_toml() {
        let config: AppConfig = toml::from_str(
            r#"
[router]
cascade_detection = "textual"
system_answer_keys = ["system", "meta"]
"#,
        )
        .unwrap();
        assert_eq!(config.router.cascade_detection, CascadeDetection::Textual);
        assert!(config.router.is_system_key("meta"));
        assert_eq!(config.router.default_event, "ANSWER");
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let config: AppConfig = toml::from_str("[router]\nmax_event_iterations = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(RouterError::Config(_))));
    }
}
