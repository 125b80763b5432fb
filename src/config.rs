//! Daemon configuration loading.
//!
//! YAML is the sole config source, with two environment overrides for the
//! cloud credentials (spec §6): `METARELAY_SUPABASE_URL`, `METARELAY_SUPABASE_KEY`.
//!
//! # Required fields
//! - `cloud.url`, `cloud.key`
//! - at least one `[[repos]]` entry
//! - `handlers` may be empty (a daemon with no handlers still dedups/journals)
//!
//! Handler validation (filters parse, templates parse, unique names,
//! `timeout > 0`) happens here at load time, never at match time (spec §4.E).

use crate::error::ConfigError;
use crate::filter::Filter;
use crate::model::{HandlerConfig, RepoConfig};
use crate::template::validate_template;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Raw YAML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    cloud: Option<RawCloudConfig>,
    repos: Option<Vec<RawRepoEntry>>,
    handlers: Option<Vec<RawHandlerConfig>>,
    db_path: Option<String>,
    log_level: Option<String>,
    /// Dispatcher worker pool size (spec §4.F default 4).
    concurrency: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawCloudConfig {
    url: Option<String>,
    key: Option<String>,
}

/// A repo entry may be a bare string (just the name) or a map with `name`/`path`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRepoEntry {
    Name(String),
    Full {
        name: String,
        path: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RawHandlerConfig {
    name: Option<String>,
    event_type: Option<String>,
    #[serde(default)]
    action: Option<String>,
    command: Option<String>,
    #[serde(default)]
    filters: Vec<String>,
    timeout: Option<u64>,
    enabled: Option<bool>,
}

// ---------------------------------------------------------------------------
// Public, validated config
// ---------------------------------------------------------------------------

/// Fully loaded and validated daemon configuration.
#[derive(Debug, Clone)]
pub struct MetarelayConfig {
    pub cloud: CloudConfig,
    pub repos: Vec<RepoConfig>,
    pub handlers: Vec<HandlerConfig>,
    pub db_path: std::path::PathBuf,
    pub log_level: String,
    pub concurrency: usize,
}

#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub url: String,
    pub key: String,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load config from a custom path, applying environment overrides.
pub fn load_config_from_path(path: &Path) -> Result<MetarelayConfig, ConfigError> {
    let yaml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_config_from_str(&yaml_str)
}

/// Load config from a YAML string (used directly by tests).
pub fn load_config_from_str(yaml_str: &str) -> Result<MetarelayConfig, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(yaml_str)?;

    // --- cloud ---
    let raw_cloud = raw.cloud.ok_or_else(|| ConfigError::MissingField("cloud".to_owned()))?;
    let url = std::env::var("METARELAY_SUPABASE_URL")
        .ok()
        .or(raw_cloud.url)
        .ok_or_else(|| ConfigError::MissingField("cloud.url".to_owned()))?;
    let key = std::env::var("METARELAY_SUPABASE_KEY")
        .ok()
        .or(raw_cloud.key)
        .ok_or_else(|| ConfigError::MissingField("cloud.key".to_owned()))?;
    let cloud = CloudConfig { url, key };

    // --- repos ---
    let raw_repos = raw.repos.ok_or_else(|| ConfigError::MissingField("repos".to_owned()))?;
    if raw_repos.is_empty() {
        return Err(ConfigError::InvalidValue(
            "at least one repos entry is required".to_owned(),
        ));
    }
    let mut repos = Vec::with_capacity(raw_repos.len());
    for entry in raw_repos {
        repos.push(match entry {
            RawRepoEntry::Name(name) => RepoConfig { name, path: None },
            RawRepoEntry::Full { name, path } => RepoConfig {
                name,
                path: path.map(std::path::PathBuf::from),
            },
        });
    }

    // --- handlers ---
    let raw_handlers = raw.handlers.unwrap_or_default();
    let mut handlers = Vec::with_capacity(raw_handlers.len());
    let mut seen_names: HashSet<String> = HashSet::new();
    for (i, h) in raw_handlers.into_iter().enumerate() {
        let name = h
            .name
            .ok_or_else(|| ConfigError::MissingField(format!("handlers[{i}].name")))?;
        if !seen_names.insert(name.clone()) {
            return Err(ConfigError::DuplicateHandler(name));
        }
        let event_type = h
            .event_type
            .ok_or_else(|| ConfigError::MissingField(format!("handlers[{i}].event_type")))?;
        let command = h
            .command
            .ok_or_else(|| ConfigError::MissingField(format!("handlers[{i}].command")))?;
        let timeout_secs = h.timeout.unwrap_or(300);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(format!(
                "handlers[{i}].timeout must be > 0"
            )));
        }

        validate_template(&command).map_err(|source| ConfigError::Template {
            handler: name.clone(),
            source,
        })?;
        for f in &h.filters {
            Filter::parse(f).map_err(|source| ConfigError::Filter {
                handler: name.clone(),
                source,
            })?;
        }

        handlers.push(HandlerConfig {
            name,
            event_type,
            action: h.action.unwrap_or_default(),
            command,
            filters: h.filters,
            timeout: Duration::from_secs(timeout_secs),
            enabled: h.enabled.unwrap_or(true),
        });
    }

    let db_path = raw
        .db_path
        .map(std::path::PathBuf::from)
        .unwrap_or_else(default_db_path);

    Ok(MetarelayConfig {
        cloud,
        repos,
        handlers,
        db_path,
        log_level: raw.log_level.unwrap_or_else(|| "info".to_owned()),
        concurrency: raw.concurrency.unwrap_or(4),
    })
}

fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("metarelay")
        .join("metarelay.sqlite3")
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
cloud:
  url: "https://example.supabase.co"
  key: "secret-key"
repos:
  - "owner/repo"
"#;

    #[test]
    fn loads_minimal_config() {
        let cfg = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(cfg.cloud.url, "https://example.supabase.co");
        assert_eq!(cfg.repos.len(), 1);
        assert_eq!(cfg.repos[0].name, "owner/repo");
        assert!(cfg.handlers.is_empty());
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.concurrency, 4);
    }

    #[test]
    fn missing_cloud_url_is_config_error() {
        let yaml = r#"
cloud:
  key: "secret-key"
repos:
  - "owner/repo"
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn empty_repos_list_rejected() {
        let yaml = r#"
cloud:
  url: "https://example.supabase.co"
  key: "secret-key"
repos: []
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn duplicate_handler_names_rejected() {
        let yaml = r#"
cloud:
  url: "https://example.supabase.co"
  key: "secret-key"
repos:
  - "owner/repo"
handlers:
  - name: "h1"
    event_type: "check_run"
    command: "echo hi"
  - name: "h1"
    event_type: "workflow_run"
    command: "echo bye"
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::DuplicateHandler(_))
        ));
    }

    #[test]
    fn malformed_filter_rejected_at_load_time() {
        let yaml = r#"
cloud:
  url: "https://example.supabase.co"
  key: "secret-key"
repos:
  - "owner/repo"
handlers:
  - name: "h1"
    event_type: "check_run"
    command: "echo hi"
    filters:
      - "payload.conclusion === 'failure'"
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::Filter { .. })
        ));
    }

    #[test]
    fn malformed_template_rejected_at_load_time() {
        let yaml = r#"
cloud:
  url: "https://example.supabase.co"
  key: "secret-key"
repos:
  - "owner/repo"
handlers:
  - name: "h1"
    event_type: "check_run"
    command: "echo {{repo"
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::Template { .. })
        ));
    }

    #[test]
    fn zero_timeout_rejected() {
        let yaml = r#"
cloud:
  url: "https://example.supabase.co"
  key: "secret-key"
repos:
  - "owner/repo"
handlers:
  - name: "h1"
    event_type: "check_run"
    command: "echo hi"
    timeout: 0
"#;
        assert!(matches!(
            load_config_from_str(yaml),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn repo_with_path_parses() {
        let yaml = r#"
cloud:
  url: "https://example.supabase.co"
  key: "secret-key"
repos:
  - name: "owner/repo"
    path: "/srv/checkouts/repo"
"#;
        let cfg = load_config_from_str(yaml).unwrap();
        assert_eq!(
            cfg.repos[0].path,
            Some(std::path::PathBuf::from("/srv/checkouts/repo"))
        );
    }

    #[test]
    #[serial_test::serial(metarelay_env)]
    fn env_override_wins_over_yaml() {
        std::env::set_var("METARELAY_SUPABASE_URL", "https://override.example.com");
        let cfg = load_config_from_str(MINIMAL).unwrap();
        assert_eq!(cfg.cloud.url, "https://override.example.com");
        std::env::remove_var("METARELAY_SUPABASE_URL");
    }
}
