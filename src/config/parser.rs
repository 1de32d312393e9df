use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Recorded with each run so stored state can be traced back to the
/// configuration that produced it.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    const MINIMAL: &str = r#"
[resources]
egress = ["direct"]
identities = ["TestAgent/1.0"]

[output]
database-path = "./test.db"
"#;

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[scheduler]
concurrency = 4
max-retries = 2
base-delay-ms = 250
fetch-timeout-ms = 5000
egress-cooldown-secs = 30

[resources]
egress = ["direct", "http://10.0.0.2:3128"]
identities = ["AgentA/1.0", "AgentB/2.0"]
persist-exclusions = true

[dedup]
scan-window = 64
similarity-threshold = 0.7
shingle-size = 3

[backoff]
min-multiplier = 0.25
max-multiplier = 4.0
batch-size = 8
policy = "proportional"

[output]
database-path = "./test.db"

[[task]]
url = "https://example.com/"

[[task]]
url = "https://example.com/about"
priority = 5
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.scheduler.max_retries, 2);
        assert_eq!(config.scheduler.base_delay_ms, 250);
        assert_eq!(config.scheduler.egress_cooldown_secs, 30);
        assert_eq!(config.resources.egress.len(), 2);
        assert!(config.resources.persist_exclusions);
        assert_eq!(config.dedup.scan_window, 64);
        assert_eq!(config.dedup.shingle_size, 3);
        assert_eq!(config.backoff.max_multiplier, 4.0);
        assert_eq!(config.backoff.policy, PolicyKind::Proportional);
        assert_eq!(config.tasks.len(), 2);
        assert_eq!(config.tasks[0].priority, 0);
        assert_eq!(config.tasks[1].priority, 5);
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(MINIMAL).unwrap();

        assert_eq!(config.scheduler.concurrency, 8);
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.dedup.scan_window, 256);
        assert_eq!(config.backoff.min_multiplier, 0.5);
        assert_eq!(config.backoff.max_multiplier, 2.0);
        assert_eq!(config.backoff.policy, PolicyKind::QLearning);
        assert!(config.backoff.escalate_on_block);
        assert!(!config.resources.persist_exclusions);
        assert!(config.tasks.is_empty());
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/harvest.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_resources_section() {
        let result = parse_config("[output]\ndatabase-path = \"x.db\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let config_content = format!("{}\n[scheduler]\nconcurrency = 0\n", MINIMAL);
        let result = parse_config(&config_content);
        assert!(matches!(result.unwrap_err(), ConfigError::Validation(_)));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
