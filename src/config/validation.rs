use crate::config::types::{
    BackoffConfig, Config, DedupConfig, OutputConfig, ResourcesConfig, SchedulerConfig, TaskEntry,
};
use crate::pool::DIRECT_EGRESS;
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_resources_config(&config.resources)?;
    validate_dedup_config(&config.dedup)?;
    validate_backoff_config(&config.backoff)?;
    validate_output_config(&config.output)?;
    validate_tasks(&config.tasks)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 256 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 256, got {}",
            config.concurrency
        )));
    }

    if config.fetch_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "fetch_timeout_ms must be greater than 0".to_string(),
        ));
    }

    if config.persist_every == 0 {
        return Err(ConfigError::Validation(
            "persist_every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_resources_config(config: &ResourcesConfig) -> Result<(), ConfigError> {
    if config.egress.is_empty() {
        return Err(ConfigError::Validation(
            "at least one egress resource is required (use \"direct\" for no proxy)".to_string(),
        ));
    }

    if config.identities.is_empty() {
        return Err(ConfigError::Validation(
            "at least one identity is required".to_string(),
        ));
    }

    for egress in &config.egress {
        if egress == DIRECT_EGRESS {
            continue;
        }
        let url = Url::parse(egress).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid egress proxy '{}': {}", egress, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(format!(
                "Egress proxy '{}' has unsupported scheme '{}'",
                egress,
                url.scheme()
            )));
        }
    }

    for identity in &config.identities {
        if identity.trim().is_empty() {
            return Err(ConfigError::Validation(
                "identities cannot contain empty entries".to_string(),
            ));
        }
    }

    check_unique("egress", &config.egress)?;
    check_unique("identities", &config.identities)?;

    Ok(())
}

fn check_unique(list: &str, values: &[String]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for value in values {
        if !seen.insert(value) {
            return Err(ConfigError::Validation(format!(
                "duplicate entry '{}' in {}",
                value, list
            )));
        }
    }
    Ok(())
}

fn validate_dedup_config(config: &DedupConfig) -> Result<(), ConfigError> {
    if config.scan_window < 1 {
        return Err(ConfigError::Validation(
            "scan_window must be >= 1".to_string(),
        ));
    }

    if !(config.similarity_threshold > 0.0 && config.similarity_threshold <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "similarity_threshold must be in (0, 1], got {}",
            config.similarity_threshold
        )));
    }

    if config.shingle_size < 1 {
        return Err(ConfigError::Validation(
            "shingle_size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_backoff_config(config: &BackoffConfig) -> Result<(), ConfigError> {
    if !(config.min_multiplier > 0.0) {
        return Err(ConfigError::Validation(format!(
            "min_multiplier must be positive, got {}",
            config.min_multiplier
        )));
    }

    if config.min_multiplier > 1.0 || config.max_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "multiplier bounds must contain 1.0, got [{}, {}]",
            config.min_multiplier, config.max_multiplier
        )));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch_size must be >= 1".to_string(),
        ));
    }

    if config.health_window < 1 {
        return Err(ConfigError::Validation(
            "health_window must be >= 1".to_string(),
        ));
    }

    for (name, value) in [
        ("learning_rate", config.learning_rate),
        ("discount", config.discount),
        ("exploration_rate", config.exploration_rate),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{} must be in [0, 1], got {}",
                name, value
            )));
        }
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.report_path.as_deref() == Some("") {
        return Err(ConfigError::Validation(
            "report_path cannot be empty when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_tasks(tasks: &[TaskEntry]) -> Result<(), ConfigError> {
    for task in tasks {
        crate::url::parse_task_url(&task.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid task URL '{}': {}", task.url, e))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_resources() -> ResourcesConfig {
        ResourcesConfig {
            egress: vec!["direct".to_string(), "http://10.0.0.2:3128".to_string()],
            identities: vec!["AgentA/1.0".to_string()],
            persist_exclusions: false,
        }
    }

    #[test]
    fn test_validate_resources() {
        assert!(validate_resources_config(&create_test_resources()).is_ok());

        let mut resources = create_test_resources();
        resources.egress.clear();
        assert!(validate_resources_config(&resources).is_err());

        let mut resources = create_test_resources();
        resources.egress.push("not a proxy".to_string());
        assert!(matches!(
            validate_resources_config(&resources),
            Err(ConfigError::InvalidUrl(_))
        ));

        let mut resources = create_test_resources();
        resources.egress.push("ftp://10.0.0.3".to_string());
        assert!(validate_resources_config(&resources).is_err());

        let mut resources = create_test_resources();
        resources.identities.push("AgentA/1.0".to_string());
        assert!(validate_resources_config(&resources).is_err());

        let mut resources = create_test_resources();
        resources.identities.push("   ".to_string());
        assert!(validate_resources_config(&resources).is_err());
    }

    #[test]
    fn test_validate_dedup() {
        assert!(validate_dedup_config(&DedupConfig::default()).is_ok());

        let mut dedup = DedupConfig::default();
        dedup.scan_window = 0;
        assert!(validate_dedup_config(&dedup).is_err());

        let mut dedup = DedupConfig::default();
        dedup.similarity_threshold = 0.0;
        assert!(validate_dedup_config(&dedup).is_err());

        let mut dedup = DedupConfig::default();
        dedup.similarity_threshold = 1.0;
        assert!(validate_dedup_config(&dedup).is_ok());
    }

    #[test]
    fn test_validate_backoff() {
        assert!(validate_backoff_config(&BackoffConfig::default()).is_ok());

        let mut backoff = BackoffConfig::default();
        backoff.min_multiplier = 1.5;
        assert!(validate_backoff_config(&backoff).is_err());

        let mut backoff = BackoffConfig::default();
        backoff.min_multiplier = 0.0;
        assert!(validate_backoff_config(&backoff).is_err());

        let mut backoff = BackoffConfig::default();
        backoff.exploration_rate = 1.5;
        assert!(validate_backoff_config(&backoff).is_err());

        let mut backoff = BackoffConfig::default();
        backoff.batch_size = 0;
        assert!(validate_backoff_config(&backoff).is_err());
    }

    #[test]
    fn test_validate_tasks() {
        let good = TaskEntry {
            url: "https://example.com/".to_string(),
            priority: 0,
        };
        let bad = TaskEntry {
            url: "mailto:someone@example.com".to_string(),
            priority: 0,
        };

        assert!(validate_tasks(&[good.clone()]).is_ok());
        assert!(validate_tasks(&[good, bad]).is_err());
    }
}
