use crate::config::types::{
    Config, GridConfig, PoolConfig, RemoteConfig, RetryConfig, StorageConfig, UserAgentConfig,
};
use crate::grid::Cell;
use crate::taxonomy::Taxonomy;
use crate::ConfigError;
use url::Url;

/// Largest pool dimensions accepted
const MAX_PROCESSES: usize = 64;
const MAX_THREADS: usize = 256;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_grid_config(&config.grid)?;
    validate_pool_config(&config.pool)?;
    validate_remote_config(&config.remote)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_retry_config(&config.retry)?;
    validate_storage_config(&config.storage)?;
    validate_taxonomy(&Taxonomy::from_config(&config.taxonomy))?;
    Ok(())
}

/// Validates the crawl area
fn validate_grid_config(config: &GridConfig) -> Result<(), ConfigError> {
    Cell::parse(&config.central).map_err(|e| ConfigError::Validation(e.to_string()))?;
    Ok(())
}

/// Validates worker pool sizing
fn validate_pool_config(config: &PoolConfig) -> Result<(), ConfigError> {
    if config.processes < 1 || config.processes > MAX_PROCESSES {
        return Err(ConfigError::Validation(format!(
            "processes must be between 1 and {}, got {}",
            MAX_PROCESSES, config.processes
        )));
    }

    if config.threads < 1 || config.threads > MAX_THREADS {
        return Err(ConfigError::Validation(format!(
            "threads must be between 1 and {}, got {}",
            MAX_THREADS, config.threads
        )));
    }

    if config.busy_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "busy_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.lease_timeout_secs == Some(0) {
        return Err(ConfigError::Validation(
            "lease_timeout_secs must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates the remote service settings
fn validate_remote_config(config: &RemoteConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.page_limit == 0 {
        return Err(ConfigError::Validation(
            "page_limit must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

/// Validates the retry policy
fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if !config.backoff_multiplier.is_finite() || config.backoff_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff_multiplier must be >= 1.0, got {}",
            config.backoff_multiplier
        )));
    }

    if config.max_backoff_ms != 0 && config.max_backoff_ms < config.initial_backoff_ms {
        return Err(ConfigError::Validation(format!(
            "max_backoff_ms ({}) is below initial_backoff_ms ({})",
            config.max_backoff_ms, config.initial_backoff_ms
        )));
    }

    Ok(())
}

/// Validates store location
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.directory.is_empty() {
        return Err(ConfigError::Validation(
            "storage directory cannot be empty".to_string(),
        ));
    }

    if let Some(name) = &config.name {
        validate_store_name(name)?;
    }

    Ok(())
}

/// Store names become file name prefixes
pub(crate) fn validate_store_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        || name.starts_with('.')
    {
        return Err(ConfigError::Validation(format!(
            "store name must be a plain file name prefix, got '{}'",
            name
        )));
    }
    Ok(())
}

/// Validates the category taxonomy
fn validate_taxonomy(taxonomy: &Taxonomy) -> Result<(), ConfigError> {
    if taxonomy.is_empty() {
        return Err(ConfigError::Validation(
            "taxonomy must contain at least one minor category".to_string(),
        ));
    }

    if let Some(id) = taxonomy.duplicate_id() {
        return Err(ConfigError::Validation(format!(
            "category id {} appears more than once in the taxonomy",
            id
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !parts[1].contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
