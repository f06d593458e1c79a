use crate::config::types::{
    Config, CrawlConfig, FetcherConfig, ProxyConfig, StorageConfig, TimeoutConfig, WorkEntry,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_timeout_config(&config.timeouts)?;
    validate_proxy_config(&config.proxy)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_storage_config(&config.storage)?;
    validate_works(&config.works)?;
    Ok(())
}

/// Validates crawl behavior configuration
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.item_concurrency < 1 || config.item_concurrency > 16 {
        return Err(ConfigError::Validation(format!(
            "item_concurrency must be between 1 and 16, got {}",
            config.item_concurrency
        )));
    }

    if config.unit_concurrency < 1 || config.unit_concurrency > 32 {
        return Err(ConfigError::Validation(format!(
            "unit_concurrency must be between 1 and 32, got {}",
            config.unit_concurrency
        )));
    }

    // The cycle bound is a hard safety limit, not a tuning knob
    if config.max_recovery_cycles < 1 || config.max_recovery_cycles > 10 {
        return Err(ConfigError::Validation(format!(
            "max_recovery_cycles must be between 1 and 10, got {}",
            config.max_recovery_cycles
        )));
    }

    for (name, attempts) in [
        ("item_attempts", config.item_attempts),
        ("batch_attempts", config.batch_attempts),
        ("cycle_attempts", config.cycle_attempts),
    ] {
        if attempts < 1 || attempts > 10 {
            return Err(ConfigError::Validation(format!(
                "{} must be between 1 and 10, got {}",
                name, attempts
            )));
        }
    }

    Ok(())
}

/// Validates base timeouts
fn validate_timeout_config(config: &TimeoutConfig) -> Result<(), ConfigError> {
    for (name, ms) in [
        ("page_fetch", config.page_fetch),
        ("unit_download", config.unit_download),
        ("provider_call", config.provider_call),
    ] {
        if ms < 1000 {
            return Err(ConfigError::Validation(format!(
                "timeouts.{} must be >= 1000ms, got {}ms",
                name, ms
            )));
        }

        if ms > config.max_timeout {
            return Err(ConfigError::Validation(format!(
                "timeouts.{} ({}ms) exceeds max_timeout ({}ms)",
                name, ms, config.max_timeout
            )));
        }
    }

    Ok(())
}

/// Validates proxy pool configuration
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    validate_http_url("proxy.source_url", &config.source_url)?;

    if config.source_attempts < 1 || config.source_attempts > 30 {
        return Err(ConfigError::Validation(format!(
            "proxy.source_attempts must be between 1 and 30, got {}",
            config.source_attempts
        )));
    }

    if config.cache_ttl < 60 {
        return Err(ConfigError::Validation(format!(
            "proxy.cache_ttl must be >= 60s, got {}s",
            config.cache_ttl
        )));
    }

    Ok(())
}

/// Validates the scrape service endpoint
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    validate_http_url("fetcher.endpoint", &config.endpoint)
}

/// Validates storage paths
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.journal_dir.is_empty() {
        return Err(ConfigError::Validation(
            "journal_dir cannot be empty".to_string(),
        ));
    }

    if config.cache_path.is_empty() {
        return Err(ConfigError::Validation(
            "cache_path cannot be empty".to_string(),
        ));
    }

    if config.output_dir.is_empty() {
        return Err(ConfigError::Validation(
            "output_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates work entries
fn validate_works(works: &[WorkEntry]) -> Result<(), ConfigError> {
    for (index, work) in works.iter().enumerate() {
        if work.id.is_empty() {
            return Err(ConfigError::Validation(format!(
                "works[{}].id cannot be empty",
                index
            )));
        }

        validate_http_url(&format!("works[{}].manifest", index), &work.manifest)?;

        // Duplicate ids would share a journal and corrupt each other's state
        if works[..index].iter().any(|other| other.id == work.id) {
            return Err(ConfigError::Validation(format!(
                "duplicate work id '{}'",
                work.id
            )));
        }
    }

    Ok(())
}

/// Validates that a string is an absolute http(s) URL
fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", field, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "{} must use http or https scheme, got '{}'",
            field,
            url.scheme()
        )));
    }

    Ok(())
}
