//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{ChorusConfig, IngestConfig, LogOutput, LoggingConfig};
use chorus_framework::DispatchConfig;

/// Validates the entire configuration.
pub fn validate_config(config: &ChorusConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    validate_ingest_config(&config.ingest)?;
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.output is \"file\" but logging.file_path is not set",
        ));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid logging filter module name: {module:?}"
        )));
    }

    Ok(())
}

fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    // Zero would expire every dialog before its follow-up arrives.
    if dispatch.dialog_expire_secs == Some(0) {
        return Err(ConfigError::validation(
            "dispatch.dialog_expire_secs must be greater than 0 (leave it unset to disable expiry)",
        ));
    }
    Ok(())
}

fn validate_ingest_config(ingest: &IngestConfig) -> ConfigResult<()> {
    if ingest.poll_interval_ms == 0 {
        return Err(ConfigError::validation(
            "ingest.poll_interval_ms must be greater than 0",
        ));
    }

    if ingest.max_in_flight == Some(0) {
        return Err(ConfigError::validation(
            "ingest.max_in_flight must be greater than 0",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = ChorusConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_poll_interval() {
        let mut config = ChorusConfig::default();
        config.ingest.poll_interval_ms = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_zero_in_flight_cap() {
        let mut config = ChorusConfig::default();
        config.ingest.max_in_flight = Some(0);
        assert!(validate_config(&config).is_err());

        config.ingest.max_in_flight = Some(1);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = ChorusConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("logs/chorus.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_dialog_expiry() {
        let mut config = ChorusConfig::default();
        config.dispatch.dialog_expire_secs = Some(0);
        assert!(validate_config(&config).is_err());
    }
}
