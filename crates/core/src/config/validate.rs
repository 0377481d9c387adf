use super::{types::Config, ConfigError};

/// Check cross-field constraints a plain deserialize cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.upstream.client_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "upstream.client_id must not be empty".to_string(),
        ));
    }
    if config.upstream.client_secret.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "upstream.client_secret must not be empty".to_string(),
        ));
    }
    if !config.upstream.base_url.starts_with("http") {
        return Err(ConfigError::Invalid(format!(
            "upstream.base_url does not look like a URL: {}",
            config.upstream.base_url
        )));
    }
    if config.upstream.rate.safety_floor >= config.upstream.rate.max_budget {
        return Err(ConfigError::Invalid(
            "upstream.rate.safety_floor must be below max_budget".to_string(),
        ));
    }
    if config.import.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "import.bucket must not be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn valid() -> Config {
        load_config_from_str(
            r#"
[upstream]
base_url = "https://charts.example.com/api/v2"
token_url = "https://charts.example.com/oauth/token"
client_id = "abc"
client_secret = "def"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid()).is_ok());
    }

    #[test]
    fn test_empty_credentials_rejected() {
        let mut config = valid();
        config.upstream.client_id = "".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_floor_above_budget_rejected() {
        let mut config = valid();
        config.upstream.rate.safety_floor = 5000.0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }
}
