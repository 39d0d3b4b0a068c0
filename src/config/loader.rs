//! Configuration loader with environment variable expansion

use super::{expand_env_vars, Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse YAML text after expanding `${VAR}` references
    pub fn parse(content: &str) -> Result<Config, ConfigError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    #[serial]
    fn test_load_file() {
        std::env::set_var("GATEWAY_TEST_DATASTORE", "/tmp/gateway-store");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server:\n  address: \"127.0.0.1:8088\"\ndatastore:\n  path: \"${{GATEWAY_TEST_DATASTORE}}\"\nusage:\n  interval_seconds: 1\n  max_count: 2"
        )
        .unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        std::env::remove_var("GATEWAY_TEST_DATASTORE");

        assert_eq!(config.server.address, "127.0.0.1:8088");
        assert_eq!(
            config.datastore.path,
            std::path::PathBuf::from("/tmp/gateway-store")
        );
        assert_eq!(config.usage.max_count, 2);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigLoader::load("/nonexistent/gateway.yaml"),
            Err(ConfigError::IoError(_))
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            ConfigLoader::parse("usage: [unclosed"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_validation_runs() {
        assert!(matches!(
            ConfigLoader::parse("usage:\n  max_count: 0\n"),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
