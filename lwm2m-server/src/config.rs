//! Server configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! [bootstrap]
//! address = "0.0.0.0:5685"
//! session_lifetime = 600
//! read_format = "lwm2m-json"
//!
//! [registration]
//! address = "0.0.0.0:5683"
//! default_lifetime = 86400
//! read_format = "senml-json"
//!
//! [operations]
//! timeout_ms = 1000
//! write_format = "senml-json"
//! ```

use lwm2m_core::{ContentFormat, Lwm2mError, Lwm2mResult};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Complete configuration of the test server
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bootstrap: BootstrapConfig,
    pub registration: RegistrationConfig,
    pub operations: OperationsConfig,
}

/// Bootstrap server settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// UDP address to bind
    pub address: SocketAddr,
    /// Seconds a bootstrap session stays live without a new request
    pub session_lifetime: u32,
    /// Accept format of bootstrap reads
    pub read_format: ContentFormat,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 5685)),
            session_lifetime: 600,
            read_format: ContentFormat::Lwm2mJson,
        }
    }
}

/// Registration server settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// UDP address to bind
    pub address: SocketAddr,
    /// Lifetime applied when a registration carries no `lt`
    pub default_lifetime: u32,
    /// Accept format of reads against registered clients
    pub read_format: ContentFormat,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([0, 0, 0, 0], 5683)),
            default_lifetime: 86400,
            read_format: ContentFormat::SenmlJson,
        }
    }
}

/// Device operation settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Content format of write requests
    pub write_format: ContentFormat,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            write_format: ContentFormat::SenmlJson,
        }
    }
}

impl OperationsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl ServerConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns `Config` if the document does not parse or fails validation
    pub fn from_toml_str(text: &str) -> Lwm2mResult<Self> {
        let config: ServerConfig =
            toml::from_str(text).map_err(|e| Lwm2mError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    ///
    /// # Errors
    /// Returns `Config` if the file cannot be read, parsed or validated
    pub fn load(path: &Path) -> Lwm2mResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Lwm2mError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Lwm2mResult<()> {
        if self.bootstrap.session_lifetime == 0 {
            return Err(Lwm2mError::Config(
                "bootstrap.session_lifetime must be positive".to_string(),
            ));
        }
        if self.registration.default_lifetime == 0 {
            return Err(Lwm2mError::Config(
                "registration.default_lifetime must be positive".to_string(),
            ));
        }
        if self.operations.timeout_ms == 0 {
            return Err(Lwm2mError::Config(
                "operations.timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ServerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bootstrap.address.port(), 5685);
        assert_eq!(config.registration.address.port(), 5683);
        assert_eq!(config.registration.default_lifetime, 86400);
        assert_eq!(config.operations.timeout(), Duration::from_secs(1));
        assert_eq!(config.bootstrap.read_format, ContentFormat::Lwm2mJson);
        assert_eq!(config.registration.read_format, ContentFormat::SenmlJson);
    }

    #[test]
    fn test_partial_document() {
        let config = ServerConfig::from_toml_str(
            r#"
            [registration]
            address = "127.0.0.1:15683"

            read_format = "lwm2m-json"

            [operations]
            timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.registration.address.to_string(), "127.0.0.1:15683");
        assert_eq!(config.registration.default_lifetime, 86400);
        assert_eq!(config.operations.timeout(), Duration::from_millis(250));
        assert_eq!(config.registration.read_format, ContentFormat::Lwm2mJson);
        assert_eq!(config.operations.write_format, ContentFormat::SenmlJson);
        assert_eq!(config.bootstrap, BootstrapConfig::default());
    }

    #[test]
    fn test_zero_values_are_rejected() {
        for text in [
            "[bootstrap]\nsession_lifetime = 0",
            "[registration]\ndefault_lifetime = 0",
            "[operations]\ntimeout_ms = 0",
        ] {
            let result = ServerConfig::from_toml_str(text);
            assert!(matches!(result, Err(Lwm2mError::Config(_))), "{}", text);
        }
    }

    #[test]
    fn test_malformed_document() {
        let result = ServerConfig::from_toml_str("[registration]\naddress = 5683");
        assert!(matches!(result, Err(Lwm2mError::Config(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ServerConfig::load(Path::new("/nonexistent/lwm2m.toml"));
        assert!(matches!(result, Err(Lwm2mError::Config(_))));
    }
}
