//! Configuration module for the bridge
//!
//! This module handles bridge configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use vapi_exotel_bridge::config::BridgeConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = BridgeConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("bridge.yaml");
//! let config = BridgeConfig::from_file(&config_path)?;
//!
//! println!("Pinned host: {}", config.trust.expected_hostname);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use serde::Serialize;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::{AudioYaml, SessionYaml, TlsYaml, YamlConfig};

use crate::core::audio::AmplifierConfig;
use crate::core::bridge::SessionConfig;
use crate::core::trust::TrustSettings;

/// Everything a [`BridgeSession`](crate::core::bridge::BridgeSession) needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BridgeConfig {
    /// Timeouts, queue sizes and start-event parameters
    pub session: SessionConfig,
    /// Gain stage for backend audio
    pub audio: AmplifierConfig,
    /// Backend TLS trust
    pub trust: TrustSettings,
}

impl BridgeConfig {
    /// Load configuration from environment variables
    ///
    /// Loads a `.env` file first when one is present; real environment
    /// variables take precedence over its values.
    ///
    /// # Errors
    /// Returns an error if a variable has an invalid format or the resulting
    /// configuration fails validation.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let config = env::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values a session cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        validation::validate_session(&self.session)?;
        validation::validate_amplifier(&self.audio)?;
        validation::validate_trust(&self.trust)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    // Helper to clean up environment variables
    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("BRIDGE_CONNECT_TIMEOUT_MS");
            env::remove_var("BRIDGE_HEARTBEAT_INTERVAL_SECS");
            env::remove_var("BRIDGE_MAX_RECENT_ERRORS");
            env::remove_var("BRIDGE_CHANNEL_CAPACITY");
            env::remove_var("BRIDGE_CUSTOM_PARAMETERS_JSON");
            env::remove_var("AUDIO_AMPLIFICATION_ENABLED");
            env::remove_var("AUDIO_AMPLIFICATION_GAIN");
            env::remove_var("AUDIO_AMPLIFICATION_CEILING");
            env::remove_var("AUDIO_NOISE_FLOOR");
            env::remove_var("TLS_VALIDATION_DISABLED");
            env::remove_var("TLS_EXPECTED_HOSTNAME");
            env::remove_var("TLS_CA_BUNDLE_PATH");
            env::remove_var("TLS_HARVEST_HOST");
            env::remove_var("TLS_HARVEST_PORT");
            env::remove_var("TLS_HARVEST_TIMEOUT_SECS");
            env::remove_var("TLS_STRICT");
        }
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = BridgeConfig::from_env().unwrap();

        assert_eq!(config.session.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.session.heartbeat_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.session.max_recent_errors, 50);
        assert_eq!(config.session.channel_capacity, 256);
        assert!(!config.audio.enabled);
        assert_eq!(config.audio.gain, 50.0);
        assert_eq!(config.audio.ceiling_ratio, 0.8);
        assert_eq!(config.audio.noise_floor, 10);
        assert!(!config.trust.validation_disabled);
        assert_eq!(config.trust.expected_hostname, "api.vapi.ai");
        assert_eq!(
            config.trust.ca_bundle_path,
            PathBuf::from("certs/vapi-ca-bundle.pem")
        );
        assert_eq!(config.trust.harvest_host(), "api.vapi.ai");
        assert_eq!(config.trust.harvest_port, 443);
        assert!(!config.trust.strict);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            env::set_var("BRIDGE_CONNECT_TIMEOUT_MS", "2500");
            env::set_var("BRIDGE_HEARTBEAT_INTERVAL_SECS", "0");
            env::set_var("BRIDGE_CUSTOM_PARAMETERS_JSON", r#"{"tenant":"acme"}"#);
            env::set_var("AUDIO_AMPLIFICATION_ENABLED", "yes");
            env::set_var("AUDIO_AMPLIFICATION_GAIN", "12.5");
            env::set_var("TLS_EXPECTED_HOSTNAME", "voice.example.com");
            env::set_var("TLS_HARVEST_HOST", "edge.example.com");
            env::set_var("TLS_STRICT", "1");
        }

        let config = BridgeConfig::from_env().unwrap();

        assert_eq!(config.session.connect_timeout_ms, 2500);
        assert_eq!(config.session.heartbeat_interval(), None);
        assert_eq!(config.session.custom_parameters["tenant"], "acme");
        assert!(config.audio.enabled);
        assert_eq!(config.audio.gain, 12.5);
        assert_eq!(config.trust.expected_hostname, "voice.example.com");
        assert_eq!(config.trust.harvest_host(), "edge.example.com");
        assert!(config.trust.strict);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TLS_HARVEST_PORT", "not-a-port");
        }

        let message = BridgeConfig::from_env().unwrap_err().to_string();
        assert!(message.contains("TLS_HARVEST_PORT"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_bool() {
        cleanup_env_vars();
        unsafe {
            env::set_var("TLS_VALIDATION_DISABLED", "maybe");
        }

        assert!(BridgeConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_validation_failure() {
        cleanup_env_vars();
        unsafe {
            env::set_var("AUDIO_AMPLIFICATION_CEILING", "1.5");
        }

        let message = BridgeConfig::from_env().unwrap_err().to_string();
        assert!(message.contains("AUDIO_AMPLIFICATION_CEILING"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bridge.yaml");

        let yaml_content = r#"
session:
  connect_timeout_ms: 4000
  custom_parameters:
    assistant: "sales"

audio:
  amplification_enabled: true
  ceiling: 0.6

tls:
  expected_hostname: "api.example.com"
  ca_bundle_path: "/tmp/bundle.pem"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        let config = BridgeConfig::from_file(&config_path).unwrap();

        assert_eq!(config.session.connect_timeout_ms, 4000);
        assert_eq!(config.session.custom_parameters["assistant"], "sales");
        assert!(config.audio.enabled);
        assert_eq!(config.audio.ceiling_ratio, 0.6);
        assert_eq!(config.audio.gain, 50.0);
        assert_eq!(config.trust.expected_hostname, "api.example.com");
        assert_eq!(config.trust.ca_bundle_path, PathBuf::from("/tmp/bundle.pem"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bridge.yaml");

        let yaml_content = r#"
tls:
  expected_hostname: "yaml.example.com"
"#;

        fs::write(&config_path, yaml_content).unwrap();

        unsafe {
            env::set_var("TLS_EXPECTED_HOSTNAME", "env.example.com");
            env::set_var("BRIDGE_MAX_RECENT_ERRORS", "5");
        }

        let config = BridgeConfig::from_file(&config_path).unwrap();

        // YAML wins where it speaks, env fills the rest
        assert_eq!(config.trust.expected_hostname, "yaml.example.com");
        assert_eq!(config.session.max_recent_errors, 5);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_disabled_validation_allows_empty_hostname() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bridge.yaml");

        fs::write(
            &config_path,
            "tls:\n  validation_disabled: true\n  expected_hostname: \"\"\n",
        )
        .unwrap();
        let config = BridgeConfig::from_file(&config_path).unwrap();
        assert!(config.trust.validation_disabled);

        fs::write(&config_path, "tls:\n  expected_hostname: \"\"\n").unwrap();
        assert!(BridgeConfig::from_file(&config_path).is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_missing() {
        cleanup_env_vars();

        let result = BridgeConfig::from_file(&PathBuf::from("/nonexistent/bridge.yaml"));
        assert!(result.is_err());
    }
}
