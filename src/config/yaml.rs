use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override those taken from the environment.
///
/// # Example YAML structure
/// ```yaml
/// session:
///   connect_timeout_ms: 10000
///   heartbeat_interval_secs: 30
///   max_recent_errors: 50
///   channel_capacity: 256
///   custom_parameters:
///     assistant: "support"
///
/// audio:
///   amplification_enabled: true
///   gain: 50.0
///   ceiling: 0.8
///   noise_floor: 10
///
/// tls:
///   validation_disabled: false
///   expected_hostname: "api.vapi.ai"
///   ca_bundle_path: "certs/vapi-ca-bundle.pem"
///   harvest_host: "api.vapi.ai"
///   harvest_port: 443
///   harvest_timeout_secs: 10
///   strict: false
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub session: Option<SessionYaml>,
    pub audio: Option<AudioYaml>,
    pub tls: Option<TlsYaml>,
}

/// Session configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub connect_timeout_ms: Option<u64>,
    /// 0 disables the heartbeat
    pub heartbeat_interval_secs: Option<u64>,
    pub max_recent_errors: Option<usize>,
    pub channel_capacity: Option<usize>,
    /// Sent to the carrier in the start event
    pub custom_parameters: Option<Map<String, Value>>,
}

/// Amplification settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub amplification_enabled: Option<bool>,
    pub gain: Option<f32>,
    /// Fraction of full scale
    pub ceiling: Option<f32>,
    pub noise_floor: Option<i16>,
}

/// Backend TLS trust settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub validation_disabled: Option<bool>,
    pub expected_hostname: Option<String>,
    pub ca_bundle_path: Option<String>,
    pub harvest_host: Option<String>,
    pub harvest_port: Option<u16>,
    pub harvest_timeout_secs: Option<u64>,
    pub strict: Option<bool>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
session:
  connect_timeout_ms: 5000
  heartbeat_interval_secs: 0
  max_recent_errors: 10
  channel_capacity: 64
  custom_parameters:
    assistant: "support"
    priority: 2

audio:
  amplification_enabled: true
  gain: 20.0
  ceiling: 0.5
  noise_floor: 4

tls:
  validation_disabled: false
  expected_hostname: "api.example.com"
  ca_bundle_path: "/etc/bridge/ca.pem"
  harvest_host: "edge.example.com"
  harvest_port: 8443
  harvest_timeout_secs: 3
  strict: true
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let session = config.session.as_ref().unwrap();
        assert_eq!(session.connect_timeout_ms, Some(5000));
        assert_eq!(session.heartbeat_interval_secs, Some(0));
        let params = session.custom_parameters.as_ref().unwrap();
        assert_eq!(params["assistant"], "support");
        assert_eq!(params["priority"], 2);

        let audio = config.audio.as_ref().unwrap();
        assert_eq!(audio.amplification_enabled, Some(true));
        assert_eq!(audio.ceiling, Some(0.5));
        assert_eq!(audio.noise_floor, Some(4));

        let tls = config.tls.as_ref().unwrap();
        assert_eq!(tls.expected_hostname, Some("api.example.com".to_string()));
        assert_eq!(tls.harvest_port, Some(8443));
        assert_eq!(tls.strict, Some(true));
    }

    #[test]
    fn test_yaml_config_partial() {
        let yaml = r#"
tls:
  validation_disabled: true
"#;

        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        assert!(config.session.is_none());
        assert!(config.audio.is_none());
        assert_eq!(config.tls.as_ref().unwrap().validation_disabled, Some(true));
        assert_eq!(config.tls.as_ref().unwrap().expected_hostname, None);
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("").unwrap_or_default();
        assert!(config.session.is_none());
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_from_file_missing() {
        let result = YamlConfig::from_file(&PathBuf::from("/nonexistent/bridge.yaml"));
        let message = result.unwrap_err().to_string();
        assert!(message.contains("Failed to read config file"));
    }

    #[test]
    fn test_from_file_malformed() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.yaml");
        fs::write(&path, "session: [not, a, map").unwrap();

        let message = YamlConfig::from_file(&path).unwrap_err().to_string();
        assert!(message.contains("Failed to parse YAML config"));
    }

    #[test]
    fn test_from_file_wrong_type() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("typed.yaml");
        fs::write(&path, "tls:\n  harvest_port: \"not-a-port\"\n").unwrap();

        assert!(YamlConfig::from_file(&path).is_err());
    }
}
