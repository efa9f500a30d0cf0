use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::{Map, Value};

use super::BridgeConfig;
use crate::core::audio::AmplifierConfig;
use crate::core::bridge::SessionConfig;
use crate::core::trust::TrustSettings;

/// Read an environment variable, falling back to `default` when unset or empty.
fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map_err(|_| format!("Invalid value for {name}: {value}")),
        _ => Ok(default),
    }
}

/// Boolean flags accept `true/false`, `1/0` and `yes/no`.
fn parse_bool_env(name: &str, default: bool) -> Result<bool, String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(format!("Invalid value for {name}: {value}")),
        },
        _ => Ok(default),
    }
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build the configuration from environment variables and defaults.
pub(crate) fn load_from_env() -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let session_defaults = SessionConfig::default();
    let custom_parameters = match optional_env("BRIDGE_CUSTOM_PARAMETERS_JSON") {
        Some(json) => serde_json::from_str::<Map<String, Value>>(&json)
            .map_err(|e| format!("Invalid value for BRIDGE_CUSTOM_PARAMETERS_JSON: {e}"))?,
        None => Map::new(),
    };
    let session = SessionConfig {
        connect_timeout_ms: parse_env(
            "BRIDGE_CONNECT_TIMEOUT_MS",
            session_defaults.connect_timeout_ms,
        )?,
        heartbeat_interval_secs: parse_env(
            "BRIDGE_HEARTBEAT_INTERVAL_SECS",
            session_defaults.heartbeat_interval_secs,
        )?,
        max_recent_errors: parse_env(
            "BRIDGE_MAX_RECENT_ERRORS",
            session_defaults.max_recent_errors,
        )?,
        channel_capacity: parse_env("BRIDGE_CHANNEL_CAPACITY", session_defaults.channel_capacity)?,
        custom_parameters,
    };

    let audio_defaults = AmplifierConfig::default();
    let audio = AmplifierConfig {
        enabled: parse_bool_env("AUDIO_AMPLIFICATION_ENABLED", audio_defaults.enabled)?,
        gain: parse_env("AUDIO_AMPLIFICATION_GAIN", audio_defaults.gain)?,
        ceiling_ratio: parse_env("AUDIO_AMPLIFICATION_CEILING", audio_defaults.ceiling_ratio)?,
        noise_floor: parse_env("AUDIO_NOISE_FLOOR", audio_defaults.noise_floor)?,
    };

    let trust_defaults = TrustSettings::default();
    let trust = TrustSettings {
        validation_disabled: parse_bool_env(
            "TLS_VALIDATION_DISABLED",
            trust_defaults.validation_disabled,
        )?,
        expected_hostname: optional_env("TLS_EXPECTED_HOSTNAME")
            .unwrap_or(trust_defaults.expected_hostname),
        ca_bundle_path: optional_env("TLS_CA_BUNDLE_PATH")
            .map(PathBuf::from)
            .unwrap_or(trust_defaults.ca_bundle_path),
        harvest_host: optional_env("TLS_HARVEST_HOST"),
        harvest_port: parse_env("TLS_HARVEST_PORT", trust_defaults.harvest_port)?,
        harvest_timeout_secs: parse_env(
            "TLS_HARVEST_TIMEOUT_SECS",
            trust_defaults.harvest_timeout_secs,
        )?,
        strict: parse_bool_env("TLS_STRICT", trust_defaults.strict)?,
    };

    Ok(BridgeConfig {
        session,
        audio,
        trust,
    })
}
