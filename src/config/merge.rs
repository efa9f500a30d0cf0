use std::path::PathBuf;

use super::BridgeConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Merge YAML overrides onto the environment-derived configuration.
///
/// Priority: YAML > environment variables > defaults.
pub(crate) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<BridgeConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(session) = yaml.session {
        let target = &mut config.session;
        if let Some(v) = session.connect_timeout_ms {
            target.connect_timeout_ms = v;
        }
        if let Some(v) = session.heartbeat_interval_secs {
            target.heartbeat_interval_secs = v;
        }
        if let Some(v) = session.max_recent_errors {
            target.max_recent_errors = v;
        }
        if let Some(v) = session.channel_capacity {
            target.channel_capacity = v;
        }
        if let Some(v) = session.custom_parameters {
            target.custom_parameters = v;
        }
    }

    if let Some(audio) = yaml.audio {
        let target = &mut config.audio;
        if let Some(v) = audio.amplification_enabled {
            target.enabled = v;
        }
        if let Some(v) = audio.gain {
            target.gain = v;
        }
        if let Some(v) = audio.ceiling {
            target.ceiling_ratio = v;
        }
        if let Some(v) = audio.noise_floor {
            target.noise_floor = v;
        }
    }

    if let Some(tls) = yaml.tls {
        let target = &mut config.trust;
        if let Some(v) = tls.validation_disabled {
            target.validation_disabled = v;
        }
        if let Some(v) = tls.expected_hostname {
            target.expected_hostname = v;
        }
        if let Some(v) = tls.ca_bundle_path {
            target.ca_bundle_path = PathBuf::from(v);
        }
        if tls.harvest_host.is_some() {
            target.harvest_host = tls.harvest_host;
        }
        if let Some(v) = tls.harvest_port {
            target.harvest_port = v;
        }
        if let Some(v) = tls.harvest_timeout_secs {
            target.harvest_timeout_secs = v;
        }
        if let Some(v) = tls.strict {
            target.strict = v;
        }
    }

    Ok(config)
}
