use crate::core::audio::AmplifierConfig;
use crate::core::bridge::SessionConfig;
use crate::core::trust::TrustSettings;

pub(crate) fn validate_session(session: &SessionConfig) -> Result<(), String> {
    if session.connect_timeout_ms == 0 {
        return Err("BRIDGE_CONNECT_TIMEOUT_MS must be greater than zero".to_string());
    }
    if session.channel_capacity == 0 {
        return Err("BRIDGE_CHANNEL_CAPACITY must be greater than zero".to_string());
    }
    Ok(())
}

/// Gain must be positive and the ceiling a fraction in (0, 1].
pub(crate) fn validate_amplifier(audio: &AmplifierConfig) -> Result<(), String> {
    if !(audio.gain.is_finite() && audio.gain > 0.0) {
        return Err(format!(
            "AUDIO_AMPLIFICATION_GAIN must be positive, got {}",
            audio.gain
        ));
    }
    if !(audio.ceiling_ratio > 0.0 && audio.ceiling_ratio <= 1.0) {
        return Err(format!(
            "AUDIO_AMPLIFICATION_CEILING must be in (0, 1], got {}",
            audio.ceiling_ratio
        ));
    }
    if audio.noise_floor < 0 {
        return Err(format!(
            "AUDIO_NOISE_FLOOR must not be negative, got {}",
            audio.noise_floor
        ));
    }
    Ok(())
}

pub(crate) fn validate_trust(trust: &TrustSettings) -> Result<(), String> {
    if trust.validation_disabled {
        return Ok(());
    }
    if trust.expected_hostname.trim().is_empty() {
        return Err(
            "TLS_EXPECTED_HOSTNAME must be set unless TLS_VALIDATION_DISABLED is true".to_string(),
        );
    }
    if trust.harvest_timeout_secs == 0 {
        return Err("TLS_HARVEST_TIMEOUT_SECS must be greater than zero".to_string());
    }
    Ok(())
}
