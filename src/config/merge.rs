use std::env;
use std::path::PathBuf;

use super::utils::parse_bool;
use super::yaml::{TlsYaml, YamlConfig};
use super::{
    DEFAULT_ALLOWED_ORIGINS, DEFAULT_HOST, DEFAULT_LANGUAGE_CODE, DEFAULT_MAX_TURNS,
    DEFAULT_MODEL, DEFAULT_PORT, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_UPSTREAM_URL, DEFAULT_VOICE,
    ServerConfig, TlsConfig,
};

/// Merge YAML configuration with environment variables
///
/// Priority order (highest to lowest):
/// 1. YAML configuration values
/// 2. Environment variables
/// 3. Default values
///
/// # Arguments
/// * `yaml_config` - Optional YAML configuration to use as overrides
///
/// # Returns
/// * `Result<ServerConfig, Box<dyn std::error::Error>>` - The merged configuration or an error
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let yaml = yaml_config.unwrap_or_default();

    // Helper macro to get value with priority: YAML > ENV > Default
    macro_rules! get_value {
        ($env_var:expr, $yaml_value:expr, $default:expr) => {
            $yaml_value
                .or_else(|| env::var($env_var).ok())
                .unwrap_or_else(|| $default.to_string())
        };
    }

    // Helper macro for optional values: YAML > ENV
    macro_rules! get_optional {
        ($env_var:expr, $yaml_value:expr) => {
            $yaml_value.or_else(|| env::var($env_var).ok())
        };
    }

    // Server configuration
    let host = get_value!(
        "HOST",
        yaml.server.as_ref().and_then(|s| s.host.clone()),
        DEFAULT_HOST
    );

    let port = if let Some(yaml_port) = yaml.server.as_ref().and_then(|s| s.port) {
        yaml_port
    } else if let Ok(port_str) = env::var("PORT") {
        port_str
            .parse::<u16>()
            .map_err(|e| format!("Invalid PORT environment variable: {e}"))?
    } else {
        DEFAULT_PORT
    };

    let tls = merge_tls(yaml.server.as_ref().and_then(|s| s.tls.as_ref()))?;

    // Upstream configuration
    let google_api_key = get_optional!(
        "GOOGLE_API_KEY",
        yaml.upstream.as_ref().and_then(|u| u.api_key.clone())
    );

    let gemini_model = get_value!(
        "GEMINI_MODEL",
        yaml.upstream.as_ref().and_then(|u| u.model.clone()),
        DEFAULT_MODEL
    );

    let upstream_url = get_value!(
        "UPSTREAM_URL",
        yaml.upstream.as_ref().and_then(|u| u.url.clone()),
        DEFAULT_UPSTREAM_URL
    );

    // Session defaults
    let voice = get_value!(
        "VOICE",
        yaml.session.as_ref().and_then(|s| s.voice.clone()),
        DEFAULT_VOICE
    );

    let language_code = get_value!(
        "LANGUAGE_CODE",
        yaml.session.as_ref().and_then(|s| s.language_code.clone()),
        DEFAULT_LANGUAGE_CODE
    );

    let max_turns = if let Some(yaml_turns) = yaml.session.as_ref().and_then(|s| s.max_turns) {
        yaml_turns
    } else if let Ok(turns_str) = env::var("MAX_TURNS") {
        turns_str
            .parse::<u32>()
            .map_err(|e| format!("Invalid MAX_TURNS environment variable: {e}"))?
    } else {
        DEFAULT_MAX_TURNS
    };

    let system_instruction = get_value!(
        "SYSTEM_INSTRUCTION",
        yaml.session
            .as_ref()
            .and_then(|s| s.system_instruction.clone()),
        DEFAULT_SYSTEM_INSTRUCTION
    );

    // Security configuration
    let cors_allowed_origins = get_value!(
        "ORIGIN",
        yaml.security
            .as_ref()
            .and_then(|s| s.cors_allowed_origins.clone()),
        DEFAULT_ALLOWED_ORIGINS
    );

    Ok(ServerConfig {
        host,
        port,
        tls,
        google_api_key,
        gemini_model,
        upstream_url,
        voice,
        language_code,
        max_turns,
        system_instruction,
        cors_allowed_origins,
    })
}

/// Resolve TLS settings: YAML > ENV. TLS is on when both paths are present
/// unless explicitly disabled.
fn merge_tls(tls: Option<&TlsYaml>) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    let enabled = match tls.and_then(|t| t.enabled) {
        Some(enabled) => Some(enabled),
        None => match env::var("TLS_ENABLED") {
            Ok(value) => Some(
                parse_bool(&value)
                    .ok_or_else(|| format!("Invalid TLS_ENABLED value: {value}"))?,
            ),
            Err(_) => None,
        },
    };

    if enabled == Some(false) {
        return Ok(None);
    }

    let cert_path = tls
        .and_then(|t| t.cert_path.clone())
        .or_else(|| env::var("TLS_CERT_PATH").ok());
    let key_path = tls
        .and_then(|t| t.key_path.clone())
        .or_else(|| env::var("TLS_KEY_PATH").ok());

    match (cert_path, key_path) {
        (Some(cert), Some(key)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        })),
        (None, None) if enabled.is_none() => Ok(None),
        (None, None) => Err("TLS is enabled but TLS_CERT_PATH and TLS_KEY_PATH are not set".into()),
        (Some(_), None) => Err("TLS_KEY_PATH is required when TLS_CERT_PATH is set".into()),
        (None, Some(_)) => Err("TLS_CERT_PATH is required when TLS_KEY_PATH is set".into()),
    }
}
