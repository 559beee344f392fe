//! Configuration module for the live voice gateway
//!
//! This module handles loading and managing configuration from multiple sources:
//! - YAML configuration files (optional)
//! - Environment variables
//! - .env files (loaded in main.rs)
//!
//! Priority: YAML > Environment Variables > .env values > Defaults
//!
//! # Module Structure
//! - `yaml`: YAML file loading and structure definitions
//! - `merge`: Logic for merging YAML and environment configurations
//! - `validation`: Configuration validation functions
//! - `utils`: Helper functions for parsing
//! - `env`: Environment-only configuration loading
//!
//! # Example
//! ```rust,no_run
//! use live_voice_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with env overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//! # Ok(())
//! # }
//! ```

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

use std::path::PathBuf;

use crate::core::relay::SessionSettings;

pub use utils::{parse_bool, redact_key_param};
pub use yaml::YamlConfig;

/// Default upstream model identifier.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-native-audio-dialog";

/// Default upstream realtime endpoint (model and key are appended as query parameters).
pub const DEFAULT_UPSTREAM_URL: &str = "wss://generativelanguage.googleapis.com/ws";

pub const DEFAULT_VOICE: &str = "charon";
pub const DEFAULT_LANGUAGE_CODE: &str = "en-US";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Number of turns the upstream keeps in context.
pub const DEFAULT_MAX_TURNS: u32 = 8;

pub const DEFAULT_ALLOWED_ORIGINS: &str = "*";

/// Assistant persona sent in every session's initial `session.update`.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Rev, the official voice assistant for Revolt Motors. Only discuss Revolt products and services: RV400, RV400 BRZ, booking, pricing, finance, test rides, servicing, warranty, charging, specifications, dealership & service locations, and the MyRevolt app. If users ask about other brands or topics, politely refuse and bring the conversation back to Revolt. Speak concisely, be friendly, and support English, Hindi, and regional Indian languages when requested.";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains all configuration needed to run the gateway:
/// - Server settings (host, port, TLS)
/// - Upstream credential, model and endpoint
/// - Session defaults (voice, language, turn window, system instruction)
/// - Security settings (CORS)
///
/// The upstream credential never leaves the process except in the upstream
/// connection URL; it is zeroized when the config is dropped.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    // Upstream
    pub google_api_key: Option<String>,
    pub gemini_model: String,
    pub upstream_url: String,

    // Session defaults
    pub voice: String,
    pub language_code: String,
    pub max_turns: u32,
    pub system_instruction: String,

    /// Comma-separated allowed origins, or `*`
    pub cors_allowed_origins: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field(
                "google_api_key",
                &self.google_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("gemini_model", &self.gemini_model)
            .field("upstream_url", &self.upstream_url)
            .field("voice", &self.voice)
            .field("language_code", &self.language_code)
            .field("max_turns", &self.max_turns)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .finish_non_exhaustive()
    }
}

impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.google_api_key {
            key.zeroize();
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            google_api_key: None,
            gemini_model: DEFAULT_MODEL.to_string(),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            language_code: DEFAULT_LANGUAGE_CODE.to_string(),
            max_turns: DEFAULT_MAX_TURNS,
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            cors_allowed_origins: DEFAULT_ALLOWED_ORIGINS.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a YAML file with environment variable overrides
    ///
    /// The configuration priority is: YAML > Environment Variables > Defaults.
    /// The .env file is loaded in main.rs at application startup.
    ///
    /// # Example
    /// ```rust,no_run
    /// use live_voice_gateway::config::ServerConfig;
    /// use std::path::PathBuf;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
    /// println!("Server listening on {}", config.address());
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Run every validation rule against this configuration.
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_tls(&self.tls)?;
        validation::validate_upstream_url(&self.upstream_url)?;
        validation::validate_max_turns(self.max_turns)?;
        validation::validate_model(&self.gemini_model)?;
        Ok(())
    }

    /// Get the server address as a string in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    ///
    /// Returns true if TLS configuration is present
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Whether sessions can reach the upstream at all.
    pub fn has_upstream_credential(&self) -> bool {
        self.google_api_key
            .as_deref()
            .is_some_and(|key| !key.is_empty())
    }

    /// Allowed CORS origins; empty when any origin is allowed.
    pub fn allowed_origins(&self) -> Vec<String> {
        if self.cors_allowed_origins.trim() == "*" {
            return Vec::new();
        }
        self.cors_allowed_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }

    /// Immutable per-session settings handed to the relay registry.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            credential: self.google_api_key.clone().filter(|key| !key.is_empty()),
            model: self.gemini_model.clone(),
            upstream_url: self.upstream_url.clone(),
            voice: self.voice.clone(),
            language_code: self.language_code.clone(),
            max_turns: self.max_turns,
            system_instruction: self.system_instruction.clone(),
        }
    }
}
