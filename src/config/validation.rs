use super::TlsConfig;

/// Validate TLS configuration
///
/// Both the certificate and the private key must exist on disk.
pub fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(tls) = tls else {
        return Ok(());
    };

    if !tls.cert_path.exists() {
        return Err(format!(
            "TLS_CERT_PATH file does not exist: {}",
            tls.cert_path.display()
        )
        .into());
    }
    if !tls.key_path.exists() {
        return Err(format!(
            "TLS_KEY_PATH file does not exist: {}",
            tls.key_path.display()
        )
        .into());
    }

    Ok(())
}

/// Validate the upstream endpoint
///
/// Must parse as a URL with a `ws` or `wss` scheme and carry no query string
/// (model and key are appended per session).
pub fn validate_upstream_url(upstream_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = url::Url::parse(upstream_url)
        .map_err(|e| format!("Invalid UPSTREAM_URL '{upstream_url}': {e}"))?;

    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(format!(
                "Invalid UPSTREAM_URL scheme '{other}': expected ws or wss"
            )
            .into());
        }
    }

    if parsed.query().is_some() {
        return Err("UPSTREAM_URL must not contain a query string".into());
    }

    Ok(())
}

/// Validate the turn truncation window
pub fn validate_max_turns(max_turns: u32) -> Result<(), Box<dyn std::error::Error>> {
    if max_turns == 0 {
        return Err("MAX_TURNS must be at least 1".into());
    }
    Ok(())
}

/// Validate the model identifier
pub fn validate_model(model: &str) -> Result<(), Box<dyn std::error::Error>> {
    if model.trim().is_empty() {
        return Err("GEMINI_MODEL cannot be empty".into());
    }
    Ok(())
}
