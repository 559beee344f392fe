use axum::Json;
use serde_json::{Value, json};

/// Liveness probe: `{"ok": true}` whenever the process is serving requests.
pub async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_body() {
        let Json(body) = tokio_test::block_on(health_check());
        assert_eq!(body, json!({ "ok": true }));
    }
}
