use crate::api::AppState;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Ready once the analyzer is up; reports how many histories are cached.
pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ready",
        "cachedHistories": state.analyzer.cached_histories().await,
        "cacheCapacity": state.config.history_cache_capacity,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_reports_empty_cache() {
        let state = AppState::new(Config::default());
        let Json(body) = ready(State(state)).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["cachedHistories"], 0);
        assert_eq!(body["cacheCapacity"], 256);
    }
}
