pub mod cap_table;
pub mod health;

use crate::config::Config;
use crate::orchestration::Analyzer;
use crate::store::HistoryStore;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub analyzer: Arc<Analyzer>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = Arc::new(HistoryStore::new(config.history_cache_capacity));
        let analyzer = Arc::new(Analyzer::new(&config, store));
        Self { config, analyzer }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/cap-table/build", post(cap_table::build))
        .route("/cap-table/waterfall", post(cap_table::waterfall))
        .layer(cors)
        .with_state(state)
}
