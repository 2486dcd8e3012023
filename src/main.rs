use captable::{api, config::Config, AppError};
use std::net::SocketAddr;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match Config::from_env().map_err(|e| AppError::Config(e.to_string())) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::new(config.bind_addr, config.port);
    tracing::info!(
        max_conversion_iterations = config.max_conversion_iterations,
        bisection_tolerance = %config.bisection_tolerance,
        history_cache_capacity = config.history_cache_capacity,
        "configuration loaded"
    );

    let app = api::create_router(api::AppState::new(config));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
