use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use auth_service::auth::handlers::not_found;
use auth_service::config::CorsConfig;
use auth_service::{configure, AppError, AppState, Pipeline, Settings};
use dotenv::dotenv;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn build_cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        // CORS disabled - use most restrictive settings
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
    } else {
        config
            .allowed_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .supports_credentials()
    };

    cors.max_age(config.max_age as usize)
}

#[actix_web::main]
async fn main() -> auth_service::Result<()> {
    // Load environment variables
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Configuration errors are the only ones allowed to stop startup.
    let config = Settings::new()?;
    info!(
        "Configuration loaded: environment={:?}, identity_mode={:?}",
        config.environment, config.auth.identity_mode
    );

    let state = web::Data::new(AppState::new(config.clone())?);

    if state.identity.is_stateful() {
        let sweeper = state.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
                match sweeper.identity.cleanup_expired().await {
                    Ok(0) => {}
                    Ok(removed) => info!("Removed {} expired sessions", removed),
                    Err(e) => warn!("Session sweep failed: {}", e),
                }
            }
        });
    }

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    let workers = config.server.workers as usize;
    let cors_config = config.cors.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(Pipeline)
            .wrap(build_cors(&cors_config))
            .app_data(state.clone())
            .configure(configure)
            .default_service(web::to(not_found))
    })
    .listen(listener)?
    .workers(workers)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(())
}
