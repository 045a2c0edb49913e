mod api;
mod auth;
mod classifier;
mod errors;
mod findings;
mod gateway;
mod reports;
mod scanner;
mod scans;
mod storage;
mod targets;
mod users;
mod watcher;

use actix_cors::Cors;
use actix_web::{App, HttpServer, http::header, middleware::Compress, web};
use anyhow::Result;
use dotenvy::dotenv;
use hostscan_core::config::AppConfig;
use tracing::info;
use utoipa::OpenApi;
use utoipa_actix_web::AppExt;
use utoipa_swagger_ui::SwaggerUi;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(OpenApi)]
#[openapi(info(title = "Hostscan"))]
struct ApiDoc;

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Load centralized configuration - fail fast if required config is missing
    let config = AppConfig::from_env()?;
    hostscan_core::observability::init_observability(&config.observability)?;

    let hostname = config.server.hostname.clone();
    let port = config.server.port;
    let address = format!("http://{hostname}:{port}");
    let public_url = config
        .server
        .public_url
        .clone()
        .unwrap_or_else(|| address.clone());
    let callback_url = format!("{}/api/scans/hook", public_url.trim_end_matches('/'));

    // Graceful shutdown timeout from config or default 30 seconds
    let shutdown_timeout = config.server.shutdown_timeout_secs.unwrap_or(30);

    let postgres_pool = storage::postgres::initialize_pool(&config.database).await?;
    let kvb_client = storage::kvb::initialize_client(&config.kvb).await?;
    let oidc_client = auth::oidc::initialize_client(&config.oidc).await?;
    let scanner_client = scanner::ScannerClient::new(&config.scanner, callback_url)?;

    // Pick up scans that were still in flight when the process last stopped.
    let watcher_ctx = watcher::WatcherContext {
        db: postgres_pool.clone(),
        kvb: kvb_client.clone(),
    };
    watcher::resume_active_scans(&watcher_ctx).await?;

    // Keep references for graceful shutdown
    let postgres_shutdown = postgres_pool.clone();

    let cors_origins = config.server.cors_allowed_origins.clone();

    let server = HttpServer::new(move || {
        // Build CORS configuration based on allowed origins
        let cors = if cors_origins.is_empty() {
            Cors::default()
                .allowed_origin(&address)
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                ])
                .supports_credentials()
                .max_age(3600)
        } else {
            // Production: use configured origins
            let mut cors = Cors::default()
                .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
                .allowed_headers(vec![
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                ])
                .supports_credentials()
                .max_age(3600);
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
            cors
        };

        App::new()
            .wrap(cors)
            .wrap(Compress::default())
            .app_data(web::Data::new(postgres_pool.clone()))
            .app_data(web::Data::new(kvb_client.clone()))
            .app_data(web::Data::new(oidc_client.clone()))
            .app_data(web::Data::new(scanner_client.clone()))
            .into_utoipa_app()
            .openapi(ApiDoc::openapi())
            // Literal scan paths must register before /api/scans/{scan_uuid}.
            .service(api::scans::start_scan)
            .service(api::scans::scan_hook)
            .service(api::scans::bulk_delete_scans)
            .service(api::streams::scan_list_stream)
            .service(api::streams::scan_stream)
            .service(api::scans::get_scans)
            .service(api::scans::get_scan_status)
            .service(api::scans::get_scan_findings)
            .service(api::scans::generate_report)
            .service(api::scans::get_scan)
            .service(api::scans::delete_scan)
            .service(api::targets::get_targets)
            .service(api::targets::get_target)
            .service(api::targets::delete_target)
            .service(api::findings::get_findings)
            .service(api::findings::get_finding)
            .service(api::findings::delete_finding)
            .service(api::reports::get_reports)
            .service(api::users::get_current_user)
            .openapi_service(|api| {
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api/openapi.json", api)
            })
            .into_app()
            // Health check endpoints (must be outside OpenAPI to avoid auth)
            .service(api::health::liveness)
            .service(api::health::readiness)
    });

    info!("server running at http://{}:{}", hostname, port);
    server
        .bind((hostname, port))?
        .shutdown_timeout(shutdown_timeout)
        .run()
        .await?;

    info!("Shutting down gracefully...");

    // Close database pool
    postgres_shutdown.close().await;

    info!("Server shutdown complete");

    Ok(())
}
