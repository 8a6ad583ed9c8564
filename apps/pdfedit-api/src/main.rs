//! pdfedit API server
//!
//! Accepts PDF uploads and applies edit manifests to them. Provides REST API
//! endpoints for:
//!
//! - Upload and page metadata
//! - Manifest application (delete, reorder, rotate, text, images, drawings,
//!   watermark, redaction)
//! - Job status and download of the edited PDF
//!
//! Configuration comes from command-line flags, environment variables and an
//! optional `.env` file.

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod error;
mod state;
mod storage;

use api::{
    handle_apply, handle_download, handle_file_meta, handle_health, handle_job_status,
    handle_upload,
};
use state::AppState;
use storage::Storage;

/// Command-line arguments for the pdfedit server
#[derive(Parser, Debug)]
#[command(name = "pdfedit-api")]
#[command(about = "HTTP service for manifest-driven PDF editing")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, env = "PDFEDIT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory for uploads and job outputs
    #[arg(long, env = "PDFEDIT_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Maximum request body size in megabytes
    #[arg(long, env = "PDFEDIT_UPLOAD_LIMIT_MB", default_value = "50")]
    upload_limit_mb: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Build the application router
pub fn app(state: AppState, body_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handle_health))
        // Files
        .route("/api/uploads", post(handle_upload))
        .route("/api/files/:file_id/meta", get(handle_file_meta))
        .route("/api/files/:file_id/apply", post(handle_apply))
        // Jobs
        .route("/api/jobs/:job_id", get(handle_job_status))
        .route("/api/jobs/:job_id/download", get(handle_download))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive(log_level.into())
                .add_directive("tower_http=debug".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let storage = Storage::open(&args.data_dir).await?;
    info!("Data directory: {}", storage.dir().display());

    let state = AppState::new(storage);
    let app = app(state, args.upload_limit_mb * 1024 * 1024);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Upload limit: {} MB", args.upload_limit_mb);

    axum::serve(listener, app).await?;

    Ok(())
}
