//! PDF Unlock Server
//!
//! Accepts an encrypted PDF plus its password and returns a copy that opens
//! without one. Provides REST API endpoints for:
//!
//! - Health check (reports the active strategy)
//! - Document inspection
//! - Unlocking
//!
//! ## Strategies
//!
//! One strategy is chosen per deployment with `--strategy`:
//!
//! - `external-tool` (default): runs qpdf on scoped temporary files
//! - `rasterize`: renders pages with pdfium and rebuilds an image-only PDF
//!   (requires building with the `pdfium` feature)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use unlock_core::{
    external::default_program, ExternalToolUnlocker, Limits, StrategyKind, ToolConfig, Unlocker,
};

mod api;
mod error;

use api::{handle_health, handle_inspect, handle_unlock};

/// Slack on top of the document limit for multipart framing and the password field.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Command-line arguments for the unlock server
#[derive(Parser, Debug)]
#[command(name = "unlock-server")]
#[command(about = "Removes a known password from uploaded PDFs")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Unlock strategy: external-tool or rasterize
    #[arg(long, env = "UNLOCK_STRATEGY", default_value = "external-tool")]
    strategy: StrategyKind,

    /// Decrypt tool executable (default: bundled qpdf.exe on Windows, qpdf on PATH elsewhere)
    #[arg(long, env = "QPDF_PATH")]
    qpdf_path: Option<PathBuf>,

    /// Directory containing the pdfium shared library
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Decrypt tool timeout in milliseconds
    #[arg(long, default_value = "60000")]
    timeout_ms: u64,

    /// Largest accepted PDF, in MiB
    #[arg(long, default_value = "100")]
    max_upload_mb: usize,

    /// Rasterize strategy: pixels per PDF point
    #[arg(long, default_value = "2.0")]
    render_scale: f32,

    /// Directory for per-request temporary files (default: system temp dir)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Rate limit: requests per second per IP
    #[arg(long, default_value = "10")]
    rate_limit: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn limits(&self) -> Limits {
        Limits {
            max_document_bytes: self.max_upload_mb.saturating_mul(1024 * 1024),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub unlocker: Arc<dyn Unlocker>,
    /// Request body cap, in bytes
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(unlocker: Arc<dyn Unlocker>, limits: Limits) -> Self {
        Self {
            unlocker,
            max_body_bytes: limits
                .max_document_bytes
                .saturating_add(MULTIPART_OVERHEAD_BYTES),
        }
    }
}

/// Routes plus the layers every deployment needs. Rate limiting depends on
/// the peer address and is added in `main`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handle_health))
        // API endpoints
        .route("/api/inspect", post(handle_inspect))
        .route("/api/unlock", post(handle_unlock))
        .layer(DefaultBodyLimit::max(state.max_body_bytes))
        .layer(cors)
        .with_state(state)
}

fn build_unlocker(args: &Args) -> anyhow::Result<Arc<dyn Unlocker>> {
    match args.strategy {
        StrategyKind::ExternalTool => {
            let config = ToolConfig {
                program: args.qpdf_path.clone().unwrap_or_else(default_program),
                timeout: Duration::from_millis(args.timeout_ms),
                temp_root: args.temp_dir.clone(),
                limits: args.limits(),
            };
            info!("Decrypt tool: {}", config.program.display());
            Ok(Arc::new(ExternalToolUnlocker::new(config)))
        }
        StrategyKind::RasterizeRebuild => build_rasterizer(args),
    }
}

#[cfg(feature = "pdfium")]
fn build_rasterizer(args: &Args) -> anyhow::Result<Arc<dyn Unlocker>> {
    use unlock_core::raster::PdfiumBackend;
    use unlock_core::{RasterConfig, RasterizeRebuildUnlocker};

    let backend = PdfiumBackend::new(args.pdfium_lib_path.as_deref())?;
    let config = RasterConfig {
        scale: args.render_scale,
        limits: args.limits(),
    };
    info!("Render scale: {}", config.scale);
    Ok(Arc::new(RasterizeRebuildUnlocker::new(backend, config)))
}

#[cfg(not(feature = "pdfium"))]
fn build_rasterizer(args: &Args) -> anyhow::Result<Arc<dyn Unlocker>> {
    if let Some(dir) = &args.pdfium_lib_path {
        tracing::warn!("Ignoring pdfium library path {}", dir.display());
    }
    anyhow::bail!("The rasterize strategy requires building with the `pdfium` feature")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting unlock server on {}:{}", args.host, args.port);

    if !(args.render_scale.is_finite() && args.render_scale > 0.0) {
        anyhow::bail!("--render-scale must be a positive number");
    }

    // Create rate limiter configuration
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(args.rate_limit.into())
            .burst_size(args.rate_limit.saturating_mul(2))
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limit: {}", args.rate_limit))?,
    );

    let unlocker = build_unlocker(&args)?;
    let state = AppState::new(unlocker, args.limits());

    let app = build_router(state).layer(GovernorLayer {
        config: governor_conf,
    });

    // Start server
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Strategy: {}", args.strategy);
    info!("Rate limit: {} requests/second per IP", args.rate_limit);
    info!("Upload limit: {} MiB", args.max_upload_mb);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
