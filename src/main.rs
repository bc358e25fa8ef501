//! codemap binary — thin CLI shell over the [`codemap`] library crate.

use axum::{
    routing::{get, post},
    Router,
};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use codemap::api::*;
use codemap::settings::load_settings;
use codemap::types::AppSettings;
use codemap::Engine;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Live symbol map for a source workspace — incremental indexer with an
/// SSE-backed HTTP API.
#[derive(Parser)]
#[command(name = "codemap", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Workspace root directory (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Extra directory names to exclude from scanning (repeatable)
    #[arg(long = "exclude", value_name = "NAME")]
    exclude: Vec<String>,

    /// Disable docstring extraction
    #[arg(long)]
    no_docstrings: bool,

    /// Path to a web UI dist directory to serve as static files
    #[arg(long)]
    dist: Option<PathBuf>,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("codemap=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "codemap", &mut std::io::stdout());
        return;
    }

    // Resolve the root and build the effective settings: persisted file
    // first, CLI flags on top.
    let root = cli.root.clone().unwrap_or_else(|| {
        std::env::current_dir().unwrap_or_else(|_| {
            error!("Could not determine current directory. Use --root <path>");
            std::process::exit(1);
        })
    });
    let root = root.canonicalize().unwrap_or_else(|e| {
        error!(root = %root.display(), error = %e, "Root path not found");
        std::process::exit(1);
    });

    let mut settings = load_settings(&root).unwrap_or_else(|| AppSettings::new(root.clone()));
    settings.exclude_dirs.extend(cli.exclude.iter().cloned());
    if cli.no_docstrings {
        settings.include_docstrings = false;
    }

    let engine = match Engine::start(settings) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "Failed to start indexing engine");
            std::process::exit(1);
        }
    };
    info!(root = %root.display(), "Indexing engine started");

    let app = Router::new()
        .route("/health", get(api_health))
        .route("/api/tree", get(api_tree))
        .route("/api/file", get(api_file))
        .route("/api/search", get(api_search))
        .route("/api/status", get(api_status))
        .route("/api/rescan", post(api_rescan))
        .route("/api/settings", get(api_get_settings).post(api_apply_settings))
        .route("/api/events", get(api_events));

    // Optional static web UI.
    let app = match cli.dist.as_ref().filter(|d| d.join("index.html").exists()) {
        Some(dist) => {
            info!(dist = %dist.display(), "Serving web UI");
            app.fallback_service(
                ServeDir::new(dist).not_found_service(ServeFile::new(dist.join("index.html"))),
            )
        }
        None => {
            if cli.dist.is_some() {
                warn!("--dist directory has no index.html; serving the API only");
            }
            app
        }
    };

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(engine);

    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let explicit_port: Option<u16> = std::env::var("PORT").ok().and_then(|p| p.parse().ok());

    let listener = if let Some(port) = explicit_port {
        tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await.unwrap_or_else(|e| {
            error!(port = port, error = %e, "Could not bind to port");
            eprintln!("  PORT={port} was set explicitly. Choose a different port.");
            std::process::exit(1);
        })
    } else {
        // Auto-scan: try 8653..=8662
        const BASE: u16 = 8653;
        const RANGE: u16 = 10;
        let mut found = None;
        for port in BASE..BASE + RANGE {
            match tokio::net::TcpListener::bind(format!("{bind_addr}:{port}")).await {
                Ok(l) => {
                    found = Some(l);
                    break;
                }
                Err(_) => continue,
            }
        }
        found.unwrap_or_else(|| {
            error!(range_start = BASE, range_end = BASE + RANGE - 1, "No free port found");
            eprintln!("  Try: PORT=<port> codemap");
            std::process::exit(1);
        })
    };

    let port = listener.local_addr().unwrap().port();
    info!(port = port, "http://localhost:{port}");
    // Machine-readable line for scripts (not through tracing)
    eprintln!("CODEMAP_PORT={port}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.unwrap();
}
