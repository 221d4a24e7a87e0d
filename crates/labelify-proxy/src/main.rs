mod access_log;
mod proxy;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use labelify_core::source::SourceRegistry;
use labelify_core::{Config, Pipeline};

use access_log::AccessLogLayer;
use state::ProxyState;

// ============================================================
// CLI
// ============================================================

#[derive(Parser)]
#[command(name = "labelify", about = "Label-enriching proxy for Prometheus query APIs", version = labelify_core::VERSION)]
struct Args {
    /// Path to the configuration file.
    #[arg(long = "config.file", default_value = "config.yaml", env = "LABELIFY_CONFIG")]
    config_file: PathBuf,

    /// Listen address. Defaults to 0.0.0.0 on `config.server.port`.
    #[arg(long, env = "LABELIFY_LISTEN")]
    listen: Option<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["labelify", "labelify_proxy", "labelify_core"] {
        if let Ok(directive) = format!("{target}={level}").parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(1);
        }
    };
    runtime.block_on(async_main(args));
}

async fn async_main(args: Args) {
    info!(version = labelify_core::VERSION, "labelify starting");

    let config = match Config::from_file(&args.config_file) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %args.config_file.display(), error = %e, "failed to load config");
            process::exit(1);
        }
    };

    // Refresh tasks of polling sources stop when this fires.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let registry = match SourceRegistry::from_config(&config.sources, &shutdown_tx).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to build mapping sources");
            process::exit(1);
        }
    };

    let pipeline = Pipeline::from_rules(config.enrichment.rules.clone(), Arc::new(registry));
    let state = match ProxyState::new(
        &config.config.prometheus.url,
        &config.config.server.enrich_paths,
        pipeline,
    ) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to set up proxy");
            process::exit(1);
        }
    };

    let app = proxy::router(state)
        .layer(AccessLogLayer)
        .into_make_service_with_connect_info::<SocketAddr>();

    let listen = args
        .listen
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.config.server.port));
    let addr: SocketAddr = match listen.parse() {
        Ok(a) => a,
        Err(e) => {
            error!(listen = %listen, error = %e, "invalid listen address");
            process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind");
            process::exit(1);
        }
    };
    info!(%addr, upstream = %config.config.prometheus.url, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
    {
        error!(error = %e, "server error");
        process::exit(1);
    }
    info!("labelify stopped");
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
    let _ = shutdown_tx.send(());
}
