use std::sync::Arc;

use clap::Parser;
use haven_core::completion::{CompletionBackend, ProviderClient, ProviderConfig};
use haven_core::HavenConfig;
use haven_server::http::{start_http_server, HttpState};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "haven.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present; production uses real env vars
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config
    let config = match HavenConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Connect to DB
    let pool = match haven_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match haven_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Haven DB health check passed");
        return Ok(());
    }

    haven_core::db::ensure_schema(&pool).await?;

    // A missing API key is reported per request, not at startup.
    let provider = ProviderClient::new(ProviderConfig::from_completion(&config.completion))?;
    if !provider.has_api_key() {
        tracing::warn!(
            env = %config.completion.api_key_env,
            "Completion API key not set; intake conversations will fail until it is configured"
        );
    }
    let backend: Arc<dyn CompletionBackend> = Arc::new(provider);
    tracing::info!(
        backend = backend.name(),
        model = %config.completion.model,
        max_turns = config.conversation.max_turns,
        "Completion backend ready"
    );

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let state = Arc::new(HttpState::new(pool, config, backend));
    start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
