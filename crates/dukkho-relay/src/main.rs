// Relay entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr; the relay has no terminal UI)
// 2. Load config and build the Gemini client
// 3. Either list models (`dukkho-relay models`) or bind and serve
// 4. Shut down on Ctrl+C

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing::{info, warn};

use dukkho_core::config;
use dukkho_llm::LlmClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = config::load_config().context("failed to load configuration")?;
    let llm_client = LlmClient::from_config(&config);

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => {}
        Some("models") => return list_models(&llm_client).await,
        Some(other) => bail!("unknown command `{other}` (expected `serve` or `models`)"),
    }

    match &llm_client {
        LlmClient::Active(client) => info!("Gemini client initialized for model {}", client.model()),
        LlmClient::Disabled => warn!(
            "No Gemini API key configured; chat requests will be answered with 500 until {} is set",
            config::API_KEY_ENV
        ),
    }

    let addr = config.server.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind relay on {addr}"))?;

    dukkho_relay::serve(listener, Arc::new(llm_client), shutdown_signal())
        .await
        .context("relay server failed")?;

    info!("Relay shut down cleanly");
    Ok(())
}

/// Print every model the configured key can use for streaming generation.
async fn list_models(llm_client: &LlmClient) -> anyhow::Result<()> {
    let LlmClient::Active(client) = llm_client else {
        bail!(
            "no Gemini API key configured; set {} or config/credentials.toml",
            config::API_KEY_ENV
        );
    };

    let models = client.list_models().await.context("failed to list models")?;
    if models.is_empty() {
        println!("No models available for this key.");
        return Ok(());
    }
    for model in models {
        match model.display_name {
            Some(display) => println!("{}  ({display})", model.name),
            None => println!("{}", model.name),
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dukkho_relay=info,dukkho_llm=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
