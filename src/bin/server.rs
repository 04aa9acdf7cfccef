use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use openai_mock::{ExpectationDocument, MockConfig, MockServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Serves the expectations of a YAML document as a chat-completion API.
#[derive(Debug, Parser)]
#[command(name = "openai-mock-server", version)]
struct Cli {
    /// YAML document with the expectations to serve.
    #[arg(short, long, env = "OPENAI_MOCK_EXPECTATIONS")]
    expectations: PathBuf,

    #[arg(long, env = "OPENAI_MOCK_ADDR", default_value = "127.0.0.1:8089")]
    addr: SocketAddr,

    #[arg(long, env = "OPENAI_MOCK_MODEL")]
    model: Option<String>,

    #[arg(long, env = "OPENAI_MOCK_FINAL_REPLY")]
    final_reply: Option<String>,

    /// Conversations tracked at once before the oldest is dropped.
    #[arg(long, env = "OPENAI_MOCK_MAX_CONVERSATIONS")]
    max_conversations: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,openai_mock=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let document = ExpectationDocument::from_file(&cli.expectations)?;
    let registry = document.to_registry()?;
    tracing::info!(
        path = %cli.expectations.display(),
        expectations = registry.len(),
        "loaded expectations"
    );

    let mut config = MockConfig::from_env().with_bind_addr(cli.addr);
    if let Some(model) = cli.model {
        config = config.with_model(model);
    }
    if let Some(final_reply) = cli.final_reply {
        config = config.with_final_reply(final_reply);
    }
    if let Some(max_conversations) = cli.max_conversations {
        config = config.with_max_conversations(max_conversations);
    }

    let server = MockServer::start_with_config(registry, config).await?;
    tracing::info!("listening on {}", server.base_url());

    tokio::signal::ctrl_c().await?;
    tracing::info!(requests = server.request_count(), "shutting down");
    server.shutdown().await?;
    Ok(())
}
