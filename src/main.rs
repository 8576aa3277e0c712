mod cli;
mod paths;

use anyhow::Context;
use clap::Parser;
use llm_relay::chat::{ChatRequest, HistoryMessage, Role};
use llm_relay::config::{Config, ModelRegistry};
use llm_relay::{emit, Gateway};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = cli::Args::parse();

    let config_path = match args.config.clone() {
        Some(p) => p,
        None => paths::config_dir()?.join("config.toml"),
    };
    let cfg = Config::load_optional(&config_path)?.unwrap_or_default();
    tracing::debug!(?config_path, providers = cfg.providers.len(), "resolved config");

    let registry = ModelRegistry::from_config(&cfg);
    if registry.is_empty() {
        anyhow::bail!(
            "no providers configured; add [[providers]] entries to {}",
            config_path.display()
        );
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: llm-relay -m <model> \"Hello\"");
    }

    let model = args
        .model
        .clone()
        .or(cfg.default_model)
        .context("no model selected (pass -m or set default_model in config)")?;

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let gateway = Gateway::new(http, registry);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let req = ChatRequest {
        model,
        enable_search: args.search,
        history: vec![HistoryMessage {
            role: Role::User,
            content: prompt,
            images: args.images.clone(),
        }],
    };

    let stream = gateway.generate_stream(req, args.conversation.clone(), cancel);

    use std::io::Write;
    use tokio_stream::StreamExt;

    if args.sse {
        let mut frames = emit::frame_stream(stream);
        while let Some(frame) = frames.next().await {
            print!("{frame}");
            std::io::stdout().flush().ok();
        }
    } else {
        let mut stream = stream;
        while let Some(item) = stream.next().await {
            let delta = item.context("stream chunk error")?;
            print!("{}", delta.text);
            std::io::stdout().flush().ok();
        }
        println!();
    }

    Ok(())
}
