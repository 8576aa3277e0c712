use clap::Parser;
use std::path::PathBuf;

/// Multi-provider LLM streaming relay
#[derive(Debug, Parser)]
#[command(name = "llm-relay")]
#[command(version)]
#[command(about = "Relay one chat request to any configured LLM provider", long_about = None)]
pub struct Args {
    /// Model name (a [[providers]] entry; default: config default_model)
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Conversation id, scoping provider continuation tokens
    #[arg(long = "conversation", default_value = "default")]
    pub conversation: String,

    /// Config file (default: <config dir>/config.toml)
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Image attachment URLs for the prompt
    #[arg(long = "image", value_name = "URL")]
    pub images: Vec<String>,

    /// Ask the provider to ground the answer with web search
    #[arg(long = "search")]
    pub search: bool,

    /// Print framed event records instead of plain text
    #[arg(long = "sse")]
    pub sse: bool,

    /// Prompt text (positional)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}
