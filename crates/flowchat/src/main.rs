//! Run a single chat node and print its response.
//!
//! Reads the API key from the `OPENROUTER_KEY` environment variable unless
//! `--offline-reply` is given.
//!
//! # Examples
//!
//! ```sh
//! # Buffered answer as JSON
//! flowchat --model openai/gpt-4o-mini --prompt "What is a borrow checker?"
//!
//! # Streamed as server-sent events, with the last 3 turns of history
//! flowchat --model openai/gpt-4o-mini --prompt "And lifetimes?" \
//!   --history history.json --dialogue-number 3 --stream
//!
//! # Offline dry run with node details
//! flowchat --model test --prompt "hi" --offline-reply "hello there" --stream --details
//! ```

use clap::Parser;
use flowchat::model::openrouter::DEFAULT_MAX_TOKENS;
use flowchat::model::{ModelClient, ModelRegistry, OpenRouterClient, ScriptedModel};
use flowchat::node::{
    ChatNode, ChatNodeExecutor, ChatNodeParams, NodeInvocation, NodeResponse, NoopPostHandler,
    SseSink, deliver, generate_id,
};
use flowchat::{ChatNodeError, history};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Run a single chat node and print its response.
///
/// Reads the API key from the OPENROUTER_KEY environment variable.
#[derive(Parser)]
#[command(name = "flowchat")]
struct Cli {
    // ── Node params ────────────────────────────────────────────
    /// Model id to call
    #[arg(long, default_value = "openai/gpt-4o-mini")]
    model: String,

    /// System instruction
    #[arg(long)]
    system: Option<String>,

    /// Prompt sent as the human message
    #[arg(long)]
    prompt: String,

    /// Number of most recent history records to include
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    dialogue_number: i64,

    /// JSON array of {"problem_text", "answer_text"} records, oldest first
    #[arg(long)]
    history: Option<PathBuf>,

    // ── Invocation ─────────────────────────────────────────────
    /// Stream the answer as server-sent events
    #[arg(long)]
    stream: bool,

    /// Chat session id (generated when omitted)
    #[arg(long)]
    session_id: Option<String>,

    /// Chat record id (generated when omitted)
    #[arg(long)]
    record_id: Option<String>,

    // ── Model settings ─────────────────────────────────────────
    /// Maximum tokens in the response
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Answer with this text instead of calling the API
    #[arg(long)]
    offline_reply: Option<String>,

    // ── Output ─────────────────────────────────────────────────
    /// Print node details as JSON after the response
    #[arg(long)]
    details: bool,
}

fn build_client(cli: &Cli) -> Result<Arc<dyn ModelClient>, ChatNodeError> {
    if let Some(reply) = &cli.offline_reply {
        return Ok(Arc::new(ScriptedModel::new(reply.clone())));
    }
    let api_key = std::env::var("OPENROUTER_KEY").map_err(|_| {
        ChatNodeError::Configuration("OPENROUTER_KEY environment variable is not set".into())
    })?;
    let mut client = OpenRouterClient::new(api_key, cli.model.clone())?.with_max_tokens(cli.max_tokens);
    if let Some(temperature) = cli.temperature {
        client = client.with_temperature(temperature);
    }
    Ok(Arc::new(client))
}

async fn run(cli: Cli) -> Result<(), ChatNodeError> {
    let client = build_client(&cli)?;
    let registry = ModelRegistry::new().with(cli.model.clone(), client);
    let executor = ChatNodeExecutor::new(Arc::new(registry));

    let mut params = ChatNodeParams::new(cli.model.clone(), cli.prompt.clone())
        .with_dialogue_number(cli.dialogue_number);
    if let Some(system) = &cli.system {
        params = params.with_system(system.clone());
    }

    let session_id = cli.session_id.clone().unwrap_or_else(|| generate_id("chat"));
    let record_id = cli.record_id.clone().unwrap_or_else(|| generate_id("record"));
    let mut invocation = NodeInvocation::new(session_id, record_id).with_stream(cli.stream);
    if let Some(path) = &cli.history {
        invocation = invocation.with_history(history::load_records(path)?);
    }

    let mut node = ChatNode::new(generate_id("node"), params);
    let started = Instant::now();
    let result = node.run(&executor, invocation).await?;

    match result.into_response(Arc::new(NoopPostHandler)) {
        NodeResponse::Complete(fragment) => {
            println!("{}", serde_json::to_string_pretty(&fragment)?);
        }
        response @ NodeResponse::Streaming(_) => {
            deliver(response, &mut SseSink::new(std::io::stdout())).await?;
        }
    }
    node.set_run_time(started.elapsed().as_secs_f64());
    info!("Node {} finished in {:.2}s", node.id(), started.elapsed().as_secs_f64());

    if cli.details {
        println!("{}", serde_json::to_string_pretty(&node.details(0)?)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
