//! xal demo agent
//!
//! Feeds newline-delimited JSON snapshots through an agent wired to the
//! in-memory registry and prints every snapshot the agent pushes upstream.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xal::{handler_fn, Agent, AgentConfig, FactTree, HandlerContext, MemoryRegistry, RegistryCall, RetentionMode};

#[derive(Parser, Debug)]
#[command(name = "xal-agent")]
#[command(about = "Replay fact snapshots through a local xal agent", long_about = None)]
struct Args {
    /// NDJSON file of snapshots (stdin when omitted)
    input: Option<PathBuf>,

    /// Agent name used for registration
    #[arg(short, long, default_value = "xal-agent")]
    name: String,

    /// Path to watch; repeat for several handlers, dispatched in the given order
    #[arg(short, long = "watch", required = true)]
    watch: Vec<String>,

    /// Leaf the handlers write the triggering path into
    #[arg(long)]
    ack: Option<String>,

    /// Drop event records once they go idle
    #[arg(long)]
    evict: bool,

    /// Log filter when RUST_LOG is unset (e.g. "debug", "xal=trace")
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn replay<R>(agent: &Agent, reader: R) -> Result<usize, Box<dyn std::error::Error>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut fed = 0usize;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let raw: serde_json::Value = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "skipping unparseable line");
                continue;
            }
        };
        match agent.handle_inbound_json(&raw).await {
            Ok(outcome) => info!(?outcome, "snapshot handled"),
            Err(err) => warn!(error = %err, "snapshot rejected"),
        }
        fed += 1;
    }
    Ok(fed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let retention = if args.evict {
        RetentionMode::EvictWhenIdle
    } else {
        RetentionMode::RetainAll
    };
    let registry = Arc::new(MemoryRegistry::new());
    let agent = Agent::new(AgentConfig::new(args.name.clone()).with_retention(retention), registry.clone())?;

    for path in &args.watch {
        let ack = args.ack.clone();
        agent.on(
            path,
            handler_fn(move |ctx: HandlerContext, mut state: FactTree| {
                let ack = ack.clone();
                async move {
                    info!(event_id = %ctx.event_id(), path = %ctx.path(), "change observed");
                    if let Some(ack) = ack {
                        ctx.put(&mut state, &ack, ctx.path().as_str())?;
                    }
                    Ok(state)
                }
            }),
        )?;
    }
    let agent_id = agent.start().await?;
    info!(agent_id = %agent_id, "agent started");

    let fed = match &args.input {
        Some(path) => replay(&agent, BufReader::new(tokio::fs::File::open(path).await?)).await?,
        None => replay(&agent, BufReader::new(tokio::io::stdin())).await?,
    };
    info!(snapshots = fed, "input exhausted");

    for call in registry.calls()? {
        if let RegistryCall::PushSnapshot { event_id, snapshot } = call {
            println!("{}", serde_json::json!({ "event_id": event_id, "snapshot": snapshot }));
        }
    }
    agent.stop()?;
    Ok(())
}
