use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dispatch::{normalize_key, TaskContext};
use switchboard::config::{check_endpoint, SwitchboardConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Route one request and print the JSON result
    Run {
        input: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        channel: Option<String>,
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the classification of a request
    Classify { input: String },
    /// Print the registry keys derived from display names
    Keys { names: Vec<String> },
    /// Check that the LLM endpoint is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = SwitchboardConfig::default();

    match args.command {
        Command::Keys { names } => {
            for name in names {
                println!("{name}\t{}", normalize_key(&name));
            }
        }
        Command::Health => {
            if let Err(err) = check_endpoint(&config.llm.url).await {
                warn!(url = %config.llm.url, "Endpoint check failed: {err:#}");
                return Err(err);
            }
            info!(url = %config.llm.url, model = %config.llm.model, "Endpoint reachable");
            println!("ok");
        }
        Command::Classify { input } => {
            let orchestrator = switchboard::build_orchestrator(&config)?;
            let (result, source) = orchestrator
                .classifier()
                .classify_with_source(&input, &TaskContext::new())
                .await;
            info!(source = ?source, "Classified");
            println!("{}", serde_json::to_string_pretty(&result)?);
            orchestrator.shutdown().await;
        }
        Command::Run {
            input,
            user,
            channel,
            session,
        } => {
            info!(url = %config.llm.url, model = %config.llm.model, "Switchboard starting");
            let orchestrator = switchboard::build_orchestrator(&config)?;
            let mut context = TaskContext::new();
            if let Some(user) = user {
                context = context.user(user);
            }
            if let Some(channel) = channel {
                context = context.channel(channel);
            }
            if let Some(session) = session {
                context = context.session(session);
            }

            let result = orchestrator.execute(context, &input).await;
            if !result.success {
                warn!(message = %result.message, "Request failed");
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to encode result")?
            );
            // Let queued follow-ups finish before exiting.
            orchestrator.queue().wait_idle().await;
            orchestrator.shutdown().await;
        }
    }

    Ok(())
}
