// matchcall: signaling relay for the match video-call page
//
// Serves the `/ws` relay the call widget talks to and offers a few helpers
// for operating it.

mod config;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use matchcall_core::call::LoopbackCall;
use matchcall_core::signaling::{AllowAll, CallPolicy, MatchGraph, RoomRegistry};
use matchcall_core::{call_room_id, Participant};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "matchcall")]
#[command(about = "Signaling relay for one-to-one video calls between matched users", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the signaling relay
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        /// Match graph JSON; overrides `policy_file` from the config
        #[arg(long)]
        policy: Option<PathBuf>,
    },
    /// Print the call room shared by two users
    RoomId { a: i64, b: i64 },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run an in-memory call between two users and show the relayed frames
    Simulate,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Set a configuration value
    Set { key: String, value: String },
    /// Get a configuration value
    Get { key: String },
    /// List all configuration
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, policy } => cmd_serve(port, policy).await,
        Commands::RoomId { a, b } => cmd_room_id(a, b),
        Commands::Config { action } => cmd_config(action),
        Commands::Simulate => cmd_simulate().await,
    }
}

async fn cmd_serve(port: Option<u16>, policy: Option<PathBuf>) -> Result<()> {
    let config = config::Config::load()?;
    let port = port.unwrap_or(config.listen_port);
    let addr = SocketAddr::new(config.bind_ip()?, port);

    let policy_path = policy.or_else(|| config.policy_file.as_ref().map(PathBuf::from));
    let policy: Arc<dyn CallPolicy> = match &policy_path {
        Some(path) => {
            let graph = MatchGraph::load(path)
                .with_context(|| format!("Failed to load policy {}", path.display()))?;
            Arc::new(graph)
        }
        None => {
            tracing::warn!("No policy file configured; every pair of users may call");
            Arc::new(AllowAll)
        }
    };

    let hub = Arc::new(server::RelayHub::new(
        RoomRegistry::new(policy),
        config.max_frame_bytes(),
    ));

    println!("{}", "matchcall relay".bold());
    println!("  {} ws://{}/ws?user_id=<id>", "Listening".bright_cyan(), addr);
    match &policy_path {
        Some(path) => println!("  {} {}", "Policy".bright_cyan(), path.display()),
        None => println!("  {} {}", "Policy".bright_cyan(), "(allow all)".dimmed()),
    }
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());

    tokio::select! {
        _ = server::serve(addr, hub.clone()) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            let stats = hub.stats();
            println!();
            println!(
                "{} Stopped ({} connections, {} active calls)",
                "✓".green(),
                stats.connections,
                stats.active_calls
            );
        }
    }

    Ok(())
}

fn cmd_room_id(a: i64, b: i64) -> Result<()> {
    if a == b {
        anyhow::bail!("A call needs two different users");
    }
    println!("{}", call_room_id(a, b));
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown or unset config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<20} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

async fn cmd_simulate() -> Result<()> {
    println!("{}", "Simulating a call...".bold());
    println!();

    let alice = Participant::new(1, "Alice");
    let bob = Participant::new(2, "Bob");
    let mut call = LoopbackCall::new(alice, bob, Arc::new(AllowAll))?;

    call.caller.session.start_call().await?;
    call.pump().await;
    println!("{} Alice: {}", "✓".green(), call.caller.session.status().text);

    call.callee.session.start_call().await?;
    call.pump().await;

    for frame in call.frames() {
        let targets: Vec<String> = frame.delivered_to.iter().map(|id| id.to_string()).collect();
        let targets = if targets.is_empty() {
            "(nobody)".dimmed().to_string()
        } else {
            targets.join(", ")
        };
        println!("  {:<14} {} -> {}", frame.event.bright_cyan(), frame.from, targets);
    }
    println!();

    println!(
        "{} Alice {} / Bob {}",
        "✓".green(),
        call.caller.session.peer_state(),
        call.callee.session.peer_state()
    );

    call.caller.session.end_call(true);
    call.pump().await;
    println!("{} Bob: {}", "✓".green(), call.callee.session.status().text);

    println!();
    println!("{}", "Simulation finished".green().bold());

    Ok(())
}
