//! lanferry CLI
//!
//! Send files to, and receive files from, another device on the local network.

mod config;
mod progress;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::{Term, style};
use lanferry_core::{EventSink, Receiver, Sender};
use lanferry_files::storage::{clear_received, ensure_dir, list_received};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{format_bytes, format_duration, render_events};

/// lanferry - encrypted file transfer between devices on the same network
#[derive(Parser)]
#[command(name = "lanferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send files to a listening receiver
    Send {
        /// Receiver address (host:port)
        #[arg(required = true)]
        addr: String,

        /// Files to send, in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Listen for senders and store verified files
    Receive {
        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Listen address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// List received files
    List {
        /// Receive directory
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Delete every received file
    Clear {
        /// Receive directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the active configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = if cli.config.is_some() {
        Config::load(&config_path)?
    } else {
        Config::load_or_default()?
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    // Validate configuration
    config.validate()?;

    match cli.command {
        Commands::Send { addr, files } => {
            send_files(addr, files, &config).await?;
        }
        Commands::Receive { output, bind } => {
            receive_files(output, bind, &config).await?;
        }
        Commands::List { dir } => {
            list_files(dir.unwrap_or_else(|| config.storage.receive_dir.clone()))?;
        }
        Commands::Clear { dir, yes } => {
            clear_files(dir.unwrap_or_else(|| config.storage.receive_dir.clone()), yes)?;
        }
        Commands::Config => {
            show_config(&config_path, &config)?;
        }
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping");
            token.cancel();
        }
    });
}

/// Send files to a receiver
async fn send_files(addr: String, files: Vec<PathBuf>, config: &Config) -> anyhow::Result<()> {
    tracing::info!("Sending {} file(s) to {}", files.len(), addr);

    let connect_timeout = Duration::from_secs(config.network.connect_timeout_secs);
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow::anyhow!("Timed out connecting to {addr}"))?
        .with_context(|| format!("Failed to connect to {addr}"))?;
    stream.set_nodelay(true)?;

    println!("Recipient: {}", addr);

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let (events, rx) = EventSink::channel();
    let display = tokio::spawn(render_events(rx));

    let sender = Sender::new(config.to_transfer_config())
        .with_events(events)
        .with_cancellation(token);
    let result = sender.send(stream, &files).await;

    // Closes the event channel so the display task drains and exits
    drop(sender);
    display.await?;

    let report = result.context("Transfer failed")?;
    println!(
        "Sent {} file(s), {} on the wire, {} attempt(s)",
        report.files_sent,
        format_bytes(report.bytes_sent),
        report.attempts
    );
    Ok(())
}

/// Receive files from senders until interrupted
async fn receive_files(
    output: Option<PathBuf>,
    bind: Option<String>,
    config: &Config,
) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| config.storage.receive_dir.clone());
    ensure_dir(&output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let bind = bind.unwrap_or_else(|| config.network.listen_addr.clone());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to listen on {bind}"))?;

    println!("Output directory: {}", output.display());
    println!("Listening on: {}", listener.local_addr()?);
    println!("Press Ctrl+C to stop");

    let token = CancellationToken::new();
    cancel_on_ctrl_c(token.clone());

    let (events, rx) = EventSink::channel();
    let display = tokio::spawn(render_events(rx));

    let receiver = Receiver::new(config.to_transfer_config(), output)
        .with_events(events)
        .with_cancellation(token);
    let result = receiver.serve(listener).await;

    drop(receiver);
    display.await?;

    result.context("Receiver failed")?;
    Ok(())
}

/// List received files
fn list_files(dir: PathBuf) -> anyhow::Result<()> {
    let files = list_received(&dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?;

    if files.is_empty() {
        println!("No files in {}", dir.display());
        return Ok(());
    }

    let now = SystemTime::now();
    for file in &files {
        let age = file
            .modified
            .and_then(|m| now.duration_since(m).ok())
            .map(|d| format!("{} ago", format_duration(d)))
            .unwrap_or_else(|| "-".to_string());
        println!("{:>12}  {:>10}  {}", format_bytes(file.size), age, file.name);
    }

    let total: u64 = files.iter().map(|f| f.size).sum();
    println!(
        "{} file(s), {} in {}",
        files.len(),
        format_bytes(total),
        dir.display()
    );
    Ok(())
}

/// Delete received files
fn clear_files(dir: PathBuf, yes: bool) -> anyhow::Result<()> {
    let count = list_received(&dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .len();
    if count == 0 {
        println!("Nothing to delete in {}", dir.display());
        return Ok(());
    }

    if !yes {
        let term = Term::stdout();
        term.write_str(&format!(
            "Delete {count} file(s) in {}? [y/N] ",
            dir.display()
        ))?;
        let answer = term.read_line()?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    let removed = clear_received(&dir)?;
    println!("{} {removed} file(s)", style("Deleted").red());
    Ok(())
}

/// Print configuration
fn show_config(path: &std::path::Path, config: &Config) -> anyhow::Result<()> {
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
