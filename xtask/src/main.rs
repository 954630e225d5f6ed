//! Build automation tasks for lanferry
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

/// Fuzz targets under `fuzz/fuzz_targets`
const FUZZ_TARGETS: &[&str] = &["wire_header", "session_key", "file_cipher"];

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "lanferry build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Run all CI checks
    Ci,

    /// Run criterion benchmarks
    Bench,

    /// Run a fuzz target for a bounded time (requires nightly and cargo-fuzz)
    Fuzz {
        /// Target name, or all targets when omitted
        target: Option<String>,

        /// Seconds per target
        #[arg(short, long, default_value_t = 60)]
        seconds: u64,
    },

    /// Generate documentation
    Doc,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
        }
        Commands::Lint => {
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
        }
        Commands::Fmt => {
            run_command("cargo", &["fmt", "--all", "--check"])?;
        }
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Bench => {
            run_command("cargo", &["bench", "--workspace"])?;
        }
        Commands::Fuzz { target, seconds } => {
            let targets: Vec<&str> = match target.as_deref() {
                Some(name) if FUZZ_TARGETS.contains(&name) => vec![name],
                Some(name) => anyhow::bail!(
                    "Unknown fuzz target: {name}. Must be one of: {}",
                    FUZZ_TARGETS.join(", ")
                ),
                None => FUZZ_TARGETS.to_vec(),
            };
            let max_time = format!("-max_total_time={seconds}");
            for name in targets {
                println!("Fuzzing {name} for {seconds}s...");
                run_command("cargo", &["+nightly", "fuzz", "run", name, "--", &max_time])?;
            }
        }
        Commands::Doc => {
            run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?;
        }
    }

    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program).args(args).status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
