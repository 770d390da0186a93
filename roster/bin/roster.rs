//! Runs the roster notification dispatcher

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use roster::Roster;
use roster_dispatch::{Channel, SendRequest};

#[derive(Parser, Debug)]
#[command(name = "roster")]
#[command(about = "Rate-limited member notification dispatch", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file, overriding `ROSTER_CONFIG` and the default locations
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the dispatcher and queue processor until interrupted (default)
    Serve,
    /// Print what the configuration resolves to
    Check,
    /// Send a single message through the configured channels
    Send {
        /// Recipient's name, used for the greeting
        #[arg(long)]
        name: String,

        /// Recipient's phone number
        #[arg(long)]
        to: String,

        #[arg(long)]
        body: String,

        #[arg(long, default_value = "messenger")]
        channel: Channel,

        /// Job the send is attributed to
        #[arg(long)]
        job: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let roster = Roster::from_path(&config_path)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => roster.run().await,
        Command::Check => {
            println!("{}", roster.describe()?);
            Ok(())
        }
        Command::Send {
            name,
            to,
            body,
            channel,
            job,
        } => {
            roster_common::logging::init();

            let request = SendRequest::new(name, to, body, channel);
            let request = match job {
                Some(job) => request.with_job(job),
                None => request,
            };

            let report = roster.send(request).await?;
            println!(
                "{}",
                ron::ser::to_string_pretty(&report, ron::ser::PrettyConfig::default())?
            );
            Ok(())
        }
    }
}

/// Find the configuration file using the following precedence:
/// 1. `ROSTER_CONFIG` environment variable
/// 2. ./roster.config.ron (current working directory)
/// 3. /etc/roster/roster.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("ROSTER_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "ROSTER_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./roster.config.ron"),
        PathBuf::from("/etc/roster/roster.config.ron"),
    ];

    for path in &default_paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - ROSTER_CONFIG environment variable\n{paths_tried}"
    )
}
