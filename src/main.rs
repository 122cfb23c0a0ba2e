use anyhow::Result;
use clap::Parser;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use git_serve_pack::pack::IndexPolicy;
use git_serve_pack::ServerConfig;

/// Serve one read-only upload-pack session on stdin/stdout.
///
/// Meant to be spawned by a remote shell, one process per connection, e.g.
/// from an sshd `ForceCommand` or as a client's `--upload-pack` program.
#[derive(Parser, Debug)]
#[command(name = "git-serve-pack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Repository to serve (work tree or bare git directory)
    repo: Option<PathBuf>,

    /// Config file (default: ~/.config/git-serve-pack/config.yaml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Branch to advertise
    #[arg(short, long)]
    branch: Option<String>,

    /// Skip unreadable index files instead of failing the session
    #[arg(long)]
    best_effort_index: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries the protocol; logs must stay on stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("git_serve_pack={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(repo) = cli.repo {
        config.repo = repo;
    }
    if let Some(branch) = cli.branch {
        config.branch = branch;
    }
    if cli.best_effort_index {
        config.index_policy = IndexPolicy::BestEffort;
    }
    tracing::debug!("Serving with {:?}", config);

    let stdin = io::stdin();
    let stdout = io::stdout();
    match git_serve_pack::serve(&config, stdin.lock(), BufWriter::new(stdout.lock()))? {
        Some(summary) => tracing::info!(
            "Session complete: {} objects, {} bytes",
            summary.objects,
            summary.bytes
        ),
        None => tracing::info!("Client disconnected before requesting a pack"),
    }

    Ok(())
}
