//! # galaxyd
//!
//! Filesystem-activity monitoring daemon. Crawls a set of directories,
//! installs kernel watches on them via inotify, and streams matching events
//! to connected clients over Unix domain sockets.
//!
//! ## Architecture
//!
//! - A directory crawler installs watches depth-first and re-registers new
//!   subdirectories as they appear.
//! - A kernel event reader blocks on the inotify file descriptor and hands
//!   raw events to a dispatcher.
//! - The dispatcher resolves each event's absolute path and fans it out to
//!   every client session whose include/exclude rules match.
//! - A command server accepts client handshakes on a well-known control
//!   socket and spawns one worker thread per connected client.

use std::path::PathBuf;

use clap::Parser;
use galaxy_core::command_server::CONTROL_SOCKET_DIR;
use galaxy_core::crawler::CrawlerConfig;
use galaxy_core::daemon::{Daemon, DaemonConfig};
use galaxy_core::lifecycle::DEFAULT_LOCKFILE_PATH;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Command line arguments for the galaxyd filesystem monitor.
///
/// `disable_version_flag` turns off clap's automatic `-V`/`--version`
/// binding so the lowercase `-v` flag below can take that slot instead.
#[derive(Parser, Debug)]
#[command(
    name = "galaxyd",
    about = "Filesystem-activity monitoring daemon",
    version = env!("CARGO_PKG_VERSION"),
    disable_version_flag = true
)]
struct Args {
    /// Directories to watch. Falls back to `GALAXY_SEARCH_PATH` (a
    /// colon-separated list) and then to the current working directory.
    dirs: Vec<PathBuf>,

    /// Print version information and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: (),

    /// Watch directories recursively.
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Colon-separated list of paths to prune from the crawl. Merged with
    /// `GALAXY_PRUNE_PATH`.
    #[arg(short = 'p', long)]
    prune: Option<String>,

    /// Path to the well-known control socket.
    #[arg(long, env = "GALAXY_CONTROL_SOCKET")]
    control_socket: Option<PathBuf>,

    /// Path to the single-instance lockfile.
    #[arg(long, env = "GALAXY_LOCKFILE")]
    lockfile: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "galaxyd=debug,galaxy_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cwd = std::env::current_dir()?;
    let crawler = CrawlerConfig::resolve(
        &args.dirs,
        std::env::var("GALAXY_SEARCH_PATH").ok().as_deref(),
        args.prune.as_deref(),
        std::env::var("GALAXY_PRUNE_PATH").ok().as_deref(),
        args.recursive,
        &cwd,
    );

    info!(roots = ?crawler.roots, prune = ?crawler.prune, recursive = crawler.recursive, "starting galaxyd");

    let config = DaemonConfig {
        crawler,
        control_socket_path: args
            .control_socket
            .unwrap_or_else(|| PathBuf::from(CONTROL_SOCKET_DIR).join("galaxy.sock")),
        lockfile_path: args
            .lockfile
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCKFILE_PATH)),
    };

    Daemon::new(config).run()?;
    Ok(())
}
