//! Top-level orchestration: wires the watch registry, crawler, kernel event
//! reader, dispatcher, session registry, and command server together, and
//! owns the startup/shutdown sequence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use inotify::Inotify;
use tracing::info;

use crate::command_server::CommandServer;
use crate::crawler::{CrawlerConfig, DirectoryCrawler};
use crate::dispatcher::{EventDispatcher, KernelEventReader};
use crate::error::{GalaxyError, Result};
use crate::lifecycle::{Lockfile, SignalWaiter, DEFAULT_LOCKFILE_PATH};
use crate::session::SessionRegistry;
use crate::watch::WatchRegistry;

/// Everything `galaxyd`'s argument-parsing layer needs to produce before
/// handing control to [`Daemon::run`].
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub crawler: CrawlerConfig,
    pub control_socket_path: PathBuf,
    pub lockfile_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            crawler: CrawlerConfig {
                roots: Vec::new(),
                prune: Vec::new(),
                recursive: true,
            },
            control_socket_path: PathBuf::from(crate::command_server::CONTROL_SOCKET_DIR)
                .join("galaxy.sock"),
            lockfile_path: PathBuf::from(DEFAULT_LOCKFILE_PATH),
        }
    }
}

/// Owns every long-lived piece of daemon state and thread.
pub struct Daemon {
    config: DaemonConfig,
    stop: Arc<AtomicBool>,
}

impl Daemon {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquires the lockfile, installs the signal waiter, crawls the
    /// configured directories, and starts the command server and kernel
    /// event reader, blocking until SIGINT is received.
    ///
    /// Thread roles: one for the signal waiter, one accepting control-socket
    /// handshakes (spawning a further worker thread per connected client),
    /// and one reading kernel events and dispatching them inline. Shutdown
    /// order mirrors startup in reverse: stop accepting new clients, stop
    /// reading kernel events, then let the registries drop.
    pub fn run(self) -> Result<()> {
        let _lockfile = Lockfile::acquire(&self.config.lockfile_path)?;

        if let Some(parent) = self.config.control_socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(GalaxyError::from)?;
        }

        let inotify = Inotify::init().map_err(GalaxyError::NotifyInitFailed)?;
        let registry = Arc::new(WatchRegistry::new(inotify.watches()));
        let sessions = Arc::new(SessionRegistry::new());
        let crawler = Arc::new(DirectoryCrawler::new(
            self.config.crawler.clone(),
            Arc::clone(&registry),
        ));
        crawler.run();
        info!(watch_count = registry.len(), "initial crawl complete");

        let dispatcher = EventDispatcher::new(Arc::clone(&registry), Arc::clone(&crawler), Arc::clone(&sessions));
        let mut reader = KernelEventReader::new(inotify, Arc::clone(&self.stop));

        let command_server = Arc::new(CommandServer::bind(
            &self.config.control_socket_path,
            Arc::clone(&sessions),
            Arc::clone(&self.stop),
        )?);

        let server_thread = {
            let command_server = Arc::clone(&command_server);
            std::thread::Builder::new()
                .name("galaxy-command-server".to_string())
                .spawn(move || command_server.run())
                .map_err(GalaxyError::from)?
        };

        let reader_thread = {
            let stop = Arc::clone(&self.stop);
            std::thread::Builder::new()
                .name("galaxy-kernel-reader".to_string())
                .spawn(move || {
                    if let Err(err) = reader.run(&dispatcher) {
                        if !stop.load(Ordering::Relaxed) {
                            tracing::error!(%err, "kernel event reader exited unexpectedly");
                        }
                    }
                })
                .map_err(GalaxyError::from)?
        };

        let mut signal_waiter = SignalWaiter::install(Arc::clone(&self.stop))?;
        signal_waiter.wait_for_shutdown();

        self.stop.store(true, Ordering::Relaxed);
        // Wake the accept loop; connecting to our own socket and dropping
        // immediately is enough to unblock `accept()`.
        let _ = std::os::unix::net::UnixStream::connect(&self.config.control_socket_path);

        let _ = server_thread.join();
        let _ = reader_thread.join();

        info!("shutdown complete");
        Ok(())
    }
}
