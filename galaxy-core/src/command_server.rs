//! Command server: accepts client handshakes on the well-known control
//! socket, stands up a per-client delivery listener, and spawns a worker
//! thread that services that client's subsequent `WATCH`/`IGNORE_*`/`EXIT`
//! requests.

use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{GalaxyError, Result};
use crate::protocol::{Ack, Command, CommandRequest, HandshakeRequest};
use crate::rule::{Rule, RuleKind};
use crate::session::{ClientSession, SessionRegistry};

/// Directory the command server's well-known control socket and per-client
/// control sockets live under.
pub const CONTROL_SOCKET_DIR: &str = "/tmp/.galaxy";

/// Bound on a single delivery write. A client that stops reading is
/// considered dead rather than allowed to stall delivery to every other
/// session from the single dispatcher thread.
pub const DELIVERY_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the canonical per-client session name from its pid and a
/// per-process client id, matching the naming scheme clients use to build
/// their own delivery socket path.
pub fn session_name(pid: u32, client_id: u32) -> String {
    format!("{pid:05}.{client_id}")
}

pub fn control_socket_path(dir: &Path, pid: u32, client_id: u32) -> PathBuf {
    dir.join(session_name(pid, client_id))
}

pub struct CommandServer {
    listener: UnixListener,
    sessions: Arc<SessionRegistry>,
    stop: Arc<AtomicBool>,
}

impl CommandServer {
    pub fn bind(well_known_path: &Path, sessions: Arc<SessionRegistry>, stop: Arc<AtomicBool>) -> Result<Self> {
        let _ = std::fs::remove_file(well_known_path);
        let listener = UnixListener::bind(well_known_path).map_err(|source| {
            GalaxyError::ListenBindFailed {
                path: well_known_path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self {
            listener,
            sessions,
            stop,
        })
    }

    /// Accepts handshakes until told to stop. Each accepted connection is
    /// handled synchronously (the handshake itself is a short exchange);
    /// the long-lived per-client work happens on a spawned worker thread.
    pub fn run(&self) {
        for incoming in self.listener.incoming() {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            match incoming {
                Ok(stream) => {
                    if let Err(err) = self.accept_one(stream) {
                        warn!(error = %err, "handshake failed");
                    }
                }
                Err(err) => {
                    if self.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    error!(error = %err, "accept failed on control socket");
                }
            }
        }
    }

    fn accept_one(&self, mut stream: UnixStream) -> Result<()> {
        let handshake = HandshakeRequest::read(&mut stream).map_err(GalaxyError::from)?;
        let name = session_name(handshake.pid, handshake.client_id);
        let delivery_path = PathBuf::from(&handshake.delivery_path);

        let delivery = match UnixStream::connect(&delivery_path) {
            Ok(stream) => stream,
            Err(source) => {
                warn!(path = %delivery_path.display(), error = %source, "failed to connect to client delivery socket");
                Ack::Fail.write(&mut stream)?;
                return Ok(());
            }
        };
        if let Err(err) = delivery.set_write_timeout(Some(DELIVERY_WRITE_TIMEOUT)) {
            warn!(path = %delivery_path.display(), error = %err, "failed to set delivery write timeout");
        }

        Ack::Success.write(&mut stream)?;

        let session = Arc::new(ClientSession::new(name.clone(), delivery_path, delivery));
        self.sessions.register(session);
        info!(%name, "client connected");

        let sessions = Arc::clone(&self.sessions);
        let control_path = control_socket_path(Path::new(CONTROL_SOCKET_DIR), handshake.pid, handshake.client_id);
        std::thread::Builder::new()
            .name(format!("galaxy-client-{name}"))
            .spawn(move || client_worker(stream, name, sessions, control_path))
            .map_err(GalaxyError::from)?;

        Ok(())
    }
}

/// Services one client's control connection: reads `CommandRequest`s until
/// `EXIT` or the connection closes, mutating that client's rule set.
fn client_worker(
    mut stream: UnixStream,
    name: String,
    sessions: Arc<SessionRegistry>,
    _control_path: PathBuf,
) {
    loop {
        let request = match CommandRequest::read(&mut stream) {
            Ok(request) => request,
            Err(err) => {
                debug!(%name, error = %err, "control connection closed");
                break;
            }
        };

        let Some(session) = sessions.get(&name) else {
            break;
        };

        match request.command {
            Command::Exit => {
                debug!(%name, "client requested exit");
                break;
            }
            Command::Watch => {
                let Some(pattern) = request.pattern else {
                    warn!(%name, "WATCH command missing a regex pattern, closing connection");
                    break;
                };
                match Rule::new(RuleKind::Include, request.mask, &pattern) {
                    Ok(rule) => session.push_rule(rule),
                    Err(err) => {
                        warn!(%name, %err, "rejecting WATCH with invalid regex, closing connection");
                        break;
                    }
                }
            }
            Command::IgnoreWatch => {
                let Some(pattern) = request.pattern else {
                    warn!(%name, "IGNORE_WATCH command missing a regex pattern, closing connection");
                    break;
                };
                match Rule::new(RuleKind::Exclude, request.mask, &pattern) {
                    Ok(rule) => session.push_rule(rule),
                    Err(err) => {
                        warn!(%name, %err, "rejecting IGNORE_WATCH with invalid regex, closing connection");
                        break;
                    }
                }
            }
            Command::IgnoreMask => {
                session.add_ignore_mask(request.mask);
            }
        }
    }

    sessions.unregister(&name);
}
