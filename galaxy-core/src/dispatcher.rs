//! Kernel event reader and dispatcher: turns raw `inotify` events into
//! [`DeliveredEvent`]s, applies self-managed side effects (re-crawling new
//! subdirectories, retiring stale watches), and fans matching events out to
//! every registered session.

use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use inotify::{Inotify, WatchDescriptor};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{error, warn};

use crate::crawler::DirectoryCrawler;
use crate::error::{GalaxyError, Result};
use crate::mask::EventMask;
use crate::protocol::DeliveredEvent;
use crate::session::SessionRegistry;
use crate::watch::WatchRegistry;

/// A single event read off the kernel's inotify queue, before path
/// resolution.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub wd: WatchDescriptor,
    pub mask: EventMask,
    pub cookie: u32,
    pub name: Option<String>,
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Joins a watch's directory with an event's optional child name, without
/// producing a trailing-slash-doubled path when `name` is absent (the event
/// concerns the watched directory itself, e.g. `DELETE_SELF`).
pub fn resolve_path(dir: &Path, name: Option<&str>) -> String {
    match name {
        Some(n) if !n.is_empty() => dir.join(n).display().to_string(),
        _ => dir.display().to_string(),
    }
}

pub struct EventDispatcher {
    registry: Arc<WatchRegistry>,
    crawler: Arc<DirectoryCrawler>,
    sessions: Arc<SessionRegistry>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<WatchRegistry>,
        crawler: Arc<DirectoryCrawler>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            registry,
            crawler,
            sessions,
        }
    }

    /// Resolves a raw event's absolute path, applies self-managed side
    /// effects, and fans it out to matching sessions. Side effects run
    /// before fan-out for `CREATE|ISDIR` (the new subdirectory is watchable
    /// by the time sessions see the event) and after for
    /// `DELETE_SELF`/`IGNORED` (sessions still see one last event for the
    /// path being retired).
    pub fn handle(&self, event: RawEvent) {
        if event.mask.contains(EventMask::Q_OVERFLOW) {
            warn!("kernel event queue overflowed");
            let notice = DeliveredEvent {
                mask: event.mask,
                timestamp: now_epoch_seconds(),
                path: String::new(),
            };
            self.sessions.broadcast(&notice);
            return;
        }

        let dir = self.registry.lookup(&event.wd);
        let path = match &dir {
            Some(dir) => resolve_path(dir, event.name.as_deref()),
            None => crate::watch::UNKNOWN_PATH.to_string(),
        };

        if event.mask.contains(EventMask::CREATE) && event.mask.contains(EventMask::ISDIR) {
            if let Some(dir) = &dir {
                self.crawler.install_one(&dir.join(event.name.as_deref().unwrap_or_default()));
            }
        }

        if event.mask.contains(EventMask::UNMOUNT) {
            let notice = DeliveredEvent {
                mask: event.mask,
                timestamp: now_epoch_seconds(),
                path: path.clone(),
            };
            self.sessions.broadcast(&notice);
        } else {
            let delivered = DeliveredEvent {
                mask: event.mask,
                timestamp: now_epoch_seconds(),
                path: path.clone(),
            };
            self.sessions.dispatch(event.mask, &path, &delivered);
        }

        if event.mask.contains(EventMask::DELETE_SELF) || event.mask.contains(EventMask::IGNORED) {
            self.registry.remove(&event.wd);
        }
    }
}

/// How long a single readiness wait blocks before re-checking `stop`. Bounds
/// the delay between SIGINT arriving and the reader thread noticing it, so
/// a quiet filesystem never leaves shutdown hanging on a join that would
/// otherwise wait for the next kernel event.
const POLL_TIMEOUT: PollTimeout = PollTimeout::from(1_000u16);

/// Waits for the inotify fd to become readable, then translates each
/// kernel event into a [`RawEvent`] and hands it to an [`EventDispatcher`].
/// Runs on its own thread; `stop` is re-checked every time a readiness wait
/// times out, so shutdown is observed within one [`POLL_TIMEOUT`] even when
/// no filesystem event is in flight.
pub struct KernelEventReader {
    inotify: Inotify,
    stop: Arc<AtomicBool>,
}

impl KernelEventReader {
    pub fn new(inotify: Inotify, stop: Arc<AtomicBool>) -> Self {
        Self { inotify, stop }
    }

    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.inotify.as_raw_fd()
    }

    pub fn run(&mut self, dispatcher: &EventDispatcher) -> Result<()> {
        let mut buffer = [0u8; 4096];
        while !self.stop.load(Ordering::Relaxed) {
            // Safety: the fd is owned by `self.inotify` for the lifetime of
            // this borrow and outlives the `poll` call below.
            let borrowed = unsafe { BorrowedFd::borrow_raw(self.raw_fd()) };
            let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
            match poll(&mut fds, POLL_TIMEOUT) {
                Ok(0) => continue, // timed out, loop back around and re-check `stop`
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(errno) => {
                    let err = std::io::Error::from_raw_os_error(errno as i32);
                    error!(%err, "polling inotify fd failed");
                    return Err(GalaxyError::Io(err));
                }
            }

            let events = match self.inotify.read_events_blocking(&mut buffer) {
                Ok(events) => events,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) if self.stop.load(Ordering::Relaxed) => {
                    let _ = err;
                    break;
                }
                Err(err) => {
                    error!(error = %err, "reading inotify events failed");
                    return Err(GalaxyError::Io(err));
                }
            };

            for event in events {
                let raw = RawEvent {
                    wd: event.wd,
                    mask: EventMask::from_inotify(event.mask),
                    cookie: event.cookie,
                    name: event.name.map(|n| n.to_string_lossy().into_owned()),
                };
                dispatcher.handle(raw);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn resolve_path_joins_child_name() {
        let dir = PathBuf::from("/tmp/watched");
        assert_eq!(resolve_path(&dir, Some("file.txt")), "/tmp/watched/file.txt");
    }

    #[test]
    fn resolve_path_without_name_is_the_directory_itself() {
        let dir = PathBuf::from("/tmp/watched");
        assert_eq!(resolve_path(&dir, None), "/tmp/watched");
        assert_eq!(resolve_path(&dir, Some("")), "/tmp/watched");
    }

    #[test]
    fn dispatch_delivers_to_matching_session() {
        use crate::crawler::CrawlerConfig;
        use crate::rule::{Rule, RuleKind};
        use crate::session::{ClientSession, SessionRegistry};
        use std::os::unix::net::UnixStream;
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let inotify = Inotify::init().unwrap();
        let registry = Arc::new(WatchRegistry::new(inotify.watches()));
        let wd = registry.insert(dir.path(), EventMask::ALL_EVENTS).unwrap();

        let crawler_config = CrawlerConfig {
            roots: vec![],
            prune: vec![],
            recursive: true,
        };
        let crawler = Arc::new(DirectoryCrawler::new(crawler_config, Arc::clone(&registry)));
        let sessions = Arc::new(SessionRegistry::new());

        let (local, remote) = UnixStream::pair().unwrap();
        let session = Arc::new(ClientSession::new(
            "00001.0".to_string(),
            PathBuf::from("/tmp/x"),
            local,
        ));
        session.push_rule(Rule::new(RuleKind::Include, EventMask::CREATE, ".*").unwrap());
        sessions.register(session);

        let dispatcher = EventDispatcher::new(registry, crawler, sessions);
        dispatcher.handle(RawEvent {
            wd,
            mask: EventMask::CREATE,
            cookie: 0,
            name: Some("new_file".to_string()),
        });

        use std::io::Read;
        let mut remote = remote;
        let mut buf = [0u8; 256];
        let n = remote.read(&mut buf).unwrap();
        assert!(n > 0);
    }
}
