//! Client session registry: one entry per connected client, holding its
//! delivery socket and the ordered rule set the dispatcher matches events
//! against.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::mask::EventMask;
use crate::protocol::DeliveredEvent;
use crate::rule::Rule;

/// A connected client. `name` is the canonical `<pid>.<id>`-style session
/// identifier used to build its control and delivery socket paths.
pub struct ClientSession {
    pub name: String,
    pub delivery_path: PathBuf,
    delivery: Mutex<UnixStream>,
    rules: Mutex<Vec<Rule>>,
    /// Session-wide ignore mask, persistent across future events and
    /// future `WATCH` rules alike: ANDed out of an event's mask before rule
    /// evaluation, rather than mutating already-installed rules.
    ignore_mask: AtomicU32,
}

impl ClientSession {
    pub fn new(name: String, delivery_path: PathBuf, delivery: UnixStream) -> Self {
        Self {
            name,
            delivery_path,
            delivery: Mutex::new(delivery),
            rules: Mutex::new(Vec::new()),
            ignore_mask: AtomicU32::new(0),
        }
    }

    pub fn push_rule(&self, rule: Rule) {
        self.rules.lock().push(rule);
    }

    /// Implements `IGNORE_MASK`: ORs `mask` into the session's persistent
    /// ignore mask. Applies to every event evaluated from now on,
    /// including ones matched by rules installed later, and never touches
    /// the rule list itself.
    pub fn add_ignore_mask(&self, mask: EventMask) {
        self.ignore_mask.fetch_or(mask.into(), Ordering::Relaxed);
    }

    /// Walks the ordered rule list against `event_mask` with the session's
    /// persistent ignore mask ANDed out first; the last rule whose mask and
    /// regex both match wins. No rules at all means no delivery.
    pub fn effective_verdict(&self, event_mask: EventMask, path: &str) -> bool {
        let ignore_mask = EventMask::from(self.ignore_mask.load(Ordering::Relaxed));
        let effective_mask = event_mask & !ignore_mask;
        if effective_mask.is_empty() {
            return false;
        }

        let rules = self.rules.lock();
        let mut verdict = false;
        for rule in rules.iter() {
            if rule.matches(effective_mask, path) {
                verdict = matches!(rule.kind, crate::rule::RuleKind::Include);
            }
        }
        verdict
    }

    /// Sends one event over the delivery socket. The socket is expected to
    /// already carry a write timeout, so a stalled client surfaces as a
    /// timed-out write here rather than blocking forever; either way the
    /// error is returned to the caller, which is expected to unregister the
    /// session.
    pub fn deliver(&self, event: &DeliveredEvent) -> crate::error::Result<()> {
        let mut buf = Vec::new();
        event.write(&mut buf)?;
        let mut stream = self.delivery.lock();
        stream
            .write_all(&buf)
            .map_err(crate::error::GalaxyError::ClientWriteFailed)
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("name", &self.name)
            .field("delivery_path", &self.delivery_path)
            .finish()
    }
}

/// All currently connected sessions, keyed by session name. Backed by
/// `dashmap` so the dispatcher can fan out to every session concurrently
/// with per-client workers registering and unregistering.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<ClientSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    pub fn register(&self, session: Arc<ClientSession>) {
        debug!(name = %session.name, "session registered");
        self.sessions.insert(session.name.clone(), session);
    }

    /// Idempotent: unregistering a name that is not present is a no-op.
    pub fn unregister(&self, name: &str) {
        if self.sessions.remove(name).is_some() {
            debug!(%name, "session unregistered");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(name).map(|entry| Arc::clone(&entry))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fans an event out to every session whose rules match, removing any
    /// session whose delivery socket has gone away.
    pub fn dispatch(&self, event_mask: EventMask, path: &str, event: &DeliveredEvent) {
        let mut dead = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            if !session.effective_verdict(event_mask, path) {
                continue;
            }
            if let Err(err) = session.deliver(event) {
                warn!(name = %session.name, error = %err, "delivery failed, dropping session");
                dead.push(session.name.clone());
            }
        }
        for name in dead {
            self.unregister(&name);
        }
    }

    /// Broadcasts an event to every session regardless of its rules, used
    /// for `UNMOUNT` and `Q_OVERFLOW` notifications.
    pub fn broadcast(&self, event: &DeliveredEvent) {
        let mut dead = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value();
            if let Err(err) = session.deliver(event) {
                warn!(name = %session.name, error = %err, "broadcast delivery failed, dropping session");
                dead.push(session.name.clone());
            }
        }
        for name in dead {
            self.unregister(&name);
        }
    }
}
