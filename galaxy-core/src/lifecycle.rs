//! Single-instance lockfile and signal handling: the two startup/shutdown
//! concerns that sit outside the watch/session/dispatch pipeline proper.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use tracing::{info, warn};

use crate::error::{GalaxyError, Result};

/// Default lockfile path, matching the well-known path the original daemon
/// used to detect a second instance starting.
pub const DEFAULT_LOCKFILE_PATH: &str = "/tmp/galaxyd.pid";

/// Holds an advisory exclusive lock on a pidfile for the lifetime of the
/// daemon process. Dropping it releases the lock (the OS also releases it
/// automatically on process exit).
pub struct Lockfile {
    file: File,
    path: PathBuf,
}

impl Lockfile {
    /// Acquires the lock, writing the current process id into the file.
    /// Returns [`GalaxyError::AlreadyRunning`] if another process already
    /// holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(GalaxyError::from)?;

        file.try_lock_exclusive().map_err(|_| GalaxyError::AlreadyRunning)?;

        file.set_len(0).map_err(GalaxyError::from)?;
        write!(file, "{}", std::process::id()).map_err(GalaxyError::from)?;
        file.flush().map_err(GalaxyError::from)?;

        info!(path = %path.display(), pid = std::process::id(), "acquired lockfile");
        Ok(Self { file, path })
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to release lockfile");
        }
    }
}

/// Blocks SIGINT and SIGQUIT for the whole process and reads them
/// synchronously off a signalfd, rather than relying on async-signal-safe
/// handlers. SIGINT requests an orderly shutdown; SIGQUIT is logged and
/// otherwise ignored.
pub struct SignalWaiter {
    fd: SignalFd,
    stop: Arc<AtomicBool>,
}

impl SignalWaiter {
    pub fn install(stop: Arc<AtomicBool>) -> Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGQUIT);
        mask.thread_block().map_err(|errno| {
            GalaxyError::Io(std::io::Error::from_raw_os_error(errno as i32))
        })?;

        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC)
            .map_err(|errno| GalaxyError::Io(std::io::Error::from_raw_os_error(errno as i32)))?;

        Ok(Self { fd, stop })
    }

    /// Blocks until SIGINT (or the owning process otherwise decides to
    /// stop), reading and logging SIGQUIT without exiting the loop.
    pub fn wait_for_shutdown(&mut self) {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            match self.fd.read_signal() {
                Ok(Some(info)) => {
                    let signo = info.ssi_signo as i32;
                    if signo == Signal::SIGINT as i32 {
                        info!("received SIGINT, shutting down");
                        self.stop.store(true, Ordering::Relaxed);
                        return;
                    } else if signo == Signal::SIGQUIT as i32 {
                        warn!("received SIGQUIT, ignoring");
                    } else {
                        warn!(signo, "received unexpected signal");
                    }
                }
                Ok(None) => continue,
                Err(err) => {
                    warn!(%err, "signalfd read failed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lockfile_blocks_second_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");

        let first = Lockfile::acquire(&path).unwrap();
        let second = Lockfile::acquire(&path);
        assert!(matches!(second.unwrap_err(), GalaxyError::AlreadyRunning));
        drop(first);

        // Released after drop.
        assert!(Lockfile::acquire(&path).is_ok());
    }

    #[test]
    fn lockfile_contains_current_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.pid");
        let _lock = Lockfile::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }
}
