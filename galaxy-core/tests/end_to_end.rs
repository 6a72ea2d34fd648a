//! End-to-end coverage over real Unix sockets and real inotify: a client
//! connects, installs an include rule, and receives events the dispatcher
//! produces from genuine filesystem activity.

use std::fs;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use galaxy_core::client::GalaxyClient;
use galaxy_core::command_server::CommandServer;
use galaxy_core::crawler::{CrawlerConfig, DirectoryCrawler};
use galaxy_core::dispatcher::{EventDispatcher, KernelEventReader};
use galaxy_core::mask::EventMask;
use galaxy_core::session::SessionRegistry;
use galaxy_core::watch::WatchRegistry;
use inotify::Inotify;

struct TestDaemon {
    stop: Arc<AtomicBool>,
    threads: Vec<std::thread::JoinHandle<()>>,
    control_socket: std::path::PathBuf,
}

impl TestDaemon {
    fn start(watched_dir: &std::path::Path, control_socket: std::path::PathBuf) -> Self {
        let stop = Arc::new(AtomicBool::new(false));

        let inotify = Inotify::init().unwrap();
        let registry = Arc::new(WatchRegistry::new(inotify.watches()));
        let sessions = Arc::new(SessionRegistry::new());
        let crawler_config = CrawlerConfig {
            roots: vec![watched_dir.to_path_buf()],
            prune: vec![],
            recursive: true,
        };
        let crawler = Arc::new(DirectoryCrawler::new(crawler_config, Arc::clone(&registry)));
        crawler.run();

        let dispatcher = EventDispatcher::new(Arc::clone(&registry), Arc::clone(&crawler), Arc::clone(&sessions));
        let mut reader = KernelEventReader::new(inotify, Arc::clone(&stop));

        let command_server = Arc::new(
            CommandServer::bind(&control_socket, Arc::clone(&sessions), Arc::clone(&stop)).unwrap(),
        );

        let server_thread = {
            let command_server = Arc::clone(&command_server);
            std::thread::spawn(move || command_server.run())
        };
        let reader_thread = std::thread::spawn(move || {
            let _ = reader.run(&dispatcher);
        });

        Self {
            stop,
            threads: vec![server_thread, reader_thread],
            control_socket,
        }
    }

    fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = UnixStream::connect(&self.control_socket);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

#[test]
fn watch_rule_delivers_create_event_for_matching_file() {
    let root = tempfile::tempdir().unwrap();
    let control_socket = root.path().join("control.sock");

    let daemon = TestDaemon::start(root.path(), control_socket.clone());
    // Give the command server's accept loop a moment to start listening.
    std::thread::sleep(Duration::from_millis(50));

    let mut client = GalaxyClient::connect(&control_socket).unwrap();
    client.watch(EventMask::CREATE, r"\.log$").unwrap();
    std::thread::sleep(Duration::from_millis(50));

    fs::write(root.path().join("activity.log"), b"hello").unwrap();

    let event = client.receive().unwrap();
    assert!(event.mask.contains(EventMask::CREATE));
    assert!(event.path.ends_with("activity.log"));

    daemon.shutdown();
}

#[test]
fn ignore_watch_suppresses_matching_subtree() {
    let root = tempfile::tempdir().unwrap();
    let control_socket = root.path().join("control.sock");
    fs::create_dir(root.path().join("cache")).unwrap();

    let daemon = TestDaemon::start(root.path(), control_socket.clone());
    std::thread::sleep(Duration::from_millis(50));

    let mut client = GalaxyClient::connect(&control_socket).unwrap();
    client.watch(EventMask::CREATE, ".*").unwrap();
    client
        .ignore_watch(EventMask::CREATE, r"^.*/cache/.*$")
        .unwrap();
    std::thread::sleep(Duration::from_millis(50));

    fs::write(root.path().join("cache").join("skip.tmp"), b"x").unwrap();
    fs::write(root.path().join("keep.txt"), b"x").unwrap();

    let event = client.receive().unwrap();
    assert!(event.path.ends_with("keep.txt"));

    daemon.shutdown();
}
