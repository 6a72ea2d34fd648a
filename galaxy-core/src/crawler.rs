//! The directory crawler: walks configured roots installing watches, honours
//! the prune list, and re-registers on-the-fly as the dispatcher observes
//! `CREATE|ISDIR`/`DELETE_SELF`/`IGNORED` events.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use crate::mask::EventMask;
use crate::watch::WatchRegistry;

/// Inputs to the crawler. Construct via [`CrawlerConfig::resolve`] from CLI
/// arguments, environment variables, and the process cwd — that merge is a
/// pure function so `galaxyd`'s argument parsing layer stays a thin
/// translation into this struct.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub roots: Vec<PathBuf>,
    pub prune: Vec<PathBuf>,
    pub recursive: bool,
}

impl CrawlerConfig {
    /// Merges explicit CLI directory arguments, a colon-separated
    /// `GALAXY_SEARCH_PATH`-style root list, a colon-separated
    /// `GALAXY_PRUNE_PATH`-style prune list, and a cwd fallback into a single
    /// config.
    pub fn resolve(
        cli_roots: &[PathBuf],
        search_path_env: Option<&str>,
        cli_prune: Option<&str>,
        prune_path_env: Option<&str>,
        recursive: bool,
        cwd: &Path,
    ) -> Self {
        let mut roots: Vec<PathBuf> = cli_roots.to_vec();
        if let Some(env) = search_path_env {
            roots.extend(env.split(':').filter(|s| !s.is_empty()).map(PathBuf::from));
        }
        if roots.is_empty() {
            roots.push(cwd.to_path_buf());
        }

        let mut prune: Vec<PathBuf> = Vec::new();
        if let Some(arg) = cli_prune {
            prune.extend(arg.split(':').filter(|s| !s.is_empty()).map(PathBuf::from));
        }
        if let Some(env) = prune_path_env {
            prune.extend(env.split(':').filter(|s| !s.is_empty()).map(PathBuf::from));
        }

        Self {
            roots,
            prune,
            recursive,
        }
    }

    fn is_pruned(&self, path: &Path) -> bool {
        self.prune
            .iter()
            .any(|p| path == p.as_path() || path.starts_with(p))
    }
}

/// Mask installed on every directory the crawler visits: full user-space
/// coverage.
pub const CRAWL_MASK: EventMask = EventMask::ALL_EVENTS;

pub struct DirectoryCrawler {
    config: CrawlerConfig,
    registry: Arc<WatchRegistry>,
}

impl DirectoryCrawler {
    pub fn new(config: CrawlerConfig, registry: Arc<WatchRegistry>) -> Self {
        Self { config, registry }
    }

    /// Walks every configured root, installing watches depth-first when
    /// `recursive` is set. A per-directory install failure is logged and
    /// traversal continues; it does not abort the crawl.
    pub fn run(&self) {
        let roots = self.config.roots.clone();
        for root in &roots {
            self.visit(root);
        }
    }

    fn visit(&self, dir: &Path) {
        if self.config.is_pruned(dir) {
            return;
        }

        if let Err(err) = self.registry.insert(dir, CRAWL_MASK) {
            warn!(path = %dir.display(), error = %err, "failed to install watch, skipping");
            return;
        }

        if !self.config.recursive {
            return;
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "failed to read directory during crawl");
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .map(|ft| ft.is_dir())
                .unwrap_or(false);
            if is_dir {
                self.visit(&path);
            }
        }
    }

    /// Installs a single directory, used when the dispatcher observes a
    /// `CREATE|ISDIR` event for a child of an already-watched directory.
    /// Honours the prune list just like the initial crawl.
    pub fn install_one(&self, path: &Path) {
        if self.config.is_pruned(path) {
            return;
        }
        if let Err(err) = self.registry.insert(path, CRAWL_MASK) {
            warn!(path = %path.display(), error = %err, "failed to install watch for new subdirectory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inotify::Inotify;
    use std::fs;

    fn registry() -> Arc<WatchRegistry> {
        let inotify = Inotify::init().expect("inotify_init");
        Arc::new(WatchRegistry::new(inotify.watches()))
    }

    #[test]
    fn recursive_crawl_installs_subdirectories() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        fs::create_dir(root.path().join("a/b")).unwrap();

        let reg = registry();
        let config = CrawlerConfig {
            roots: vec![root.path().to_path_buf()],
            prune: vec![],
            recursive: true,
        };
        DirectoryCrawler::new(config, Arc::clone(&reg)).run();

        assert!(reg.contains_path(root.path()));
        assert!(reg.contains_path(&root.path().join("a")));
        assert!(reg.contains_path(&root.path().join("a/b")));
    }

    #[test]
    fn pruned_subtree_is_never_installed() {
        let root = tempfile::tempdir().unwrap();
        let proc_dir = root.path().join("proc");
        fs::create_dir(&proc_dir).unwrap();
        fs::create_dir(proc_dir.join("child")).unwrap();

        let reg = registry();
        let config = CrawlerConfig {
            roots: vec![root.path().to_path_buf()],
            prune: vec![proc_dir.clone()],
            recursive: true,
        };
        DirectoryCrawler::new(config, Arc::clone(&reg)).run();

        assert!(reg.contains_path(root.path()));
        assert!(!reg.contains_path(&proc_dir));
        assert!(!reg.contains_path(&proc_dir.join("child")));
    }

    #[test]
    fn non_recursive_crawl_only_installs_roots() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();

        let reg = registry();
        let config = CrawlerConfig {
            roots: vec![root.path().to_path_buf()],
            prune: vec![],
            recursive: false,
        };
        DirectoryCrawler::new(config, Arc::clone(&reg)).run();

        assert!(reg.contains_path(root.path()));
        assert!(!reg.contains_path(&root.path().join("a")));
    }

    #[test]
    fn resolve_falls_back_to_cwd_when_empty() {
        let cwd = PathBuf::from("/tmp/galaxy-cwd-fallback");
        let config = CrawlerConfig::resolve(&[], None, None, None, false, &cwd);
        assert_eq!(config.roots, vec![cwd]);
    }

    #[test]
    fn resolve_merges_cli_and_env_roots() {
        let cwd = PathBuf::from("/tmp/unused");
        let config = CrawlerConfig::resolve(
            &[PathBuf::from("/tmp/a")],
            Some("/tmp/b:/tmp/c"),
            Some("/tmp/skip"),
            Some("/tmp/skip2"),
            true,
            &cwd,
        );
        assert_eq!(
            config.roots,
            vec![
                PathBuf::from("/tmp/a"),
                PathBuf::from("/tmp/b"),
                PathBuf::from("/tmp/c"),
            ]
        );
        assert_eq!(
            config.prune,
            vec![PathBuf::from("/tmp/skip"), PathBuf::from("/tmp/skip2")]
        );
    }
}
