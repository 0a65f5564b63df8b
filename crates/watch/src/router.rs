//! Maps raw filesystem events on the mirror tree to access notifications.
//!
//! The tree is watched one directory at a time: the root, every application
//! directory and every identity directory. Structural events keep that set
//! current; access events on a category file become notifications.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};

use privacyd_core::Category;
use privacyd_store::SettingsStore;

use crate::error::WatchError;
use crate::notification::AccessNotification;

/// Repeated access events for one file inside this window count once.
pub const DEBOUNCE: Duration = Duration::from_millis(200);

/// Something that can start and stop watching single directories.
pub trait WatchTarget {
    fn attach(&mut self, dir: &Path) -> Result<(), WatchError>;
    fn detach(&mut self, dir: &Path);
}

impl<W: Watcher> WatchTarget for W {
    fn attach(&mut self, dir: &Path) -> Result<(), WatchError> {
        self.watch(dir, RecursiveMode::NonRecursive).map_err(|e| WatchError::Notify {
            path: dir.display().to_string(),
            message: e.to_string(),
        })
    }

    fn detach(&mut self, dir: &Path) {
        // The kernel drops watches on removed directories by itself
        if let Err(e) = self.unwatch(dir) {
            log::trace!("unwatch {}: {e}", dir.display());
        }
    }
}

/// Where a path sits in the mirror tree.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Root,
    App,
    Identity,
    File { application_name: String, identity: i64, category: Category },
    Other,
}

pub struct EventRouter {
    root: PathBuf,
    store: Arc<SettingsStore>,
    watched: BTreeSet<PathBuf>,
    recent: HashMap<PathBuf, Instant>,
    debounce: Duration,
}

impl EventRouter {
    pub fn new(root: impl Into<PathBuf>, store: Arc<SettingsStore>) -> Self {
        Self {
            root: root.into(),
            store,
            watched: BTreeSet::new(),
            recent: HashMap::new(),
            debounce: DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.iter().map(PathBuf::as_path)
    }

    /// Watch the root and every application and identity directory below it.
    pub fn attach_tree(&mut self, target: &mut dyn WatchTarget) -> Result<(), WatchError> {
        let root = self.root.clone();
        self.attach_dir(&root, target)
    }

    fn attach_dir(&mut self, dir: &Path, target: &mut dyn WatchTarget) -> Result<(), WatchError> {
        match self.classify(dir) {
            Node::Root | Node::App | Node::Identity => {}
            _ => return Ok(()),
        }
        if !self.watched.contains(dir) {
            target.attach(dir)?;
            self.watched.insert(dir.to_path_buf());
            log::debug!("watching {}", dir.display());
        }

        let entries = fs::read_dir(dir).map_err(|e| WatchError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.attach_dir(&path, target)?;
            }
        }
        Ok(())
    }

    fn detach_dir(&mut self, dir: &Path, target: &mut dyn WatchTarget) {
        let gone: Vec<PathBuf> = self.watched.iter().filter(|p| p.starts_with(dir)).cloned().collect();
        for path in gone {
            target.detach(&path);
            self.watched.remove(&path);
            log::debug!("stopped watching {}", path.display());
        }
    }

    /// Process one event. Returns the notifications it produced.
    pub fn handle_event(&mut self, event: &Event, target: &mut dyn WatchTarget) -> Vec<AccessNotification> {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                self.appeared(&event.paths, target);
                Vec::new()
            }
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                self.vanished(&event.paths, target);
                Vec::new()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                if let [from, to] = event.paths.as_slice() {
                    self.vanished(std::slice::from_ref(from), target);
                    self.appeared(std::slice::from_ref(to), target);
                }
                Vec::new()
            }
            EventKind::Access(kind) if is_read(kind) => {
                event.paths.iter().filter_map(|p| self.accessed(p)).collect()
            }
            _ => Vec::new(),
        }
    }

    fn appeared(&mut self, paths: &[PathBuf], target: &mut dyn WatchTarget) {
        for path in paths.iter().filter(|p| p.is_dir()) {
            if let Err(e) = self.attach_dir(path, target) {
                log::warn!("{e}");
            }
        }
    }

    fn vanished(&mut self, paths: &[PathBuf], target: &mut dyn WatchTarget) {
        for path in paths {
            self.detach_dir(path, target);
        }
    }

    fn accessed(&mut self, path: &Path) -> Option<AccessNotification> {
        let Node::File { application_name, identity, category } = self.classify(path) else {
            return None;
        };

        let now = Instant::now();
        if let Some(last) = self.recent.get(path) {
            if now.duration_since(*last) < self.debounce {
                return None;
            }
        }
        self.recent.insert(path.to_path_buf(), now);
        let debounce = self.debounce;
        self.recent.retain(|_, seen| now.duration_since(*seen) < debounce.max(Duration::from_secs(1)));

        if !self.store.notifications_enabled() {
            log::trace!("notifications disabled; ignoring read of {}", path.display());
            return None;
        }
        let Some(settings) = self.store.get(&application_name, identity) else {
            log::debug!("read of {} has no matching record", path.display());
            return None;
        };
        Some(AccessNotification {
            state: settings.state(category),
            value: settings.resolve(category),
            application_name,
            identity,
            category,
        })
    }

    fn classify(&self, path: &Path) -> Node {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return Node::Other;
        };
        let Some(parts) = rel
            .components()
            .map(|c| match c {
                Component::Normal(s) => s.to_str(),
                _ => None,
            })
            .collect::<Option<Vec<&str>>>()
        else {
            return Node::Other;
        };

        let identity = |s: &str| s.parse::<i64>().ok().filter(|i| *i >= 0 && i.to_string() == s);
        match parts.as_slice() {
            [] => Node::Root,
            [app] if !app.starts_with('.') => Node::App,
            [_, id] if identity(*id).is_some() => Node::Identity,
            [app, id, file] => match (identity(*id), Category::from_mirror_file_name(file)) {
                (Some(identity), Some(category)) => Node::File {
                    application_name: app.to_string(),
                    identity,
                    category,
                },
                _ => Node::Other,
            },
            _ => Node::Other,
        }
    }
}

/// Access kinds produced by reading a file. Closing after a write is the
/// writer's own activity.
fn is_read(kind: AccessKind) -> bool {
    !matches!(kind, AccessKind::Close(AccessMode::Write))
}
