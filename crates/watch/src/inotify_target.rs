//! Linux watch backend reading inotify directly.
//!
//! The platform watcher never asks the kernel for open, access or
//! close-without-write events, and those are the only trace a read leaves.
//! This backend subscribes to them and hands the router the same
//! `notify::Event` values the platform watcher would.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};
use parking_lot::Mutex;

use crate::error::WatchError;
use crate::router::WatchTarget;

/// Pause between polls when the kernel has nothing queued.
const IDLE: Duration = Duration::from_millis(50);

const BUFFER_SIZE: usize = 4096;

fn watch_mask() -> WatchMask {
    WatchMask::ACCESS
        | WatchMask::OPEN
        | WatchMask::CLOSE_NOWRITE
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::ONLYDIR
}

struct Watches {
    inotify: Inotify,
    paths: HashMap<WatchDescriptor, PathBuf>,
    descriptors: HashMap<PathBuf, WatchDescriptor>,
}

/// One inotify instance shared by the router (which adds and removes
/// watches) and the reader thread (which drains events).
#[derive(Clone)]
pub struct InotifyTarget {
    shared: Arc<Mutex<Watches>>,
}

impl InotifyTarget {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            shared: Arc::new(Mutex::new(Watches {
                inotify: Inotify::init()?,
                paths: HashMap::new(),
                descriptors: HashMap::new(),
            })),
        })
    }

    /// Drain whatever the kernel has queued without blocking.
    pub fn poll(&self, buffer: &mut [u8]) -> io::Result<Vec<Event>> {
        let mut guard = self.shared.lock();
        let watches = &mut *guard;
        let mut out = Vec::new();
        for event in watches.inotify.read_events(buffer)? {
            if event.mask.contains(EventMask::Q_OVERFLOW) {
                log::warn!("inotify queue overflowed; some reads were not seen");
                continue;
            }
            if event.mask.contains(EventMask::IGNORED) {
                if let Some(path) = watches.paths.remove(&event.wd) {
                    watches.descriptors.remove(&path);
                }
                continue;
            }
            let Some(dir) = watches.paths.get(&event.wd) else {
                continue;
            };
            let Some(kind) = translate(event.mask) else {
                continue;
            };
            let path = match event.name {
                Some(name) => dir.join(name),
                None => dir.clone(),
            };
            out.push(Event::new(kind).add_path(path));
        }
        Ok(out)
    }

    /// Poll on a thread of its own until `shutdown` is set or `events` is
    /// closed. A read error is forwarded once and ends the thread.
    pub fn spawn_reader(
        &self,
        events: Sender<notify::Result<Event>>,
        shutdown: Arc<AtomicBool>,
    ) -> io::Result<JoinHandle<()>> {
        let target = self.clone();
        thread::Builder::new().name("privacyd-inotify".into()).spawn(move || {
            let mut buffer = [0u8; BUFFER_SIZE];
            while !shutdown.load(Ordering::SeqCst) {
                match target.poll(&mut buffer) {
                    Ok(batch) if batch.is_empty() => thread::sleep(IDLE),
                    Ok(batch) => {
                        for event in batch {
                            if events.send(Ok(event)).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        log::error!("reading inotify events: {e}");
                        let _ = events.send(Err(notify::Error::io(e)));
                        return;
                    }
                }
            }
        })
    }
}

impl WatchTarget for InotifyTarget {
    fn attach(&mut self, dir: &Path) -> Result<(), WatchError> {
        let mut watches = self.shared.lock();
        let wd = watches.inotify.add_watch(dir, watch_mask()).map_err(|e| WatchError::Notify {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;
        watches.paths.insert(wd.clone(), dir.to_path_buf());
        watches.descriptors.insert(dir.to_path_buf(), wd);
        Ok(())
    }

    fn detach(&mut self, dir: &Path) {
        let mut watches = self.shared.lock();
        let Some(wd) = watches.descriptors.remove(dir) else {
            return;
        };
        watches.paths.remove(&wd);
        // Fails when the kernel already dropped the watch with the directory
        if let Err(e) = watches.inotify.rm_watch(wd) {
            log::trace!("rm_watch {}: {e}", dir.display());
        }
    }
}

/// The `notify` event kind for one inotify event. Opens and reads of
/// directories are not reads of a setting and are left out.
fn translate(mask: EventMask) -> Option<EventKind> {
    let dir = mask.contains(EventMask::ISDIR);
    let kind = if mask.contains(EventMask::CREATE) {
        EventKind::Create(if dir { CreateKind::Folder } else { CreateKind::File })
    } else if mask.contains(EventMask::DELETE) {
        EventKind::Remove(if dir { RemoveKind::Folder } else { RemoveKind::File })
    } else if mask.contains(EventMask::MOVED_FROM) {
        EventKind::Modify(ModifyKind::Name(RenameMode::From))
    } else if mask.contains(EventMask::MOVED_TO) {
        EventKind::Modify(ModifyKind::Name(RenameMode::To))
    } else if dir {
        return None;
    } else if mask.contains(EventMask::ACCESS) {
        EventKind::Access(AccessKind::Read)
    } else if mask.contains(EventMask::OPEN) {
        EventKind::Access(AccessKind::Open(AccessMode::Any))
    } else if mask.contains(EventMask::CLOSE_NOWRITE) {
        EventKind::Access(AccessKind::Close(AccessMode::Read))
    } else {
        return None;
    };
    Some(kind)
}
