//! Background watcher over the mirror tree.
//!
//! Two threads: the router thread receives raw events and turns them into
//! notifications, the sink thread hands them to the caller. They are joined
//! by a bounded queue so a slow sink never stalls event delivery. On Linux a
//! third thread feeds the router from inotify.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use notify::Event;

use privacyd_store::SettingsStore;

use crate::error::WatchError;
use crate::notification::{dispatch, NotificationSink};
use crate::router::{EventRouter, WatchTarget};

/// How often the router thread checks the shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type RawEvents = Receiver<notify::Result<Event>>;

pub struct MirrorWatcher {
    shutdown: Arc<AtomicBool>,
    router_thread: Option<JoinHandle<()>>,
    /// Sink thread and event source threads, joined after the router.
    helpers: Vec<JoinHandle<()>>,
}

impl MirrorWatcher {
    /// Watch `root` with inotify, reporting every read of a mirrored file.
    /// Creates the root if missing.
    #[cfg(target_os = "linux")]
    pub fn start<S: NotificationSink>(
        root: &Path,
        store: Arc<SettingsStore>,
        sink: S,
        queue_depth: usize,
    ) -> Result<Self, WatchError> {
        use crate::inotify_target::InotifyTarget;

        create_root(root)?;
        let mut target = InotifyTarget::new().map_err(|e| WatchError::Notify {
            path: root.display().to_string(),
            message: e.to_string(),
        })?;
        let mut router = EventRouter::new(root, store);
        router.attach_tree(&mut target)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let reader = target.spawn_reader(tx, Arc::clone(&shutdown)).map_err(spawn_error)?;
        Self::launch(router, target, rx, sink, queue_depth, shutdown, vec![reader])
    }

    /// Watch `root` with the platform watcher. Creates the root if missing.
    ///
    /// Only structural changes are delivered on these platforms; the
    /// platform watchers do not report reads.
    #[cfg(not(target_os = "linux"))]
    pub fn start<S: NotificationSink>(
        root: &Path,
        store: Arc<SettingsStore>,
        sink: S,
        queue_depth: usize,
    ) -> Result<Self, WatchError> {
        create_root(root)?;
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(move |res| {
            // Receiver gone means we are shutting down
            let _ = tx.send(res);
        })
        .map_err(|e| WatchError::Notify {
            path: root.display().to_string(),
            message: e.to_string(),
        })?;

        Self::with_events(EventRouter::new(root, store), watcher, rx, sink, queue_depth)
    }

    /// Run the watcher loop over an arbitrary event source and watch target.
    pub fn with_events<T, S>(
        mut router: EventRouter,
        mut target: T,
        events: RawEvents,
        sink: S,
        queue_depth: usize,
    ) -> Result<Self, WatchError>
    where
        T: WatchTarget + Send + 'static,
        S: NotificationSink,
    {
        router.attach_tree(&mut target)?;
        Self::launch(router, target, events, sink, queue_depth, Arc::new(AtomicBool::new(false)), Vec::new())
    }

    /// Spawn the sink and router threads. `helpers` already run and share
    /// `shutdown`; they are stopped with the rest if a spawn fails.
    fn launch<T, S>(
        mut router: EventRouter,
        mut target: T,
        events: RawEvents,
        sink: S,
        queue_depth: usize,
        shutdown: Arc<AtomicBool>,
        helpers: Vec<JoinHandle<()>>,
    ) -> Result<Self, WatchError>
    where
        T: WatchTarget + Send + 'static,
        S: NotificationSink,
    {
        let mut watcher = Self { shutdown, router_thread: None, helpers };

        let (queue, pending) = mpsc::sync_channel(queue_depth.max(1));
        let sink_thread = thread::Builder::new()
            .name("privacyd-notify".into())
            .spawn(move || {
                for notification in pending {
                    sink.notify(&notification);
                }
            })
            .map_err(spawn_error)?;
        watcher.helpers.push(sink_thread);

        let flag = Arc::clone(&watcher.shutdown);
        let router_thread = thread::Builder::new()
            .name("privacyd-watch".into())
            .spawn(move || {
                log::info!("watcher started");
                while !flag.load(Ordering::SeqCst) {
                    match events.recv_timeout(POLL_INTERVAL) {
                        Ok(Ok(event)) => {
                            let notifications = router.handle_event(&event, &mut target);
                            let dropped = dispatch(&queue, notifications);
                            if dropped > 0 {
                                log::warn!("dropped {dropped} notification(s); sink is behind");
                            }
                        }
                        Ok(Err(e)) => log::warn!("watch error: {e}"),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                // Dropping the queue sender ends the sink thread
                log::info!("watcher stopped");
            })
            .map_err(spawn_error)?;
        watcher.router_thread = Some(router_thread);
        Ok(watcher)
    }

    pub fn is_running(&self) -> bool {
        self.router_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop every thread and wait for them. Notifications already queued
    /// are still delivered.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for handle in self.router_thread.take().into_iter().chain(self.helpers.drain(..)) {
            if handle.join().is_err() {
                log::error!("watcher thread panicked");
            }
        }
    }
}

impl Drop for MirrorWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn create_root(root: &Path) -> Result<(), WatchError> {
    fs::create_dir_all(root).map_err(|e| WatchError::Io {
        path: root.display().to_string(),
        message: e.to_string(),
    })
}

fn spawn_error(e: std::io::Error) -> WatchError {
    WatchError::Io {
        path: "<thread>".into(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::AccessNotification;
    use notify::event::AccessKind;
    use notify::EventKind;
    use privacyd_core::{Category, PrivacySettings};
    use privacyd_store::StoreOptions;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Instant;
    use tempfile::TempDir;

    struct Nothing;

    impl WatchTarget for Nothing {
        fn attach(&mut self, _dir: &Path) -> Result<(), WatchError> {
            Ok(())
        }

        fn detach(&mut self, _dir: &Path) {}
    }

    fn wait_for(mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn delivers_reads_to_sink_and_stops() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SettingsStore::open(StoreOptions::new(dir.path().join("p.db"), dir.path().join("mirror"))).unwrap(),
        );
        store.save(&mut PrivacySettings::new("a", 1)).unwrap();
        let file: PathBuf = store.mirror().category_path("a", 1, Category::ExternalStorage);

        let seen: Arc<Mutex<Vec<AccessNotification>>> = Arc::default();
        let sink_seen = Arc::clone(&seen);
        let (tx, rx) = mpsc::channel();
        let router = EventRouter::new(store.mirror().root(), Arc::clone(&store));
        let mut watcher = MirrorWatcher::with_events(
            router,
            Nothing,
            rx,
            move |n: &AccessNotification| sink_seen.lock().unwrap().push(n.clone()),
            4,
        )
        .unwrap();
        assert!(watcher.is_running());

        tx.send(Ok(Event::new(EventKind::Access(AccessKind::Read)).add_path(file))).unwrap();
        assert!(wait_for(|| seen.lock().unwrap().len() == 1));
        assert_eq!(seen.lock().unwrap()[0].category, Category::ExternalStorage);

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[test]
    fn ends_when_event_source_closes() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SettingsStore::open(StoreOptions::new(dir.path().join("p.db"), dir.path().join("mirror"))).unwrap(),
        );
        fs::create_dir_all(store.mirror().root()).unwrap();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let router = EventRouter::new(store.mirror().root(), Arc::clone(&store));
        let watcher = MirrorWatcher::with_events(router, Nothing, rx, |_: &AccessNotification| {}, 1).unwrap();
        drop(tx);
        assert!(wait_for(|| !watcher.is_running()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reports_real_reads_including_apps_saved_later() {
        use privacyd_core::SettingState;

        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            SettingsStore::open(StoreOptions::new(dir.path().join("p.db"), dir.path().join("mirror"))).unwrap(),
        );
        let mut first = PrivacySettings::new("a", 1);
        first.set_state(Category::SystemLogs, SettingState::Empty);
        store.save(&mut first).unwrap();

        let seen: Arc<Mutex<Vec<AccessNotification>>> = Arc::default();
        let sink_seen = Arc::clone(&seen);
        let mut watcher = MirrorWatcher::start(
            store.mirror().root(),
            Arc::clone(&store),
            move |n: &AccessNotification| sink_seen.lock().unwrap().push(n.clone()),
            16,
        )
        .unwrap();
        let read_by = |app: &str| seen.lock().unwrap().iter().find(|n| n.application_name == app).cloned();

        let logs = store.mirror().category_path("a", 1, Category::SystemLogs);
        assert_eq!(fs::read_to_string(&logs).unwrap(), "1");
        assert!(wait_for(|| read_by("a").is_some()));
        let got = read_by("a").unwrap();
        assert_eq!((got.identity, got.category, got.state), (1, Category::SystemLogs, SettingState::Empty));

        // Directories created after start are picked up from their create events
        store.save(&mut PrivacySettings::new("b", 2)).unwrap();
        let later = store.mirror().category_path("b", 2, Category::ExternalStorage);
        assert!(wait_for(|| {
            let _ = fs::read_to_string(&later);
            read_by("b").is_some()
        }));
        assert_eq!(read_by("b").unwrap().category, Category::ExternalStorage);

        // Saving is not a read. Let the reads above drain first.
        thread::sleep(Duration::from_millis(300));
        let before = seen.lock().unwrap().len();
        store.save(&mut first).unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(seen.lock().unwrap().len(), before);

        watcher.stop();
        assert!(!watcher.is_running());
    }
}
