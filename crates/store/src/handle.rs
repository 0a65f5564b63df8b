//! Lifecycle of the store's single SQLite connection.
//!
//! Readers share whatever handle is open and are counted; the last reader
//! out closes it. Writers reuse an open writable handle or replace the open
//! one with a writable handle of their own. A reader that was holding the
//! replaced handle finds it closed on its next query and retries with a
//! fresh handle, up to `read_retries` times.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};

use crate::error::StoreError;
use crate::schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    Writable,
}

/// An open (or since-closed) connection.
pub struct Handle {
    conn: Mutex<Option<Connection>>,
    mode: OpenMode,
}

impl Handle {
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Waits for an in-flight query, then drops the connection.
    fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, e)) = conn.close() {
                log::warn!("closing store handle: {e}");
            }
        }
    }
}

#[derive(Default)]
struct HandleState {
    handle: Option<Arc<Handle>>,
    readers: usize,
    writers: usize,
}

pub struct HandleManager {
    path: PathBuf,
    busy_timeout: Duration,
    read_retries: u32,
    state: Mutex<HandleState>,
}

impl HandleManager {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration, read_retries: u32) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
            read_retries: read_retries.max(1),
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn readers(&self) -> usize {
        self.state.lock().readers
    }

    /// Whether any handle is currently open.
    pub fn is_open(&self) -> bool {
        self.state.lock().handle.as_ref().map(|h| h.is_open()).unwrap_or(false)
    }

    fn open(&self, mode: OpenMode) -> Result<Handle, StoreError> {
        let flags = match mode {
            OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            OpenMode::Writable => {
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
        };
        let unavailable = |e: rusqlite::Error| {
            StoreError::StoreUnavailable(format!("{}: {e}", self.path.display()))
        };

        let creating = mode == OpenMode::Writable && !self.path.exists();
        let mut conn = Connection::open_with_flags(&self.path, flags).map_err(unavailable)?;
        conn.busy_timeout(self.busy_timeout).map_err(unavailable)?;
        if creating {
            log::info!("creating settings store at {}", self.path.display());
            schema::create(&mut conn).map_err(unavailable)?;
        }
        log::debug!("opened store handle ({mode:?})");
        Ok(Handle { conn: Mutex::new(Some(conn)), mode })
    }

    /// Count a reader in, opening the store read-only when nothing is open.
    pub fn acquire_for_read(&self) -> Result<ReadGuard<'_>, StoreError> {
        let mut state = self.state.lock();
        let handle = match &state.handle {
            Some(h) => Arc::clone(h),
            None => {
                let h = Arc::new(self.open(OpenMode::ReadOnly)?);
                state.handle = Some(Arc::clone(&h));
                h
            }
        };
        state.readers += 1;
        Ok(ReadGuard { manager: self, handle })
    }

    /// Reuse an open writable handle, or open one and retire the current
    /// handle. Creates the store when the file is missing.
    pub fn acquire_for_write(&self) -> Result<WriteGuard<'_>, StoreError> {
        let mut state = self.state.lock();
        if let Some(h) = state.handle.as_ref().filter(|h| h.mode == OpenMode::Writable && h.is_open()) {
            let handle = Arc::clone(h);
            state.writers += 1;
            return Ok(WriteGuard { manager: self, handle });
        }
        let handle = Arc::new(self.open(OpenMode::Writable)?);
        let retired = state.handle.replace(Arc::clone(&handle));
        state.writers += 1;
        drop(state);

        if let Some(old) = retired {
            old.close();
        }
        Ok(WriteGuard { manager: self, handle })
    }

    /// Run a read query, retrying when the handle is closed underneath it.
    pub fn read<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: Fn(&Connection) -> Result<T, StoreError>,
    {
        retry_stale(self.read_retries, || self.acquire_for_read()?.query(&f))
    }

    /// Run `f` with exclusive use of a writable connection.
    pub fn write<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        self.acquire_for_write()?.with_conn(f)
    }

    /// Close whatever is open. Used around file-level operations such as
    /// migration backups.
    pub fn close_all(&self) {
        let retired = self.state.lock().handle.take();
        if let Some(h) = retired {
            h.close();
        }
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        state.readers = state.readers.saturating_sub(1);
        let retired = if state.readers == 0 && state.writers == 0 {
            state.handle.take()
        } else {
            None
        };
        drop(state);

        if let Some(h) = retired {
            h.close();
        }
    }

    fn release_write(&self, handle: &Arc<Handle>) {
        let mut state = self.state.lock();
        state.writers = state.writers.saturating_sub(1);
        let current = state.handle.as_ref().map(|h| Arc::ptr_eq(h, handle)).unwrap_or(false);
        let retired = if !current {
            Some(Arc::clone(handle))
        } else if state.readers == 0 && state.writers == 0 {
            state.handle.take()
        } else {
            None
        };
        drop(state);

        if let Some(h) = retired {
            h.close();
        }
    }
}

/// A counted reader. Dropping it releases the count.
pub struct ReadGuard<'a> {
    manager: &'a HandleManager,
    handle: Arc<Handle>,
}

impl ReadGuard<'_> {
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run one query. `StaleHandle { attempts: 1 }` when the handle has been
    /// closed since this guard was taken.
    pub fn query<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.handle.conn.lock();
        match conn.as_ref() {
            Some(c) => f(c),
            None => Err(StoreError::StaleHandle { attempts: 1 }),
        }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.manager.release_read();
    }
}

/// Exclusive writer access to a writable handle.
pub struct WriteGuard<'a> {
    manager: &'a HandleManager,
    handle: Arc<Handle>,
}

impl WriteGuard<'_> {
    pub fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError>,
    {
        let mut conn = self.handle.conn.lock();
        match conn.as_mut() {
            Some(c) => f(c),
            None => Err(StoreError::StaleHandle { attempts: 1 }),
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.manager.release_write(&self.handle);
    }
}

/// Call `attempt` until it returns something other than a stale handle,
/// at most `max` times.
pub fn retry_stale<T, F>(max: u32, mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let max = max.max(1);
    for n in 1..=max {
        match attempt() {
            Err(StoreError::StaleHandle { .. }) => {
                log::debug!("store handle closed mid-read (attempt {n}/{max})");
            }
            other => return other,
        }
    }
    Err(StoreError::StaleHandle { attempts: max })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> HandleManager {
        HandleManager::new(dir.path().join("privacy.db"), Duration::from_millis(500), 3)
    }

    fn count(conn: &Connection) -> Result<i64, StoreError> {
        Ok(conn.query_row("SELECT COUNT(*) FROM settings", [], |r| r.get(0))?)
    }

    #[test]
    fn read_on_missing_store_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        assert!(matches!(m.acquire_for_read(), Err(StoreError::StoreUnavailable(_))));
        assert_eq!(m.readers(), 0);
    }

    #[test]
    fn write_creates_store() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        assert_eq!(m.write(|c| count(c)).unwrap(), 0);
        assert!(m.path().exists());
        // Writer released with no readers: handle closed
        assert!(!m.is_open());
    }

    #[test]
    fn last_reader_closes_handle() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        m.write(|c| count(c)).unwrap();

        let a = m.acquire_for_read().unwrap();
        let b = m.acquire_for_read().unwrap();
        assert_eq!(m.readers(), 2);
        assert_eq!(a.handle().mode(), OpenMode::ReadOnly);
        drop(a);
        assert!(m.is_open());
        drop(b);
        assert_eq!(m.readers(), 0);
        assert!(!m.is_open());
    }

    #[test]
    fn writable_handle_serves_readers() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        let w = m.acquire_for_write().unwrap();
        let r = m.acquire_for_read().unwrap();
        assert_eq!(r.handle().mode(), OpenMode::Writable);
        assert_eq!(r.query(count).unwrap(), 0);
        drop(w);
        // Reader still counted, handle stays open
        assert!(m.is_open());
        drop(r);
        assert!(!m.is_open());
    }

    #[test]
    fn writer_retires_read_only_handle() {
        let dir = TempDir::new().unwrap();
        let m = manager(&dir);
        m.write(|c| count(c)).unwrap();

        let r = m.acquire_for_read().unwrap();
        let w = m.acquire_for_write().unwrap();
        assert_eq!(r.query(count), Err(StoreError::StaleHandle { attempts: 1 }));
        // A fresh read goes through the writer's handle
        assert_eq!(m.read(count).unwrap(), 0);
        drop(w);
        drop(r);
        assert_eq!(m.readers(), 0);
        assert!(!m.is_open());
    }

    #[test]
    fn retry_gives_up_after_bound() {
        let mut calls = 0;
        let out: Result<(), _> = retry_stale(3, || {
            calls += 1;
            Err(StoreError::StaleHandle { attempts: 1 })
        });
        assert_eq!(out, Err(StoreError::StaleHandle { attempts: 3 }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_stops_on_first_non_stale_outcome() {
        let mut calls = 0;
        let out = retry_stale(3, || {
            calls += 1;
            if calls < 2 {
                Err(StoreError::StaleHandle { attempts: 1 })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out, Ok(2));
    }
}
