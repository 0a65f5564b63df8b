// Schema upgrades with a byte-exact backup that is put back on failure.

use std::fs;
use std::path::Path;

use crate::error::StoreError;
use crate::handle::HandleManager;
use crate::schema::{self, MigrationStep};

/// Bring the store at `handles.path()` up to the last of `steps`.
///
/// Returns the version the store was at before. A store that is already
/// current is left untouched and no backup is taken.
pub fn migrate(handles: &HandleManager, backup: &Path, steps: &[MigrationStep]) -> Result<u32, StoreError> {
    let target = steps.iter().map(|s| s.version).max().unwrap_or(schema::CURRENT_VERSION);
    let from = handles.read(|conn| Ok(schema::stored_version(conn)?))?;
    if from >= target {
        log::debug!("store schema v{from} is current");
        return Ok(from);
    }

    log::info!("migrating settings store v{from} -> v{target}");
    let failed = |message: String| StoreError::MigrationFailed { from, to: target, message };

    handles.close_all();
    take_backup(handles.path(), backup).map_err(|e| failed(format!("backup: {e}")))?;

    let applied = handles.write(|conn| {
        let tx = conn.transaction()?;
        // An empty database file has no settings table yet
        if from == 0 {
            tx.execute_batch(&schema::base_sql())?;
        }
        let version = schema::apply_steps(&tx, from.max(1), steps)?;
        tx.commit()?;
        Ok(version)
    });

    match applied {
        Ok(version) => {
            log::info!("settings store now at v{version}");
            Ok(from)
        }
        Err(e) => {
            log::error!("migration v{from} -> v{target} failed: {e}");
            handles.close_all();
            if let Err(restore) = fs::copy(backup, handles.path()) {
                log::error!("restoring {} failed: {restore}", backup.display());
                return Err(failed(format!("{e}; restore failed: {restore}")));
            }
            Err(failed(e.to_string()))
        }
    }
}

/// Replace `backup` with a fresh copy of `store` and check that it matches.
fn take_backup(store: &Path, backup: &Path) -> std::io::Result<()> {
    if backup.exists() {
        fs::remove_file(backup)?;
    }
    fs::copy(store, backup)?;

    let original = fs::read(store)?;
    let copy = fs::read(backup)?;
    if original != copy {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{} does not match {}", backup.display(), store.display()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::time::Duration;
    use tempfile::TempDir;

    fn v1_store(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(&schema::base_sql()).unwrap();
        conn.execute(
            "INSERT INTO settings (packageName, uid, deviceIdSetting, deviceId) VALUES ('com.example.app', 10001, 2, '42')",
            [],
        )
        .unwrap();
    }

    #[test]
    fn upgrades_first_generation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privacy.db");
        v1_store(&path);
        let handles = HandleManager::new(&path, Duration::from_millis(500), 3);
        let backup = dir.path().join("privacy.db.bak");

        assert_eq!(migrate(&handles, &backup, &schema::migration_steps()).unwrap(), 1);
        assert!(backup.exists());
        let version = handles.read(|c| Ok(schema::stored_version(c)?)).unwrap();
        assert_eq!(version, schema::CURRENT_VERSION);
    }

    #[test]
    fn current_store_is_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privacy.db");
        let handles = HandleManager::new(&path, Duration::from_millis(500), 3);
        handles.write(|_| Ok(())).unwrap();
        let backup = dir.path().join("privacy.db.bak");

        assert_eq!(migrate(&handles, &backup, &schema::migration_steps()).unwrap(), schema::CURRENT_VERSION);
        assert!(!backup.exists());
    }

    #[test]
    fn failing_step_restores_exact_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("privacy.db");
        v1_store(&path);
        let before = fs::read(&path).unwrap();
        let backup = dir.path().join("privacy.db.bak");
        fs::write(&backup, b"stale backup").unwrap();

        let mut steps = schema::migration_steps();
        steps.push(MigrationStep::new(4, "ALTER TABLE no_such_table ADD COLUMN x TEXT;"));
        let handles = HandleManager::new(&path, Duration::from_millis(500), 3);

        match migrate(&handles, &backup, &steps) {
            Err(StoreError::MigrationFailed { from: 1, to: 4, .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(fs::read(&backup).unwrap(), before);
    }
}
