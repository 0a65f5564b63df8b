use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use rusqlite::{params, Connection};
use tempfile::TempDir;

use privacyd_core::{Category, CategorySetting, DataGuard, Payload, PrivacySettings, Resolution, SettingState};
use privacyd_store::schema::{self, MigrationStep};
use privacyd_store::{Lookup, SettingsStore, StoreError, StoreOptions};

const APP: &str = "com.example.app";

fn options(dir: &TempDir) -> StoreOptions {
    StoreOptions::new(dir.path().join("privacy.db"), dir.path().join("privacy"))
}

fn open(dir: &TempDir) -> SettingsStore {
    SettingsStore::open(options(dir)).unwrap()
}

fn insert_raw(path: &Path, name: &str, uid: i64) {
    let conn = Connection::open(path).unwrap();
    conn.execute("INSERT INTO settings (packageName, uid) VALUES (?1, ?2)", params![name, uid])
        .unwrap();
}

// -------------------------------------------------------------------------
// Scenarios
// -------------------------------------------------------------------------

#[test]
fn custom_device_id_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut s = PrivacySettings::new(APP, 10001);
    s.set_custom_text(Category::DeviceId, "000000000000001");
    let id = store.save(&mut s).unwrap();

    let got = store.get(APP, 10001).unwrap();
    assert_eq!(got.id(), Some(id));
    assert_eq!(got, s);
    assert_eq!(got.resolve(Category::DeviceId).as_text().as_deref(), Some("000000000000001"));
    assert_eq!(
        fs::read_to_string(dir.path().join("privacy/com.example.app/10001/deviceIdSetting")).unwrap(),
        "000000000000001"
    );
}

#[test]
fn resave_under_new_identity_updates_single_row() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut first = PrivacySettings::new(APP, 10001);
    first.set_state(Category::SystemLogs, SettingState::Empty);
    let id = store.save(&mut first).unwrap();

    let mut reinstalled = PrivacySettings::new(APP, 10002);
    reinstalled.set_state(Category::SystemLogs, SettingState::Empty);
    assert_eq!(store.save(&mut reinstalled).unwrap(), id);

    let all = store.list().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].identity, 10002);
    assert!(!store.mirror().identity_dir(APP, 10001).exists());
    assert_eq!(
        store.mirror().read_category(APP, 10002, Category::SystemLogs).unwrap().as_deref(),
        Some("1")
    );
}

#[test]
fn concurrent_gets_during_save_of_another_app() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open(&dir));

    let mut reader_app = PrivacySettings::new("com.example.reader", 10010);
    reader_app.set_custom_text(Category::Line1Number, "+100000000000");
    store.save(&mut reader_app).unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let got = store.get("com.example.reader", 10010).expect("record visible");
                    assert_eq!(got.state(Category::Line1Number), SettingState::Custom);
                }
            })
        })
        .collect();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            let mut other = PrivacySettings::new("com.example.writer", 10020);
            for i in 0..20 {
                let state = if i % 2 == 0 { SettingState::Empty } else { SettingState::Real };
                other.set_state(Category::ExternalStorage, state);
                store.save(&mut other).unwrap();
            }
        })
    };

    for r in readers {
        r.join().unwrap();
    }
    writer.join().unwrap();

    assert_eq!(store.list().unwrap().len(), 2);
    assert_eq!(store.handles().readers(), 0);
    assert!(!store.handles().is_open());
}

#[test]
fn interrupted_migration_restores_exact_bytes() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    {
        let conn = Connection::open(&opts.database_path).unwrap();
        conn.execute_batch(&schema::base_sql()).unwrap();
        conn.execute(
            "INSERT INTO settings (packageName, uid, systemLogsSetting) VALUES (?1, ?2, 1)",
            params![APP, 10001],
        )
        .unwrap();
    }
    let before = fs::read(&opts.database_path).unwrap();

    let mut steps = schema::migration_steps();
    steps[1].sql.push_str("INSERT INTO no_such_table VALUES (1);\n");

    match SettingsStore::open_with_migrations(opts.clone(), &steps) {
        Err(StoreError::MigrationFailed { from: 1, to: 3, .. }) => {}
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("migration should fail"),
    }
    assert_eq!(fs::read(&opts.database_path).unwrap(), before);
    assert_eq!(fs::read(opts.backup_path()).unwrap(), before);

    // The untouched first-generation store still migrates normally
    let store = SettingsStore::open(opts).unwrap();
    let got = store.get(APP, 10001).unwrap();
    assert_eq!(got.state(Category::SystemLogs), SettingState::Empty);
    assert_eq!(got.state(Category::AndroidId), SettingState::Real);
    assert_eq!(store.get_global("schema_version").unwrap().as_deref(), Some("3"));
}

#[test]
fn delete_removes_row_and_mirror() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut s = PrivacySettings::new(APP, 10001);
    s.set_custom_text(Category::DeviceId, "000000000000001");
    store.save(&mut s).unwrap();
    let file = dir.path().join("privacy/com.example.app/10001/deviceIdSetting");
    assert!(file.exists());

    store.delete(APP, 10001).unwrap();
    assert!(!file.exists());
    assert!(!dir.path().join("privacy/com.example.app").exists());
    assert!(store.get(APP, 10001).is_none());
    assert!(matches!(store.delete(APP, 10001), Err(StoreError::NotFound { .. })));
}

// -------------------------------------------------------------------------
// Migration
// -------------------------------------------------------------------------

#[test]
fn first_generation_data_survives_upgrade() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    {
        let conn = Connection::open(&opts.database_path).unwrap();
        conn.execute_batch(&schema::base_sql()).unwrap();
        conn.execute_batch("CREATE TABLE android_metadata (locale TEXT);").unwrap();
        conn.execute(
            "INSERT INTO settings (packageName, uid, deviceIdSetting, deviceId, locationGpsSetting, locationGpsLat, locationGpsLon) \
             VALUES (?1, ?2, 2, '42', 2, '1.5', '2.5')",
            params![APP, 10001],
        )
        .unwrap();
    }

    let store = SettingsStore::open(opts.clone()).unwrap();
    let got = store.get(APP, 10001).unwrap();
    assert_eq!(got.resolve(Category::DeviceId).as_text().as_deref(), Some("42"));
    assert_eq!(got.resolve(Category::LocationGps).as_text().as_deref(), Some("1.5,2.5"));
    assert_eq!(got.resolve(Category::Contacts), Resolution::Real);
    assert!(opts.backup_path().exists());

    let conn = Connection::open(&opts.database_path).unwrap();
    assert!(!schema::table_exists(&conn, "android_metadata").unwrap());
}

#[test]
fn injected_step_runs_after_builtin_ones() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    drop(open(&dir));

    let mut steps = schema::migration_steps();
    steps.push(MigrationStep::new(4, "CREATE TABLE extra (x INTEGER);"));
    let store = SettingsStore::open_with_migrations(opts, &steps).unwrap();
    assert_eq!(store.get_global("schema_version").unwrap().as_deref(), Some("4"));
}

// -------------------------------------------------------------------------
// Integrity
// -------------------------------------------------------------------------

#[test]
fn duplicate_rows_are_disambiguated_by_identity() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    let store = open(&dir);
    insert_raw(&opts.database_path, APP, 1);
    insert_raw(&opts.database_path, APP, 2);

    match store.lookup(APP, 2).unwrap() {
        Lookup::Found(s) => assert_eq!(s.identity, 2),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(store.lookup(APP, 3).unwrap(), Lookup::Ambiguous { rows: 2 });
    assert!(store.get(APP, 3).is_none());

    let mut s = PrivacySettings::new(APP, 3);
    assert!(matches!(store.save(&mut s), Err(StoreError::Ambiguous { rows: 2, .. })));
    assert_eq!(store.list().unwrap().len(), 2);
}

#[test]
fn boundary_validation() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    for (name, identity) in [("", 1), ("a/b", 1), (APP, -1)] {
        let mut s = PrivacySettings::new(name, identity);
        assert!(matches!(store.save(&mut s), Err(StoreError::ValidationFailed(_))), "{name} {identity}");
    }
    assert!(matches!(store.delete("", 1), Err(StoreError::ValidationFailed(_))));
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn mirror_failure_rolls_back_insert() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    fs::create_dir_all(dir.path().join("privacy")).unwrap();
    fs::write(dir.path().join("privacy").join(APP), b"in the way").unwrap();

    let mut s = PrivacySettings::new(APP, 10001);
    assert!(matches!(store.save(&mut s), Err(StoreError::MirrorWriteFailed { .. })));
    assert_eq!(s.id(), None);
    assert!(store.get(APP, 10001).is_none());
}

#[test]
fn mirror_failure_rolls_back_update() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let mut s = PrivacySettings::new(APP, 10001);
    s.set_state(Category::SystemLogs, SettingState::Empty);
    store.save(&mut s).unwrap();
    fs::write(store.mirror().identity_dir(APP, 10002), b"in the way").unwrap();

    let mut moved = PrivacySettings::new(APP, 10002);
    moved.set_state(Category::SystemLogs, SettingState::Random);
    assert!(matches!(store.save(&mut moved), Err(StoreError::MirrorWriteFailed { .. })));

    let got = store.get(APP, 10001).unwrap();
    assert_eq!(got.identity, 10001);
    assert_eq!(got.state(Category::SystemLogs), SettingState::Empty);
    assert_eq!(
        store.mirror().read_category(APP, 10001, Category::SystemLogs).unwrap().as_deref(),
        Some("1")
    );
}

#[test]
fn structured_and_mirror_stores_agree() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);

    let states = [SettingState::Real, SettingState::Empty, SettingState::Custom, SettingState::Random];
    for (i, name) in ["a.one", "a.two", "a.three", "a.four"].into_iter().enumerate() {
        let mut s = PrivacySettings::new(name, 10000 + i as i64);
        s.set_state(Category::SystemLogs, states[i]);
        s.set(Category::DeviceId, CategorySetting::new(states[i], Payload::text("000000000000042")));
        store.save(&mut s).unwrap();
    }
    store.delete("a.two", 10001).unwrap();

    let records = store.list().unwrap();
    assert_eq!(records.len(), 3);
    for r in &records {
        let mirror = store.mirror();
        let logs = mirror.read_category(&r.application_name, r.identity, Category::SystemLogs).unwrap().unwrap();
        assert_eq!(logs, r.state(Category::SystemLogs).code().to_string());

        let device = mirror.read_category(&r.application_name, r.identity, Category::DeviceId).unwrap();
        match r.state(Category::DeviceId) {
            SettingState::Real => assert_eq!(device, None),
            SettingState::Empty => assert_eq!(device.as_deref(), Some("")),
            SettingState::Custom => assert_eq!(device.as_deref(), Some("000000000000042")),
            SettingState::Random => {
                let device = device.unwrap();
                assert_eq!(device.len(), 15);
                assert!(device.bytes().all(|b| b.is_ascii_digit()));
            }
        }
    }

    let mut on_disk: Vec<String> = fs::read_dir(store.mirror().root())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    on_disk.sort();
    let mut expected: Vec<String> = records.iter().map(|r| r.application_name.clone()).collect();
    expected.sort();
    assert_eq!(on_disk, expected);
}

#[test]
fn reopen_keeps_records() {
    let dir = TempDir::new().unwrap();
    let mut s = PrivacySettings::new(APP, 10001);
    s.set_custom_location(Category::LocationNetwork, "-33.865143", "151.209900");
    s.allow_contacts([11, 12]);
    {
        let store = open(&dir);
        store.save(&mut s).unwrap();
    }
    let store = open(&dir);
    assert_eq!(store.get(APP, 10001).unwrap(), s);
    assert!(!options(&dir).backup_path().exists());
}

#[test]
fn guard_reads_through_store() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let mut s = PrivacySettings::new(APP, 10001);
    s.set_state(Category::DeviceId, SettingState::Random);
    s.set_state(Category::Camera, SettingState::Empty);
    store.save(&mut s).unwrap();

    let guard = DataGuard::new(&store, APP, 10001);
    let id = guard.text(Category::DeviceId, || Some("real".into())).unwrap();
    assert_eq!(id.len(), 15);
    assert!(id.chars().all(|c| c.is_ascii_digit()));
    assert!(!guard.allowed(Category::Camera));

    let other = DataGuard::new(&store, "com.example.other", 1);
    assert_eq!(other.text(Category::DeviceId, || Some("real".into())).as_deref(), Some("real"));
}

#[test]
fn corrupt_store_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let opts = options(&dir);
    fs::write(&opts.database_path, vec![b'x'; 4096]).unwrap();
    assert!(SettingsStore::open(opts).is_err());
}
