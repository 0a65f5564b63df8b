//! The persistence engine: records in SQLite, mirrored categories on disk.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql, Transaction};

use privacyd_core::{Category, CategorySetting, Payload, PayloadKind, PrivacySettings, SettingState, SettingsSource};

use crate::error::StoreError;
use crate::handle::HandleManager;
use crate::migrate;
use crate::mirror::MirrorWriter;
use crate::options::StoreOptions;
use crate::schema::{self, global, MigrationStep, CONTACTS_TABLE, GLOBAL_TABLE, SETTINGS_TABLE};

/// Outcome of looking a record up by application name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(PrivacySettings),
    NotFound,
    /// More than one row matched the name and the identity did not single
    /// one out.
    Ambiguous { rows: usize },
}

/// Row chosen for a save.
enum Target {
    Update { id: i64, application_name: String, identity: i64 },
    Insert,
}

pub struct SettingsStore {
    options: StoreOptions,
    handles: HandleManager,
    mirror: MirrorWriter,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    /// Open the store, creating it when missing and upgrading an older
    /// schema.
    pub fn open(options: StoreOptions) -> Result<Self, StoreError> {
        Self::open_with_migrations(options, &schema::migration_steps())
    }

    /// `open` with an explicit list of upgrade steps.
    pub fn open_with_migrations(options: StoreOptions, steps: &[MigrationStep]) -> Result<Self, StoreError> {
        if let Some(parent) = options.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let handles = HandleManager::new(&options.database_path, options.busy_timeout, options.read_retries);
        let store = Self {
            mirror: MirrorWriter::new(&options.mirror_root),
            handles,
            write_lock: Mutex::new(()),
            options,
        };

        if store.options.database_path.exists() {
            migrate::migrate(&store.handles, &store.options.backup_path(), steps)?;
        } else {
            store.handles.write(|_| Ok(()))?;
        }
        Ok(store)
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn mirror(&self) -> &MirrorWriter {
        &self.mirror
    }

    pub fn handles(&self) -> &HandleManager {
        &self.handles
    }

    /// Find the record for `application_name`, using `identity` to break a
    /// tie between several rows.
    pub fn lookup(&self, application_name: &str, identity: i64) -> Result<Lookup, StoreError> {
        log::debug!("lookup {application_name} ({identity})");
        self.handles.read(|conn| {
            let mut rows = select_records(conn, "packageName = ?1", params![application_name])?;
            match rows.len() {
                0 => return Ok(Lookup::NotFound),
                1 => return Ok(Lookup::Found(rows.remove(0))),
                _ => {}
            }
            let by_name = rows.len();
            let mut rows = select_records(conn, "packageName = ?1 AND uid = ?2", params![application_name, identity])?;
            if rows.len() == 1 {
                log::warn!("{application_name}: {by_name} records, picked the one for identity {identity}");
                return Ok(Lookup::Found(rows.remove(0)));
            }
            log::error!(
                "integrity fault: {by_name} records for {application_name}, {} for identity {identity}",
                rows.len()
            );
            Ok(Lookup::Ambiguous { rows: by_name })
        })
    }

    /// The record for `application_name`, or `None` when there is none, it
    /// is ambiguous, or the store cannot be read.
    pub fn get(&self, application_name: &str, identity: i64) -> Option<PrivacySettings> {
        match self.lookup(application_name, identity) {
            Ok(Lookup::Found(settings)) => Some(settings),
            Ok(Lookup::NotFound) => None,
            Ok(Lookup::Ambiguous { .. }) => None,
            Err(e) => {
                log::warn!("get {application_name}: {e}; treating as unrestricted");
                None
            }
        }
    }

    /// Every record, in row order.
    pub fn list(&self) -> Result<Vec<PrivacySettings>, StoreError> {
        self.handles.read(|conn| select_records(conn, "1 = 1", params![]))
    }

    /// Persist `settings` in both stores. Assigns the row id on first save.
    pub fn save(&self, settings: &mut PrivacySettings) -> Result<i64, StoreError> {
        validate(&settings.application_name, settings.identity)?;
        log::debug!("save {settings}");

        let _w = self.write_lock.lock();
        let (id, previous) = self.handles.write(|conn| {
            let tx = conn.transaction()?;
            let (id, previous) = match choose_target(&tx, settings)? {
                Target::Update { id, application_name, identity } => {
                    update_record(&tx, id, settings)?;
                    (id, Some((application_name, identity)))
                }
                Target::Insert => (insert_record(&tx, settings)?, None),
            };
            write_contacts(&tx, id, settings)?;

            // Dropping `tx` on the error path rolls the structured half back
            let undo = self
                .mirror
                .write_record(settings)
                .map_err(|(path, e)| StoreError::MirrorWriteFailed { path, message: e.to_string() })?;
            if let Err(e) = tx.commit() {
                undo.rollback();
                return Err(e.into());
            }
            Ok((id, previous))
        })?;

        if let Some((old_name, old_identity)) = previous {
            if old_name != settings.application_name || old_identity != settings.identity {
                if let Err(e) = self.mirror.remove_identity(&old_name, old_identity) {
                    log::warn!("removing old mirror {old_name}/{old_identity}: {e}");
                }
            }
        }
        settings.assign_id(id);
        Ok(id)
    }

    /// Remove the record for (`application_name`, `identity`) and its mirror.
    pub fn delete(&self, application_name: &str, identity: i64) -> Result<(), StoreError> {
        validate(application_name, identity)?;
        log::debug!("delete {application_name} ({identity})");

        let _w = self.write_lock.lock();
        self.handles.write(|conn| {
            let tx = conn.transaction()?;
            let ids = {
                let mut stmt =
                    tx.prepare(&format!("SELECT _id FROM {SETTINGS_TABLE} WHERE packageName = ?1 AND uid = ?2"))?;
                let ids = stmt
                    .query_map(params![application_name, identity], |row| row.get(0))?
                    .collect::<Result<Vec<i64>, _>>()?;
                ids
            };
            if ids.is_empty() {
                return Err(StoreError::NotFound { application_name: application_name.to_string() });
            }
            for id in &ids {
                tx.execute(&format!("DELETE FROM {CONTACTS_TABLE} WHERE settings_id = ?1"), params![id])?;
                tx.execute(&format!("DELETE FROM {SETTINGS_TABLE} WHERE _id = ?1"), params![id])?;
            }

            let staged = self
                .mirror
                .stage_removal(application_name, identity)
                .map_err(|e| StoreError::MirrorWriteFailed {
                    path: self.mirror.identity_dir(application_name, identity),
                    message: e.to_string(),
                })?;
            if let Err(e) = tx.commit() {
                if let Some(staged) = staged {
                    if let Err(restore) = staged.restore() {
                        log::error!("restoring mirror for {application_name}/{identity}: {restore}");
                    }
                }
                return Err(e.into());
            }
            if let Some(staged) = staged {
                if let Err(e) = staged.finish() {
                    log::warn!("removing mirror for {application_name}/{identity}: {e}");
                }
            }
            Ok(())
        })
    }

    pub fn get_global(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.handles.read(|conn| read_global(conn, key))
    }

    /// Set a global value. `schema_version` may only move forward.
    pub fn set_global(&self, key: &str, value: &str) -> Result<(), StoreError> {
        log::debug!("set_global {key}={value}");
        let _w = self.write_lock.lock();
        self.handles.write(|conn| {
            if key == global::SCHEMA_VERSION {
                let new: u32 = value
                    .trim()
                    .parse()
                    .map_err(|_| StoreError::ValidationFailed(format!("schema_version '{value}' is not a number")))?;
                let current = schema::stored_version(conn)?;
                if new < current {
                    return Err(StoreError::ValidationFailed(format!(
                        "schema_version cannot go from {current} to {new}"
                    )));
                }
            }
            conn.execute(
                &format!("INSERT OR REPLACE INTO {GLOBAL_TABLE} (name, value) VALUES (?1, ?2)"),
                params![key, value],
            )?;
            Ok(())
        })
    }

    /// Global switch; on unless explicitly set to `0`.
    pub fn is_enabled(&self) -> bool {
        self.flag(global::ENABLED)
    }

    pub fn notifications_enabled(&self) -> bool {
        self.flag(global::NOTIFICATIONS_ENABLED)
    }

    fn flag(&self, key: &str) -> bool {
        match self.get_global(key) {
            Ok(value) => value.as_deref().map(str::trim) != Some("0"),
            Err(e) => {
                log::warn!("reading {key}: {e}");
                true
            }
        }
    }
}

impl SettingsSource for SettingsStore {
    /// Nothing is customized while the global switch is off.
    fn settings(&self, application_name: &str, identity: i64) -> Option<PrivacySettings> {
        if !self.is_enabled() {
            return None;
        }
        self.get(application_name, identity)
    }
}

fn validate(application_name: &str, identity: i64) -> Result<(), StoreError> {
    if application_name.trim().is_empty() {
        return Err(StoreError::ValidationFailed("application name is empty".into()));
    }
    if application_name.contains(['/', '\0']) || application_name == "." || application_name == ".." {
        return Err(StoreError::ValidationFailed(format!(
            "application name '{application_name}' is not a valid path component"
        )));
    }
    if identity < 0 {
        return Err(StoreError::ValidationFailed(format!("identity {identity} is negative")));
    }
    Ok(())
}

fn read_global(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    if !schema::table_exists(conn, GLOBAL_TABLE)? {
        return Ok(None);
    }
    let value: Option<Option<String>> = conn
        .query_row(
            &format!("SELECT value FROM {GLOBAL_TABLE} WHERE name = ?1"),
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.flatten())
}

fn select_records<P: rusqlite::Params>(
    conn: &Connection,
    filter: &str,
    params: P,
) -> Result<Vec<PrivacySettings>, StoreError> {
    let sql = format!(
        "SELECT {} FROM {SETTINGS_TABLE} WHERE {filter} ORDER BY _id",
        schema::record_columns().join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut records = stmt
        .query_map(params, record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    for record in &mut records {
        if record.state(Category::Contacts) == SettingState::Custom {
            if let Some(id) = record.id() {
                record.allowed_contacts = Some(read_contacts(conn, id)?);
            }
        }
    }
    Ok(records)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PrivacySettings> {
    let mut settings = PrivacySettings::persisted(row.get(0)?, row.get::<_, String>(1)?, row.get(2)?);
    let mut idx = 3;
    for category in Category::ALL {
        let state = SettingState::from_stored(row.get(idx)?);
        idx += 1;
        let payload = match category.kind() {
            PayloadKind::Text => {
                let value: Option<String> = row.get(idx)?;
                idx += 1;
                value.map(|value| Payload::Text { value }).unwrap_or_default()
            }
            PayloadKind::Location => {
                let lat: Option<String> = row.get(idx)?;
                let lon: Option<String> = row.get(idx + 1)?;
                idx += 2;
                match (lat, lon) {
                    (Some(lat), Some(lon)) => Payload::location(lat, lon),
                    _ => Payload::None,
                }
            }
            PayloadKind::Flag => Payload::None,
        };
        settings.set(category, CategorySetting::new(state, payload));
    }
    Ok(settings)
}

fn read_contacts(conn: &Connection, settings_id: i64) -> Result<BTreeSet<i64>, StoreError> {
    let mut stmt =
        conn.prepare(&format!("SELECT contact_id FROM {CONTACTS_TABLE} WHERE settings_id = ?1 ORDER BY contact_id"))?;
    let ids = stmt
        .query_map(params![settings_id], |row| row.get(0))?
        .collect::<Result<BTreeSet<i64>, _>>()?;
    Ok(ids)
}

/// Values for every category column, in `schema::record_columns` order
/// (without the leading `_id, packageName, uid`).
fn category_values(settings: &PrivacySettings) -> Vec<Value> {
    let mut values = Vec::new();
    for (category, setting) in settings.iter() {
        values.push(Value::Integer(i64::from(setting.state.code())));
        match (category.kind(), &setting.payload) {
            (PayloadKind::Text, Payload::Text { value }) => values.push(Value::Text(value.clone())),
            (PayloadKind::Text, _) => values.push(Value::Null),
            (PayloadKind::Location, Payload::Location { lat, lon }) => {
                values.push(Value::Text(lat.clone()));
                values.push(Value::Text(lon.clone()));
            }
            (PayloadKind::Location, _) => {
                values.push(Value::Null);
                values.push(Value::Null);
            }
            (PayloadKind::Flag, _) => {}
        }
    }
    values
}

fn choose_target(tx: &Transaction<'_>, settings: &PrivacySettings) -> Result<Target, StoreError> {
    let name = settings.application_name.as_str();
    let by = |filter: &str, args: &[&dyn ToSql]| -> Result<Vec<(i64, String, i64)>, StoreError> {
        let mut stmt = tx.prepare(&format!("SELECT _id, packageName, uid FROM {SETTINGS_TABLE} WHERE {filter}"))?;
        let rows = stmt
            .query_map(args, |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    };
    let single = |mut rows: Vec<(i64, String, i64)>| {
        let (id, application_name, identity) = rows.remove(0);
        Target::Update { id, application_name, identity }
    };

    if let Some(id) = settings.id() {
        let rows = by("_id = ?1", params![id])?;
        if rows.is_empty() {
            return Err(StoreError::NotFound { application_name: name.to_string() });
        }
        return Ok(single(rows));
    }

    let rows = by("packageName = ?1 AND uid = ?2", params![name, settings.identity])?;
    match rows.len() {
        0 => {}
        1 => return Ok(single(rows)),
        n => {
            log::error!("integrity fault: {n} records for {name} ({})", settings.identity);
            return Err(StoreError::Ambiguous { application_name: name.to_string(), rows: n });
        }
    }

    // Reinstalled under a new identity: take over the single row for the name
    let rows = by("packageName = ?1", params![name])?;
    match rows.len() {
        0 => Ok(Target::Insert),
        1 => Ok(single(rows)),
        n => {
            log::error!("integrity fault: {n} records for {name}");
            Err(StoreError::Ambiguous { application_name: name.to_string(), rows: n })
        }
    }
}

fn insert_record(tx: &Transaction<'_>, settings: &PrivacySettings) -> Result<i64, StoreError> {
    let columns = &schema::record_columns()[1..];
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {SETTINGS_TABLE} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    let mut values = vec![Value::Text(settings.application_name.clone()), Value::Integer(settings.identity)];
    values.extend(category_values(settings));
    tx.execute(&sql, params_from_iter(values))?;
    Ok(tx.last_insert_rowid())
}

fn update_record(tx: &Transaction<'_>, id: i64, settings: &PrivacySettings) -> Result<(), StoreError> {
    let columns = &schema::record_columns()[1..];
    let assignments: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ?{}", i + 1))
        .collect();
    let sql = format!(
        "UPDATE {SETTINGS_TABLE} SET {} WHERE _id = ?{}",
        assignments.join(", "),
        columns.len() + 1
    );
    let mut values = vec![Value::Text(settings.application_name.clone()), Value::Integer(settings.identity)];
    values.extend(category_values(settings));
    values.push(Value::Integer(id));
    tx.execute(&sql, params_from_iter(values))?;
    Ok(())
}

fn write_contacts(tx: &Transaction<'_>, id: i64, settings: &PrivacySettings) -> Result<(), StoreError> {
    tx.execute(&format!("DELETE FROM {CONTACTS_TABLE} WHERE settings_id = ?1"), params![id])?;
    if settings.state(Category::Contacts) != SettingState::Custom {
        return Ok(());
    }
    if let Some(contacts) = &settings.allowed_contacts {
        let mut stmt =
            tx.prepare(&format!("INSERT INTO {CONTACTS_TABLE} (settings_id, contact_id) VALUES (?1, ?2)"))?;
        for contact in contacts {
            stmt.execute(params![id, contact])?;
        }
    }
    Ok(())
}
