// Table layout of the settings store and the steps between its generations.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use privacyd_core::Category;

/// Generation written by this build.
pub const CURRENT_VERSION: u32 = 3;

pub const SETTINGS_TABLE: &str = "settings";
pub const GLOBAL_TABLE: &str = "global_settings";
pub const CONTACTS_TABLE: &str = "allowed_contacts";

/// Keys of the global table.
pub mod global {
    pub const ENABLED: &str = "enabled";
    pub const NOTIFICATIONS_ENABLED: &str = "notifications_enabled";
    pub const SCHEMA_VERSION: &str = "schema_version";
}

/// SQL that lifts a store from `version - 1` to `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStep {
    pub version: u32,
    pub sql: String,
}

impl MigrationStep {
    pub fn new(version: u32, sql: impl Into<String>) -> Self {
        Self { version, sql: sql.into() }
    }
}

fn column_defs(version: u32) -> Vec<String> {
    let mut defs = Vec::new();
    for category in Category::ALL.into_iter().filter(|c| c.since_version() == version) {
        defs.push(format!("{} INTEGER", category.state_column()));
        for column in category.payload_columns() {
            defs.push(format!("{column} TEXT"));
        }
    }
    defs
}

fn add_columns(version: u32) -> String {
    column_defs(version)
        .into_iter()
        .map(|def| format!("ALTER TABLE {SETTINGS_TABLE} ADD COLUMN {def};\n"))
        .collect()
}

/// First-generation schema: the settings table alone.
pub fn base_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {SETTINGS_TABLE} (\n    \
         _id INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
         packageName TEXT NOT NULL,\n    \
         uid INTEGER NOT NULL,\n    \
         {}\n);\n",
        column_defs(1).join(",\n    ")
    )
}

/// Steps from generation 1 up to `CURRENT_VERSION`, in order.
pub fn migration_steps() -> Vec<MigrationStep> {
    let v2 = format!(
        "{}\
         CREATE TABLE IF NOT EXISTS {GLOBAL_TABLE} (\n    name TEXT PRIMARY KEY,\n    value TEXT\n);\n\
         INSERT OR IGNORE INTO {GLOBAL_TABLE} (name, value) VALUES ('{}', '1');\n\
         INSERT OR IGNORE INTO {GLOBAL_TABLE} (name, value) VALUES ('{}', '1');\n\
         CREATE TABLE IF NOT EXISTS {CONTACTS_TABLE} (\n    \
         settings_id INTEGER NOT NULL,\n    \
         contact_id INTEGER NOT NULL,\n    \
         PRIMARY KEY (settings_id, contact_id)\n);\n",
        add_columns(2),
        global::ENABLED,
        global::NOTIFICATIONS_ENABLED,
    );
    let v3 = format!(
        "{}\
         CREATE INDEX IF NOT EXISTS settings_package_name ON {SETTINGS_TABLE} (packageName);\n\
         DROP TABLE IF EXISTS android_metadata;\n",
        add_columns(3),
    );
    vec![MigrationStep::new(2, v2), MigrationStep::new(3, v3)]
}

/// Generation of an open store. 0 means no settings table at all.
pub fn stored_version(conn: &Connection) -> rusqlite::Result<u32> {
    if !table_exists(conn, SETTINGS_TABLE)? {
        return Ok(0);
    }
    // The global table arrived in generation 2
    if !table_exists(conn, GLOBAL_TABLE)? {
        return Ok(1);
    }
    let value: Option<Option<String>> = conn
        .query_row(
            &format!("SELECT value FROM {GLOBAL_TABLE} WHERE name = ?1"),
            params![global::SCHEMA_VERSION],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.flatten().and_then(|v| v.trim().parse().ok()).unwrap_or(2))
}

pub fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Apply every step above `from` and record the resulting generation.
pub fn apply_steps(tx: &Transaction<'_>, from: u32, steps: &[MigrationStep]) -> rusqlite::Result<u32> {
    let mut version = from;
    for step in steps.iter().filter(|s| s.version > from) {
        log::debug!("applying schema step v{}", step.version);
        tx.execute_batch(&step.sql)?;
        version = version.max(step.version);
    }
    tx.execute(
        &format!("INSERT OR REPLACE INTO {GLOBAL_TABLE} (name, value) VALUES (?1, ?2)"),
        params![global::SCHEMA_VERSION, version.to_string()],
    )?;
    Ok(version)
}

/// Lay out a fresh store at the current generation.
pub fn create(conn: &mut Connection) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(&base_sql())?;
    apply_steps(&tx, 1, &migration_steps())?;
    tx.commit()
}

/// `_id, packageName, uid` followed by every category's state and payload
/// columns, in `Category::ALL` order.
pub fn record_columns() -> Vec<String> {
    let mut columns = vec!["_id".to_string(), "packageName".to_string(), "uid".to_string()];
    for category in Category::ALL {
        columns.push(category.state_column());
        columns.extend(category.payload_columns());
    }
    columns
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_store_is_current() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 0);
        create(&mut conn).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), CURRENT_VERSION);
        for column in record_columns() {
            conn.prepare(&format!("SELECT {column} FROM settings LIMIT 1")).unwrap();
        }
    }

    #[test]
    fn base_schema_reads_as_first_generation() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&base_sql()).unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 1);
        assert!(conn.prepare("SELECT androidIdSetting FROM settings").is_err());
    }

    #[test]
    fn steps_are_ordered_and_end_at_current() {
        let steps = migration_steps();
        let versions: Vec<u32> = steps.iter().map(|s| s.version).collect();
        assert_eq!(versions, vec![2, 3]);
        assert_eq!(versions.last().copied(), Some(CURRENT_VERSION));
    }

    #[test]
    fn second_generation_seeds_globals() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&base_sql()).unwrap();
        let tx = conn.transaction().unwrap();
        let steps = migration_steps();
        assert_eq!(apply_steps(&tx, 1, &steps[..1]).unwrap(), 2);
        tx.commit().unwrap();
        let enabled: String = conn
            .query_row("SELECT value FROM global_settings WHERE name = 'enabled'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(enabled, "1");
        assert_eq!(stored_version(&conn).unwrap(), 2);
    }
}
