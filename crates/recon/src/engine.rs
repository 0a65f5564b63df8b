use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::Utc;

use privacyd_store::mirror::prune_empty;
use privacyd_store::{Lookup, SettingsStore};

use crate::enumerator::AppEnumerator;
use crate::error::PurgeError;
use crate::model::{Pass, PurgeAction, PurgeReport};

/// Bring the mirror tree and the records in line with what is installed.
///
/// Fails only when the installed list cannot be produced; everything after
/// that is per-item and lands in the report.
pub fn purge(store: &SettingsStore, enumerator: &dyn AppEnumerator) -> Result<PurgeReport, PurgeError> {
    let started_at = Utc::now();
    let apps = enumerator.installed()?;
    let mut installed: HashMap<String, i64> = HashMap::with_capacity(apps.len());
    for app in apps {
        if let Some(previous) = installed.insert(app.name.clone(), app.identity) {
            if previous != app.identity {
                log::warn!("{} listed as {previous} and {}; using {}", app.name, app.identity, app.identity);
            }
        }
    }
    log::debug!("purge against {} installed applications", installed.len());

    let mut report = PurgeReport {
        started_at,
        finished_at: started_at,
        installed: installed.len(),
        actions: Vec::new(),
        failures: Vec::new(),
    };

    purge_directories(store, &installed, &mut report);
    purge_records(store, &installed, &mut report);

    report.finished_at = Utc::now();
    log::info!(
        "purge finished: {} action(s), {} failure(s)",
        report.actions.len(),
        report.failures.len()
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Directory pass
// ---------------------------------------------------------------------------

fn purge_directories(store: &SettingsStore, installed: &HashMap<String, i64>, report: &mut PurgeReport) {
    let root = store.mirror().root();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => return report.fail(Pass::Directories, root.display().to_string(), e),
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                report.fail(Pass::Directories, root.display().to_string(), e);
                continue;
            }
        };
        let app_dir = entry.path();
        if !app_dir.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();

        match installed.get(&name) {
            None => match fs::remove_dir_all(&app_dir) {
                Ok(()) => report.did(PurgeAction::RemovedAppDir { application_name: name }),
                Err(e) => report.fail(Pass::Directories, app_dir.display().to_string(), e),
            },
            Some(&current) => {
                if let Err(e) = purge_identity_dirs(&app_dir, &name, current, report) {
                    report.fail(Pass::Directories, app_dir.display().to_string(), e);
                }
                if let Err(e) = prune_empty(&app_dir) {
                    report.fail(Pass::Directories, app_dir.display().to_string(), e);
                }
            }
        }
    }
}

fn purge_identity_dirs(
    app_dir: &Path,
    name: &str,
    current: i64,
    report: &mut PurgeReport,
) -> std::io::Result<()> {
    for entry in fs::read_dir(app_dir)? {
        let entry = entry?;
        let path = entry.path();
        let entry_name = entry.file_name().to_string_lossy().into_owned();

        let remove = |path: &Path| if path.is_dir() { fs::remove_dir_all(path) } else { fs::remove_file(path) };

        let identity = match entry_name.parse::<i64>() {
            Ok(identity) if identity >= 0 && identity.to_string() == entry_name => identity,
            _ => {
                match remove(&path) {
                    Ok(()) => report.did(PurgeAction::RemovedIdentityDir {
                        application_name: name.to_string(),
                        entry: entry_name,
                    }),
                    Err(e) => report.fail(Pass::Directories, path.display().to_string(), e),
                }
                continue;
            }
        };
        if identity == current {
            continue;
        }

        let target = app_dir.join(current.to_string());
        let outcome = if target.exists() {
            remove(&path).map(|()| PurgeAction::RemovedIdentityDir {
                application_name: name.to_string(),
                entry: entry_name,
            })
        } else {
            fs::rename(&path, &target).map(|()| PurgeAction::RenamedIdentityDir {
                application_name: name.to_string(),
                from: identity,
                to: current,
            })
        };
        match outcome {
            Ok(action) => report.did(action),
            Err(e) => report.fail(Pass::Directories, path.display().to_string(), e),
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Record pass
// ---------------------------------------------------------------------------

fn purge_records(store: &SettingsStore, installed: &HashMap<String, i64>, report: &mut PurgeReport) {
    let records = match store.list() {
        Ok(records) => records,
        Err(e) => return report.fail(Pass::Records, "settings", e),
    };

    for record in records {
        let name = record.application_name.clone();
        let target = format!("{name} ({})", record.identity);
        match installed.get(&name) {
            None => match store.delete(&name, record.identity) {
                Ok(()) => report.did(PurgeAction::DeletedRecord { application_name: name, identity: record.identity }),
                Err(e) => report.fail(Pass::Records, target, e),
            },
            Some(&current) if current != record.identity => {
                match relabel(store, &name, record.identity, current) {
                    Ok(()) => report.did(PurgeAction::RelabeledRecord {
                        application_name: name,
                        from: record.identity,
                        to: current,
                    }),
                    Err(e) => report.fail(Pass::Records, target, e),
                }
            }
            Some(_) => {}
        }
    }
}

fn relabel(store: &SettingsStore, name: &str, from: i64, to: i64) -> Result<(), PurgeError> {
    let mut settings = match store.lookup(name, from)? {
        Lookup::Found(settings) => settings,
        Lookup::NotFound => {
            return Err(privacyd_store::StoreError::NotFound { application_name: name.to_string() }.into())
        }
        Lookup::Ambiguous { rows } => {
            return Err(privacyd_store::StoreError::Ambiguous { application_name: name.to_string(), rows }.into())
        }
    };
    settings.identity = to;
    store.save(&mut settings)?;
    Ok(())
}
