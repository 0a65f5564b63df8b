//! Plain-file mirror of the settings that low-level components read
//! directly.
//!
//! Layout: `<root>/<application_name>/<identity>/<category>Setting`. A flag
//! category's file holds the bare state digit. A text category's file holds
//! its resolved value as plain text, and is absent while the category is
//! `Real` so readers fall through to the real source.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use privacyd_core::{resolve, Category, CategorySetting, PayloadKind, PrivacySettings, Resolution};

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Contents of the mirror file for `setting`, or `None` when the file
/// should not exist.
///
/// A `Random` text category gets a value drawn at write time; it stays the
/// same until the record is saved again.
pub fn render(category: Category, setting: &CategorySetting) -> Option<String> {
    if category.kind() == PayloadKind::Flag {
        return Some(setting.state.code().to_string());
    }
    match resolve(category, setting.state, &setting.payload, None) {
        Resolution::Real => None,
        resolution => resolution.as_text(),
    }
}

#[derive(Debug, Clone)]
pub struct MirrorWriter {
    root: PathBuf,
}

impl MirrorWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self, application_name: &str) -> PathBuf {
        self.root.join(application_name)
    }

    pub fn identity_dir(&self, application_name: &str, identity: i64) -> PathBuf {
        self.app_dir(application_name).join(identity.to_string())
    }

    pub fn category_path(&self, application_name: &str, identity: i64, category: Category) -> PathBuf {
        self.identity_dir(application_name, identity).join(category.mirror_file_name())
    }

    /// Write one file, creating parents. Existing content is replaced
    /// atomically.
    pub fn write_category(
        &self,
        application_name: &str,
        identity: i64,
        category: Category,
        contents: &str,
    ) -> io::Result<()> {
        self.write_tracked(application_name, identity, category, contents, &mut Vec::new())
    }

    fn write_tracked(
        &self,
        application_name: &str,
        identity: i64,
        category: Category,
        contents: &str,
        created: &mut Vec<PathBuf>,
    ) -> io::Result<()> {
        for dir in [
            self.root.clone(),
            self.app_dir(application_name),
            self.identity_dir(application_name, identity),
        ] {
            if !dir.is_dir() {
                fs::create_dir_all(&dir)?;
                created.push(dir.clone());
            }
            set_mode(&dir, DIR_MODE)?;
        }

        let path = self.category_path(application_name, identity, category);
        let temp_path = path.with_file_name(format!(".{}.tmp", category.mirror_file_name()));
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        set_mode(&temp_path, FILE_MODE)?;
        fs::rename(&temp_path, &path)
    }

    pub fn read_category(
        &self,
        application_name: &str,
        identity: i64,
        category: Category,
    ) -> io::Result<Option<String>> {
        match fs::read_to_string(self.category_path(application_name, identity, category)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove one file and prune the identity and application directories
    /// if that left them empty.
    pub fn delete_category(&self, application_name: &str, identity: i64, category: Category) -> io::Result<()> {
        match fs::remove_file(self.category_path(application_name, identity, category)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        prune_empty(&self.identity_dir(application_name, identity))?;
        prune_empty(&self.app_dir(application_name))
    }

    /// Write every mirrored category of `settings`. On failure everything
    /// this call changed is put back before the error is returned.
    ///
    /// Previous files are kept as hard links rather than read back, so a
    /// save never shows up as a read of the mirror.
    pub fn write_record(&self, settings: &PrivacySettings) -> Result<MirrorUndo, (PathBuf, io::Error)> {
        let name = settings.application_name.as_str();
        let identity = settings.identity;
        let mut undo = MirrorUndo::default();

        for category in Category::mirrored() {
            let path = self.category_path(name, identity, category);
            let stash = match stash(&path) {
                Ok(stash) => stash,
                Err(e) => {
                    undo.rollback();
                    return Err((path, e));
                }
            };
            let written = match render(category, settings.setting(category)) {
                Some(contents) => self.write_tracked(name, identity, category, &contents, &mut undo.created_dirs),
                None if path.is_file() => fs::remove_file(&path),
                None => Ok(()),
            };
            undo.files.push((path.clone(), stash));
            if let Err(e) = written {
                undo.rollback();
                return Err((path, e));
            }
        }
        Ok(undo)
    }

    /// Remove the whole identity directory, then the application directory
    /// if it is left empty.
    pub fn remove_identity(&self, application_name: &str, identity: i64) -> io::Result<()> {
        let dir = self.identity_dir(application_name, identity);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        prune_empty(&self.app_dir(application_name))
    }

    /// Move the identity directory aside so it can be removed once the
    /// structured delete commits, or moved back if it does not.
    pub fn stage_removal(&self, application_name: &str, identity: i64) -> io::Result<Option<StagedRemoval>> {
        let original = self.identity_dir(application_name, identity);
        if !original.exists() {
            return Ok(None);
        }
        let staged = self.app_dir(application_name).join(format!(".{identity}.removing"));
        if staged.exists() {
            fs::remove_dir_all(&staged)?;
        }
        fs::rename(&original, &staged)?;
        Ok(Some(StagedRemoval { original, staged }))
    }
}

/// Prior state of the files touched by `MirrorWriter::write_record`.
/// Dropping it keeps the new contents and discards the stashed ones.
#[derive(Debug, Default)]
pub struct MirrorUndo {
    /// Each touched path with the hard link holding its previous contents.
    files: Vec<(PathBuf, Option<PathBuf>)>,
    created_dirs: Vec<PathBuf>,
}

impl MirrorUndo {
    /// Restore previous contents, remove files that did not exist and
    /// directories this write created.
    pub fn rollback(mut self) {
        for (path, stash) in std::mem::take(&mut self.files).into_iter().rev() {
            let restored = match stash {
                Some(stash) => fs::rename(&stash, &path),
                None => match fs::remove_file(&path) {
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(e) = restored {
                log::warn!("mirror rollback of {} failed: {e}", path.display());
            }
        }
        for dir in std::mem::take(&mut self.created_dirs).into_iter().rev() {
            if let Err(e) = prune_empty(&dir) {
                log::warn!("mirror rollback of {} failed: {e}", dir.display());
            }
        }
    }
}

impl Drop for MirrorUndo {
    fn drop(&mut self) {
        for stash in self.files.drain(..).filter_map(|(_, stash)| stash) {
            if let Err(e) = fs::remove_file(&stash) {
                log::warn!("removing {}: {e}", stash.display());
            }
        }
    }
}

/// Keep the current contents of `path` under a hidden sibling name.
fn stash(path: &Path) -> io::Result<Option<PathBuf>> {
    if !path.is_file() {
        return Ok(None);
    }
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let stash = path.with_file_name(format!(".{file_name}.prev"));
    match fs::remove_file(&stash) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    if fs::hard_link(path, &stash).is_err() {
        fs::copy(path, &stash)?;
    }
    Ok(Some(stash))
}

#[derive(Debug)]
pub struct StagedRemoval {
    original: PathBuf,
    staged: PathBuf,
}

impl StagedRemoval {
    pub fn finish(self) -> io::Result<()> {
        fs::remove_dir_all(&self.staged)?;
        match self.original.parent() {
            Some(app_dir) => prune_empty(app_dir),
            None => Ok(()),
        }
    }

    pub fn restore(self) -> io::Result<()> {
        fs::rename(&self.staged, &self.original)
    }
}

/// Remove `dir` if it exists and is empty.
pub fn prune_empty(dir: &Path) -> io::Result<()> {
    match fs::read_dir(dir) {
        Ok(mut entries) => {
            if entries.next().is_none() {
                fs::remove_dir(dir)?;
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
