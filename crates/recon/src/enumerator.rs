//! Sources of the installed-application list.

use std::path::{Path, PathBuf};

use crate::error::PurgeError;
use crate::model::InstalledApp;

pub trait AppEnumerator {
    fn installed(&self) -> Result<Vec<InstalledApp>, PurgeError>;
}

impl<F> AppEnumerator for F
where
    F: Fn() -> Result<Vec<InstalledApp>, PurgeError>,
{
    fn installed(&self) -> Result<Vec<InstalledApp>, PurgeError> {
        self()
    }
}

/// The platform's `packages.list`: one application per line,
/// `<name> <identity> <further fields...>`.
#[derive(Debug, Clone)]
pub struct PackagesList {
    path: PathBuf,
}

impl PackagesList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse file contents. Blank and malformed lines are skipped.
    pub fn parse(contents: &str) -> Vec<InstalledApp> {
        let mut apps = Vec::new();
        for (n, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next().map(str::parse::<i64>)) {
                (Some(name), Some(Ok(identity))) if identity >= 0 => {
                    apps.push(InstalledApp::new(name, identity));
                }
                _ => log::warn!("packages list line {}: cannot parse '{line}'", n + 1),
            }
        }
        apps
    }
}

impl AppEnumerator for PackagesList {
    fn installed(&self) -> Result<Vec<InstalledApp>, PurgeError> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| PurgeError::Enumerate(format!("{}: {e}", self.path.display())))?;
        Ok(Self::parse(&contents))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_identity() {
        let apps = PackagesList::parse(
            "com.example.app 10001 0 /data/data/com.example.app default 3003\n\
             \n\
             broken-line\n\
             com.example.neg -4 0\n\
             com.example.other 10002 1 /data/data/com.example.other\n",
        );
        assert_eq!(
            apps,
            vec![InstalledApp::new("com.example.app", 10001), InstalledApp::new("com.example.other", 10002)]
        );
    }

    #[test]
    fn missing_file_is_an_enumeration_error() {
        let list = PackagesList::new("/nonexistent/packages.list");
        assert!(matches!(list.installed(), Err(PurgeError::Enumerate(_))));
    }

    #[test]
    fn closures_enumerate() {
        let source = || -> Result<Vec<InstalledApp>, PurgeError> { Ok(vec![InstalledApp::new("a", 1)]) };
        assert_eq!(source.installed().unwrap().len(), 1);
    }
}
