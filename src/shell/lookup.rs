//! Resolution of program names to executables.

use std::env;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::debug;

/// Maps a program name to the file to execute.
pub trait ExecutableLookup {
    /// Returns `None` if `name` does not resolve to an executable file.
    fn find_executable(&self, name: &str) -> Option<PathBuf>;
}

/// Looks programs up in the directories of `PATH`.
///
/// Names containing a `/` are never searched for; they are used as given.
#[derive(Clone, Debug, Default)]
pub struct PathLookup {
    /// Overrides the `PATH` environment variable when set.
    search_paths: Option<OsString>,
}

impl PathLookup {
    pub fn with_search_paths<S: Into<OsString>>(search_paths: S) -> Self {
        Self {
            search_paths: Some(search_paths.into()),
        }
    }
}

impl ExecutableLookup for PathLookup {
    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }

        if name.contains('/') {
            let path = Path::new(name);
            return if is_executable(path) {
                Some(path.to_path_buf())
            } else {
                None
            };
        }

        let search_paths = match self.search_paths {
            Some(ref search_paths) => search_paths.clone(),
            None => env::var_os("PATH")?,
        };
        let found = find_in_path(&search_paths, name);
        debug!("resolved {} to {:?}", name, found);
        found
    }
}

fn find_in_path(search_paths: &OsStr, name: &str) -> Option<PathBuf> {
    env::split_paths(search_paths)
        .map(|dir| dir.join(name))
        .find(|path| is_executable(path))
}

fn is_executable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}
