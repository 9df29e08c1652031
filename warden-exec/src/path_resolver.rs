//! Locating a binary on the search path.

use os_ext::access;
use std::{ffi::CString, os::unix::ffi::OsStrExt, path::{Path, PathBuf}};
use warden_core::{Error, Result};

/// Resolves a command name to an absolute, executable path.
pub struct PathResolver<'a>
{
    search_path: &'a str,
}

impl<'a> PathResolver<'a>
{
    /// Build a resolver over the given colon-separated search path.
    pub fn new(search_path: &'a str) -> Self
    {
        Self{search_path}
    }

    /// Resolve `name` to an absolute path.
    ///
    /// If `name` begins with `/` or `./`, it is returned unchanged
    /// without touching the filesystem. Otherwise each entry of the
    /// search path is tried, left to right, and the first one that
    /// names an executable file wins.
    pub fn resolve(&self, name: &str) -> Result<PathBuf>
    {
        if name.starts_with('/') || name.starts_with("./") {
            return Ok(PathBuf::from(name));
        }

        for dir in self.search_path.split(':').filter(|d| !d.is_empty()) {
            let candidate = Path::new(dir).join(name);
            if is_executable(&candidate) {
                return Ok(candidate);
            }
        }

        Err(Error::NotFound(name.to_owned()))
    }
}

fn is_executable(path: &Path) -> bool
{
    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else { return false };
    access(&cpath, libc::X_OK).is_ok()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn absolute_path_passes_through()
    {
        let resolver = PathResolver::new("/nonexistent");
        assert_eq!(resolver.resolve("/bin/true").unwrap(), PathBuf::from("/bin/true"));
    }

    #[test]
    fn relative_dot_path_passes_through()
    {
        let resolver = PathResolver::new("/nonexistent");
        assert_eq!(resolver.resolve("./run.sh").unwrap(), PathBuf::from("./run.sh"));
    }

    #[test]
    fn resolves_via_search_path()
    {
        let resolver = PathResolver::new("/usr/bin:/bin");
        let resolved = resolver.resolve("true").unwrap();
        assert!(resolved == PathBuf::from("/usr/bin/true") || resolved == PathBuf::from("/bin/true"));
    }

    #[test]
    fn reports_not_found()
    {
        let resolver = PathResolver::new("/nonexistent-dir");
        assert!(matches!(resolver.resolve("definitely-not-a-real-binary"), Err(Error::NotFound(_))));
    }
}
