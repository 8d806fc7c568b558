//! Discovery of the transitive shared library dependencies of a binary.

use crate::{elf::Dynamic, error::Error};
use oki_log::{debug, warn};
use std::{
    collections::HashSet,
    fs, io, iter,
    path::{Path, PathBuf},
    vec,
};

/// The system library directory searched after a binary's own run path.
pub const FALLBACK_LIBRARY_PATH: &str = "/usr/lib";

/// Library paths that were already discovered.
pub type Visited = HashSet<PathBuf>;

/// What to do if an imported library is not found in any directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingLibrary {
    /// Abort the resolution.
    Strict,
    /// Log a warning and continue with the remaining imports.
    Lenient,
}

impl Default for MissingLibrary {
    fn default() -> Self {
        Self::Strict
    }
}

/// Walks the dynamic sections of a binary and its libraries.
#[derive(Debug)]
pub struct Resolver {
    missing: MissingLibrary,
    fallback: PathBuf,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(MissingLibrary::default())
    }
}

/// A binary whose imports are being resolved.
struct Frame {
    imports: vec::IntoIter<String>,
    search_path: Vec<PathBuf>,
}

impl Resolver {
    pub fn new(missing: MissingLibrary) -> Self {
        Self {
            missing,
            fallback: FALLBACK_LIBRARY_PATH.into(),
        }
    }

    /// Replace the fallback library directory.
    pub fn with_fallback<P: Into<PathBuf>>(mut self, fallback: P) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Return all libraries `root` depends on, in depth-first pre-order.
    pub fn dependencies<P: AsRef<Path>>(&self, root: P) -> Result<Vec<PathBuf>, Error> {
        self.resolve(root.as_ref(), &mut Visited::new())
    }

    /// Return the libraries of `root` that are not yet in `visited`.
    ///
    /// Every returned path is canonical and added to `visited`.  A
    /// library is returned before its own dependencies, and each
    /// library's imports are looked up in that library's own search
    /// path.  The walk is iterative, so dependency cycles only
    /// terminate on the visited set.
    pub fn resolve(&self, root: &Path, visited: &mut Visited) -> Result<Vec<PathBuf>, Error> {
        let root = fs::canonicalize(root)?;
        let mut found = Vec::new();
        let mut stack = vec![self.frame(&root)?];

        while let Some(frame) = stack.last_mut() {
            let name = match frame.imports.next() {
                Some(name) => name,
                None => {
                    stack.pop();
                    continue;
                }
            };

            validate_name(&name)?;

            let path = match self.lookup(&name, &frame.search_path)? {
                Some(path) => path,
                None => continue,
            };

            if visited.insert(path.clone()) {
                debug!("found library {:?}", name; "path" => ?path, "depth" => stack.len());
                let next = self.frame(&path)?;
                found.push(path);
                stack.push(next);
            }
        }

        Ok(found)
    }

    fn frame(&self, binary: &Path) -> Result<Frame, Error> {
        let dynamic = Dynamic::open(binary)?;
        let search_path = if dynamic.needed.is_empty() {
            vec![]
        } else {
            self.search_path(binary, &dynamic)
        };

        Ok(Frame {
            imports: dynamic.needed.into_iter(),
            search_path,
        })
    }

    /// The run path entries of `binary` followed by the fallback directory.
    ///
    /// `binary` is canonical, so `$ORIGIN` expands to an absolute directory.
    fn search_path(&self, binary: &Path, dynamic: &Dynamic) -> Vec<PathBuf> {
        let origin = binary.parent().unwrap_or_else(|| Path::new("/"));

        dynamic
            .search_path()
            .iter()
            .flat_map(|entry| entry.split(':'))
            .filter(|entry| !entry.is_empty())
            .map(|entry| expand_origin(entry, origin))
            .chain(iter::once(self.fallback.clone()))
            .collect()
    }

    /// Find the first directory in `search_path` that contains `name`.
    ///
    /// The match is returned in canonical form, so that different
    /// spellings of one library share a single visited entry.
    fn lookup(&self, name: &str, search_path: &[PathBuf]) -> Result<Option<PathBuf>, Error> {
        for directory in search_path {
            let path = directory.join(name);

            match fs::metadata(&path) {
                Ok(metadata) if metadata.is_dir() => {
                    return Err(Error::LibraryIsDirectory(path));
                }
                Ok(metadata) if !metadata.is_file() => {
                    return Err(Error::NotRegularFile(path));
                }
                Ok(_) => {
                    return fs::canonicalize(&path)
                        .map(Some)
                        .map_err(|source| Error::Stat { path, source });
                }
                Err(err) if is_missing(&err) => continue,
                Err(source) => return Err(Error::Stat { path, source }),
            }
        }

        match self.missing {
            MissingLibrary::Strict => Err(Error::LibraryNotFound {
                name: name.to_string(),
                search_path: search_path.to_vec(),
            }),
            MissingLibrary::Lenient => {
                warn!("could not find the library path for {:?}", name;
                      "search_path" => ?search_path);
                Ok(None)
            }
        }
    }
}

/// Library names must be plain file names in the search directories.
fn validate_name(name: &str) -> Result<(), Error> {
    let reason = if name.is_empty() {
        "is empty"
    } else if name.contains("..") {
        "contains '..'"
    } else if name.contains('/') {
        "contains '/'"
    } else {
        return Ok(());
    };

    Err(Error::InvalidLibraryName {
        name: name.to_string(),
        reason,
    })
}

fn is_missing(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::NotFound || err.raw_os_error() == Some(libc::ENOTDIR)
}

/// Replace `$ORIGIN` and `${ORIGIN}` with the directory of the binary.
fn expand_origin(entry: &str, origin: &Path) -> PathBuf {
    if !entry.contains("$ORIGIN") && !entry.contains("${ORIGIN}") {
        return entry.into();
    }
    let origin = origin.to_string_lossy();
    entry
        .replace("${ORIGIN}", &origin)
        .replace("$ORIGIN", &origin)
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("libc.so.96.1").is_ok());
        assert!(validate_name("libstdc++.so.6").is_ok());

        for name in &["../libc.so", "..", "lib/libc.so", "/usr/lib/libc.so", "a..b", ""] {
            assert!(
                matches!(validate_name(name), Err(Error::InvalidLibraryName { .. })),
                "{}",
                name
            );
        }
    }

    #[test]
    fn test_expand_origin() {
        let origin = Path::new("/usr/local/bin");
        assert_eq!(
            expand_origin("$ORIGIN/../lib", origin),
            Path::new("/usr/local/bin/../lib")
        );
        assert_eq!(
            expand_origin("${ORIGIN}/lib", origin),
            Path::new("/usr/local/bin/lib")
        );
        assert_eq!(expand_origin("/opt/lib", origin), Path::new("/opt/lib"));
    }

    #[test]
    fn test_search_path() {
        let resolver = Resolver::default();
        let dynamic = Dynamic {
            needed: vec!["libc.so".into()],
            runpath: vec!["/opt/a:/opt/b".into(), "::$ORIGIN".into()],
            rpath: vec!["/ignored".into()],
        };

        assert_eq!(
            resolver.search_path(Path::new("/opt/bin/prog"), &dynamic),
            [
                PathBuf::from("/opt/a"),
                PathBuf::from("/opt/b"),
                PathBuf::from("/opt/bin"),
                PathBuf::from(FALLBACK_LIBRARY_PATH),
            ]
        );

        assert_eq!(
            resolver
                .with_fallback("/lib")
                .search_path(Path::new("/prog"), &Dynamic::default()),
            [PathBuf::from("/lib")]
        );
    }
}
