use crate::sandbox::Stage;
use derive_more::{Display, From};
use std::{io, path::PathBuf};

/// Common errors.
#[derive(Debug, Display, From)]
pub enum Error {
    #[display(fmt = "I/O error: {}", "_0")]
    IoError(io::Error),
    #[display(fmt = "{}", "_0")]
    UnixError(nix::Error),
    #[display(
        fmt = "please specify a promise with '-p' or use '-k' to allow no promises"
    )]
    #[from(ignore)]
    MissingPromises,
    #[display(fmt = "promise must not be empty")]
    #[from(ignore)]
    EmptyPromise,
    #[display(fmt = "invalid unveil rule {:?} - {}", "_0", "_1")]
    #[from(ignore)]
    InvalidUnveil(String, &'static str),
    #[display(fmt = "failed to find {:?} in PATH", "_0")]
    #[from(ignore)]
    ProgramNotFound(String),
    #[display(fmt = "{:?} contains a NUL byte", "_0")]
    #[from(ignore)]
    InvalidPath(String),
    #[display(fmt = "failed to parse ELF {:?} - {}", "path", "reason")]
    #[from(ignore)]
    Elf { path: PathBuf, reason: &'static str },
    #[display(fmt = "imported library {:?} {}", "name", "reason")]
    #[from(ignore)]
    InvalidLibraryName { name: String, reason: &'static str },
    #[display(fmt = "could not find library {:?} in {:?}", "name", "search_path")]
    #[from(ignore)]
    LibraryNotFound {
        name: String,
        search_path: Vec<PathBuf>,
    },
    #[display(fmt = "library path is a directory: {:?}", "_0")]
    #[from(ignore)]
    LibraryIsDirectory(PathBuf),
    #[display(fmt = "library path is not a regular file: {:?}", "_0")]
    #[from(ignore)]
    NotRegularFile(PathBuf),
    #[display(fmt = "failed to stat library path {:?} - {}", "path", "source")]
    #[from(ignore)]
    Stat { path: PathBuf, source: io::Error },
    #[display(fmt = "failed {} {:?} - {}", "call", "argument", "source")]
    #[from(ignore)]
    Primitive {
        call: &'static str,
        argument: String,
        source: nix::Error,
    },
    #[display(fmt = "{} is not supported on this platform", "_0")]
    #[from(ignore)]
    Unsupported(&'static str),
    #[display(fmt = "cannot {} in the {:?} stage", "action", "stage")]
    #[from(ignore)]
    InvalidTransition { action: &'static str, stage: Stage },
    #[display(fmt = "failed to exec {:?} - {}", "path", "source")]
    #[from(ignore)]
    Exec { path: PathBuf, source: nix::Error },
}

impl std::error::Error for Error {}

impl Error {
    /// Configuration errors are reported before any restriction is applied.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::MissingPromises
                | Self::EmptyPromise
                | Self::InvalidUnveil(..)
                | Self::ProgramNotFound(_)
                | Self::InvalidPath(_)
        )
    }
}
