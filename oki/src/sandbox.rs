//! Application of unveil(2) rules and pledge(2) promises to the process.
//!
//! The restrictions are irrevocable, so the [`Sandbox`] tracks them as
//! a one-way sequence of [`Stage`]s and refuses any call that would go
//! backwards or skip a stage:
//!
//! ```text
//! Unrestricted -> PathsOpen -> PathsClosed -> CapabilityRestricted -> ImageReplaced
//! ```

use crate::{
    error::Error,
    process::Config,
    rules::{Promises, Unveil},
};
use oki_log::debug;
use std::{
    ffi::{CStr, CString},
    os::unix::ffi::OsStrExt,
    path::Path,
};

/// Permissions of the automatic unveil of the program.
pub const PROGRAM_PERMISSIONS: &str = "rx";

/// Restriction stages of the process, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Nothing has been applied yet.
    Unrestricted,
    /// At least one path was unveiled.
    PathsOpen,
    /// Unveiling is locked.
    PathsClosed,
    /// The exec promises are set.
    CapabilityRestricted,
    /// The program replaced the process image.
    ImageReplaced,
}

/// The operating system calls that restrict and replace the process.
///
/// Strings are passed as C strings so that every argument is
/// validated before the first call is made.
pub trait Primitives {
    /// unveil(2) a path with the given permissions.
    fn unveil(&mut self, path: &CStr, permissions: &CStr) -> Result<(), Error>;

    /// Lock unveil(2), `unveil(NULL, NULL)`.
    fn unveil_block(&mut self) -> Result<(), Error>;

    /// pledge(2) the current process and/or its next executed image.
    fn pledge(&mut self, promises: Option<&CStr>, execpromises: Option<&CStr>)
        -> Result<(), Error>;

    /// Replace the process image.  Only returns on failure, or from test doubles.
    fn execve(&mut self, path: &CStr, args: &[CString], env: &[CString]) -> Result<(), Error>;
}

/// Convert a string into a C string.
pub fn cstring<S: AsRef<[u8]>>(s: S) -> Result<CString, Error> {
    let s = s.as_ref();
    CString::new(s).map_err(|_| Error::InvalidPath(String::from_utf8_lossy(s).into_owned()))
}

/// Convert a path into a C string.
pub fn path_to_cstring(path: &Path) -> Result<CString, Error> {
    cstring(path.as_os_str().as_bytes())
}

/// Rules that were converted before anything was applied.
struct Prepared {
    unveils: Vec<(CString, CString)>,
    promises: Option<CString>,
}

/// The restriction state machine of the current process.
#[derive(Debug)]
pub struct Sandbox<P: Primitives> {
    primitives: P,
    stage: Stage,
}

impl<P: Primitives> Sandbox<P> {
    pub fn new(primitives: P) -> Self {
        Self {
            primitives,
            stage: Stage::Unrestricted,
        }
    }

    /// The current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Return the primitives, for inspection.
    pub fn primitives(&self) -> &P {
        &self.primitives
    }

    fn check(&self, action: &'static str, allowed: &[Stage]) -> Result<(), Error> {
        if allowed.contains(&self.stage) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                action,
                stage: self.stage,
            })
        }
    }

    /// Unveil one path.
    pub fn unveil(&mut self, path: &CStr, permissions: &CStr) -> Result<(), Error> {
        self.check("unveil", &[Stage::Unrestricted, Stage::PathsOpen])?;
        debug!("unveil {:?} {:?}", permissions, path);
        self.primitives.unveil(path, permissions)?;
        self.stage = Stage::PathsOpen;
        Ok(())
    }

    /// Lock the unveiled paths.
    pub fn unveil_block(&mut self) -> Result<(), Error> {
        self.check("lock unveil", &[Stage::Unrestricted, Stage::PathsOpen])?;
        debug!("unveil block");
        self.primitives.unveil_block()?;
        self.stage = Stage::PathsClosed;
        Ok(())
    }

    /// Set the exec promises, if there are any.
    pub fn pledge(&mut self, execpromises: Option<&CStr>) -> Result<(), Error> {
        self.check("pledge", &[Stage::PathsClosed])?;
        match execpromises {
            Some(execpromises) => {
                debug!("pledge exec {:?}", execpromises);
                self.primitives.pledge(None, Some(execpromises))?;
            }
            None => debug!("pledge skipped, no promises"),
        }
        self.stage = Stage::CapabilityRestricted;
        Ok(())
    }

    /// Replace the process image with the restricted program.
    pub fn execve(&mut self, path: &CStr, args: &[CString], env: &[CString]) -> Result<(), Error> {
        self.check("exec", &[Stage::CapabilityRestricted])?;
        debug!("exec {:?}", path; "args" => ?args, "env" => env.len());
        self.primitives.execve(path, args, env)?;
        self.stage = Stage::ImageReplaced;
        Ok(())
    }

    /// Apply all restrictions of the launch configuration.
    ///
    /// The program is unveiled first (unless skipped), then every
    /// rule in the configured order, then unveil is locked and the
    /// promises are set.  Nothing is applied if the configuration is
    /// invalid.
    pub fn enact(&mut self, config: &Config) -> Result<(), Error> {
        let prepared = prepare(config)?;

        for (path, permissions) in &prepared.unveils {
            self.unveil(path, permissions)?;
        }
        self.unveil_block()?;
        self.pledge(prepared.promises.as_deref())
    }
}

fn prepare(config: &Config) -> Result<Prepared, Error> {
    let promises = validate_promises(&config.promises, config.allow_no_promises)?;

    let program = (!config.skip_program_unveil)
        .then(|| Unveil::new(PROGRAM_PERMISSIONS, &config.program));
    let unveils = program
        .iter()
        .chain(config.unveils.iter())
        .map(|rule| Ok((path_to_cstring(&rule.path)?, cstring(&rule.permissions)?)))
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(Prepared { unveils, promises })
}

/// Return the promise string, `None` if no promises are allowed.
fn validate_promises(promises: &Promises, allow_empty: bool) -> Result<Option<CString>, Error> {
    if promises.is_empty() {
        if allow_empty {
            return Ok(None);
        }
        return Err(Error::MissingPromises);
    }
    cstring(promises.to_promise_string()).map(Some)
}
