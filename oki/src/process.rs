//! The launch request and the hand-off to the restricted program.

use crate::{
    error::Error,
    resolve::{MissingLibrary, Resolver},
    rules::{Emitter, Promises, Unveil},
    sandbox::{cstring, path_to_cstring, Primitives, Sandbox},
};
use nix::unistd::{access, AccessFlags};
use oki_log::{debug, info};
use std::{
    env,
    ffi::{CString, OsStr, OsString},
    fs,
    io::Write,
    iter,
    os::unix::ffi::{OsStrExt, OsStringExt},
    path::{Path, PathBuf},
};

/// Variables passed by [`Environment::Allow`] with the minimal preset.
pub const MINIMAL_ENVIRONMENT: &[&str] = &[
    "HOME", "LANG", "LOGNAME", "PATH", "SHELL", "TERM", "TMPDIR", "USER",
];

/// The environment of the executed program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    /// Pass the complete environment of `oki`.
    Inherit,
    /// Pass only the named variables, if they are set.
    Allow(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Self::Inherit
    }
}

impl Environment {
    /// Select the `KEY=VALUE` entries of `vars` in their original order.
    pub fn entries<I>(&self, vars: I) -> Result<Vec<CString>, Error>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        vars.into_iter()
            .filter(|(key, _)| match self {
                Self::Inherit => true,
                Self::Allow(names) => names.iter().any(|name| OsStr::new(name) == key),
            })
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                cstring(entry)
            })
            .collect()
    }

    /// Select the entries of the current process environment.
    pub fn collect(&self) -> Result<Vec<CString>, Error> {
        self.entries(env::vars_os())
    }
}

/// The launch request.
///
/// It is built once from the command line and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Path of the program to execute.
    pub program: PathBuf,
    /// Arguments passed after the program path.
    pub args: Vec<OsString>,
    /// The exec promises.
    pub promises: Promises,
    /// Unveil rules, applied in this order.
    pub unveils: Vec<Unveil>,
    /// Allow an empty promise set.
    pub allow_no_promises: bool,
    /// Do not unveil the program with `rx` permissions.
    pub skip_program_unveil: bool,
    /// Print the unveil rules of the program's libraries instead of executing it.
    pub generate_rules: bool,
    /// Policy for libraries that were not found while generating rules.
    pub missing_library: MissingLibrary,
    /// The environment of the program.
    pub environment: Environment,
}

/// Find a program like the shell does.
///
/// A name that contains a `/` is used as it is, other names are
/// looked up in the directories of `PATH`.
pub fn find_program<S: AsRef<OsStr>>(name: S) -> Result<PathBuf, Error> {
    find_in_path(name.as_ref(), &env::var_os("PATH").unwrap_or_default())
}

fn find_in_path(name: &OsStr, path: &OsStr) -> Result<PathBuf, Error> {
    let not_found = || Error::ProgramNotFound(name.to_string_lossy().into_owned());

    if name.is_empty() {
        return Err(not_found());
    }

    if name.as_bytes().contains(&b'/') {
        let program = PathBuf::from(name);
        return if is_executable(&program) {
            Ok(program)
        } else {
            Err(not_found())
        };
    }

    env::split_paths(path)
        .map(|directory| {
            if directory.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                directory
            }
        })
        .map(|directory| directory.join(name))
        .find(|program| is_executable(program))
        .ok_or_else(not_found)
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| metadata.is_file())
        .unwrap_or_default()
        && access(path, AccessFlags::X_OK).is_ok()
}

/// Replace the process image with `program`.
///
/// The argument vector is `[program, args...]` and `environment` is
/// passed as it is.  Must follow a successful [`Sandbox::enact`].
pub fn handoff<P: Primitives>(
    sandbox: &mut Sandbox<P>,
    program: &Path,
    args: &[OsString],
    environment: &[CString],
) -> Result<(), Error> {
    let path = path_to_cstring(program)?;
    let argv = iter::once(Ok(path.clone()))
        .chain(args.iter().map(|arg| cstring(arg.as_bytes())))
        .collect::<Result<Vec<_>, Error>>()?;

    sandbox.execve(&path, &argv, environment)
}

/// Restrict the process and execute the configured program.
pub fn launch<P: Primitives>(sandbox: &mut Sandbox<P>, config: &Config) -> Result<(), Error> {
    let environment = config.environment.collect()?;

    sandbox.enact(config)?;
    handoff(sandbox, &config.program, &config.args, &environment)
}

/// Write the unveil rules for the libraries of the configured program.
pub fn generate<W: Write>(
    config: &Config,
    resolver: &Resolver,
    emitter: &Emitter,
    out: &mut W,
) -> Result<(), Error> {
    let paths = resolver.dependencies(&config.program)?;
    info!("found {} libraries for {:?}", paths.len(), config.program);

    emitter.write(out, &paths)?;
    debug!("wrote unveil rules");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{tests::Recorder, Stage};
    use std::os::unix::fs::PermissionsExt;

    fn vars(entries: &[(&str, &str)]) -> Vec<(OsString, OsString)> {
        entries
            .iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect()
    }

    #[test]
    fn test_environment_inherit() {
        let entries = Environment::Inherit
            .entries(vars(&[("PATH", "/bin"), ("SECRET", "x=y")]))
            .unwrap();
        assert_eq!(
            entries,
            [
                CString::new("PATH=/bin").unwrap(),
                CString::new("SECRET=x=y").unwrap()
            ]
        );
    }

    #[test]
    fn test_environment_allow() {
        let environment = Environment::Allow(vec!["TERM".into(), "HOME".into(), "UNSET".into()]);
        let entries = environment
            .entries(vars(&[("HOME", "/home/oki"), ("SECRET", "1"), ("TERM", "vt220")]))
            .unwrap();
        assert_eq!(
            entries,
            [
                CString::new("HOME=/home/oki").unwrap(),
                CString::new("TERM=vt220").unwrap()
            ]
        );

        let entries = Environment::Allow(vec![]).entries(vars(&[("HOME", "/")])).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_find_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("prog");
        fs::write(&program, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();
        let plain = dir.path().join("plain");
        fs::write(&plain, "").unwrap();
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o644)).unwrap();

        let path = env::join_paths(&[Path::new("/nonexistent"), dir.path()]).unwrap();
        assert_eq!(find_in_path(OsStr::new("prog"), &path).unwrap(), program);
        assert_eq!(find_in_path(program.as_os_str(), OsStr::new("")).unwrap(), program);

        for name in &["plain", "missing", ""] {
            assert!(matches!(
                find_in_path(OsStr::new(name), &path),
                Err(Error::ProgramNotFound(_))
            ));
        }
        assert!(find_in_path(OsStr::new("prog"), OsStr::new("/nonexistent")).is_err());
    }

    #[test]
    fn test_handoff_requires_enactment() {
        let mut sandbox = Sandbox::new(Recorder::default());
        let err = handoff(&mut sandbox, Path::new("/usr/bin/true"), &[], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(sandbox.primitives().calls.is_empty());
    }

    #[test]
    fn test_launch() {
        let mut sandbox = Sandbox::new(Recorder::default());
        let config = Config {
            program: PathBuf::from("/bin/echo"),
            args: vec!["-n".into(), "hello".into()],
            promises: "stdio".parse().unwrap(),
            environment: Environment::Allow(vec![]),
            ..Default::default()
        };

        launch(&mut sandbox, &config).unwrap();
        assert_eq!(sandbox.stage(), Stage::ImageReplaced);
        assert_eq!(
            sandbox.primitives().calls,
            [
                "unveil rx:/bin/echo",
                "unveil_block",
                "pledge None Some(\"stdio\")",
                "execve \"/bin/echo\" [\"/bin/echo\", \"-n\", \"hello\"] []",
            ]
        );
    }
}
