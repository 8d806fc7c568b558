//! Promise sets, unveil rules and the unveil rule emitter.

use crate::error::Error;
use derive_more::{Deref, Display, From};
use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Environment variable with the prefix of every emitted rule.
pub const OUTPUT_PREFIX_ENV: &str = "OKI_OUTPUT_PREFIX";

/// Command line flag that the emitted rules are passed with.
pub const UNVEIL_FLAG: &str = "-u";

/// Ordered list of pledge(2) promises.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, From)]
pub struct Promises(Vec<String>);

impl Promises {
    /// Add one or more space-separated promises.
    pub fn push(&mut self, promise: &str) -> Result<(), Error> {
        let before = self.0.len();
        self.0
            .extend(promise.split_whitespace().map(ToString::to_string));
        if self.0.len() == before {
            return Err(Error::EmptyPromise);
        }
        Ok(())
    }

    /// Join the promises into the pledge(2) promise string.
    pub fn to_promise_string(&self) -> String {
        self.0.join(" ")
    }
}

impl FromStr for Promises {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut promises = Self::default();
        promises.push(s)?;
        Ok(promises)
    }
}

/// An unveil(2) rule of permissions and a path, `<permissions>:<path>`.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display(fmt = "{}:{}", "permissions", "path.display()")]
pub struct Unveil {
    /// Permission characters, `r`, `w`, `x`, `c`.
    pub permissions: String,
    /// The unveiled path.
    pub path: PathBuf,
}

impl Unveil {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(permissions: S, path: P) -> Self {
        Self {
            permissions: permissions.into(),
            path: path.into(),
        }
    }
}

impl FromStr for Unveil {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (permissions, path) = s.split_once(':').ok_or_else(|| {
            Error::InvalidUnveil(
                s.to_string(),
                "separate permissions and path with a ':'",
            )
        })?;

        if permissions.trim().is_empty() {
            return Err(Error::InvalidUnveil(
                s.to_string(),
                "please provide a permissions string",
            ));
        }
        if path.trim().is_empty() {
            return Err(Error::InvalidUnveil(
                s.to_string(),
                "please provide a path",
            ));
        }

        Ok(Self::new(permissions, path))
    }
}

/// Writes discovered dependencies as `oki` unveil arguments.
///
/// Every line reads `<prefix>-u 'r:<path>' \` so the output can be
/// pasted into a shell script that invokes `oki`.
#[derive(Debug, Default)]
pub struct Emitter {
    prefix: String,
}

impl Emitter {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Format the rule line for one library path.
    pub fn line(&self, path: &Path) -> String {
        let rule = Unveil::new("r", path).to_string();
        format!(
            "{}{} {} \\\n",
            self.prefix,
            UNVEIL_FLAG,
            shell_quote(&rule)
        )
    }

    /// Write all rule lines at once.
    pub fn write<W: Write>(&self, out: &mut W, paths: &[PathBuf]) -> io::Result<()> {
        let buf = paths
            .iter()
            .map(|path| self.line(path))
            .collect::<String>();
        out.write_all(buf.as_bytes())?;
        out.flush()
    }
}

/// Quote a string for POSIX shells.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unveil_from_str() {
        let rule = "r:/tmp".parse::<Unveil>().unwrap();
        assert_eq!(rule.permissions, "r");
        assert_eq!(rule.path, Path::new("/tmp"));

        let rule = "rwc:/foo".parse::<Unveil>().unwrap();
        assert_eq!(rule, Unveil::new("rwc", "/foo"));
        assert_eq!(rule.to_string(), "rwc:/foo");

        // Only the first colon separates.
        let rule = "r:/a:b".parse::<Unveil>().unwrap();
        assert_eq!(rule.path, Path::new("/a:b"));
    }

    #[test]
    fn test_unveil_invalid() {
        for text in &["/tmp", "", ":/tmp", " :/tmp", "r:", "r: "] {
            let err = text.parse::<Unveil>().unwrap_err();
            assert!(matches!(err, Error::InvalidUnveil(..)), "{}", text);
            assert!(err.is_config());
        }
    }

    #[test]
    fn test_promises() {
        let mut promises = Promises::default();
        assert!(promises.is_empty());
        promises.push("stdio").unwrap();
        promises.push("rpath inet").unwrap();
        assert_eq!(promises.len(), 3);
        assert_eq!(promises.to_promise_string(), "stdio rpath inet");

        assert!(matches!(promises.push("  "), Err(Error::EmptyPromise)));
        assert_eq!(promises.len(), 3);

        let promises = "stdio  rpath".parse::<Promises>().unwrap();
        assert_eq!(promises, Promises::from(vec!["stdio".to_string(), "rpath".to_string()]));
    }

    #[test]
    fn test_emitter_line() {
        let emitter = Emitter::new("    ");
        assert_eq!(
            emitter.line(Path::new("/usr/lib/libc.so.96.1")),
            "    -u 'r:/usr/lib/libc.so.96.1' \\\n"
        );

        let emitter = Emitter::default();
        assert_eq!(
            emitter.line(Path::new("/opt/it's/libx.so")),
            "-u 'r:/opt/it'\\''s/libx.so' \\\n"
        );
    }

    #[test]
    fn test_emitter_write() {
        let emitter = Emitter::new("oki ");
        let mut out = Vec::new();
        emitter
            .write(
                &mut out,
                &[PathBuf::from("/usr/lib/liba.so"), PathBuf::from("/usr/lib/libb.so")],
            )
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "oki -u 'r:/usr/lib/liba.so' \\\noki -u 'r:/usr/lib/libb.so' \\\n"
        );
    }
}
