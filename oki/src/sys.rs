//! The OpenBSD system calls behind [`Primitives`].

use crate::{error::Error, sandbox::Primitives};
use nix::unistd;
use std::{
    convert::Infallible,
    ffi::{CStr, CString, OsStr},
    os::unix::ffi::OsStrExt,
    path::PathBuf,
};

/// The restriction primitives of the running kernel.
#[derive(Debug, Default)]
pub struct OpenBsd;

cfg_if::cfg_if! {
    if #[cfg(target_os = "openbsd")] {
        use nix::errno::Errno;
        use std::ptr;

        fn primitive_error(call: &'static str, argument: String) -> impl FnOnce(nix::Error) -> Error {
            move |source| Error::Primitive {
                call,
                argument,
                source,
            }
        }

        fn as_ptr(s: Option<&CStr>) -> *const libc::c_char {
            s.map_or(ptr::null(), CStr::as_ptr)
        }

        impl Primitives for OpenBsd {
            fn unveil(&mut self, path: &CStr, permissions: &CStr) -> Result<(), Error> {
                Errno::result(unsafe { libc::unveil(path.as_ptr(), permissions.as_ptr()) })
                    .map(drop)
                    .map_err(primitive_error(
                        "unveil",
                        format!("{}:{}", permissions.to_string_lossy(), path.to_string_lossy()),
                    ))
            }

            fn unveil_block(&mut self) -> Result<(), Error> {
                Errno::result(unsafe { libc::unveil(ptr::null(), ptr::null()) })
                    .map(drop)
                    .map_err(primitive_error("unveil", "block".to_string()))
            }

            fn pledge(
                &mut self,
                promises: Option<&CStr>,
                execpromises: Option<&CStr>,
            ) -> Result<(), Error> {
                let argument = format!("{:?} {:?}", promises, execpromises);
                Errno::result(unsafe { libc::pledge(as_ptr(promises), as_ptr(execpromises)) })
                    .map(drop)
                    .map_err(primitive_error("pledge", argument))
            }

            fn execve(&mut self, path: &CStr, args: &[CString], env: &[CString]) -> Result<(), Error> {
                exec(path, args, env)
            }
        }
    } else {
        impl Primitives for OpenBsd {
            fn unveil(&mut self, _path: &CStr, _permissions: &CStr) -> Result<(), Error> {
                Err(Error::Unsupported("unveil"))
            }

            fn unveil_block(&mut self) -> Result<(), Error> {
                Err(Error::Unsupported("unveil"))
            }

            fn pledge(
                &mut self,
                _promises: Option<&CStr>,
                _execpromises: Option<&CStr>,
            ) -> Result<(), Error> {
                Err(Error::Unsupported("pledge"))
            }

            fn execve(&mut self, path: &CStr, args: &[CString], env: &[CString]) -> Result<(), Error> {
                exec(path, args, env)
            }
        }
    }
}

fn exec(path: &CStr, args: &[CString], env: &[CString]) -> Result<(), Error> {
    let result: Result<Infallible, nix::Error> = unistd::execve(path, args, env);
    match result {
        Ok(never) => match never {},
        Err(source) => Err(Error::Exec {
            path: PathBuf::from(OsStr::from_bytes(path.to_bytes())),
            source,
        }),
    }
}
