//! Execute programs with pledge(2) promises and unveil(2) rules.
//!
//! `oki` restricts its own process with OpenBSD's unveil(2) and
//! pledge(2) and then executes the target program in place, so that
//! the program starts with a fixed set of promises and only sees the
//! unveiled parts of the filesystem.
//!
//! The restrictions are applied in a fixed order: the program itself
//! is unveiled with `rx`, followed by the configured rules in their
//! order, then unveil is locked and the promises are set as the exec
//! promises of the new image.
//!
//! Writing unveil rules for dynamically linked programs is tedious, so
//! `oki` can generate them: the [`resolve`] module walks the `DT_NEEDED`
//! entries of an ELF binary and its libraries, and the
//! [`rules::Emitter`] prints them as `oki` arguments.
//!
//! # Examples
//!
//! ```ignore
//! use oki::{process, sandbox::Sandbox, sys::OpenBsd, Config};
//!
//! let config = Config {
//!     program: process::find_program("rizin")?,
//!     promises: "stdio rpath inet".parse()?,
//!     unveils: vec!["r:/tmp".parse()?, "rc:/foo".parse()?],
//!     ..Default::default()
//! };
//!
//! process::launch(&mut Sandbox::new(OpenBsd), &config)?;
//! ```

pub mod elf;
mod error;
pub mod process;
pub mod resolve;
pub mod rules;
pub mod sandbox;
pub mod sys;

pub use {error::Error, process::Config};
