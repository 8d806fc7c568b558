use clap::Parser;
use oki::{
    process::{self, Environment, MINIMAL_ENVIRONMENT},
    resolve::{MissingLibrary, Resolver},
    rules::{Emitter, Promises, Unveil, OUTPUT_PREFIX_ENV},
    sandbox::{cstring, Primitives, Sandbox},
    sys::OpenBsd,
    Config, Error,
};
use oki_log::debug;
use std::{ffi::OsString, io};

/// Promises of `oki` itself while it generates unveil rules.
const GENERATE_PROMISES: &str = "stdio rpath";

/// Execute a program with pledge(2) promises and unveil(2) rules.
#[derive(Parser, Debug)]
#[command(name = "oki", version)]
struct Args {
    /// The pledge(2) promise string (can be specified multiple times)
    #[arg(short = 'p', value_name = "PROMISE")]
    promises: Vec<String>,

    /// The unveil(2) colon separated permissions:path (can be specified multiple times)
    #[arg(short = 'u', value_name = "PERMISSIONS:PATH")]
    unveils: Vec<Unveil>,

    /// Allow no pledge(2) promises to be specified
    #[arg(short = 'k')]
    allow_no_promises: bool,

    /// Skip the unveil(2) of the program path
    #[arg(short = 'x')]
    skip_program_unveil: bool,

    /// Generate the unveil(2) rules for the program's ELF dependencies and exit
    #[arg(short = 'R')]
    generate_rules: bool,

    /// Only warn about libraries that cannot be found when generating rules
    #[arg(short = 'L', requires = "generate_rules")]
    lenient: bool,

    /// Prefix of every generated rule line
    #[arg(long, env = OUTPUT_PREFIX_ENV, default_value = "", hide = true)]
    output_prefix: String,

    /// Pass only this environment variable to the program (can be specified multiple times)
    #[arg(short = 'e', value_name = "NAME")]
    env: Vec<String>,

    /// Pass a minimal environment to the program
    #[arg(short = 'm')]
    minimal_env: bool,

    /// Enable debug logging
    #[arg(short = 'd')]
    debug: bool,

    /// Log to syslog instead of stderr
    #[arg(short = 's')]
    syslog: bool,

    /// The program to execute and its arguments
    #[arg(
        value_name = "PROGRAM",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<OsString>,
}

impl Args {
    fn log_config(&self) -> oki_log::Config {
        oki_log::Config {
            foreground: !self.syslog,
            filter: if self.debug { "debug" } else { "info" }.into(),
        }
    }

    fn config(&self) -> Result<Config, Error> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| Error::ProgramNotFound(String::new()))?;

        let mut promises = Promises::default();
        for promise in &self.promises {
            promises.push(promise)?;
        }

        let environment = if self.minimal_env || !self.env.is_empty() {
            let names = MINIMAL_ENVIRONMENT
                .iter()
                .filter(|_| self.minimal_env)
                .map(ToString::to_string)
                .chain(self.env.iter().cloned())
                .collect();
            Environment::Allow(names)
        } else {
            Environment::Inherit
        };

        Ok(Config {
            program: process::find_program(program)?,
            args: args.to_vec(),
            promises,
            unveils: self.unveils.clone(),
            allow_no_promises: self.allow_no_promises,
            skip_program_unveil: self.skip_program_unveil,
            generate_rules: self.generate_rules,
            missing_library: if self.lenient {
                MissingLibrary::Lenient
            } else {
                MissingLibrary::Strict
            },
            environment,
        })
    }
}

/// Restrict `oki` itself before it parses untrusted binaries.
fn restrict_self() -> Result<(), Error> {
    let promises = cstring(GENERATE_PROMISES)?;
    match OpenBsd.pledge(Some(promises.as_c_str()), None) {
        Err(Error::Unsupported(call)) => {
            debug!("{} is not available, generating rules unrestricted", call);
            Ok(())
        }
        result => result,
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let config = args.config()?;
    debug!("launch request";
           "program" => ?config.program,
           "promises" => config.promises.to_promise_string(),
           "unveils" => config.unveils.len());

    if config.generate_rules {
        restrict_self()?;

        let resolver = Resolver::new(config.missing_library);
        let emitter = Emitter::new(args.output_prefix.as_str());
        let stdout = io::stdout();
        return process::generate(&config, &resolver, &emitter, &mut stdout.lock());
    }

    process::launch(&mut Sandbox::new(OpenBsd), &config)
}

fn main() {
    let args = Args::parse();

    let _guard = match oki_log::logger("oki", args.log_config()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("oki: fatal: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&args) {
        eprintln!("oki: fatal: {}", err);
        std::process::exit(1);
    }
}
