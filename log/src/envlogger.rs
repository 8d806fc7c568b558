use derive_more::From;
use slog::{Drain, Level, OwnedKVList, Record};
use std::{env, str::FromStr};

/// Environment variable that overrides the configured filter.
pub const FILTER_ENV: &str = "RUST_LOG";

#[derive(From, Debug, PartialEq)]
struct Filter {
    module: Option<String>,
    level: Level,
}

impl Filter {
    #[inline]
    fn match_module(&self, module: &str) -> Option<&Self> {
        self.module.as_ref().map_or(Some(self), |prefix| {
            module.starts_with(prefix.as_str()).then(|| self)
        })
    }

    #[inline]
    fn match_level(&self, level: Level) -> bool {
        level <= self.level
    }
}

/// Parsed list of filter directives.
#[derive(Debug, Default)]
pub struct Directives(Vec<Filter>);

impl Directives {
    #[inline]
    pub fn is_enabled(&self, module: &str, level: Level) -> bool {
        // Find the last-match filter and check the allowed level
        self.0
            .iter()
            .filter_map(|filter| filter.match_module(module))
            .last()
            .map(|filter| filter.match_level(level))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Parse filter to be a list of valid prefix strings.
///
/// `module=level` or `level` where the module is a valid module
/// prefix and the level a supported level name (`critical`, `error`,
/// `warn`, `info`, `debug`, `trace`).
///
/// This method does not fail as it will ignore invalid directives.
impl From<&str> for Directives {
    fn from(filter: &str) -> Self {
        let filters = filter
            .split(',')
            .map(str::trim)
            .filter_map(|directive| match directive.split_once('=') {
                None => Level::from_str(directive).ok().map(|level| (None, level)),
                Some((module, level)) => {
                    let valid = !module.is_empty()
                        && module
                            .chars()
                            .all(|c| matches!(c, '0'..='9' | 'a'..='z' | 'A'..='Z' | ':' | '_'));
                    if !valid {
                        return None;
                    }
                    Level::from_str(level)
                        .ok()
                        .map(|level| (Some(module.to_string()), level))
                }
            })
            .map(Into::into)
            .collect();

        Self(filters)
    }
}

/// Drain that drops records not enabled by the directives.
pub struct Logger<T: Drain> {
    drain: T,
    directives: Directives,
}

impl<T: Drain> Logger<T> {
    /// Use `RUST_LOG` if it is set, the `filter` otherwise.
    pub fn with_default_filter(drain: T, filter: &str) -> Self {
        let directives = env::var(FILTER_ENV)
            .ok()
            .map(|filter| Directives::from(filter.as_str()))
            .filter(|directives| !directives.is_empty())
            .unwrap_or_else(|| filter.into());

        Self { drain, directives }
    }
}

impl<T: Drain> Drain for Logger<T>
where
    T: Drain<Ok = ()>,
{
    type Err = T::Err;
    type Ok = ();

    fn log(&self, info: &Record<'_>, val: &OwnedKVList) -> Result<(), T::Err> {
        if !self.directives.is_enabled(info.module(), info.level()) {
            return Ok(());
        }

        self.drain.log(info, val)
    }
}
