use log::{Level, LevelFilter};

/// Diagnostic settings for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub level: LevelFilter,
}

impl Config {
    /// Errors only by default, `-v` adds progress, `-vv` adds debug output.
    pub fn from_verbosity(occurrences: u8) -> Self {
        let level = match occurrences {
            0 => LevelFilter::Error,
            1 => LevelFilter::Info,
            _ => LevelFilter::Debug,
        };
        Self { level }
    }

    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_verbosity(0)
    }
}

/// Install the logger. `RUST_LOG` takes precedence over `config` when set.
pub fn init(config: &Config) {
    env_logger::Builder::new()
        .filter_level(config.level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_target(false)
        .init();
}
