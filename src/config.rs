/// The `buildpub.toml` configuration file.
pub mod file;

/// Resolution of command line, configuration file and repository state
/// into the configuration of a single run.
pub mod runtime;
