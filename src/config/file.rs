use serde::Deserialize;
use serde_inline_default::serde_inline_default;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG: &str = include_str!("../../default.toml");

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "buildpub.toml";

#[derive(Error, Debug)]
pub enum Error {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// A buildpub.toml file.
///
/// Every key is optional; command line flags take precedence over
/// whatever is set here.
#[serde_inline_default]
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct File {
    pub description: Option<String>,
    /// Remote repository to clone instead of using the local checkout.
    pub repo: Option<String>,
    #[serde_inline_default("main".to_string())]
    pub branch: String,
    pub image: Option<String>,
    #[serde_inline_default("latest".to_string())]
    pub tag: String,
    #[serde_inline_default(PathBuf::from("Dockerfile"))]
    pub dockerfile: PathBuf,
    pub registry: Option<String>,
    #[serde_inline_default(false)]
    pub auto_version: bool,
    #[serde_inline_default("docker".to_string())]
    pub container_cli: String,
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

impl Default for File {
    fn default() -> Self {
        // The default config is compiled into the program, so
        // make sure to test default() to catch panics compile-time.
        toml::from_str(DEFAULT_CONFIG).unwrap()
    }
}

impl File {
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
