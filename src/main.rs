/// buildpub
use std::path::{Path, PathBuf};
use clap::{ArgAction, Parser};
use log::{debug, error};
use thiserror::Error;
use crate::config::runtime::Overrides;
use crate::docker::Docker;
use crate::git::Git;
use crate::pipeline::Pipeline;

mod config;
mod context;
mod docker;
mod git;
mod logging;
mod pipeline;

/// Clone a git repository (or use the local checkout), build a Docker image and push it to a registry.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Git repository URL. Defaults to the git checkout containing the working directory.
    #[arg(long)]
    repo: Option<String>,

    /// Git branch to clone [default: main]. Ignored when building the local checkout.
    #[arg(long)]
    branch: Option<String>,

    /// Target image name, e.g. username/repo. Inferred from the repository URL if possible.
    #[arg(long)]
    image: Option<String>,

    /// Image tag [default: latest].
    #[arg(long)]
    tag: Option<String>,

    /// Path to the Dockerfile, relative to the repository root [default: Dockerfile].
    #[arg(long)]
    dockerfile: Option<PathBuf>,

    /// Build-time variable, may be repeated.
    #[arg(long = "build-arg", value_name = "KEY=VALUE")]
    build_args: Vec<String>,

    /// Registry username.
    #[arg(long, env = "DOCKER_USERNAME")]
    username: Option<String>,

    /// Registry password or access token.
    #[arg(long, env = "DOCKER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Registry host to log in to. Defaults to Docker Hub.
    #[arg(long)]
    registry: Option<String>,

    /// Bump the patch version of the latest git tag and use it as image tag.
    #[arg(long)]
    auto_version: bool,

    /// Print progress (-v) or debug output (-vv). Only errors are shown by default.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Path to the buildpub configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            repo: self.repo.clone(),
            branch: self.branch.clone(),
            image: self.image.clone(),
            tag: self.tag.clone(),
            dockerfile: self.dockerfile.clone(),
            build_args: self.build_args.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            registry: self.registry.clone(),
            auto_version: self.auto_version,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("filesystem error: {0}")]
    FilesystemError(#[from] std::io::Error),

    #[error("configuration file: {0}")]
    ConfigParse(#[from] config::file::Error),

    #[error("configuration: {0}")]
    Config(#[from] config::runtime::Error),

    #[error("{0}")]
    Pipeline(#[from] pipeline::Error),
}

/// Read the configuration file given on the command line, or `buildpub.toml`
/// from the working directory if it exists. Without either, the built-in
/// defaults are used.
fn read_config(args: &Cli, cwd: &Path) -> Result<config::file::File, Error> {
    let config_file = match &args.config {
        Some(path) => Some(path.clone()),
        None => {
            let path = cwd.join(config::file::DEFAULT_CONFIG_FILE);
            path.is_file().then_some(path)
        }
    };

    Ok(match config_file {
        Some(path) => {
            debug!("Reading configuration from {}", path.display());
            let file = config::file::File::from_path(&path)?;
            if let Some(description) = &file.description {
                debug!("Configuration: {description}");
            }
            file
        }
        None => config::file::File::default(),
    })
}

fn main() {
    let args = Cli::parse();
    let diagnostics = logging::Config::from_verbosity(args.verbose);
    logging::init(&diagnostics);

    match run(args, diagnostics) {
        Ok(_) => std::process::exit(0),
        Err(err) => {
            error!("fatal: {}", err.to_string());
            std::process::exit(1)
        }
    }
}

fn run(args: Cli, diagnostics: logging::Config) -> Result<(), Error> {
    let cwd = std::env::current_dir()?;
    let cfg_file = read_config(&args, &cwd)?;

    let cfg = config::runtime::resolve(args.overrides(), &cfg_file, &Git, &cwd)?;

    let engine = Docker::new(&cfg_file.container_cli);
    Pipeline::new(&cfg, &Git, &engine, diagnostics).run()?;
    Ok(())
}
