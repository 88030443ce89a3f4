use std::collections::BTreeMap;
use std::path::PathBuf;
use log::{debug, error, info, Level};
use thiserror::Error;
use crate::context::{self, BuildContext};
use crate::docker::name::ImageRef;
use crate::docker::{self, BuildRequest, Credentials, Engine, LogLine};
use crate::git::Vcs;
use crate::logging;

/// Where the source tree comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Cloned into a temporary directory for the duration of the run.
    Remote { url: String, branch: String },
    /// An existing checkout, used in place.
    Local(PathBuf),
}

/// Everything one release run needs. Resolved up front and never changed afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: Source,
    pub image: ImageRef,
    /// Relative to the root of the build context.
    pub dockerfile: PathBuf,
    pub build_args: BTreeMap<String, String>,
    pub credentials: Option<Credentials>,
    pub auto_version: bool,
    /// Parent directory for temporary build contexts.
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to connect to the container engine, please ensure Docker is running: {0}")]
    Connect(#[source] docker::Error),

    #[error("login failed: {0}")]
    Login(#[source] docker::Error),

    #[error(transparent)]
    Context(#[from] context::Error),

    #[error("Dockerfile not found at {0}")]
    DockerfileNotFound(PathBuf),

    #[error("docker build could not be started: {0}")]
    StartBuild(#[source] docker::Error),

    #[error("build failed: {0}")]
    Build(String),

    #[error("docker push could not be started: {0}")]
    StartPush(#[source] docker::Error),

    #[error("push failed: {0}")]
    Push(String),
}

/// Steps of a run. The build context is owned by the steps that need it,
/// so leaving the state machine early, for whatever reason, drops it.
enum State {
    Connect,
    Authenticate,
    PrepareContext,
    Build(BuildContext),
    Push(BuildContext),
    Done,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Connect => "connect",
            State::Authenticate => "authenticate",
            State::PrepareContext => "prepare context",
            State::Build(_) => "build",
            State::Push(_) => "push",
            State::Done => "done",
        }
    }
}

/// Clone (or reuse a checkout), build and push a container image.
pub struct Pipeline<'a> {
    config: &'a Config,
    vcs: &'a dyn Vcs,
    engine: &'a dyn Engine,
    diagnostics: logging::Config,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        vcs: &'a dyn Vcs,
        engine: &'a dyn Engine,
        diagnostics: logging::Config,
    ) -> Self {
        Self {
            config,
            vcs,
            engine,
            diagnostics,
        }
    }

    /// Run every step in order, stopping at the first failure.
    pub fn run(&self) -> Result<(), Error> {
        debug!(
            "Releasing {} (auto-versioned: {})",
            self.config.image, self.config.auto_version
        );
        let mut state = State::Connect;
        loop {
            debug!("Pipeline step: {}", state.name());
            state = match state {
                State::Connect => {
                    self.connect()?;
                    State::Authenticate
                }
                State::Authenticate => {
                    self.authenticate()?;
                    State::PrepareContext
                }
                State::PrepareContext => {
                    let context = context::prepare(
                        &self.config.source,
                        self.vcs,
                        self.config.scratch_dir.as_deref(),
                    )?;
                    debug!(
                        "Build context {} (temporary: {})",
                        context.path().display(),
                        context.is_temporary()
                    );
                    State::Build(context)
                }
                State::Build(context) => {
                    self.build(&context)?;
                    State::Push(context)
                }
                State::Push(_context) => {
                    self.push()?;
                    State::Done
                }
                State::Done => return Ok(()),
            };
        }
    }

    fn connect(&self) -> Result<(), Error> {
        let server = self.engine.ping().map_err(Error::Connect)?;
        debug!(
            "Container engine version {} (API {})",
            server.version,
            server.api_version.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    fn authenticate(&self) -> Result<(), Error> {
        let Some(credentials) = &self.config.credentials else {
            info!("Skipping login (credentials not provided).");
            return Ok(());
        };
        info!("Logging in as {}...", credentials.username);
        self.engine.login(credentials).map_err(Error::Login)?;
        info!("Login successful.");
        Ok(())
    }

    fn build(&self, context: &BuildContext) -> Result<(), Error> {
        let image = &self.config.image;
        info!("Building image: {image} using {}", self.config.dockerfile.display());

        let dockerfile = context.path().join(&self.config.dockerfile);
        if !dockerfile.is_file() {
            return Err(Error::DockerfileNotFound(dockerfile));
        }

        let request = BuildRequest {
            context: context.path(),
            dockerfile: &self.config.dockerfile,
            image,
            build_args: &self.config.build_args,
        };

        let mut transcript = Vec::new();
        for line in self.engine.build(&request).map_err(Error::StartBuild)? {
            match line {
                LogLine::Output(line) => {
                    debug!("{}", line.trim_end());
                    transcript.push(line);
                }
                LogLine::Error(reason) => {
                    error!("Build failed!");
                    // Lines already shown at debug level are not repeated.
                    if !self.diagnostics.enabled(Level::Debug) {
                        for line in &transcript {
                            error!("{}", line.trim_end());
                        }
                    }
                    return Err(Error::Build(reason));
                }
            }
        }

        info!("Build successful.");
        Ok(())
    }

    fn push(&self) -> Result<(), Error> {
        let image = &self.config.image;
        info!("Pushing image: {image}");

        for line in self.engine.push(image).map_err(Error::StartPush)? {
            match line {
                LogLine::Output(status) => info!("{}", status.trim_end()),
                LogLine::Error(reason) => {
                    error!("Push error: {reason}");
                    return Err(Error::Push(reason));
                }
            }
        }

        info!("Successfully pushed {image}");
        Ok(())
    }
}
