use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use log::debug;
use serde::Deserialize;
use thiserror::Error;

pub mod name;
pub mod stream;
pub mod tag;

use name::ImageRef;
use stream::ProcessStream;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot reach the container engine through `{command}`: {reason}")]
    Unreachable { command: String, reason: String },

    #[error("unexpected version information from the container engine: {0}")]
    ServerVersion(#[from] serde_json::Error),

    #[error("docker login failed with exit code {status}: {stderr}")]
    Login { status: ExitStatus, stderr: String },

    #[error("{0} of the container engine could not be captured")]
    Capture(&'static str),

    #[error(transparent)]
    IOError(#[from] std::io::Error),
}

/// A line of output from a build or push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLine {
    /// Progress or status information.
    Output(String),
    /// The engine reported an error; nothing after it should be trusted.
    Error(String),
}

/// Lazily produced output of an engine operation.
pub type LogStream = Box<dyn Iterator<Item = LogLine>>;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "ApiVersion", alias = "APIVersion")]
    pub api_version: Option<String>,
}

/// Registry credentials. Only exists when both username and password are known.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Registry host, Docker Hub when unset.
    pub registry: Option<String>,
}

impl Credentials {
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        registry: Option<String>,
    ) -> Option<Self> {
        let username = username.filter(|u| !u.is_empty())?;
        let password = password.filter(|p| !p.is_empty())?;
        Some(Self {
            username,
            password,
            registry: registry.filter(|r| !r.is_empty()),
        })
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("registry", &self.registry)
            .finish()
    }
}

pub struct BuildRequest<'a> {
    /// Root of the build context.
    pub context: &'a Path,
    /// Relative to `context`.
    pub dockerfile: &'a Path,
    pub image: &'a ImageRef,
    pub build_args: &'a BTreeMap<String, String>,
}

/// A container engine capable of building and pushing images.
pub trait Engine {
    /// Check that the engine daemon is reachable.
    fn ping(&self) -> Result<ServerVersion, Error>;

    fn login(&self, credentials: &Credentials) -> Result<(), Error>;

    fn build(&self, request: &BuildRequest<'_>) -> Result<LogStream, Error>;

    fn push(&self, image: &ImageRef) -> Result<LogStream, Error>;
}

/// [Engine] driving a docker-compatible command line client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Docker {
    program: String,
    args: Vec<String>,
}

impl Docker {
    /// `command_line` is the client program, optionally followed by
    /// arguments prepended to every invocation, e.g. `sudo docker`.
    pub fn new(command_line: &str) -> Self {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_else(|| "docker".to_string());
        Self {
            program,
            args: words.collect(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).stdin(Stdio::null());
        command
    }

    fn label(&self, operation: &str) -> String {
        let mut words = vec![self.program.as_str()];
        words.extend(self.args.iter().map(String::as_str));
        words.push(operation);
        words.join(" ")
    }

    fn unreachable(&self, reason: impl Into<String>) -> Error {
        Error::Unreachable {
            command: self.label("version"),
            reason: reason.into(),
        }
    }
}

impl Default for Docker {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl Engine for Docker {
    fn ping(&self) -> Result<ServerVersion, Error> {
        let output = self
            .command()
            .arg("version")
            .arg("--format")
            .arg("{{json .Server}}")
            .output()
            .map_err(|err| self.unreachable(err.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.unreachable(stderr.trim()));
        }

        let server: Option<ServerVersion> = serde_json::from_slice(&output.stdout)?;
        server.ok_or_else(|| self.unreachable("no server information reported"))
    }

    fn login(&self, credentials: &Credentials) -> Result<(), Error> {
        debug!(
            "Logging in to Docker registry {}",
            credentials.registry.as_deref().unwrap_or("(default)")
        );
        let mut command = self.command();
        command
            .arg("login")
            .arg("--username")
            .arg(&credentials.username)
            .arg("--password-stdin");
        if let Some(registry) = &credentials.registry {
            command.arg(registry);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Closing stdin signals the end of the password.
        {
            let mut stdin = child.stdin.take().ok_or(Error::Capture("stdin"))?;
            stdin.write_all(credentials.password.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        debug!("{}", String::from_utf8_lossy(&output.stdout).trim());
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Login {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn build(&self, request: &BuildRequest<'_>) -> Result<LogStream, Error> {
        let dockerfile = request.context.join(request.dockerfile);
        debug!("Building {} from {}", request.image, dockerfile.display());

        let (reader, writer) = std::io::pipe()?;
        // The command holds the write end of the pipe; it has to be dropped
        // after spawning, or the reader never sees end of file.
        let child = {
            let mut command = self.command();
            command
                .arg("build")
                .arg("--file")
                .arg(&dockerfile)
                .arg("--tag")
                .arg(request.image.to_string());
            for (key, value) in request.build_args {
                command.arg("--build-arg").arg(format!("{key}={value}"));
            }
            command
                .arg(request.context)
                .stdout(writer.try_clone()?)
                .stderr(writer);
            command.spawn()?
        };

        Ok(Box::new(ProcessStream::merged(self.label("build"), child, reader)))
    }

    fn push(&self, image: &ImageRef) -> Result<LogStream, Error> {
        debug!("Pushing image {}", image);
        let mut child = self
            .command()
            .arg("push")
            .arg(image.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().ok_or(Error::Capture("stdout"))?;
        let stderr = child.stderr.take().ok_or(Error::Capture("stderr"))?;
        Ok(Box::new(ProcessStream::split(self.label("push"), child, stdout, stderr)))
    }
}
