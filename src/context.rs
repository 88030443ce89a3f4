use std::path::{Path, PathBuf};
use log::{error, info};
use tempfile::TempDir;
use thiserror::Error;
use crate::git::{self, Vcs};
use crate::pipeline::Source;

#[derive(Error, Debug)]
pub enum Error {
    #[error("create temporary directory: {0}")]
    TempDir(#[from] std::io::Error),

    #[error("failed to clone repository: {0}")]
    Clone(#[from] git::Error),
}

/// Directory tree handed to the image build.
///
/// A context created by [prepare] for a remote source lives in a temporary
/// directory that is removed when the context is dropped. A local context
/// is never touched.
#[derive(Debug)]
pub struct BuildContext {
    path: PathBuf,
    scratch: Option<TempDir>,
}

impl BuildContext {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scratch: None,
        }
    }

    /// Create an empty temporary context under `root`, or the system temp dir.
    pub fn scratch(root: Option<&Path>) -> Result<Self, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("buildpub-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(Self {
            path: dir.path().to_path_buf(),
            scratch: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory belongs to this run and is deleted on drop.
    pub fn is_temporary(&self) -> bool {
        self.scratch.is_some()
    }
}

impl Drop for BuildContext {
    fn drop(&mut self) {
        if let Some(dir) = self.scratch.take() {
            info!("Cleaning up temporary directory: {}", self.path.display());
            if let Err(err) = dir.close() {
                error!("Failed to remove {}: {err}", self.path.display());
            }
        }
    }
}

/// Resolve the build context for `source`, cloning remote repositories.
pub fn prepare(source: &Source, vcs: &dyn Vcs, scratch_root: Option<&Path>) -> Result<BuildContext, Error> {
    match source {
        Source::Local(path) => {
            info!("Using local path as build context: {}", path.display());
            Ok(BuildContext::local(path))
        }
        Source::Remote { url, branch } => {
            let context = BuildContext::scratch(scratch_root)?;
            info!("Cloning repository: {url} (branch: {branch})");
            // On failure the context is dropped here, which removes the directory.
            vcs.clone_branch(url, branch, context.path())?;
            Ok(context)
        }
    }
}
