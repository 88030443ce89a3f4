//! Version control access, implemented on top of libgit2.

use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use git2::build::RepoBuilder;
use git2::{ErrorCode, Repository};
use log::{debug, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("clone {url} (branch {branch}): {source}")]
    Clone {
        url: String,
        branch: String,
        source: git2::Error,
    },

    #[error("open repository at {path}: {source}")]
    Open {
        path: PathBuf,
        source: git2::Error,
    },

    #[error("commit time of tag {0} is out of range")]
    Timestamp(String),

    #[error(transparent)]
    Git2(#[from] git2::Error),
}

/// A tag together with the commit time of the commit it points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub committed: DateTime<Utc>,
}

impl Tag {
    pub fn new(name: impl Into<String>, committed: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            committed,
        }
    }
}

/// Operations the release pipeline needs from a version control system.
pub trait Vcs {
    /// Clone `branch` of `url` into `dest`, which must be empty or absent.
    fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), Error>;

    /// Find the working tree of the checkout containing `path`, if any.
    fn discover(&self, path: &Path) -> Result<Option<PathBuf>, Error>;

    /// Tags of the checkout, oldest commit first.
    fn list_tags(&self, checkout: &Path) -> Result<Vec<Tag>, Error>;

    /// URL of the `origin` remote.
    fn remote_url(&self, checkout: &Path) -> Result<Option<String>, Error>;
}

/// [Vcs] backed by git2.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git;

impl Git {
    fn open(path: &Path) -> Result<Repository, Error> {
        Repository::open(path).map_err(|source| Error::Open {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Vcs for Git {
    fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), Error> {
        debug!("Cloning {url} (branch {branch}) into {}", dest.display());
        RepoBuilder::new()
            .branch(branch)
            .clone(url, dest)
            .map(|_| ())
            .map_err(|source| Error::Clone {
                url: url.to_string(),
                branch: branch.to_string(),
                source,
            })
    }

    fn discover(&self, path: &Path) -> Result<Option<PathBuf>, Error> {
        let repo = match Repository::discover(path) {
            Ok(repo) => repo,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(source) => {
                return Err(Error::Open {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        // Bare repositories have nothing to build from.
        Ok(repo.workdir().map(Path::to_path_buf))
    }

    fn list_tags(&self, checkout: &Path) -> Result<Vec<Tag>, Error> {
        let repo = Self::open(checkout)?;
        let names = repo.tag_names(None)?;

        let mut tags = Vec::with_capacity(names.len());
        for name in names.iter().flatten() {
            let object = repo.revparse_single(&format!("refs/tags/{name}"))?;
            let commit = match object.peel_to_commit() {
                Ok(commit) => commit,
                Err(err) => {
                    warn!("Ignoring tag {name}, it does not point to a commit: {err}");
                    continue;
                }
            };
            let committed = DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0)
                .ok_or_else(|| Error::Timestamp(name.to_string()))?;
            tags.push(Tag::new(name, committed));
        }

        tags.sort_by_key(|tag| tag.committed);
        Ok(tags)
    }

    fn remote_url(&self, checkout: &Path) -> Result<Option<String>, Error> {
        let repo = Self::open(checkout)?;
        let url = match repo.find_remote("origin") {
            Ok(remote) => remote.url().map(str::to_string),
            Err(err) if err.code() == ErrorCode::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        Ok(url)
    }
}
