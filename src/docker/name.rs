use std::fmt::{Display, Formatter};

/// Docker image name and tag combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

impl Display for ImageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Derive an `owner/repo` image name from a git repository URL.
///
/// scp-like `git@host:owner/repo` keeps everything after the first colon.
/// Anything else is split on `/` and the last two segments are joined, so
/// `scheme://host/owner/repo` gives `owner/repo`. A `.git` suffix is
/// dropped first. Returns `None` when fewer than two segments exist.
pub fn infer(repo_url: &str) -> Option<String> {
    let url = repo_url.strip_suffix(".git").unwrap_or(repo_url);

    if !url.contains("://") {
        if let Some((_host, path)) = url.split_once(':') {
            return Some(path.to_string()).filter(|name| !name.is_empty());
        }
    }

    let mut segments = url.rsplitn(3, '/');
    match (segments.next(), segments.next()) {
        (Some(repo), Some(owner)) => Some(format!("{owner}/{repo}")),
        _ => None,
    }
}
