use crate::git::Tag;
use thiserror::Error;

/// Tag used when the repository has no tags yet.
pub const INITIAL_VERSION: &str = "v0.0.1";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("tag {0} is not standard semantic versioning (x.y.z)")]
    NotSemver(String),

    #[error("could not parse patch component {patch:?} of tag {tag}")]
    InvalidPatch { tag: String, patch: String },

    #[error("patch component of tag {0} cannot be incremented")]
    PatchOverflow(String),
}

/// Pick the tag pointing at the most recent commit.
///
/// When several tags share a commit time, the last of them in `tags` wins.
pub fn latest(tags: &[Tag]) -> Option<&Tag> {
    tags.iter().max_by_key(|tag| tag.committed)
}

/// Compute the tag that follows the latest existing tag.
pub fn next_version(tags: &[Tag]) -> Result<String, Error> {
    match latest(tags) {
        None => Ok(INITIAL_VERSION.to_string()),
        Some(tag) => bump_patch(&tag.name),
    }
}

/// Increment the last component of a `[v]major.minor.patch` tag.
pub fn bump_patch(tag: &str) -> Result<String, Error> {
    let version = tag.trim_start_matches('v');
    let mut parts: Vec<String> = version.split('.').map(str::to_string).collect();
    if parts.len() < 3 {
        return Err(Error::NotSemver(tag.to_string()));
    }

    let last = parts.len() - 1;
    let patch: u64 = parts[last].parse().map_err(|_| Error::InvalidPatch {
        tag: tag.to_string(),
        patch: parts[last].clone(),
    })?;
    let next = patch
        .checked_add(1)
        .ok_or_else(|| Error::PatchOverflow(tag.to_string()))?;
    parts[last] = next.to_string();

    let bumped = parts.join(".");
    Ok(if tag.starts_with('v') {
        format!("v{bumped}")
    } else {
        bumped
    })
}
