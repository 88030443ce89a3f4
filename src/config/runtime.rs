use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use log::{info, warn};
use thiserror::Error;
use crate::config::file::File;
use crate::docker::name::{self, ImageRef};
use crate::docker::{tag, Credentials};
use crate::git::{self, Vcs};
use crate::pipeline::{Config, Source};

#[derive(Error, Debug)]
pub enum Error {
    #[error("no --repo argument provided and {0} is not inside a git repository")]
    NoSource(PathBuf),

    #[error("could not infer image name, please provide --image")]
    NoImageName,

    #[error("inspect local repository: {0}")]
    Git(#[from] git::Error),
}

/// Settings given on the command line. `None` falls back to the configuration file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub repo: Option<String>,
    pub branch: Option<String>,
    pub image: Option<String>,
    pub tag: Option<String>,
    pub dockerfile: Option<PathBuf>,
    pub build_args: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub registry: Option<String>,
    pub auto_version: bool,
}

/// Work out source, image name, tag and build arguments for a run started in `cwd`.
pub fn resolve(overrides: Overrides, file: &File, vcs: &dyn Vcs, cwd: &Path) -> Result<Config, Error> {
    let mut image_name = overrides.image.or_else(|| file.image.clone());

    let source = match overrides.repo.or_else(|| file.repo.clone()) {
        Some(url) => {
            if image_name.is_none() {
                image_name = name::infer(&url);
                if let Some(image_name) = &image_name {
                    info!("Inferred image name from --repo: {image_name}");
                }
            }
            Source::Remote {
                url,
                branch: overrides.branch.unwrap_or_else(|| file.branch.clone()),
            }
        }
        None => {
            let checkout = vcs
                .discover(cwd)?
                .ok_or_else(|| Error::NoSource(cwd.to_path_buf()))?;
            info!("Detected local git repository at {}", checkout.display());

            if let Some(remote_url) = vcs.remote_url(&checkout)? {
                info!("Found remote URL: {remote_url}");
                if image_name.is_none() {
                    image_name = name::infer(&remote_url);
                    if let Some(image_name) = &image_name {
                        info!("Inferred image name: {image_name}");
                    }
                }
            }
            Source::Local(checkout)
        }
    };

    let image_name = image_name.ok_or(Error::NoImageName)?;

    let auto_version = overrides.auto_version || file.auto_version;
    let mut image_tag = overrides.tag.unwrap_or_else(|| file.tag.clone());
    if auto_version {
        info!("Auto-versioning enabled.");
        image_tag = next_tag(&source, vcs, image_tag);
    }

    let mut build_args = file.build_args.clone();
    let (cli_build_args, malformed) = parse_build_args(&overrides.build_args);
    for entry in malformed {
        warn!("Skipping malformed build argument: {entry}");
    }
    build_args.extend(cli_build_args);

    Ok(Config {
        source,
        image: ImageRef::new(image_name, image_tag),
        dockerfile: overrides.dockerfile.unwrap_or_else(|| file.dockerfile.clone()),
        build_args,
        credentials: Credentials::from_parts(
            overrides.username,
            overrides.password,
            overrides.registry.or_else(|| file.registry.clone()),
        ),
        auto_version,
        scratch_dir: file.scratch_dir.clone(),
    })
}

/// Bump the latest tag of a local checkout. Anything unexpected leaves `current` in place.
fn next_tag(source: &Source, vcs: &dyn Vcs, current: String) -> String {
    let Source::Local(checkout) = source else {
        warn!("Auto-version is only supported for local git repositories, using tag {current}");
        return current;
    };

    let tags = match vcs.list_tags(checkout) {
        Ok(tags) => tags,
        Err(err) => {
            warn!("Failed to auto-version, using tag {current}: {err}");
            return current;
        }
    };

    match tag::latest(&tags) {
        Some(latest) => info!("Latest git tag: {}", latest.name),
        None => info!("No git tags found"),
    }
    match tag::next_version(&tags) {
        Ok(next) => {
            info!("Bumped version to: {next}");
            next
        }
        Err(err) => {
            warn!("{err}, skipping bump and using tag {current}");
            current
        }
    }
}

/// Split `KEY=VALUE` entries at the first `=`.
///
/// Returns the parsed arguments and the entries without any `=`. Later
/// entries replace earlier ones with the same key.
pub fn parse_build_args<S: AsRef<str>>(entries: &[S]) -> (BTreeMap<String, String>, Vec<String>) {
    let mut args = BTreeMap::new();
    let mut malformed = Vec::new();
    for entry in entries {
        match entry.as_ref().split_once('=') {
            Some((key, value)) => {
                args.insert(key.to_string(), value.to_string());
            }
            None => malformed.push(entry.as_ref().to_string()),
        }
    }
    (args, malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::Tag;
    use chrono::{DateTime, Utc};

    /// A checkout at `/work/widget` with the given origin and tags.
    #[derive(Default)]
    struct FakeCheckout {
        outside: bool,
        origin: Option<String>,
        tags: Vec<Tag>,
        broken_tags: bool,
    }

    impl Vcs for FakeCheckout {
        fn clone_branch(&self, _url: &str, _branch: &str, _dest: &Path) -> Result<(), git::Error> {
            unimplemented!()
        }

        fn discover(&self, _path: &Path) -> Result<Option<PathBuf>, git::Error> {
            Ok((!self.outside).then(|| PathBuf::from("/work/widget")))
        }

        fn list_tags(&self, _checkout: &Path) -> Result<Vec<Tag>, git::Error> {
            if self.broken_tags {
                return Err(git::Error::Timestamp("v9.9.9".to_string()));
            }
            Ok(self.tags.clone())
        }

        fn remote_url(&self, _checkout: &Path) -> Result<Option<String>, git::Error> {
            Ok(self.origin.clone())
        }
    }

    fn at(name: &str, seconds: i64) -> Tag {
        Tag::new(name, DateTime::<Utc>::from_timestamp(seconds, 0).unwrap())
    }

    fn github_checkout() -> FakeCheckout {
        FakeCheckout {
            origin: Some("git@github.com:acme/widget.git".to_string()),
            ..Default::default()
        }
    }

    fn cwd() -> &'static Path {
        Path::new("/work/widget/src")
    }

    #[test]
    fn build_args_skip_malformed_entries() {
        let (args, malformed) = parse_build_args(&["A=1", "BAD", "B=2"]);
        assert_eq!(
            args,
            BTreeMap::from([("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())])
        );
        // resolve() logs one warning per malformed entry.
        assert_eq!(malformed, vec!["BAD".to_string()]);
    }

    #[test]
    fn malformed_build_args_never_reach_the_build() {
        let overrides = Overrides {
            build_args: vec!["A=1".to_string(), "BAD".to_string()],
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &github_checkout(), cwd()).unwrap();
        assert_eq!(
            config.build_args,
            BTreeMap::from([("A".to_string(), "1".to_string())])
        );
    }

    #[test]
    fn build_args_split_at_first_equals() {
        let (args, _) = parse_build_args(&["OPTS=a=b", "EMPTY=", "OPTS2=x"]);
        assert_eq!(args.get("OPTS").map(String::as_str), Some("a=b"));
        assert_eq!(args.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn local_checkout_infers_image_from_origin() {
        let config = resolve(Overrides::default(), &File::default(), &github_checkout(), cwd()).unwrap();
        assert_eq!(config.source, Source::Local(PathBuf::from("/work/widget")));
        assert_eq!(config.image, ImageRef::new("acme/widget", "latest"));
        assert_eq!(config.dockerfile, PathBuf::from("Dockerfile"));
        assert!(config.credentials.is_none());
        assert!(config.build_args.is_empty());
    }

    #[test]
    fn explicit_image_wins_over_inference() {
        let overrides = Overrides {
            image: Some("ghcr.io/acme/widget-api".to_string()),
            tag: Some("edge".to_string()),
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &github_checkout(), cwd()).unwrap();
        assert_eq!(config.image, ImageRef::new("ghcr.io/acme/widget-api", "edge"));
    }

    #[test]
    fn checkout_without_origin_needs_an_image() {
        let result = resolve(Overrides::default(), &File::default(), &FakeCheckout::default(), cwd());
        assert!(matches!(result, Err(Error::NoImageName)));
    }

    #[test]
    fn outside_a_checkout_needs_a_repo() {
        let vcs = FakeCheckout {
            outside: true,
            ..Default::default()
        };
        let result = resolve(Overrides::default(), &File::default(), &vcs, cwd());
        assert!(matches!(result, Err(Error::NoSource(path)) if path == cwd()));
    }

    #[test]
    fn remote_repo_is_cloned_from_branch() {
        let vcs = FakeCheckout {
            outside: true,
            ..Default::default()
        };
        let overrides = Overrides {
            repo: Some("https://gitlab.com/acme/widget.git".to_string()),
            branch: Some("release".to_string()),
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &vcs, cwd()).unwrap();
        assert_eq!(
            config.source,
            Source::Remote {
                url: "https://gitlab.com/acme/widget.git".to_string(),
                branch: "release".to_string(),
            }
        );
        assert_eq!(config.image.name, "acme/widget");
    }

    #[test]
    fn auto_version_bumps_latest_local_tag() {
        let vcs = FakeCheckout {
            tags: vec![at("v1.2.3", 100), at("v1.3.0", 200)],
            ..github_checkout()
        };
        let overrides = Overrides {
            auto_version: true,
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &vcs, cwd()).unwrap();
        assert!(config.auto_version);
        assert_eq!(config.image.tag, "v1.3.1");
    }

    #[test]
    fn auto_version_without_tags_starts_at_initial_version() {
        let overrides = Overrides {
            auto_version: true,
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &github_checkout(), cwd()).unwrap();
        assert_eq!(config.image.tag, "v0.0.1");
    }

    #[test]
    fn auto_version_keeps_tag_for_non_semver() {
        let vcs = FakeCheckout {
            tags: vec![at("release-1", 100)],
            ..github_checkout()
        };
        let overrides = Overrides {
            tag: Some("nightly".to_string()),
            auto_version: true,
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &vcs, cwd()).unwrap();
        assert_eq!(config.image.tag, "nightly");
    }

    #[test]
    fn auto_version_keeps_tag_when_patch_is_at_its_limit() {
        let vcs = FakeCheckout {
            tags: vec![at("v1.2.18446744073709551615", 100)],
            ..github_checkout()
        };
        let overrides = Overrides {
            auto_version: true,
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &vcs, cwd()).unwrap();
        assert_eq!(config.image.tag, "latest");
    }

    #[test]
    fn auto_version_keeps_tag_when_tags_cannot_be_read() {
        let vcs = FakeCheckout {
            broken_tags: true,
            ..github_checkout()
        };
        let overrides = Overrides {
            auto_version: true,
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &vcs, cwd()).unwrap();
        assert_eq!(config.image.tag, "latest");
    }

    #[test]
    fn auto_version_is_skipped_for_remote_sources() {
        let vcs = FakeCheckout {
            tags: vec![at("v1.2.3", 100)],
            ..github_checkout()
        };
        let overrides = Overrides {
            repo: Some("https://github.com/acme/widget".to_string()),
            auto_version: true,
            ..Default::default()
        };
        let config = resolve(overrides, &File::default(), &vcs, cwd()).unwrap();
        assert_eq!(config.image.tag, "latest");
    }

    #[test]
    fn command_line_overrides_configuration_file() {
        let file = File {
            image: Some("acme/from-file".to_string()),
            tag: "stable".to_string(),
            dockerfile: PathBuf::from("deploy/Dockerfile"),
            registry: Some("registry.example.com".to_string()),
            scratch_dir: Some(PathBuf::from("/var/tmp/buildpub")),
            build_args: BTreeMap::from([
                ("A".to_string(), "file".to_string()),
                ("C".to_string(), "3".to_string()),
            ]),
            ..File::default()
        };
        let overrides = Overrides {
            dockerfile: Some(PathBuf::from("Dockerfile.ci")),
            build_args: vec!["A=cli".to_string(), "B=2".to_string()],
            username: Some("robot".to_string()),
            password: Some("token".to_string()),
            ..Default::default()
        };

        let config = resolve(overrides, &file, &github_checkout(), cwd()).unwrap();

        assert_eq!(config.image, ImageRef::new("acme/from-file", "stable"));
        assert_eq!(config.dockerfile, PathBuf::from("Dockerfile.ci"));
        assert_eq!(config.scratch_dir, Some(PathBuf::from("/var/tmp/buildpub")));
        assert_eq!(
            config.build_args,
            BTreeMap::from([
                ("A".to_string(), "cli".to_string()),
                ("B".to_string(), "2".to_string()),
                ("C".to_string(), "3".to_string()),
            ])
        );
        let credentials = config.credentials.unwrap();
        assert_eq!(credentials.username, "robot");
        assert_eq!(credentials.registry.as_deref(), Some("registry.example.com"));
    }
}
