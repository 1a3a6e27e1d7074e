//! Release catalog abstraction.
//!
//! A catalog answers one question: which releases (and which assets in each)
//! does a repository currently publish. The sync engine only depends on the
//! [`ReleaseCatalog`] trait so tests can substitute a fake.

mod github;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use github::{GITHUB_API_URL, GitHubCatalog};

/// Repository consulted when the requested one cannot serve the tag.
pub const DEFAULT_REPO: &str = "EpicGames/UnrealEngine";

/// Repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    /// The fixed fallback repository, see [`DEFAULT_REPO`].
    pub fn default_repo() -> Self {
        let (owner, repo) = DEFAULT_REPO.split_once('/').unwrap_or((DEFAULT_REPO, ""));
        RepoId {
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// `.` and `..` would address a different URL path, so all-dot segments are out.
fn is_identifier_segment(segment: &str) -> bool {
    !segment.is_empty()
        && !segment.chars().all(|c| c == '.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, repo)) if is_identifier_segment(owner) && is_identifier_segment(repo) => {
                Ok(RepoId {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => anyhow::bail!(
                "Invalid repository '{}'. Expected 'owner/repo' using letters, digits, '-', '_' or '.'.",
                s
            ),
        }
    }
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// File name, unique within its release
    pub name: String,
    /// Location the binary content is fetched from
    pub url: String,
    /// Size in bytes of the complete file
    pub size: u64,
    /// Last modification time on the server
    pub updated_at: DateTime<Utc>,
}

/// A tagged release and its assets, in the order the API returned them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tag: String,
    pub assets: Vec<Asset>,
}

/// Why a catalog could not produce any releases.
///
/// The sync engine reacts to every variant the same way (fall back to the
/// default repository); the variants exist so logs say what actually went wrong.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("network failure while listing releases of {repo}: {message}")]
    Network { repo: RepoId, message: String },
    #[error("authentication failed for {repo}: {message}")]
    Authentication { repo: RepoId, message: String },
    #[error("repository {0} not found")]
    NotFound(RepoId),
    #[error("repository {0} has no releases")]
    NoReleases(RepoId),
    #[error("malformed release listing for {repo}: {message}")]
    Malformed { repo: RepoId, message: String },
}

/// Source of release metadata.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReleaseCatalog: Send + Sync {
    /// List the releases of `repo`. An empty listing is reported as
    /// [`CatalogError::NoReleases`], never as `Ok(vec![])`.
    async fn list_releases(&self, repo: &RepoId) -> Result<Vec<Release>, CatalogError>;
}
