//! GitHub releases API catalog.

use async_trait::async_trait;
use log::debug;

use crate::http::{HttpClient, NonRetryableError};

use super::{Asset, CatalogError, Release, ReleaseCatalog, RepoId};

/// Default API endpoint.
pub const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub API response types (internal).
mod api {
    use chrono::{DateTime, Utc};
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct Release {
        pub tag_name: String,
        #[serde(default)]
        pub assets: Vec<Asset>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Asset {
        pub name: String,
        pub url: String,
        pub size: u64,
        pub updated_at: DateTime<Utc>,
    }
}

/// Catalog backed by the GitHub (or GitHub Enterprise) REST API.
pub struct GitHubCatalog {
    http_client: HttpClient,
    api_url: String,
}

impl GitHubCatalog {
    pub fn new(http_client: HttpClient, api_url: &str) -> Self {
        Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    fn classify(repo: &RepoId, error: anyhow::Error) -> CatalogError {
        let repo = repo.clone();
        match error.downcast_ref::<NonRetryableError>() {
            Some(NonRetryableError::NotFound(_)) => CatalogError::NotFound(repo),
            Some(
                e @ (NonRetryableError::AuthenticationFailed(_)
                | NonRetryableError::Forbidden(_)
                | NonRetryableError::RateLimitExceeded(_)),
            ) => CatalogError::Authentication {
                repo,
                message: e.to_string(),
            },
            Some(e @ NonRetryableError::MalformedResponse(_)) => CatalogError::Malformed {
                repo,
                message: e.to_string(),
            },
            _ => CatalogError::Network {
                repo,
                message: format!("{:#}", error),
            },
        }
    }
}

#[async_trait]
impl ReleaseCatalog for GitHubCatalog {
    #[tracing::instrument(skip(self))]
    async fn list_releases(&self, repo: &RepoId) -> Result<Vec<Release>, CatalogError> {
        let url = format!("{}/repos/{}/{}/releases", self.api_url, repo.owner, repo.repo);
        debug!("Fetching releases from {}...", url);

        let parsed: Vec<api::Release> = self
            .http_client
            .get_json_with_query(&url, &[("per_page", "100")])
            .await
            .map_err(|e| Self::classify(repo, e))?;

        if parsed.is_empty() {
            return Err(CatalogError::NoReleases(repo.clone()));
        }

        debug!("{} lists {} release(s)", repo, parsed.len());
        Ok(parsed.into_iter().map(Release::from).collect())
    }
}

impl From<api::Release> for Release {
    fn from(r: api::Release) -> Self {
        Release {
            tag: r.tag_name,
            assets: r.assets.into_iter().map(Asset::from).collect(),
        }
    }
}

impl From<api::Asset> for Asset {
    fn from(a: api::Asset) -> Self {
        Asset {
            name: a.name,
            url: a.url,
            size: a.size,
            updated_at: a.updated_at,
        }
    }
}
