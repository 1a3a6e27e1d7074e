//! Run configuration and service construction.
//!
//! Everything the sync engine needs from the outside world (credentials,
//! directories, endpoints) is resolved here once, then handed to the engine
//! through its constructor.

use anyhow::Result;
use log::debug;
use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use std::path::PathBuf;
use thiserror::Error;

use crate::{
    catalog::{GitHubCatalog, RepoId},
    download::HttpDownloader,
    http::HttpClient,
    runtime::{RealRuntime, Runtime},
    store::MarkerStore,
    sync::SyncEngine,
};

pub use crate::catalog::GITHUB_API_URL;

/// Bearer credential for the releases API.
pub const TOKEN_ENV: &str = "OAUTH_TOKEN";

/// Overrides where assets are stored.
pub const ARCHIVE_ROOT_ENV: &str = "ARCHIVE_ROOT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "OAUTH_TOKEN is not set. Create a personal access token with read access to the \
         repository and export it, e.g. `export OAUTH_TOKEN=<token>`."
    )]
    MissingToken,
    #[error(
        "Could not determine a download directory. Set ARCHIVE_ROOT or pass --archive-root."
    )]
    NoDownloadDir,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub download_dir: PathBuf,
    pub api_url: String,
    pub fallback_repo: RepoId,
}

impl Config {
    /// Resolve configuration. Explicit arguments win over the environment;
    /// the download directory falls back to the platform downloads folder.
    pub fn new<R: Runtime>(
        runtime: &R,
        archive_root: Option<PathBuf>,
        api_url: Option<String>,
    ) -> Result<Self, ConfigError> {
        let token = runtime
            .env_var(TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let download_dir = archive_root
            .or_else(|| {
                runtime
                    .env_var(ARCHIVE_ROOT_ENV)
                    .ok()
                    .filter(|d| !d.is_empty())
                    .map(PathBuf::from)
            })
            .or_else(|| runtime.download_dir())
            .or_else(|| runtime.home_dir().map(|home| home.join("Downloads")))
            .ok_or(ConfigError::NoDownloadDir)?;

        debug!("Using download directory {:?}", download_dir);

        Ok(Self {
            token,
            download_dir,
            api_url: api_url.unwrap_or_else(|| GITHUB_API_URL.to_string()),
            fallback_repo: RepoId::default_repo(),
        })
    }
}

/// Build an HTTP client that authenticates every request with `token`.
pub fn build_http_client(token: &str) -> Result<HttpClient> {
    let mut headers = HeaderMap::new();
    let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token))?;
    auth_value.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth_value);
    debug!("HTTP client configured with authentication");

    let client = Client::builder()
        .user_agent("sync-assets")
        .default_headers(headers)
        .build()?;

    Ok(HttpClient::new(client))
}

/// The engine wired to the real API, marker files and HTTP downloader.
pub type DefaultEngine =
    SyncEngine<GitHubCatalog, MarkerStore<RealRuntime>, HttpDownloader<RealRuntime>>;

pub fn build_engine(config: &Config) -> Result<DefaultEngine> {
    let http_client = build_http_client(&config.token)?;
    let catalog = GitHubCatalog::new(http_client.clone(), &config.api_url);
    let store = MarkerStore::new(RealRuntime);
    let downloader = HttpDownloader::new(RealRuntime, http_client);

    Ok(SyncEngine::new(
        catalog,
        store,
        downloader,
        config.download_dir.clone(),
        config.fallback_repo.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;
    use mockito::{Matcher, Server};
    use std::env::VarError;

    fn runtime_with(token: Option<&str>, archive_root: Option<&str>) -> MockRuntime {
        let mut runtime = MockRuntime::new();
        let token = token.map(str::to_string);
        let archive_root = archive_root.map(str::to_string);
        runtime
            .expect_env_var()
            .with(eq(TOKEN_ENV))
            .returning(move |_| token.clone().ok_or(VarError::NotPresent));
        runtime
            .expect_env_var()
            .with(eq(ARCHIVE_ROOT_ENV))
            .returning(move |_| archive_root.clone().ok_or(VarError::NotPresent));
        runtime
            .expect_download_dir()
            .returning(|| Some(PathBuf::from("/home/user/Downloads")));
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));
        runtime
    }

    #[test]
    fn test_missing_token() {
        let runtime = runtime_with(None, None);
        assert_eq!(
            Config::new(&runtime, None, None).unwrap_err(),
            ConfigError::MissingToken
        );
    }

    #[test]
    fn test_blank_token_counts_as_missing() {
        let runtime = runtime_with(Some("  "), None);
        assert_eq!(
            Config::new(&runtime, None, None).unwrap_err(),
            ConfigError::MissingToken
        );
    }

    #[test]
    fn test_defaults() {
        let runtime = runtime_with(Some("tok"), None);
        let config = Config::new(&runtime, None, None).unwrap();
        assert_eq!(config.token, "tok");
        assert_eq!(config.download_dir, PathBuf::from("/home/user/Downloads"));
        assert_eq!(config.api_url, GITHUB_API_URL);
        assert_eq!(config.fallback_repo, RepoId::default_repo());
    }

    #[test]
    fn test_archive_root_env_overrides_download_dir() {
        let runtime = runtime_with(Some("tok"), Some("/srv/archive"));
        let config = Config::new(&runtime, None, None).unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/srv/archive"));
    }

    #[test]
    fn test_explicit_archive_root_wins() {
        let runtime = runtime_with(Some("tok"), Some("/srv/archive"));
        let config = Config::new(
            &runtime,
            Some(PathBuf::from("/tmp/explicit")),
            Some("http://localhost:1234".into()),
        )
        .unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/tmp/explicit"));
        assert_eq!(config.api_url, "http://localhost:1234");
    }

    #[test]
    fn test_home_downloads_when_no_platform_dir() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(TOKEN_ENV))
            .returning(|_| Ok("tok".into()));
        runtime
            .expect_env_var()
            .with(eq(ARCHIVE_ROOT_ENV))
            .returning(|_| Err(VarError::NotPresent));
        runtime.expect_download_dir().returning(|| None);
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));

        let config = Config::new(&runtime, None, None).unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/home/user/Downloads"));
    }

    #[test]
    fn test_no_download_dir_at_all() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_env_var()
            .with(eq(TOKEN_ENV))
            .returning(|_| Ok("tok".into()));
        runtime
            .expect_env_var()
            .with(eq(ARCHIVE_ROOT_ENV))
            .returning(|_| Err(VarError::NotPresent));
        runtime.expect_download_dir().returning(|| None);
        runtime.expect_home_dir().returning(|| None);

        assert_eq!(
            Config::new(&runtime, None, None).unwrap_err(),
            ConfigError::NoDownloadDir
        );
    }

    #[tokio::test]
    async fn test_http_client_sends_bearer_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/")
            .match_header("Authorization", Matcher::Exact("Bearer test_token".into()))
            .match_header("user-agent", "sync-assets")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = build_http_client("test_token").unwrap();
        let body: Vec<String> = client.get_json_with_query(&server.url(), &[]).await.unwrap();

        mock.assert_async().await;
        assert!(body.is_empty());
    }
}
