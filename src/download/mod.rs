use anyhow::{Context, Result};
use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use std::path::Path;

use crate::catalog::Asset;
use crate::http::HttpClient;
use crate::runtime::Runtime;

const PROGRESS_TEMPLATE: &str = "{msg} {percent:>3}% [{bar:40}] {bytes}/{total_bytes}";

/// Fetches an asset's bytes to a local path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `asset` to `dest`, replacing whatever is there. Returns the
    /// number of bytes written. On error nothing is left at `dest`.
    async fn download(&self, asset: &Asset, dest: &Path) -> Result<u64>;
}

/// [`Downloader`] that streams over HTTP and renders a progress bar on stderr.
pub struct HttpDownloader<R: Runtime> {
    runtime: R,
    http_client: HttpClient,
    show_progress: bool,
}

impl<R: Runtime> HttpDownloader<R> {
    pub fn new(runtime: R, http_client: HttpClient) -> Self {
        Self {
            runtime,
            http_client,
            show_progress: true,
        }
    }

    /// Suppress the progress bar entirely (it is already hidden when stderr is not a terminal).
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn progress_bar(&self, name: &str) -> ProgressBar {
        let target = if self.show_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(None, target);
        let style = ProgressStyle::with_template(PROGRESS_TEMPLATE)
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(name.to_string());
        bar
    }

    fn discard_partial(&self, dest: &Path) {
        if !self.runtime.exists(dest) {
            return;
        }
        if let Err(e) = self.runtime.remove_file(dest) {
            warn!("Could not remove partial download {:?}: {:#}", dest, e);
        }
    }

    async fn transfer(&self, asset: &Asset, dest: &Path, bar: &ProgressBar) -> Result<u64> {
        if let Some(parent) = dest.parent() {
            self.runtime
                .create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let bytes = self
            .http_client
            .download(
                &asset.url,
                || self.runtime.create_file(dest),
                |done, total| {
                    if let Some(total) = total
                        && bar.length() != Some(total)
                    {
                        bar.set_length(total);
                    }
                    bar.set_position(done);
                },
            )
            .await
            .with_context(|| format!("Failed to download {}", asset.name))?;

        if bytes != asset.size {
            anyhow::bail!(
                "Downloaded {} bytes of {} but the release lists {} bytes",
                bytes,
                asset.name,
                asset.size
            );
        }

        Ok(bytes)
    }
}

#[async_trait]
impl<R: Runtime> Downloader for HttpDownloader<R> {
    #[tracing::instrument(skip(self, asset), fields(asset = %asset.name))]
    async fn download(&self, asset: &Asset, dest: &Path) -> Result<u64> {
        info!("Downloading {} to {:?}...", asset.url, dest);

        let bar = self.progress_bar(&asset.name);
        match self.transfer(asset, dest, &bar).await {
            Ok(bytes) => {
                bar.finish_and_clear();
                info!("Download complete.");
                Ok(bytes)
            }
            Err(e) => {
                bar.abandon();
                self.discard_partial(dest);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use chrono::TimeZone;
    use chrono::Utc;
    use mockall::predicate::eq;
    use reqwest::Client;
    use std::path::PathBuf;
    use std::time::Duration;

    fn asset(url: &str, size: u64) -> Asset {
        Asset {
            name: "foo.bin".into(),
            url: url.into(),
            size,
            updated_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn http_client() -> HttpClient {
        HttpClient::new(Client::new()).with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_download_writes_file_and_creates_parent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/assets/1")
            .match_header("accept", "application/octet-stream")
            .with_status(200)
            .with_body("0123456789")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("v1").join("foo.bin");
        let downloader = HttpDownloader::new(RealRuntime, http_client()).without_progress();

        let bytes = downloader
            .download(&asset(&format!("{}/assets/1", server.url()), 10), &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(bytes, 10);
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn test_download_overwrites_existing_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/assets/1")
            .with_status(200)
            .with_body("new")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("foo.bin");
        std::fs::write(&dest, b"old contents that are longer").unwrap();
        let downloader = HttpDownloader::new(RealRuntime, http_client()).without_progress();

        downloader
            .download(&asset(&format!("{}/assets/1", server.url()), 3), &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_download_size_mismatch_removes_file() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/assets/1")
            .with_status(200)
            .with_body("short")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("foo.bin");
        let downloader = HttpDownloader::new(RealRuntime, http_client()).without_progress();

        let result = downloader
            .download(&asset(&format!("{}/assets/1", server.url()), 10), &dest)
            .await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_http_error_cleans_up_through_runtime() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/assets/1")
            .with_status(404)
            .create_async()
            .await;

        let dest = PathBuf::from("/dl/v1/foo.bin");
        let mut runtime = MockRuntime::new();
        runtime
            .expect_create_dir_all()
            .with(eq(PathBuf::from("/dl/v1")))
            .returning(|_| Ok(()));
        runtime
            .expect_exists()
            .with(eq(dest.clone()))
            .returning(|_| true);
        runtime
            .expect_remove_file()
            .with(eq(dest.clone()))
            .times(1)
            .returning(|_| Ok(()));

        let downloader = HttpDownloader::new(runtime, http_client()).without_progress();
        let result = downloader
            .download(&asset(&format!("{}/assets/1", server.url()), 10), &dest)
            .await;

        assert!(result.is_err());
    }
}
