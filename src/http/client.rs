//! HTTP client with built-in retry logic and error handling.

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::time::Duration;

use super::retry::{MAX_RETRIES, NonRetryableError, RETRY_DELAY_MS, check_retryable};

/// Size of the slices a download body is written in.
pub const CHUNK_SIZE: usize = 4096;

/// HTTP client with built-in retry logic for network operations.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry_delay: Duration,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }

    /// Overrides the pause between retry attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Performs a single GET request with query parameters and deserializes the
    /// JSON response. Failures are classified but never retried here.
    #[tracing::instrument(skip(self, query))]
    pub async fn get_json_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        debug!("GET JSON from {} with query {:?}...", url, query);

        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .context("Failed to send request")?;

        let response = response.error_for_status().map_err(check_retryable)?;

        let body = response.text().await.context("Failed to read response body")?;
        serde_json::from_str::<T>(&body)
            .map_err(|e| anyhow::Error::from(NonRetryableError::MalformedResponse(e.to_string())))
    }

    /// Downloads binary content from `url` into the writer produced by `create_writer`.
    ///
    /// The body is written in [`CHUNK_SIZE`] slices and `on_progress` is called after
    /// each slice with the bytes written so far and the `Content-Length`, if any.
    /// A retried attempt calls `create_writer` again and starts over from byte zero.
    #[tracing::instrument(skip(self, create_writer, on_progress))]
    pub async fn download<W, F, P>(
        &self,
        url: &str,
        create_writer: F,
        mut on_progress: P,
    ) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
        P: FnMut(u64, Option<u64>),
    {
        debug!("Downloading {}...", url);

        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match self
                .download_once(url, &create_writer, &mut on_progress)
                .await
            {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    if !is_retryable_error(&e) {
                        return Err(e);
                    }

                    if attempt < MAX_RETRIES {
                        warn!(
                            "Download attempt {}/{} failed ({}), retrying...",
                            attempt, MAX_RETRIES, e
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Download failed after {} attempts", MAX_RETRIES)))
    }

    /// Single download attempt without retry.
    async fn download_once<W, F, P>(
        &self,
        url: &str,
        create_writer: &F,
        on_progress: &mut P,
    ) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
        P: FnMut(u64, Option<u64>),
    {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response.error_for_status().map_err(check_retryable)?;
        let total = response.content_length();

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;
        on_progress(downloaded_bytes, total);

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            for slice in chunk.chunks(CHUNK_SIZE) {
                writer
                    .write_all(slice)
                    .context("Failed to write chunk to file")?;
                downloaded_bytes += slice.len() as u64;
                on_progress(downloaded_bytes, total);
            }
        }

        writer.flush().context("Failed to flush downloaded file")?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }
}

fn is_retryable_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<NonRetryableError>().is_none()
}
