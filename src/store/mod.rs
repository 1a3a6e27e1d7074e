//! Local sync state kept in sidecar marker files.
//!
//! For an asset stored at `P`, the marker `P.updated` holds the server's
//! `updated_at` timestamp from the last successful download.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

/// Suffix appended to an asset path to form its marker path.
pub const MARKER_SUFFIX: &str = ".updated";

/// On-disk timestamp format, e.g. `2024-01-01T00:00:00Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// What is known locally about a previously synced asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAssetRecord {
    pub path: PathBuf,
    pub recorded_updated_at: DateTime<Utc>,
    /// Bytes currently on disk; `None` when the asset file itself is gone.
    pub observed_size: Option<u64>,
}

impl LocalAssetRecord {
    /// Both the timestamp and the byte count have to agree with the server,
    /// and the file has to exist.
    pub fn is_fresh(&self, updated_at: DateTime<Utc>, size: u64) -> bool {
        self.recorded_updated_at >= updated_at && self.observed_size == Some(size)
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait StateStore: Send + Sync {
    /// Load the record for the asset at `asset_path`. Missing or unreadable
    /// markers yield `None`.
    fn read_record(&self, asset_path: &Path) -> Option<LocalAssetRecord>;

    /// Record that the asset at `asset_path` now matches `updated_at`.
    fn write_record(&self, asset_path: &Path, updated_at: DateTime<Utc>) -> Result<()>;
}

pub fn marker_path(asset_path: &Path) -> PathBuf {
    let mut name = OsString::from(asset_path.as_os_str());
    name.push(MARKER_SUFFIX);
    PathBuf::from(name)
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// [`StateStore`] backed by `.updated` marker files.
pub struct MarkerStore<R: Runtime> {
    runtime: R,
}

impl<R: Runtime> MarkerStore<R> {
    pub fn new(runtime: R) -> Self {
        Self { runtime }
    }
}

impl<R: Runtime> StateStore for MarkerStore<R> {
    #[tracing::instrument(skip(self))]
    fn read_record(&self, asset_path: &Path) -> Option<LocalAssetRecord> {
        let marker = marker_path(asset_path);
        if !self.runtime.exists(&marker) {
            return None;
        }

        let raw = match self.runtime.read_to_string(&marker) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Ignoring unreadable marker {:?}: {:#}", marker, e);
                return None;
            }
        };

        let Some(recorded_updated_at) = parse_timestamp(&raw) else {
            debug!("Ignoring corrupt marker {:?}: {:?}", marker, raw);
            return None;
        };

        Some(LocalAssetRecord {
            path: asset_path.to_path_buf(),
            recorded_updated_at,
            observed_size: self.runtime.file_size(asset_path),
        })
    }

    #[tracing::instrument(skip(self))]
    fn write_record(&self, asset_path: &Path, updated_at: DateTime<Utc>) -> Result<()> {
        let marker = marker_path(asset_path);
        self.runtime
            .write(&marker, format_timestamp(updated_at).as_bytes())
            .with_context(|| format!("Failed to write marker {:?}", marker))
    }
}
