//! Release asset synchronization.
//!
//! [`SyncEngine::sync`] resolves a tagged release (falling back once to the
//! configured default repository), then brings every asset of that release
//! up to date in the download directory, one asset at a time.

use log::{debug, info, warn};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::catalog::{Asset, Release, ReleaseCatalog, RepoId};
use crate::download::Downloader;
use crate::store::StateStore;

/// Result of a sync run, mapped one-to-one onto a process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every asset was already current.
    UpToDate,
    /// At least one asset was (re)downloaded and nothing failed.
    Downloaded,
    /// The release was found but some assets could not be synced.
    PartialFailure,
    /// No usable release in the requested or default repository.
    Error,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::UpToDate => 0,
            Outcome::Downloaded => 2,
            Outcome::PartialFailure | Outcome::Error => 1,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::UpToDate => "up to date",
            Outcome::Downloaded => "downloaded",
            Outcome::PartialFailure => "partial failure",
            Outcome::Error => "error",
        };
        f.write_str(s)
    }
}

/// An asset that could not be synced, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetFailure {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: Outcome,
    /// Repository the release was actually taken from.
    pub repo: Option<RepoId>,
    pub downloaded: Vec<String>,
    pub up_to_date: Vec<String>,
    pub failed: Vec<AssetFailure>,
}

impl SyncReport {
    fn unresolved() -> Self {
        Self {
            outcome: Outcome::Error,
            repo: None,
            downloaded: Vec::new(),
            up_to_date: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// One-paragraph, human readable account of the run.
    pub fn summary(&self, requested: &RepoId, tag: &str) -> String {
        let source = self.repo.as_ref().unwrap_or(requested);
        match self.outcome {
            Outcome::Error => format!("Unable to download assets for {} {}", requested, tag),
            Outcome::UpToDate => format!(
                "All {} asset(s) of {} {} are up to date",
                self.up_to_date.len(),
                source,
                tag
            ),
            Outcome::Downloaded => format!(
                "Downloaded {} asset(s) of {} {}",
                self.downloaded.len(),
                source,
                tag
            ),
            Outcome::PartialFailure => {
                let mut out = format!(
                    "Failed to sync {} of {} asset(s) of {} {}:",
                    self.failed.len(),
                    self.failed.len() + self.downloaded.len() + self.up_to_date.len(),
                    source,
                    tag
                );
                for failure in &self.failed {
                    out.push_str(&format!("\n  {}: {}", failure.name, failure.reason));
                }
                out
            }
        }
    }
}

/// What happened to a single asset.
enum AssetStatus {
    Fresh,
    Downloaded(u64),
}

pub struct SyncEngine<C: ReleaseCatalog, S: StateStore, D: Downloader> {
    catalog: C,
    store: S,
    downloader: D,
    download_dir: PathBuf,
    fallback_repo: RepoId,
}

impl<C: ReleaseCatalog, S: StateStore, D: Downloader> SyncEngine<C, S, D> {
    pub fn new(
        catalog: C,
        store: S,
        downloader: D,
        download_dir: PathBuf,
        fallback_repo: RepoId,
    ) -> Self {
        Self {
            catalog,
            store,
            downloader,
            download_dir,
            fallback_repo,
        }
    }

    /// Local location of `asset_name` from release `tag`.
    pub fn asset_path(&self, tag: &str, asset_name: &str) -> PathBuf {
        self.download_dir.join(tag).join(asset_name)
    }

    /// Sync every asset of release `tag` from `repo` into the download directory.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self, repo: &RepoId, tag: &str) -> SyncReport {
        if let Err(e) = ensure_release_tag(tag) {
            warn!("{:#}", e);
            return SyncReport::unresolved();
        }

        let Some((source, release)) = self.resolve_release(repo, tag).await else {
            return SyncReport::unresolved();
        };

        info!(
            "Syncing {} asset(s) of {} {} into {:?}",
            release.assets.len(),
            source,
            release.tag,
            self.download_dir
        );

        let mut report = SyncReport {
            outcome: Outcome::UpToDate,
            repo: Some(source),
            downloaded: Vec::new(),
            up_to_date: Vec::new(),
            failed: Vec::new(),
        };

        for asset in &release.assets {
            match self.sync_asset(&release.tag, asset).await {
                Ok(AssetStatus::Fresh) => {
                    println!("{} is up to date", asset.name);
                    report.up_to_date.push(asset.name.clone());
                }
                Ok(AssetStatus::Downloaded(bytes)) => {
                    println!("Downloaded {} ({} bytes)", asset.name, bytes);
                    report.downloaded.push(asset.name.clone());
                }
                Err(e) => {
                    warn!("Failed to sync {}: {:#}", asset.name, e);
                    report.failed.push(AssetFailure {
                        name: asset.name.clone(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }

        report.outcome = if !report.failed.is_empty() {
            Outcome::PartialFailure
        } else if !report.downloaded.is_empty() {
            Outcome::Downloaded
        } else {
            Outcome::UpToDate
        };

        report
    }

    /// Find release `tag`, trying `repo` first and then, at most once, the
    /// fallback repository. A repository is skipped when it cannot be listed,
    /// has no release with that exact tag, or the release has no assets.
    async fn resolve_release(&self, repo: &RepoId, tag: &str) -> Option<(RepoId, Release)> {
        let mut candidates = vec![repo.clone()];
        if *repo != self.fallback_repo {
            candidates.push(self.fallback_repo.clone());
        }

        for (attempt, candidate) in candidates.into_iter().enumerate() {
            if attempt > 0 {
                info!("Falling back to {}", candidate);
            }

            let releases = match self.catalog.list_releases(&candidate).await {
                Ok(releases) => releases,
                Err(e) => {
                    warn!("{}", e);
                    continue;
                }
            };

            match releases.into_iter().find(|r| r.tag == tag) {
                None => warn!("{} has no release tagged {}", candidate, tag),
                Some(release) if release.assets.is_empty() => {
                    warn!("Release {} of {} has no assets", tag, candidate)
                }
                Some(release) => return Some((candidate, release)),
            }
        }

        None
    }

    async fn sync_asset(&self, tag: &str, asset: &Asset) -> anyhow::Result<AssetStatus> {
        ensure_plain_file_name(&asset.name)?;
        let path = self.asset_path(tag, &asset.name);

        match self.store.read_record(&path) {
            Some(record) if record.is_fresh(asset.updated_at, asset.size) => {
                debug!("{:?} matches {}", path, asset.updated_at);
                return Ok(AssetStatus::Fresh);
            }
            Some(record) => debug!(
                "{:?} is stale (recorded {} / {:?} bytes, remote {} / {} bytes)",
                path, record.recorded_updated_at, record.observed_size, asset.updated_at, asset.size
            ),
            None => debug!("{:?} has never been synced", path),
        }

        let bytes = self.downloader.download(asset, &path).await?;
        self.store.write_record(&path, asset.updated_at)?;
        Ok(AssetStatus::Downloaded(bytes))
    }
}

/// Asset names come from the server; refuse anything that would land outside
/// the release directory.
fn ensure_plain_file_name(name: &str) -> anyhow::Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => anyhow::bail!("Refusing to write asset with unsafe name {:?}", name),
    }
}

/// Tags become a directory under the download root, so they may nest
/// (`release/1.0`) but never climb out of it.
pub fn ensure_release_tag(tag: &str) -> anyhow::Result<()> {
    let safe = !tag.is_empty()
        && !tag.contains('\\')
        && Path::new(tag)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        anyhow::bail!("Refusing to use unsafe release tag {:?}", tag);
    }
    Ok(())
}
