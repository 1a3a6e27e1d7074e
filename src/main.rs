use clap::Parser;
use clap::error::ErrorKind;
use std::path::PathBuf;
use std::process::ExitCode;
use sync_assets::catalog::RepoId;
use sync_assets::config::{Config, build_engine};
use sync_assets::runtime::RealRuntime;
use sync_assets::sync::{Outcome, ensure_release_tag};

/// sync-assets - keep a local folder in sync with a release's assets
///
/// Downloads every asset of the given release that is missing locally, has a
/// different size than published, or was updated on the server since the last
/// sync. Assets land in <ARCHIVE_ROOT>/<TAG>/<ASSET>.
///
/// Requires OAUTH_TOKEN to hold a token with read access to the repository.
///
/// Exit status: 0 when everything was already current, 2 when something was
/// downloaded, 1 on any error.
#[derive(Parser, Debug)]
#[command(author, version = env!("SYNC_ASSETS_VERSION"), about)]
struct Cli {
    /// Repository that publishes the release, "owner/repo"
    #[arg(value_name = "OWNER/REPO")]
    repo: RepoId,

    /// Release tag to sync (exact, case-sensitive)
    #[arg(value_name = "TAG", value_parser = parse_tag)]
    tag: String,

    /// Download directory (default: $ARCHIVE_ROOT, else the platform downloads folder)
    #[arg(long = "archive-root", value_name = "PATH")]
    archive_root: Option<PathBuf>,

    /// Releases API URL (defaults to https://api.github.com)
    #[arg(long = "api-url", env = "SYNC_ASSETS_API_URL", value_name = "URL")]
    api_url: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return ExitCode::from(report_usage_error(&e)),
    };

    let runtime = RealRuntime;
    let config = match Config::new(&runtime, cli.archive_root, cli.api_url) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!();
            eprintln!("Usage: sync-assets <OWNER/REPO> <TAG>");
            return ExitCode::from(1);
        }
    };

    let engine = match build_engine(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let report = engine.sync(&cli.repo, &cli.tag).await;
    let summary = report.summary(&cli.repo, &cli.tag);
    match report.outcome {
        Outcome::UpToDate | Outcome::Downloaded => println!("{}", summary),
        Outcome::PartialFailure | Outcome::Error => eprintln!("{}", summary),
    }

    ExitCode::from(report.outcome.exit_code())
}

fn parse_tag(s: &str) -> anyhow::Result<String> {
    ensure_release_tag(s)?;
    Ok(s.to_string())
}

/// clap exits with 2 on usage errors, which would read as "downloaded".
fn report_usage_error(e: &clap::Error) -> u8 {
    e.print().ok();
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}
