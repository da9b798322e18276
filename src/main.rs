use clap::{ArgAction, Parser};
use onesignal_cleaner::{Cleaner, Config, RunOutcome, run_until_signal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Delete subscribers that have been inactive for too long
#[derive(Parser, Debug)]
#[command(version, about = "OneSignal inactive subscriber cleaner", long_about = None)]
struct Args {
    /// OneSignal app id
    #[arg(long, env = "ONESIGNAL_CLEANER_APP_ID")]
    app_id: Option<String>,

    /// REST API key
    #[arg(long, env = "ONESIGNAL_CLEANER_REST_API_KEY", hide_env_values = true)]
    rest_api_key: Option<String>,

    /// API origin (default: https://onesignal.com)
    #[arg(long, env = "ONESIGNAL_CLEANER_ORIGIN")]
    origin: Option<String>,

    /// Inactivity threshold in seconds (default: 15552000, about 6 months)
    #[arg(long, env = "ONESIGNAL_CLEANER_TTL")]
    ttl: Option<u64>,

    /// Seconds to wait for the export to become ready (default: 600)
    #[arg(long, env = "ONESIGNAL_CLEANER_READINESS_TIMEOUT")]
    readiness_timeout: Option<u64>,

    /// Seconds between readiness attempts (default: 5)
    #[arg(long, env = "ONESIGNAL_CLEANER_PAUSE")]
    pause: Option<u64>,

    /// Directory for the downloaded export (default: OS temp dir)
    #[arg(long, env = "ONESIGNAL_CLEANER_TMP_DIR")]
    tmp_dir: Option<PathBuf>,

    /// Number of concurrent deletions (default: 1)
    #[arg(long, env = "ONESIGNAL_CLEANER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Use this local .csv.gz export instead of requesting one
    #[arg(long, env = "ONESIGNAL_CLEANER_FILE")]
    file: Option<PathBuf>,

    /// Stop after downloading the export
    #[arg(long, env = "ONESIGNAL_CLEANER_DOWNLOAD_ONLY")]
    download_only: bool,

    /// Keep the downloaded export after cleaning
    #[arg(long, env = "ONESIGNAL_CLEANER_KEEP_ARTIFACT")]
    keep_artifact: bool,

    /// Fail the download on a Content-Length mismatch (default: true)
    #[arg(long, env = "ONESIGNAL_CLEANER_STRICT_INTEGRITY", action = ArgAction::Set)]
    strict_integrity: Option<bool>,

    /// Exit with an error if any deletion failed
    #[arg(long, env = "ONESIGNAL_CLEANER_FAIL_ON_DELETION_ERRORS")]
    fail_on_deletion_errors: bool,

    /// TOML configuration file; flags override its values
    #[arg(short, long, env = "ONESIGNAL_CLEANER_CONFIG")]
    config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Load the optional config file and apply the flags on top
    fn into_config(self) -> onesignal_cleaner::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_toml_file(path)?,
            None => Config::default(),
        };

        if let Some(app_id) = self.app_id {
            config.registry.app_id = app_id;
        }
        if let Some(api_key) = self.rest_api_key {
            config.registry.api_key = api_key;
        }
        if let Some(origin) = self.origin {
            config.registry.origin = origin;
        }
        if let Some(ttl) = self.ttl {
            config.cleanup.inactivity_ttl = Duration::from_secs(ttl);
        }
        if let Some(timeout) = self.readiness_timeout {
            config.acquisition.readiness_timeout = Duration::from_secs(timeout);
        }
        if let Some(pause) = self.pause {
            config.acquisition.pause = Duration::from_secs(pause);
        }
        if let Some(dir) = self.tmp_dir {
            config.acquisition.temp_dir = dir;
        }
        if let Some(concurrency) = self.concurrency {
            config.cleanup.concurrency = concurrency;
        }
        if let Some(strict) = self.strict_integrity {
            config.acquisition.strict_integrity = strict;
        }
        if self.file.is_some() {
            config.local_artifact = self.file;
        }
        config.download_only |= self.download_only;
        config.keep_artifact |= self.keep_artifact;
        config.cleanup.fail_on_deletion_errors |= self.fail_on_deletion_errors;

        Ok(config)
    }
}

fn init_tracing(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Remove an export this run downloaded, unless asked to keep it
async fn dispose(outcome: &RunOutcome, config: &Config) {
    let path = &outcome.artifact.path;
    let full_run = outcome.summary.is_some();

    if outcome.artifact.downloaded && full_run && !config.keep_artifact {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "data file removed"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove data file")
            }
        }
    } else {
        println!("{}", path.display());
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.quiet, args.verbose);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let cleaner = match Cleaner::new(config) {
        Ok(cleaner) => cleaner,
        Err(e) => {
            tracing::error!(error = %e, "failed to start");
            return ExitCode::FAILURE;
        }
    };

    match run_until_signal(&cleaner).await {
        Ok(outcome) => {
            if let Some(summary) = &outcome.summary {
                tracing::info!(
                    records = summary.records,
                    deleted = summary.deleted,
                    failed = summary.failed,
                    "run complete"
                );
            }
            dispose(&outcome, cleaner.config()).await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}
