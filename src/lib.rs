//! # onesignal-cleaner
//!
//! Deletes subscribers that have been inactive for longer than a threshold from a
//! OneSignal-style push registry.
//!
//! One run:
//! 1. triggers a CSV export of all subscribers and polls until it is ready
//! 2. streams the gzip-compressed artifact to disk and verifies its length
//! 3. decodes it row by row, classifies every subscriber as active or inactive
//! 4. deletes inactive subscribers through a bounded pool of workers
//!
//! ## Quick Start
//!
//! ```no_run
//! use onesignal_cleaner::{Cleaner, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.registry.app_id = "my-app".to_string();
//!     config.registry.api_key = "my-rest-api-key".to_string();
//!     config.cleanup.concurrency = 4;
//!
//!     let cleaner = Cleaner::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = cleaner.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let outcome = cleaner.run(&CancellationToken::new()).await?;
//!     println!("{:?}", outcome.summary);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Cleanup pipeline (acquisition and sweep)
pub mod cleaner;
/// Time capability
pub mod clock;
/// Configuration types
pub mod config;
/// Gzip + CSV record stream decoder
pub mod decoder;
/// Verified artifact download
pub mod download;
/// Error types
pub mod error;
/// Export readiness polling
pub mod poller;
/// Registry API client
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Test doubles
pub mod testing;
/// HTTP transport capability
pub mod transport;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use cleaner::{Cleaner, RunOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AcquisitionConfig, CleanupConfig, Config, RegistryConfig, RetryConfig};
pub use error::{DecodeError, DownloadError, Error, RegistryError, Result, TransportError};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::{
    ActivityVerdict, DeletionOutcome, Event, LocalArtifact, Record, RunSummary, Subscriber,
};

use tokio_util::sync::CancellationToken;

/// Run the cleaner, cancelling it on SIGTERM or SIGINT
///
/// On a signal no new deletions are dispatched, in-flight deletions finish and the run
/// returns [`Error::Cancelled`] (wrapped in context).
///
/// # Example
///
/// ```no_run
/// use onesignal_cleaner::{Cleaner, Config, run_until_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let cleaner = Cleaner::new(Config::default())?;
///     run_until_signal(&cleaner).await?;
///     Ok(())
/// }
/// ```
pub async fn run_until_signal(cleaner: &Cleaner) -> Result<RunOutcome> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_signal().await;
            tracing::warn!("stopping run, waiting for in-flight deletions");
            cancel.cancel();
        }
    });

    let result = cleaner.run(&cancel).await;
    watcher.abort();
    result
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register signal handlers, using ctrl_c fallback");
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("received Ctrl+C signal"),
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for Ctrl+C signal");
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
