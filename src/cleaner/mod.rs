//! Cleanup pipeline split into focused submodules.
//!
//! The `Cleaner` struct and its methods are organized by phase:
//! - [`acquire`] - Export polling and artifact download
//! - [`sweep`] - Decode, classify and bounded-concurrency deletion

mod acquire;
mod sweep;


use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Result, ResultExt};
use crate::registry::{ExportJob, RegistryClient};
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{Event, LocalArtifact, RunSummary};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slow subscribers lag rather than block the run
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// What a successful run produced
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// The artifact the run worked on
    pub artifact: LocalArtifact,
    /// Clean counters, `None` in download-only mode
    pub summary: Option<RunSummary>,
}

/// Single-run subscriber cleaner (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Cleaner {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Export trigger and delete calls
    pub(crate) registry: RegistryClient,
    /// Shared by the registry client, the poller and the downloader
    pub(crate) transport: Arc<dyn Transport>,
    /// Time source for classification, polling deadlines and backoff
    pub(crate) clock: Arc<dyn Clock>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
}

impl Cleaner {
    /// Cleaner talking to the real registry over reqwest, with the system clock
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.registry.connect_timeout)?;
        Self::with_transport(config, Arc::new(transport), Arc::new(SystemClock))
    }

    /// Cleaner with injected transport and clock
    pub fn with_transport(
        config: Config,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let job = ExportJob::new(&config.registry)?;
        let registry = RegistryClient::new(job, Arc::clone(&transport));
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config: Arc::new(config),
            registry,
            transport,
            clock,
            event_tx,
        })
    }

    /// Subscribe to run events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The validated configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Perform one run: obtain the artifact, then classify and delete
    ///
    /// A pre-supplied `local_artifact` skips acquisition. In download-only mode the run
    /// stops once the artifact is on disk.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunOutcome> {
        let artifact = match &self.config.local_artifact {
            Some(path) => {
                tracing::info!(path = %path.display(), "using a pre-supplied data file");
                LocalArtifact {
                    path: path.clone(),
                    downloaded: false,
                }
            }
            None => self
                .fetch_artifact(cancel)
                .await
                .context("error while fetching a data file")?,
        };

        if self.config.download_only {
            tracing::info!(path = %artifact.path.display(), "download-only mode, skipping cleanup");
            return Ok(RunOutcome {
                artifact,
                summary: None,
            });
        }

        match self.clean_file(&artifact.path, cancel).await {
            Ok(summary) => Ok(RunOutcome {
                artifact,
                summary: Some(summary),
            }),
            Err(e) => {
                if artifact.downloaded {
                    tracing::warn!(path = %artifact.path.display(), "data file left on disk");
                }
                Err(e).context("error while cleaning subscribers")
            }
        }
    }
}

impl std::fmt::Debug for Cleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleaner")
            .field("registry", &self.registry)
            .field("concurrency", &self.config.cleanup.concurrency)
            .finish_non_exhaustive()
    }
}
