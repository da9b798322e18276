//! Classify-and-delete sweep over a local artifact
//!
//! Decoding runs on a blocking thread and hands records to one control loop through a
//! bounded channel. The control loop classifies records in file order and puts inactive
//! subscribers into a bounded queue of capacity `concurrency`, drained by `concurrency`
//! workers. A full queue suspends the control loop, which in turn suspends the decoder.
//! Every worker returns its own tally; the tallies are merged once all workers are joined.

use super::Cleaner;
use crate::clock::Clock;
use crate::config::RetryConfig;
use crate::decoder::GzCsvDecoder;
use crate::error::{DecodeError, Error, Result, ResultExt};
use crate::registry::RegistryClient;
use crate::retry::with_retry;
use crate::types::{
    ActivityVerdict, DeletionOutcome, Event, ID_COLUMN, LAST_ACTIVE_COLUMN, Record,
    RunSummary, Subscriber,
};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type DeletionQueue = Arc<Mutex<mpsc::Receiver<Subscriber>>>;
type RecordStream = mpsc::Receiver<std::result::Result<Record, DecodeError>>;

impl Cleaner {
    /// Classify every subscriber in `path` and delete the inactive ones
    ///
    /// Returns once every dispatched deletion has finished. Parse and deletion failures are
    /// counted and logged; decode failures and cancellation end the sweep with an error.
    pub async fn clean_file(&self, path: &Path, cancel: &CancellationToken) -> Result<RunSummary> {
        let decoder = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || GzCsvDecoder::open(&path))
                .await
                .map_err(|e| Error::WorkerFailed(format!("decoder task panicked: {e}")))?
                .context("error while opening a data file")?
        };
        let concurrency = self.config.cleanup.concurrency.max(1);
        let now = self.clock.now();

        tracing::info!(
            path = %path.display(),
            concurrency,
            ttl_secs = self.config.cleanup.inactivity_ttl.as_secs(),
            now = %now,
            "cleaning subscribers"
        );

        let (record_tx, records) = mpsc::channel(concurrency);
        let reader = tokio::task::spawn_blocking(move || read_records(decoder, record_tx));

        let (tx, rx) = mpsc::channel::<Subscriber>(concurrency);
        let queue: DeletionQueue = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();
        for index in 0..concurrency {
            let worker = DeletionWorker {
                index,
                registry: self.registry.clone(),
                clock: Arc::clone(&self.clock),
                retry: self.config.cleanup.delete_retry.clone(),
                event_tx: self.event_tx.clone(),
                queue: Arc::clone(&queue),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }

        let mut summary = RunSummary::default();
        let dispatched = self
            .dispatch(records, &tx, now, &mut summary, cancel)
            .await;

        // Closing the queue lets idle workers exit once it is drained
        drop(tx);

        let mut worker_failure = None;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(tally) => summary.merge(tally),
                Err(e) => {
                    tracing::error!(error = %e, "deletion worker failed");
                    worker_failure.get_or_insert(Error::WorkerFailed(e.to_string()));
                }
            }
        }

        if let Err(e) = reader.await {
            tracing::error!(error = %e, "decoder task failed");
            worker_failure
                .get_or_insert(Error::WorkerFailed(format!("decoder task panicked: {e}")));
        }

        dispatched?;
        if let Some(e) = worker_failure {
            return Err(e);
        }

        tracing::info!(
            records = summary.records,
            unparseable = summary.unparseable,
            active = summary.active,
            inactive = summary.inactive,
            deleted = summary.deleted,
            failed = summary.failed,
            "subscribers have been cleaned"
        );
        self.event_tx.send(Event::RunComplete { summary }).ok();

        if self.config.cleanup.fail_on_deletion_errors && summary.failed > 0 {
            return Err(Error::DeletionsFailed {
                failed: summary.failed,
                attempted: summary.deleted + summary.failed,
            });
        }
        Ok(summary)
    }

    async fn dispatch(
        &self,
        mut records: RecordStream,
        tx: &mpsc::Sender<Subscriber>,
        now: DateTime<Utc>,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ttl = self.config.cleanup.inactivity_ttl;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!(records = summary.records, "cleanup cancelled");
                    return Err(Error::Cancelled);
                }
                next = records.recv() => next,
            };
            let Some(record) = next else {
                return Ok(());
            };
            let record = record?;
            summary.records += 1;

            let subscriber = match Subscriber::try_from(&record) {
                Ok(subscriber) => subscriber,
                Err(e) => {
                    tracing::error!(
                        id = record.get(ID_COLUMN),
                        last_active = record.get(LAST_ACTIVE_COLUMN),
                        error = %e,
                        "error while parsing a subscriber record, skipping"
                    );
                    summary.unparseable += 1;
                    self.event_tx
                        .send(Event::SubscriberUnparseable {
                            id: record.get(ID_COLUMN).map(str::to_string),
                            error: e.to_string(),
                        })
                        .ok();
                    continue;
                }
            };

            match subscriber.verdict(now, ttl) {
                ActivityVerdict::Active => {
                    tracing::info!(
                        id = %subscriber.id,
                        last_active = %subscriber.last_active,
                        "subscriber is active, skipping"
                    );
                    summary.active += 1;
                    self.event_tx
                        .send(Event::SubscriberActive { id: subscriber.id })
                        .ok();
                }
                ActivityVerdict::Inactive => {
                    tracing::debug!(
                        id = %subscriber.id,
                        last_active = %subscriber.last_active,
                        "subscriber is inactive, dispatching deletion"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::warn!(records = summary.records, "cleanup cancelled");
                            return Err(Error::Cancelled);
                        }
                        sent = tx.send(subscriber) => {
                            sent.map_err(|_| Error::WorkerFailed("deletion queue closed".to_string()))?;
                        }
                    }
                    summary.inactive += 1;
                }
            }
        }
    }
}

/// Blocking half of the sweep: decode rows until the stream ends, fails or the control loop
/// hangs up
fn read_records(
    mut decoder: GzCsvDecoder,
    records: mpsc::Sender<std::result::Result<Record, DecodeError>>,
) {
    // The decoder is fused after an error, so a failure is sent once and ends the loop
    while let Some(next) = decoder.next_record().transpose() {
        if records.blocking_send(next).is_err() {
            break;
        }
    }
    decoder.close();
}

/// One member of the deletion pool
struct DeletionWorker {
    index: usize,
    registry: RegistryClient,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    event_tx: broadcast::Sender<Event>,
    queue: DeletionQueue,
    cancel: CancellationToken,
}

impl DeletionWorker {
    /// Take subscribers off the queue until it closes or the run is cancelled
    async fn run(self) -> RunSummary {
        let mut tally = RunSummary::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                subscriber = async { self.queue.lock().await.recv().await } => subscriber,
            };
            let Some(subscriber) = next else {
                break;
            };

            let outcome = self.delete(&subscriber).await;
            tally.record_outcome(&outcome);
        }

        tracing::debug!(
            worker = self.index,
            deleted = tally.deleted,
            failed = tally.failed,
            "deletion worker finished"
        );
        tally
    }

    async fn delete(&self, subscriber: &Subscriber) -> DeletionOutcome {
        let registry = &self.registry;
        let id = subscriber.id.as_str();

        let result = with_retry(&self.retry, self.clock.as_ref(), move || async move {
            registry.delete_record(id).await
        })
        .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    id,
                    last_active = %subscriber.last_active,
                    worker = self.index,
                    "subscriber has been deleted"
                );
                self.event_tx
                    .send(Event::SubscriberDeleted { id: id.to_string() })
                    .ok();
                DeletionOutcome::Deleted
            }
            Err(e) => {
                tracing::error!(
                    id,
                    last_active = %subscriber.last_active,
                    worker = self.index,
                    error = %e,
                    "error while deleting a subscriber"
                );
                let error = e.to_string();
                self.event_tx
                    .send(Event::DeletionFailed {
                        id: id.to_string(),
                        error: error.clone(),
                    })
                    .ok();
                DeletionOutcome::Failed(error)
            }
        }
    }
}
