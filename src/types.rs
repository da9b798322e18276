//! Core types for onesignal-cleaner

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Format of the `last_active` column (UTC, no zone suffix)
pub const LAST_ACTIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Column holding the subscriber id
pub const ID_COLUMN: &str = "id";

/// Column holding the last activity timestamp
pub const LAST_ACTIVE_COLUMN: &str = "last_active";

/// One decoded row, keyed by the header row's column names
///
/// Columns keep header order. The header is shared between all records of a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    header: Arc<[String]>,
    values: Vec<String>,
}

impl Record {
    pub(crate) fn new(header: Arc<[String]>, values: Vec<String>) -> Self {
        Self { header, values }
    }

    /// Value of the named column, if present
    pub fn get(&self, column: &str) -> Option<&str> {
        self.header
            .iter()
            .position(|name| name == column)
            .and_then(|i| self.values.get(i))
            .map(String::as_str)
    }

    /// `(column, value)` pairs in header order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True for a record without columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Why a record did not yield a [`Subscriber`]
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberParseError {
    /// `id` column missing or empty
    #[error("missing subscriber id")]
    MissingId,
    /// `last_active` column missing
    #[error("missing last_active")]
    MissingLastActive,
    /// `last_active` does not match `YYYY-MM-DD HH:MM:SS`
    #[error("invalid last_active {value:?}: {reason}")]
    InvalidLastActive {
        /// Raw column value
        value: String,
        /// chrono's parse error
        reason: String,
    },
}

/// A subscriber as needed for the activity decision
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscriber {
    /// Registry id (non-empty)
    pub id: String,
    /// Last activity instant
    pub last_active: DateTime<Utc>,
}

impl TryFrom<&Record> for Subscriber {
    type Error = SubscriberParseError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        let id = record
            .get(ID_COLUMN)
            .filter(|id| !id.is_empty())
            .ok_or(SubscriberParseError::MissingId)?;
        let raw = record
            .get(LAST_ACTIVE_COLUMN)
            .ok_or(SubscriberParseError::MissingLastActive)?;
        let last_active = NaiveDateTime::parse_from_str(raw, LAST_ACTIVE_FORMAT)
            .map_err(|e| SubscriberParseError::InvalidLastActive {
                value: raw.to_string(),
                reason: e.to_string(),
            })?
            .and_utc();

        Ok(Self {
            id: id.to_string(),
            last_active,
        })
    }
}

impl Subscriber {
    /// Classify against `now` and the inactivity threshold
    ///
    /// Inactive iff `last_active <= now - ttl`, compared in whole Unix seconds.
    pub fn verdict(&self, now: DateTime<Utc>, ttl: Duration) -> ActivityVerdict {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let threshold = now.timestamp().saturating_sub(ttl_secs);
        if self.last_active.timestamp() <= threshold {
            ActivityVerdict::Inactive
        } else {
            ActivityVerdict::Active
        }
    }
}

/// Result of classifying a subscriber
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityVerdict {
    /// Seen within the threshold; kept
    Active,
    /// Not seen within the threshold; deleted
    Inactive,
}

/// Outcome of one delete call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// Registry confirmed the deletion
    Deleted,
    /// Deletion failed; the message is the error's display form
    Failed(String),
}

/// The compressed export on local disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalArtifact {
    /// Path of the `.csv.gz` file
    pub path: PathBuf,
    /// True if this run downloaded it, false if it was pre-supplied
    pub downloaded: bool,
}

/// Counters for one clean run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Data rows decoded
    pub records: u64,
    /// Rows that did not yield a subscriber
    pub unparseable: u64,
    /// Subscribers classified active
    pub active: u64,
    /// Subscribers classified inactive (dispatched for deletion)
    pub inactive: u64,
    /// Successful deletions
    pub deleted: u64,
    /// Failed deletions
    pub failed: u64,
}

impl RunSummary {
    pub(crate) fn record_outcome(&mut self, outcome: &DeletionOutcome) {
        match outcome {
            DeletionOutcome::Deleted => self.deleted += 1,
            DeletionOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub(crate) fn merge(&mut self, other: RunSummary) {
        self.records += other.records;
        self.unparseable += other.unparseable;
        self.active += other.active;
        self.inactive += other.inactive;
        self.deleted += other.deleted;
        self.failed += other.failed;
    }
}

/// Event emitted during a run
///
/// Subscribe with [`Cleaner::subscribe`](crate::Cleaner::subscribe). Events are best-effort:
/// a lagging or absent receiver never slows the run down.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Export trigger about to be issued
    ExportRequested,

    /// Export (or artifact) not ready yet
    ExportNotReady {
        /// 1-based attempt number
        attempt: u32,
    },

    /// Export location resolved
    ExportReady {
        /// Artifact URL
        url: String,
    },

    /// Artifact bytes received so far
    DownloadProgress {
        /// Bytes received
        received: u64,
        /// Declared Content-Length
        total: u64,
    },

    /// Artifact fully written
    DownloadComplete {
        /// Local path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },

    /// Subscriber kept
    SubscriberActive {
        /// Subscriber id
        id: String,
    },

    /// Row skipped because it did not parse
    SubscriberUnparseable {
        /// Raw id column, if any
        id: Option<String>,
        /// Parse error
        error: String,
    },

    /// Subscriber deleted
    SubscriberDeleted {
        /// Subscriber id
        id: String,
    },

    /// Deletion failed
    DeletionFailed {
        /// Subscriber id
        id: String,
        /// Error message
        error: String,
    },

    /// Clean run finished
    RunComplete {
        /// Final counters
        summary: RunSummary,
    },
}
