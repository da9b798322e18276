//! Export acquisition: poll for the export, wait for the artifact, stream it to disk

use super::Cleaner;
use crate::download::{IntegrityPolicy, VerifiedDownloader};
use crate::error::Result;
use crate::poller::AcquisitionPoller;
use crate::types::{Event, LocalArtifact};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufWriter;
use tokio_util::sync::CancellationToken;

impl Cleaner {
    /// Obtain a fresh export and download it into the temp directory
    ///
    /// A partially written file is removed before the error is returned.
    pub(crate) async fn fetch_artifact(&self, cancel: &CancellationToken) -> Result<LocalArtifact> {
        let acquisition = &self.config.acquisition;
        let poller = AcquisitionPoller::new(
            self.registry.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
            acquisition,
            self.event_tx.clone(),
        );

        let url = poller.acquire_export_url(cancel).await?;
        let response = poller.await_artifact(&url, cancel).await?;

        let path = self.artifact_path();
        tracing::info!(url = %url, path = %path.display(), "downloading data file");

        let downloader = VerifiedDownloader::new(
            Arc::clone(&self.transport),
            IntegrityPolicy::from_strict(acquisition.strict_integrity),
            self.event_tx.clone(),
        );

        let file = tokio::fs::File::create(&path).await?;
        let mut sink = BufWriter::new(file);
        let written = match downloader.write_response(&url, response, &mut sink).await {
            Ok(written) => written,
            Err(e) => {
                drop(sink);
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    tracing::warn!(
                        path = %path.display(),
                        error = %remove_err,
                        "failed to remove partial data file"
                    );
                }
                return Err(e);
            }
        };

        self.event_tx
            .send(Event::DownloadComplete {
                path: path.clone(),
                bytes: written,
            })
            .ok();

        Ok(LocalArtifact {
            path,
            downloaded: true,
        })
    }

    /// `{temp_dir}/onesignal-players-{app_id}-{YYYYmmddHHMMSS}.csv.gz`
    pub(crate) fn artifact_path(&self) -> PathBuf {
        let stamp = self.clock.now().format("%Y%m%d%H%M%S");
        self.config.acquisition.temp_dir.join(format!(
            "onesignal-players-{}-{}.csv.gz",
            self.registry.job().app_id,
            stamp
        ))
    }
}
