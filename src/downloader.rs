//! Downloading a single track.

use std::{path::PathBuf, time::Duration};

use crate::{
    catalog::{parse_playback_url, Catalog},
    error::{Error, Result},
    http::Transport,
    source::ByteSource,
    track::DownloadTarget,
    writer::{self, Storage},
};

/// Result of a successful download attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The audio was written to `path`.
    Downloaded { bytes: u64, path: PathBuf },
    /// `path` already existed and overwriting was not requested.
    Skipped { path: PathBuf },
}

impl DownloadOutcome {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            DownloadOutcome::Downloaded { path, .. } | DownloadOutcome::Skipped { path } => path,
        }
    }
}

/// Transfer state passed to progress observers after every chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub received: u64,
    /// Size announced by the server, if any.
    pub total: Option<u64>,
}

/// Resolves, fetches and stores tracks one at a time.
pub struct Downloader<'a> {
    catalog: &'a dyn Catalog,
    transport: &'a dyn Transport,
    storage: &'a dyn Storage,
    delay: Duration,
}

impl<'a> Downloader<'a> {
    #[must_use]
    pub fn new(
        catalog: &'a dyn Catalog,
        transport: &'a dyn Transport,
        storage: &'a dyn Storage,
        delay: Duration,
    ) -> Self {
        Self {
            catalog,
            transport,
            storage,
            delay,
        }
    }

    /// Downloads `target`, calling `on_progress` after every received chunk.
    ///
    /// Waits the configured delay after resolving the playback URL. Partial
    /// files are left in place on failure.
    ///
    /// # Errors
    ///
    /// * `NotFound` when the catalog has no playable URL
    /// * `Unavailable` with an [`HttpStatus`](crate::error::HttpStatus) when
    ///   the audio server does not answer with success
    /// * `DataLoss` when the transfer breaks off
    /// * `FileSystem` when the file cannot be written
    /// * `Catalog` when the catalog cannot be queried
    pub async fn download_one<F>(
        &self,
        target: &DownloadTarget,
        mut on_progress: F,
    ) -> Result<DownloadOutcome>
    where
        F: FnMut(Transfer),
    {
        let track = &target.track;

        let raw = self
            .catalog
            .playback_url(&track.playback_ref, target.quality)
            .await?;
        tokio::time::sleep(self.delay).await;

        let url = parse_playback_url(&raw)
            .ok_or_else(|| Error::not_found(format!("{track}: audio url not available")))?;

        let path = target.destination(&url);
        if !target.overwrite && self.storage.exists(&path).await {
            debug!("{} already exists", path.display());
            return Ok(DownloadOutcome::Skipped { path });
        }

        let response = self.transport.fetch(&url).await?;
        if !response.status.is_success() {
            return Err(Error::http_status(response.status));
        }

        let total = response.content_length();
        let mut source = ByteSource::from(response.body);
        let mut received = 0;

        trace!("{track}: downloading {url} to {}", path.display());
        let bytes = writer::write_file(self.storage, &path, &mut source, |len| {
            received += len;
            on_progress(Transfer { received, total });
        })
        .await?;

        Ok(DownloadOutcome::Downloaded { bytes, path })
    }
}
