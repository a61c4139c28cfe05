//! Download batches: keyword searches and albums.
//!
//! Every batch of tracks is counted into the run's [`Progress`] before its
//! first transfer starts, and tracks are downloaded strictly one after
//! another. A failing track is reported and counted, but never stops the
//! batch or the run.

use std::{io, path::PathBuf, time::Duration};

use crate::{
    catalog::{parse_album_candidates, parse_tracks, Catalog, SearchParams, SearchType},
    config::Config,
    downloader::{DownloadOutcome, Downloader},
    error::{Error, Result},
    http::Transport,
    progress::Reporter,
    search,
    track::{DownloadTarget, Track},
    writer::Storage,
};

/// Tracks finished versus tracks planned in one run.
///
/// `completed` never exceeds `total`. `total` only grows.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Progress {
    completed: usize,
    total: usize,
}

impl Progress {
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Plans `count` more tracks.
    pub fn extend(&mut self, count: usize) {
        self.total += count;
    }

    /// Marks one planned track as finished, whatever its outcome.
    pub fn advance(&mut self) {
        debug_assert!(self.completed < self.total, "advanced past total");
        self.completed = (self.completed + 1).min(self.total);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

/// Outcome counts of a run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Summary {
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Keyword mode input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeywordPlan {
    pub keywords: Vec<String>,
    /// Keep only tracks performed by this artist alone.
    pub artist: Option<String>,
    /// Tracks per keyword.
    pub limit: usize,
}

/// Album mode input.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlbumPlan {
    pub album_ids: Vec<String>,
    /// Free-text album searches, each resolved to its first result.
    pub album_queries: Vec<String>,
    /// Tracks per album.
    pub limit: usize,
}

/// Drives the downloader over keyword or album batches.
pub struct Planner<'a> {
    catalog: &'a dyn Catalog,
    downloader: Downloader<'a>,
    reporter: Reporter,
    output_dir: PathBuf,
    quality: u32,
    overwrite: bool,
    page_size: usize,
    delay: Duration,
}

impl<'a> Planner<'a> {
    #[must_use]
    pub fn new(
        config: &Config,
        catalog: &'a dyn Catalog,
        transport: &'a dyn Transport,
        storage: &'a dyn Storage,
        reporter: Reporter,
    ) -> Self {
        Self {
            catalog,
            downloader: Downloader::new(catalog, transport, storage, config.delay),
            reporter,
            output_dir: config.output_dir.clone(),
            quality: config.quality,
            overwrite: config.overwrite,
            page_size: config.page_size,
            delay: config.delay,
        }
    }

    /// Searches every keyword and downloads up to `limit` tracks for each.
    ///
    /// # Errors
    ///
    /// Returns error if a search page cannot be fetched. Track failures are
    /// counted in the summary instead.
    pub async fn keywords(&mut self, plan: &KeywordPlan) -> Result<Summary> {
        let artist = plan
            .artist
            .as_deref()
            .map(str::trim)
            .filter(|artist| !artist.is_empty());

        let mut progress = Progress::default();
        let mut summary = Summary::default();

        for keyword in &plan.keywords {
            info!("searching for \"{keyword}\"");
            let mut tracks =
                search::aggregate(self.catalog, keyword, plan.limit, self.page_size, self.delay)
                    .await?;

            if tracks.is_empty() {
                warn!("no tracks found for \"{keyword}\"");
                continue;
            }

            if let Some(artist) = artist {
                tracks.retain(|track| track.is_solo_match(artist));
                info!("{} tracks left after filtering by artist", tracks.len());
            }

            tracks.truncate(plan.limit);
            self.download_batch(tracks, &mut progress, &mut summary)
                .await;
        }

        Ok(finish(progress, summary))
    }

    /// Downloads up to `limit` tracks of every album.
    ///
    /// Album queries are resolved first, in order, and their albums come
    /// before the explicitly given ids.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` when neither ids nor queries are given
    /// * Any error from searching albums or fetching their track lists
    pub async fn albums(&mut self, plan: &AlbumPlan) -> Result<Summary> {
        if plan.album_ids.is_empty() && plan.album_queries.is_empty() {
            return Err(Error::invalid_argument(
                "specify at least one album id or album query",
            ));
        }

        let mut album_ids = Vec::with_capacity(plan.album_queries.len() + plan.album_ids.len());
        for query in &plan.album_queries {
            if let Some(id) = self.resolve_album(query).await? {
                album_ids.push(id);
            }
        }
        album_ids.extend(plan.album_ids.iter().cloned());

        let mut progress = Progress::default();
        let mut summary = Summary::default();

        for id in &album_ids {
            info!("fetching album {id}");
            let raw = self.catalog.album(id).await?;
            tokio::time::sleep(self.delay).await;

            let mut tracks = parse_tracks(&raw);
            if tracks.is_empty() {
                warn!("album {id} has no downloadable tracks");
                continue;
            }

            tracks.truncate(plan.limit);
            self.download_batch(tracks, &mut progress, &mut summary)
                .await;
        }

        Ok(finish(progress, summary))
    }

    /// Finds the first album matching `query`.
    async fn resolve_album(&self, query: &str) -> Result<Option<String>> {
        info!("searching album \"{query}\"");

        let params = SearchParams {
            page: 1,
            page_size: self.page_size,
            kind: SearchType::Album,
        };
        let raw = self.catalog.search(query, params).await?;
        tokio::time::sleep(self.delay).await;

        let Some(album) = parse_album_candidates(&raw).into_iter().next() else {
            warn!("no album found for \"{query}\"");
            return Ok(None);
        };

        info!("selected album {}: {} - {}", album.id, album.name, album.artist);
        Ok(Some(album.id))
    }

    async fn download_batch(
        &mut self,
        tracks: Vec<Track>,
        progress: &mut Progress,
        summary: &mut Summary,
    ) {
        info!("preparing to download {} tracks", tracks.len());
        progress.extend(tracks.len());

        for (i, track) in tracks.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.delay).await;
            }

            let target = DownloadTarget {
                track,
                output_dir: self.output_dir.clone(),
                quality: self.quality,
                overwrite: self.overwrite,
            };
            let track = &target.track;
            report(self.reporter.started(track, progress));

            let reporter = &mut self.reporter;
            let result = self
                .downloader
                .download_one(&target, |transfer| reporter.transfer(transfer))
                .await;

            progress.advance();
            match result {
                Ok(outcome) => {
                    if matches!(outcome, DownloadOutcome::Skipped { .. }) {
                        summary.skipped += 1;
                    }
                    debug!("{track}: {}", outcome.path().display());
                    report(self.reporter.completed(track, &outcome));
                }
                Err(e) => {
                    summary.failed += 1;
                    // Likely to hit the next track as well.
                    if !e.is_per_track() {
                        warn!("{track}: {e}");
                    }
                    report(self.reporter.failed(track, &e));
                }
            }
        }
    }
}

fn finish(progress: Progress, summary: Summary) -> Summary {
    Summary {
        completed: progress.completed(),
        total: progress.total(),
        ..summary
    }
}

/// Progress output is best effort.
fn report(result: io::Result<()>) {
    if let Err(e) = result {
        debug!("writing progress failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::{
        config::Platform, downloader::tests::FakeTransport, error::ErrorKind,
        search::tests::FakeCatalog, writer::LocalStorage,
    };

    fn config(dir: &std::path::Path) -> Config {
        let mut config = Config::new(Platform::Netease);
        config.output_dir = dir.to_path_buf();
        config.delay = Duration::from_millis(10);
        config
    }

    fn keywords(words: &[&str], limit: usize) -> KeywordPlan {
        KeywordPlan {
            keywords: words.iter().map(|&w| w.to_owned()).collect(),
            artist: None,
            limit,
        }
    }

    #[test]
    fn progress_never_passes_total() {
        let mut progress = Progress::default();
        progress.extend(2);
        progress.advance();
        assert!(!progress.is_done());
        progress.extend(1);
        progress.advance();
        progress.advance();
        assert!(progress.is_done());
        assert_eq!((progress.completed(), progress.total()), (3, 3));
    }

    #[tokio::test(start_paused = true)]
    async fn keyword_batches_complete() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(3);
        let transport = FakeTransport::new(vec![&b"audio"[..]]);
        let mut planner = Planner::new(
            &config(dir.path()),
            &catalog,
            &transport,
            &LocalStorage,
            Reporter::hidden(),
        );

        // Both keywords find the same tracks, so the second batch is skipped.
        let summary = planner.keywords(&keywords(&["a", "b"], 5)).await.unwrap();

        assert_eq!(
            summary,
            Summary {
                completed: 6,
                total: 6,
                failed: 0,
                skipped: 3,
            }
        );
        assert_eq!(transport.fetches(), 3);
        assert!(dir.path().join("track 2.mp3").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(40);
        let mut transport = FakeTransport::new(vec![]);
        transport.status = StatusCode::INTERNAL_SERVER_ERROR;
        let mut planner = Planner::new(
            &config(dir.path()),
            &catalog,
            &transport,
            &LocalStorage,
            Reporter::hidden(),
        );

        let summary = planner.keywords(&keywords(&["a"], 4)).await.unwrap();

        assert_eq!(summary.completed, 4);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.failed, 4);
        assert_eq!(transport.fetches(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn artist_filter_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(2);
        let transport = FakeTransport::new(vec![&b"x"[..]]);
        let mut planner = Planner::new(
            &config(dir.path()),
            &catalog,
            &transport,
            &LocalStorage,
            Reporter::hidden(),
        );

        let mut plan = keywords(&["a"], 5);
        plan.artist = Some("  SOME ".to_owned());
        assert_eq!(planner.keywords(&plan).await.unwrap().total, 2);

        plan.artist = Some("other".to_owned());
        let summary = planner.keywords(&plan).await.unwrap();
        assert_eq!(summary, Summary::default());
    }

    #[tokio::test(start_paused = true)]
    async fn search_failure_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = FakeCatalog::new(100);
        catalog.fail_on_page = Some(1);
        let transport = FakeTransport::new(vec![]);
        let mut planner = Planner::new(
            &config(dir.path()),
            &catalog,
            &transport,
            &LocalStorage,
            Reporter::hidden(),
        );

        let error = planner.keywords(&keywords(&["a"], 5)).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::Catalog);
    }

    #[tokio::test(start_paused = true)]
    async fn album_queries_resolve_before_ids() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(3);
        let transport = FakeTransport::new(vec![&b"x"[..]]);
        let mut planner = Planner::new(
            &config(dir.path()),
            &catalog,
            &transport,
            &LocalStorage,
            Reporter::hidden(),
        );

        let plan = AlbumPlan {
            album_ids: vec!["42".to_owned()],
            album_queries: vec!["ye hui mei".to_owned(), "nothing".to_owned()],
            limit: 2,
        };
        let summary = planner.albums(&plan).await.unwrap();

        assert_eq!(*catalog.albums.lock().unwrap(), vec!["100", "42"]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.completed, 4);
        assert!(dir.path().join("100 1.mp3").exists());
        assert!(!dir.path().join("100 2.mp3").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn albums_need_ids_or_queries() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FakeCatalog::new(3);
        let transport = FakeTransport::new(vec![]);
        let mut planner = Planner::new(
            &config(dir.path()),
            &catalog,
            &transport,
            &LocalStorage,
            Reporter::hidden(),
        );

        let error = planner.albums(&AlbumPlan::default()).await.unwrap_err();
        assert_eq!(error.kind, ErrorKind::InvalidArgument);
        assert_eq!(catalog.requests(), 0);
    }
}
