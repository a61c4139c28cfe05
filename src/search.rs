//! Paginated keyword search.

use std::time::Duration;

use crate::{
    catalog::{parse_track_page, Catalog, SearchParams, SearchType},
    error::Result,
    track::Track,
};

/// Collects up to `target` tracks for `keyword`, one page at a time.
///
/// Waits `delay` after every page request. Stops as soon as enough tracks
/// were collected or the catalog runs out: an empty page or a page with
/// fewer than `page_size` entries is the last one. Malformed entries count
/// towards the page length but are not collected. Excess tracks of the last
/// page are dropped. Tracks are not deduplicated.
///
/// # Errors
///
/// Returns the first failed page request. Pages that cannot be parsed
/// count as empty.
pub async fn aggregate<C>(
    catalog: &C,
    keyword: &str,
    target: usize,
    page_size: usize,
    delay: Duration,
) -> Result<Vec<Track>>
where
    C: Catalog + ?Sized,
{
    let mut tracks = Vec::new();
    if target == 0 {
        return Ok(tracks);
    }

    let page_size = page_size.max(1);
    let mut page = 1;

    while tracks.len() < target {
        let params = SearchParams {
            page,
            page_size,
            kind: SearchType::Song,
        };
        let raw = catalog.search(keyword, params).await?;
        tokio::time::sleep(delay).await;

        let (batch, entries) = parse_track_page(&raw);
        trace!("{keyword}: page {page} has {} of {entries} entries usable", batch.len());

        tracks.extend(batch);
        if entries < page_size {
            break;
        }

        page += 1;
    }

    tracks.truncate(target);
    Ok(tracks)
}
