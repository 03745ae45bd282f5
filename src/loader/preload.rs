// Cache warm-up for batches of images
// Author: kelexine (https://github.com/kelexine)

use crate::client::{CacheClient, FetchOutcome};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::info;

/// Outcome counts of a preload run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadSummary {
    pub total: usize,
    /// Served from the store.
    pub hits: usize,
    /// Fetched and stored during this run.
    pub fetched: usize,
    /// Resolved to the original URL.
    pub fallbacks: usize,
}

/// Push `urls` through `client` with at most `concurrency` requests in
/// flight, calling `progress(completed, total)` after each one.
///
/// Handles minted along the way are released immediately: the point is to
/// populate the store, not to display anything.
pub async fn preload<F>(
    client: &CacheClient,
    urls: &[String],
    concurrency: usize,
    mut progress: F,
) -> PreloadSummary
where
    F: FnMut(usize, usize),
{
    let urls: Vec<&String> = urls.iter().filter(|url| !url.is_empty()).collect();
    let mut summary = PreloadSummary {
        total: urls.len(),
        ..Default::default()
    };
    if urls.is_empty() {
        return summary;
    }

    info!("Preloading {} images", summary.total);

    let mut results = stream::iter(urls)
        .map(|url| client.fetch(url, None, &[]))
        .buffer_unordered(concurrency.max(1));

    let mut completed = 0;
    while let Some(outcome) = results.next().await {
        completed += 1;
        match &outcome {
            FetchOutcome::Cached { handle, from_cache } => {
                if *from_cache {
                    summary.hits += 1;
                } else {
                    summary.fetched += 1;
                }
                client.blobs().revoke(handle);
            }
            FetchOutcome::Original(_) => summary.fallbacks += 1,
        }

        if completed % 10 == 0 || completed == summary.total {
            info!(
                "Preload: {}/{} images ({}%)",
                completed,
                summary.total,
                completed * 100 / summary.total
            );
        }
        progress(completed, summary.total);
    }

    summary
}
