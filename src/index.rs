//! Offline reclassification of already-cached encyclopedia pages
//!
//! Wikipedia serves "no article with this name" pages with HTTP 200, so
//! earlier runs may have cached such bodies as positive entries. This pass
//! re-reads cached encyclopedia pages for the current word list and plants
//! negative markers next to the ones that turn out to carry no article,
//! reclaiming them without any network traffic.

use crate::{
    cache::CacheStore,
    source::{self, Source},
};
use std::time::{Duration, Instant};

/// How often the scan logs its progress
const SCAN_HEARTBEAT: Duration = Duration::from_secs(2);

/// Scan result: pages inspected and markers written
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanOutcome {
    /// Cached pages whose bodies were inspected
    pub scanned: usize,

    /// Negative markers written for "no article" bodies
    pub marked: usize,
}

/// Mark cached encyclopedia pages that carry no article as negative
///
/// Only pages that exist in the positive cache and have no marker yet are
/// read, and at most `scan_limit` of them: the pass is an opportunistic
/// cleanup, not an exhaustive audit. Unreadable pages and failed marker
/// writes are skipped, they will get another chance on a later run.
pub fn mark_cached_no_articles(
    words: &[String],
    cache: &CacheStore,
    scan_limit: usize,
) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    let mut last_beat = Instant::now();
    for word in words {
        if outcome.scanned >= scan_limit {
            break;
        }
        if !cache.has_entry(Source::Wikipedia, word)
            || cache.has_negative(Source::Wikipedia, word)
        {
            continue;
        }
        let Ok(html) = cache.read_entry(Source::Wikipedia, word) else {
            continue;
        };
        outcome.scanned += 1;
        if source::is_no_article(&html) {
            if let Err(e) = cache.write_negative(Source::Wikipedia, word, "noarticle") {
                log::warn!("index-from-cache: could not mark {word:?}: {e:#}");
            } else {
                outcome.marked += 1;
            }
        }
        if last_beat.elapsed() >= SCAN_HEARTBEAT {
            log::info!(
                "index-from-cache: scanned={} marked={}",
                outcome.scanned,
                outcome.marked
            );
            last_beat = Instant::now();
        }
    }
    outcome
}
