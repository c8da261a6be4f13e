//! Word list loading and cheap pre-dispatch cache summaries
//!
//! Everything here works off file-existence checks only, never file contents:
//! these summaries run before any fetching starts, over word lists that can
//! be very large, and must stay fast enough to feel instant.

use crate::{cache::CacheStore, source::Source, Result};
use anyhow::Context;
use std::{fs, path::Path};

/// Cap on the number of words probed for the sampled baseline estimate
pub const BASELINE_SAMPLE_CAP: usize = 5000;

/// Load a word list, one word per line, blank lines ignored
pub fn load(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading word list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Per-source resolution coverage of a word list, before dispatch
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ResolutionSummary {
    /// Words resolved at both sources (these skip the worker pool entirely)
    pub known: usize,

    /// Words resolved at the dictionary source only
    pub wikt_only: usize,

    /// Words resolved at the encyclopedia source only
    pub wiki_only: usize,

    /// Words with no cache state at all
    pub unknown: usize,
}
//
/// Classify every word of the list by its cache resolution state
pub fn resolution_summary(words: &[String], cache: &CacheStore) -> ResolutionSummary {
    let mut summary = ResolutionSummary::default();
    for word in words {
        let wikt = cache.source_resolved(Source::Wiktionary, word);
        let wiki = cache.source_resolved(Source::Wikipedia, word);
        match (wikt, wiki) {
            (true, true) => summary.known += 1,
            (true, false) => summary.wikt_only += 1,
            (false, true) => summary.wiki_only += 1,
            (false, false) => summary.unknown += 1,
        }
    }
    summary
}

/// Exact baseline: words with a positive cache entry at both sources
///
/// This is the "completed before this run even started" count that the
/// heartbeat folds into its percentage.
pub fn exact_baseline(words: &[String], cache: &CacheStore) -> usize {
    words.iter().filter(|word| cache.fully_cached(word)).count()
}

/// Fast sampled estimate of the baseline fraction
///
/// Strides across the list instead of walking all of it, so very large word
/// lists get an approximate readout immediately, before the exact count
/// finishes. Returns the estimated percentage and the sample size, or `None`
/// for an empty list.
pub fn sampled_baseline_estimate(words: &[String], cache: &CacheStore) -> Option<(f64, usize)> {
    if words.is_empty() {
        return None;
    }
    let sample_n = words.len().min(BASELINE_SAMPLE_CAP);
    let stride = (words.len() / sample_n).max(1);
    let sampled = words.iter().step_by(stride).take(sample_n);
    let mut taken = 0;
    let mut hits = 0;
    for word in sampled {
        taken += 1;
        if cache.fully_cached(word) {
            hits += 1;
        }
    }
    Some((hits as f64 / taken as f64 * 100.0, taken))
}

/// Count negative markers per source over this run's word list
///
/// Walking the cache trees would be slow; the words we just processed are the
/// only ones whose markers this run could have touched.
pub fn negative_summary(words: &[String], cache: &CacheStore) -> (usize, usize) {
    let mut wikt = 0;
    let mut wiki = 0;
    for word in words {
        if cache.has_negative(Source::Wiktionary, word) {
            wikt += 1;
        }
        if cache.has_negative(Source::Wikipedia, word) {
            wiki += 1;
        }
    }
    (wikt, wiki)
}
