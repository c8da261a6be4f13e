//! Per-word resolution against both reference sources

use crate::{
    cache::CacheStore,
    fetch::{FetchOutcome, FetchPage, RunStats},
    source::{self, Source},
    Result,
};
use serde::Serialize;

/// Outcome of resolving one word, as emitted in the output batch
///
/// Only words that needed resolution work this run produce a record; words
/// that were already fully resolved are represented by their cache state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WordReport {
    /// The word, as it appeared in the input list
    pub word: String,

    /// Truth that the dictionary source attests this as an English word
    pub is_english: bool,

    /// Part-of-speech anchors found on the dictionary page, in anchor order
    pub pos: Vec<&'static str>,

    /// Truth that the encyclopedia has an actual article for this word
    pub wikipedia_present: bool,

    /// Description of a resolution failure, if one occurred
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
//
impl WordReport {
    /// Record for a word whose resolution failed outright
    fn errored(word: String, error: String) -> Self {
        Self {
            word,
            is_english: false,
            pos: Vec::new(),
            wikipedia_present: false,
            error: Some(error),
        }
    }
}

/// Resolve one word against both sources and derive its verdict
///
/// This is the whole job of one worker task. Any error along the way is
/// converted into an error-bearing record here, at the worker boundary:
/// one word failing must never take the pool down with it.
pub async fn resolve_word(
    word: &str,
    cache: &CacheStore,
    fetcher: &impl FetchPage,
    stats: &RunStats,
) -> WordReport {
    match try_resolve_word(word, cache, fetcher, stats).await {
        Ok(report) => report,
        Err(e) => {
            stats.bump_error();
            log::warn!("worker error for {word:?}: {e:#}");
            WordReport::errored(word.to_owned(), format!("{e:#}"))
        }
    }
}

/// Fallible inner body of [`resolve_word`]
async fn try_resolve_word(
    word: &str,
    cache: &CacheStore,
    fetcher: &impl FetchPage,
    stats: &RunStats,
) -> Result<WordReport> {
    // Dictionary source first, always
    let wikt_body = resolve_source(Source::Wiktionary, word, cache, fetcher, stats).await?;
    let pos = source::parts_of_speech(wikt_body.as_deref().unwrap_or(""));

    let wiki_body = resolve_source(Source::Wikipedia, word, cache, fetcher, stats).await?;

    // Wikipedia serves "no article with this name" pages with HTTP 200, so a
    // body that came back (or was cached) still needs a content check before
    // it can count as presence
    let wikipedia_present = match &wiki_body {
        Some(body) if source::is_no_article(body) => {
            cache.write_negative(Source::Wikipedia, word, "noarticle")?;
            false
        }
        Some(body) => source::has_article_content(body),
        None => false,
    };

    Ok(WordReport {
        word: word.to_owned(),
        is_english: !pos.is_empty(),
        pos,
        wikipedia_present,
        error: None,
    })
}

/// Resolve one source for one word, returning its page body if there is one
///
/// Cache first, then the negative cache, then the network. The negative-cache
/// decision is strictly a function of this source's own fetch outcome.
async fn resolve_source(
    source: Source,
    word: &str,
    cache: &CacheStore,
    fetcher: &impl FetchPage,
    stats: &RunStats,
) -> Result<Option<String>> {
    if cache.has_entry(source, word) {
        stats.bump_cache_hit();
        return cache.read_entry(source, word).map(Some);
    }
    if cache.has_negative(source, word) {
        return Ok(None);
    }
    match fetcher.fetch(&source.url_for(word)).await {
        FetchOutcome::Success(body) if !body.is_empty() => {
            cache.write_entry(source, word, &body)?;
            Ok(Some(body))
        }
        // A 200 with an empty body is not worth caching, and not worth a
        // negative marker either: let a future run retry it
        FetchOutcome::Success(_) => Ok(None),
        outcome => {
            cache.write_negative(source, word, &outcome.miss_reason())?;
            Ok(None)
        }
    }
}
