//! Sharded on-disk cache of fetched pages
//!
//! The cache is the durable state of the program: positive entries hold the
//! raw body of a successfully fetched page, negative markers record that a
//! fetch is known to fail so it is never re-attempted. Both survive process
//! restarts, which is what makes runs over large word lists resumable.
//!
//! Layout: `<root>/<2-char shard>/<sanitized word>_<8-hex hash>.html` for
//! positive entries, the same path plus `.{wikt|wiki}.miss` for negative
//! markers. Sharding by the word's leading characters bounds the number of
//! files per directory.

use crate::{source::Source, Result};
use anyhow::Context;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// On-disk page cache for both reference sources
///
/// Shared by path only: concurrent writers to different (source, word) pairs
/// never contend. A single concurrent run per cache root is assumed; two
/// processes racing to write the same pair is not defended against.
#[derive(Clone, Debug)]
pub struct CacheStore {
    /// Cache tree root for the dictionary source
    wikt_root: PathBuf,

    /// Cache tree root for the encyclopedia source
    wiki_root: PathBuf,
}
//
impl CacheStore {
    /// Open a cache store, creating the root directories if needed
    pub fn new(wikt_root: impl Into<PathBuf>, wiki_root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            wikt_root: wikt_root.into(),
            wiki_root: wiki_root.into(),
        };
        for root in [&store.wikt_root, &store.wiki_root] {
            fs::create_dir_all(root)
                .with_context(|| format!("creating cache root {}", root.display()))?;
        }
        Ok(store)
    }

    /// Cache tree root for one source
    fn root(&self, source: Source) -> &Path {
        match source {
            Source::Wiktionary => &self.wikt_root,
            Source::Wikipedia => &self.wiki_root,
        }
    }

    /// Path of the positive cache entry for a (source, word) pair
    pub fn entry_path(&self, source: Source, word: &str) -> PathBuf {
        let mut path = self.root(source).join(shard_key(word));
        path.push(format!("{}.html", file_stem(word)));
        path
    }

    /// Path of the negative marker for a (source, word) pair
    pub fn miss_path(&self, source: Source, word: &str) -> PathBuf {
        let mut path = self.root(source).join(shard_key(word));
        path.push(format!("{}.html.{}.miss", file_stem(word), source.miss_tag()));
        path
    }

    /// Truth that a positive entry exists (existence check only, no read)
    pub fn has_entry(&self, source: Source, word: &str) -> bool {
        self.entry_path(source, word).exists()
    }

    /// Truth that a negative marker exists
    pub fn has_negative(&self, source: Source, word: &str) -> bool {
        self.miss_path(source, word).exists()
    }

    /// Read a cached page body
    pub fn read_entry(&self, source: Source, word: &str) -> Result<String> {
        let path = self.entry_path(source, word);
        fs::read_to_string(&path)
            .with_context(|| format!("reading cached page {}", path.display()))
    }

    /// Persist a fetched page body
    ///
    /// Atomic with respect to concurrent readers: the body is written to a
    /// temporary file in the destination's shard directory, flushed, then
    /// renamed into place. A reader polling the destination sees either
    /// nothing or the complete body, never a truncated one.
    pub fn write_entry(&self, source: Source, word: &str, body: &str) -> Result<()> {
        let path = self.entry_path(source, word);
        let dir = path
            .parent()
            .expect("cache entry paths always have a shard directory parent");
        fs::create_dir_all(dir)
            .with_context(|| format!("creating cache shard {}", dir.display()))?;
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        tmp.write_all(body.as_bytes())
            .and_then(|()| tmp.flush())
            .with_context(|| format!("writing cached page for {word:?}"))?;
        tmp.persist(&path)
            .with_context(|| format!("publishing cached page {}", path.display()))?;
        Ok(())
    }

    /// Record that a (source, word) fetch is known to fail
    ///
    /// The marker is a small single-write file, so no atomicity dance is
    /// needed. It may legitimately sit next to a positive entry for the same
    /// pair, e.g. when a cached encyclopedia body turns out to be a "no
    /// article" page.
    pub fn write_negative(&self, source: Source, word: &str, reason: &str) -> Result<()> {
        let path = self.miss_path(source, word);
        let dir = path
            .parent()
            .expect("miss marker paths always have a shard directory parent");
        fs::create_dir_all(dir)
            .with_context(|| format!("creating cache shard {}", dir.display()))?;
        fs::write(&path, reason)
            .with_context(|| format!("writing miss marker {}", path.display()))?;
        Ok(())
    }

    /// Truth that one source is resolved for a word, positively or negatively
    pub fn source_resolved(&self, source: Source, word: &str) -> bool {
        self.has_entry(source, word) || self.has_negative(source, word)
    }

    /// Truth that a word needs no network work at all this run
    pub fn fully_resolved(&self, word: &str) -> bool {
        Source::RESOLUTION_ORDER
            .iter()
            .all(|&source| self.source_resolved(source, word))
    }

    /// Truth that both sources hold a positive entry for a word
    ///
    /// This is the cheap existence check behind the baseline count: such
    /// words were completely fetched by a previous run.
    pub fn fully_cached(&self, word: &str) -> bool {
        Source::RESOLUTION_ORDER
            .iter()
            .all(|&source| self.has_entry(source, word))
    }
}

/// Shard subdirectory for a word: its first two characters, lower-cased
///
/// One character if the word is that short, `_` if there is nothing usable.
fn shard_key(word: &str) -> String {
    let key = word.chars().take(2).collect::<String>().to_lowercase();
    if key.is_empty() {
        "_".to_owned()
    } else {
        key
    }
}

/// File name stem for a word: sanitized text plus a short hash of the raw word
///
/// The hash disambiguates words that sanitize to the same string and keeps
/// names unique without depending on the sanitized text alone.
fn file_stem(word: &str) -> String {
    let sanitized = word
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || (c as u32) < 0x20
            {
                '_'
            } else {
                c
            }
        })
        .collect::<String>();
    let sanitized = sanitized.trim_matches('.');
    let hash = blake3::hash(word.as_bytes()).to_hex();
    format!("{sanitized}_{}", &hash.as_str()[..8])
}
