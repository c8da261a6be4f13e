//! Reference sources that a word is checked against

use std::fmt;

/// External reference source for word attestation
///
/// Each source has its own URL scheme, its own on-disk cache tree and its own
/// negative-marker suffix, so outcomes from one source never shadow the other.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Source {
    /// Dictionary-style source, used to decide whether a word is English
    Wiktionary,

    /// Encyclopedia-style source, used to decide whether a word has an article
    Wikipedia,
}
//
impl Source {
    /// All sources, in the order they are resolved for each word
    ///
    /// The dictionary source always comes first: its verdict is the primary
    /// output, and resolving it first keeps negative-cache decisions for each
    /// source a function of that source's own fetch outcome only.
    pub const RESOLUTION_ORDER: [Source; 2] = [Source::Wiktionary, Source::Wikipedia];

    /// URL of the page for a given word
    ///
    /// Words are lower-cased here, and only here: cache paths are keyed by the
    /// word as it appears in the input list.
    pub fn url_for(&self, word: &str) -> String {
        let word = word.to_lowercase();
        match self {
            Source::Wiktionary => format!("https://en.wiktionary.org/wiki/{word}"),
            Source::Wikipedia => format!("https://en.wikipedia.org/wiki/{word}"),
        }
    }

    /// Short tag used in negative-marker file names (`.wikt.miss`, `.wiki.miss`)
    pub fn miss_tag(&self) -> &'static str {
        match self {
            Source::Wiktionary => "wikt",
            Source::Wikipedia => "wiki",
        }
    }
}
//
impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Source::Wiktionary => "wiktionary",
            Source::Wikipedia => "wikipedia",
        })
    }
}

/// Part-of-speech section anchors that mark a Wiktionary page as English
const POS_ANCHORS: [&str; 4] = ["Noun", "Verb", "Adjective", "Adverb"];

/// Part-of-speech anchors present in a Wiktionary page body
///
/// We only detect the presence of known section anchors, we do not parse the
/// markup. Both quoting styles occur in the wild.
pub fn parts_of_speech(html: &str) -> Vec<&'static str> {
    if html.is_empty() {
        return Vec::new();
    }
    POS_ANCHORS
        .iter()
        .copied()
        .filter(|pos| {
            html.contains(&format!("id=\"{pos}\"")) || html.contains(&format!("id='{pos}'"))
        })
        .collect()
}

/// Truth that a Wikipedia page body carries actual article content
pub fn has_article_content(html: &str) -> bool {
    html.contains("mw-content-text")
}

/// Truth that a Wikipedia page body is a "no article with this name" page
///
/// Wikipedia serves these with HTTP 200, so status-based classification never
/// catches them. A page without the main-content marker is treated the same
/// way, which also reclassifies truncated or redirect-stub bodies.
pub fn is_no_article(html: &str) -> bool {
    html.contains("id=\"noarticletext\"") || !has_article_content(html)
}
