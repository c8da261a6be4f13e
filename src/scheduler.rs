//! Worker pool driving word resolutions with backpressure
//!
//! Words stream from the input list into resolver tasks. The set of
//! dispatched-but-unfinished tasks is bounded at twice the worker count:
//! at the bound, dispatch stops and the backlog is polled until a slot
//! frees up. Once everything is dispatched, a final drain collects the
//! stragglers. In both phases, a task that outlives the future-timeout is
//! abandoned, so one stuck fetch can never wedge the run.

use crate::{
    cache::CacheStore,
    config::Config,
    fetch::{FetchPage, RunStats},
    progress::ProgressReport,
    resolve::{self, WordReport},
};
use std::{collections::VecDeque, sync::Arc};
use tokio::{
    task::JoinHandle,
    time::{self, Duration, Instant},
};

/// How long to poll the oldest task for while dispatch is paused
const BACKPRESSURE_POLL: Duration = Duration::from_millis(10);

/// One dispatched, not yet collected resolver task
struct InFlight {
    /// Word being resolved, for abandonment logging and error records
    word: String,

    /// When the task was dispatched
    started: Instant,

    /// Handle on which the task's record is collected
    handle: JoinHandle<WordReport>,
}

/// Resolve a word list through a bounded pool, returning this run's records
///
/// Words that are already fully resolved on disk are skipped without
/// consuming a worker slot; they are represented by `baseline` in the
/// progress readout, not by records. Completion order is arbitrary, so the
/// output batch order need not match input order.
pub async fn run_words<F: FetchPage + 'static>(
    config: &Config,
    words: &[String],
    cache: &Arc<CacheStore>,
    fetchers: &[Arc<F>],
    stats: &Arc<RunStats>,
    report: &ProgressReport,
    baseline: usize,
) -> Vec<WordReport> {
    assert!(!fetchers.is_empty(), "the pool needs at least one fetcher");
    let max_inflight = config.workers.get() * 2;
    let drain_poll = config.heartbeat.max(Duration::from_millis(100));
    let mut inflight = VecDeque::<InFlight>::new();
    let mut results = Vec::new();
    let mut dispatched = 0usize;
    let mut last_beat = Instant::now();

    // Dispatch phase
    for word in words {
        if cache.fully_resolved(word) {
            continue;
        }

        // At the bound, dispatch stops until polling the backlog frees a slot
        while inflight.len() >= max_inflight {
            poll_oldest(&mut inflight, BACKPRESSURE_POLL, config, &mut results, stats).await;
            heartbeat(
                config,
                report,
                stats,
                &mut last_beat,
                baseline + results.len(),
                inflight.len(),
            );
        }

        inflight.push_back(dispatch(
            word.clone(),
            cache,
            &fetchers[dispatched % fetchers.len()],
            stats,
        ));
        dispatched += 1;
        heartbeat(
            config,
            report,
            stats,
            &mut last_beat,
            baseline + results.len(),
            inflight.len(),
        );
    }

    // Final drain
    while !inflight.is_empty() {
        poll_oldest(&mut inflight, drain_poll, config, &mut results, stats).await;
        heartbeat(
            config,
            report,
            stats,
            &mut last_beat,
            baseline + results.len(),
            inflight.len(),
        );
    }
    results
}

/// Poll the oldest in-flight task for a bounded time
///
/// Collects the task if it finished, abandons it if it has outlived the
/// future-timeout, and otherwise sends it to the back of the queue so every
/// straggler gets polled in rotation.
async fn poll_oldest(
    inflight: &mut VecDeque<InFlight>,
    poll: Duration,
    config: &Config,
    results: &mut Vec<WordReport>,
    stats: &RunStats,
) {
    let Some(mut task) = inflight.pop_front() else {
        return;
    };
    match time::timeout(poll, &mut task.handle).await {
        Ok(joined) => collect(task.word, joined, results, config, stats),
        Err(_still_running) => {
            let age = task.started.elapsed();
            if age > config.future_timeout {
                // Best effort: the underlying fetch may still complete,
                // its result is simply never collected
                stats.bump_error();
                log::warn!(
                    "stale task: dropping {:?} after {:.1}s",
                    task.word,
                    age.as_secs_f64()
                );
                task.handle.abort();
            } else {
                inflight.push_back(task);
            }
        }
    }
}

/// Spawn one resolver task
fn dispatch<F: FetchPage + 'static>(
    word: String,
    cache: &Arc<CacheStore>,
    fetcher: &Arc<F>,
    stats: &Arc<RunStats>,
) -> InFlight {
    let cache = cache.clone();
    let fetcher = fetcher.clone();
    let stats = stats.clone();
    let task_word = word.clone();
    InFlight {
        word,
        started: Instant::now(),
        handle: tokio::spawn(async move {
            resolve::resolve_word(&task_word, &cache, fetcher.as_ref(), &stats).await
        }),
    }
}

/// Fold one joined task into the result batch
///
/// A panicked or cancelled task still yields a record, carrying the join
/// error: resolution failure for one word never aborts the run.
fn collect(
    word: String,
    joined: Result<WordReport, tokio::task::JoinError>,
    results: &mut Vec<WordReport>,
    config: &Config,
    stats: &RunStats,
) {
    match joined {
        Ok(record) => results.push(record),
        Err(e) => {
            stats.bump_error();
            log::warn!("resolver task for {word:?} died: {e}");
            results.push(WordReport {
                word,
                is_english: false,
                pos: Vec::new(),
                wikipedia_present: false,
                error: Some(format!("task failed: {e}")),
            });
        }
    }
    if config.checkpoint > 0 && results.len() % config.checkpoint == 0 {
        log::info!("checkpoint: {} new records so far", results.len());
    }
}

/// Emit a heartbeat if the cadence says it is due
fn heartbeat(
    config: &Config,
    report: &ProgressReport,
    stats: &RunStats,
    last_beat: &mut Instant,
    words_done: usize,
    inflight: usize,
) {
    if last_beat.elapsed() >= config.heartbeat {
        report.heartbeat(words_done, inflight, stats.snapshot());
        *last_beat = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fetch::{testing::ScriptedFetcher, FetchOutcome},
        source::Source,
    };
    use std::{
        num::NonZeroUsize,
        sync::atomic::{AtomicUsize, Ordering},
    };
    use tempfile::TempDir;

    const ARTICLE: &str = r#"<div id="mw-content-text">An article</div>"#;
    const NOUN_PAGE: &str = r#"<span id="Noun">Noun</span>"#;

    /// Fetcher that parks every fetch for a while, tracking peak concurrency
    #[derive(Debug, Default)]
    struct SlowFetchGauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }
    //
    impl FetchPage for SlowFetchGauge {
        async fn fetch(&self, _url: &str) -> FetchOutcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            time::sleep(Duration::from_secs(1)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            FetchOutcome::Absent(404)
        }
    }

    fn test_config() -> Config {
        Config {
            input: "words.txt".into(),
            output: "out.json".into(),
            wikt_cache_root: "wikt".into(),
            wiki_cache_root: "wiki".into(),
            workers: NonZeroUsize::new(4).unwrap(),
            rpm: 6000,
            burst: 8,
            min_sleep: Duration::ZERO,
            request_timeout: Duration::from_secs(8),
            max_retries: 2,
            backoff_base: Duration::from_millis(600),
            heartbeat: Duration::from_secs(1),
            future_timeout: Duration::from_secs(2),
            checkpoint: 1000,
            insecure: false,
            ipv4_only: false,
            user_agent: "test".into(),
            index_from_cache: false,
            index_scan_limit: 5000,
        }
    }

    fn test_store() -> (TempDir, Arc<CacheStore>) {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::new(dir.path().join("wikt"), dir.path().join("wiki")).unwrap();
        (dir, Arc::new(store))
    }

    fn scripted_for(words: &[&str]) -> Arc<ScriptedFetcher> {
        Arc::new(ScriptedFetcher::new(words.iter().flat_map(|word| {
            [
                (
                    Source::Wiktionary.url_for(word),
                    FetchOutcome::Success(NOUN_PAGE.to_owned()),
                ),
                (
                    Source::Wikipedia.url_for(word),
                    FetchOutcome::Success(ARTICLE.to_owned()),
                ),
            ]
        })))
    }

    fn owned(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| (*w).to_owned()).collect()
    }

    #[tokio::test]
    async fn pool_resolves_every_word() {
        let config = test_config();
        let (_dir, cache) = test_store();
        let words = (0..25).map(|i| format!("word{i}")).collect::<Vec<_>>();
        let word_refs = words.iter().map(String::as_str).collect::<Vec<_>>();
        let fetchers = vec![scripted_for(&word_refs)];
        let stats = Arc::new(RunStats::new());
        let report = ProgressReport::hidden(words.len());
        let mut results =
            run_words(&config, &words, &cache, &fetchers, &stats, &report, 0).await;
        assert_eq!(results.len(), words.len());
        // Completion order is arbitrary, membership is not
        results.sort_by(|a, b| a.word.cmp(&b.word));
        let mut expected = words.clone();
        expected.sort();
        assert_eq!(
            results.iter().map(|r| r.word.clone()).collect::<Vec<_>>(),
            expected
        );
        assert!(results.iter().all(|r| r.is_english && r.wikipedia_present));
    }

    #[tokio::test]
    async fn second_run_issues_zero_fetches() {
        let config = test_config();
        let (_dir, cache) = test_store();
        let words = owned(&["cat", "dog", "zzxqqv"]);
        // "zzxqqv" is unknown to the script, so it resolves as absent/absent
        let fetchers = vec![scripted_for(&["cat", "dog"])];
        let stats = Arc::new(RunStats::new());
        let report = ProgressReport::hidden(words.len());
        let results =
            run_words(&config, &words, &cache, &fetchers, &stats, &report, 0).await;
        assert_eq!(results.len(), 3);

        // Every word is now fully resolved on disk, positively or negatively
        let fetchers = vec![Arc::new(ScriptedFetcher::default())];
        let stats = Arc::new(RunStats::new());
        let results =
            run_words(&config, &words, &cache, &fetchers, &stats, &report, 2).await;
        assert!(results.is_empty());
        assert_eq!(fetchers[0].calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_task_is_abandoned_and_counted_once() {
        let config = test_config();
        let (_dir, cache) = test_store();
        let words = owned(&["stuck"]);
        let fetchers = vec![Arc::new(ScriptedFetcher::hanging())];
        let stats = Arc::new(RunStats::new());
        let report = ProgressReport::hidden(1);
        let results =
            run_words(&config, &words, &cache, &fetchers, &stats, &report, 0).await;
        // The drain loop terminated, the word produced no record, and the
        // abandonment was counted exactly once
        assert!(results.is_empty());
        assert_eq!(stats.errors(), 1);
        // The word stays unresolved, so the next run will retry it
        assert!(!cache.fully_resolved("stuck"));
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_pauses_at_the_inflight_bound() {
        let config = test_config();
        let (_dir, cache) = test_store();
        let words = (0..30).map(|i| format!("word{i}")).collect::<Vec<_>>();
        let fetchers = vec![Arc::new(SlowFetchGauge::default())];
        let stats = Arc::new(RunStats::new());
        let report = ProgressReport::hidden(words.len());
        let results =
            run_words(&config, &words, &cache, &fetchers, &stats, &report, 0).await;
        assert_eq!(results.len(), 30);
        assert!(results.iter().all(|r| !r.is_english));
        // Dispatch must hold the line at workers * 2, not just slow down
        let peak = fetchers[0].peak.load(Ordering::SeqCst);
        assert!(
            peak <= config.workers.get() * 2,
            "{peak} tasks ran concurrently"
        );
    }

    #[tokio::test]
    async fn mixed_outcomes_all_produce_records() {
        let config = test_config();
        let (_dir, cache) = test_store();
        // One attested word, one absent word, one with a pre-existing
        // dictionary miss marker
        cache
            .write_negative(Source::Wiktionary, "half", "http 404")
            .unwrap();
        let words = owned(&["cat", "zzxqqv", "half"]);
        let fetchers = vec![Arc::new(ScriptedFetcher::new([
            (
                Source::Wiktionary.url_for("cat"),
                FetchOutcome::Success(NOUN_PAGE.to_owned()),
            ),
            (
                Source::Wikipedia.url_for("cat"),
                FetchOutcome::Success(ARTICLE.to_owned()),
            ),
            (
                Source::Wikipedia.url_for("half"),
                FetchOutcome::Success(ARTICLE.to_owned()),
            ),
        ]))];
        let stats = Arc::new(RunStats::new());
        let report = ProgressReport::hidden(words.len());
        let mut results =
            run_words(&config, &words, &cache, &fetchers, &stats, &report, 0).await;
        results.sort_by(|a, b| a.word.cmp(&b.word));
        assert_eq!(results.len(), 3);
        let by_word = |w: &str| results.iter().find(|r| r.word == w).unwrap();
        assert!(by_word("cat").is_english);
        assert!(!by_word("zzxqqv").is_english);
        assert!(!by_word("half").is_english);
        assert!(by_word("half").wikipedia_present);
    }
}
