//! Check whether candidate words are attested on Wiktionary and Wikipedia,
//! caching every fetched page on disk so repeated runs over overlapping word
//! lists never re-issue network requests.

mod cache;
mod config;
mod fetch;
mod index;
mod limiter;
mod progress;
mod resolve;
mod scheduler;
mod source;
mod wordlist;

use crate::{
    cache::CacheStore,
    config::Config,
    fetch::{HttpFetcher, RunStats},
    limiter::TokenBucket,
    progress::ProgressReport,
};
use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use std::{num::NonZeroUsize, path::PathBuf, sync::Arc};

/// Browser-like default user agent
///
/// Both sources serve plain GET requests, but some edge caches are unfriendly
/// to obviously non-browser agents.
const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                          AppleWebKit/537.36 (KHTML, like Gecko) \
                          Chrome/120.0.0.0 Safari/537.36";

/// Resolve a word list against Wiktionary and Wikipedia
///
/// Words are read one per line from the input file. Every fetched page is
/// cached on disk, and failed fetches leave negative markers, so re-running
/// over the same cache roots only works on words that are not yet resolved.
#[derive(Parser, Debug)]
#[command(version, author)]
struct Args {
    /// Word list file, one word per line, blank lines ignored
    #[arg(short, long)]
    input: PathBuf,

    /// Where the JSON batch of this run's records is written
    #[arg(short, long, default_value = "results.json")]
    output: PathBuf,

    /// Cache tree root for Wiktionary pages
    #[arg(long, default_value = "cache/wiktionary_cache")]
    wikt_cache_root: PathBuf,

    /// Cache tree root for Wikipedia pages
    #[arg(long, default_value = "cache/wikipedia_cache")]
    wiki_cache_root: PathBuf,

    /// Number of parallel resolver workers
    ///
    /// The run is I/O bound: throughput comes from concurrent outstanding
    /// requests, up to the rate limit.
    #[arg(short, long, default_value = "4")]
    workers: NonZeroUsize,

    /// Aggregate request budget, in requests per minute, across all workers
    #[arg(long, default_value = "120")]
    rpm: u32,

    /// Burst capacity of the rate limiter's token bucket
    ///
    /// Defaults to twice the worker count.
    #[arg(long, default_value = None)]
    burst: Option<u32>,

    /// Minimum enforced sleep after each granted request, in milliseconds
    ///
    /// Smooths bursts that the token bucket would otherwise allow.
    #[arg(long, default_value = "25")]
    min_sleep_ms: u64,

    /// Per-request read timeout, in seconds
    #[arg(long, default_value = "8")]
    timeout: f64,

    /// Extra fetch attempts after the first, for retryable failures
    #[arg(long, default_value = "2")]
    max_retries: u32,

    /// Base delay of the exponential retry backoff, in seconds
    #[arg(long, default_value = "0.6")]
    backoff_base: f64,

    /// Progress heartbeat cadence, in seconds
    #[arg(long, default_value = "2")]
    heartbeat: f64,

    /// Age after which an unfinished task is abandoned during the final
    /// drain, in seconds
    #[arg(long, default_value = "300")]
    future_timeout: f64,

    /// Log a checkpoint line every this many newly completed records
    #[arg(long, default_value = "1000")]
    checkpoint: usize,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Restrict the transport to IPv4 addresses
    #[arg(long)]
    ipv4: bool,

    /// Custom user-agent header
    #[arg(long, default_value = DEFAULT_UA)]
    ua: String,

    /// Before fetching, re-scan cached Wikipedia pages for "no article"
    /// bodies and plant negative markers next to them
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    index_from_cache: bool,

    /// Cap on the number of cached pages the pre-scan reads
    #[arg(long, default_value = "5000")]
    index_scan_limit: usize,
}
//
impl Args {
    /// Decode and validate CLI arguments
    pub fn parse_and_check() -> Result<Self> {
        let args = Args::parse();
        anyhow::ensure!(args.rpm > 0, "a zero request budget would never fetch");
        anyhow::ensure!(
            args.heartbeat > 0.0,
            "the heartbeat cadence must be positive"
        );
        anyhow::ensure!(
            args.future_timeout > 0.0,
            "the stale-task timeout must be positive"
        );
        Ok(args)
    }

    /// Burst capacity, defaulted from the worker count
    pub fn burst(&self) -> u32 {
        self.burst
            .unwrap_or_else(|| (self.workers.get() * 2).max(1) as u32)
    }
}
//
#[tokio::main]
async fn main() -> Result<()> {
    // Set up logging
    setup_logging().map_err(|e| anyhow::format_err!("{e}"))?;

    // Decode CLI arguments
    let args = Args::parse_and_check()?;
    let config = Config::new(args);

    // Load the word list and open the cache
    let words = wordlist::load(&config.input)?;
    log::info!(
        "loaded {} words from {} | workers:{} rpm:{}",
        words.len(),
        config.input.display(),
        config.workers,
        config.rpm
    );
    let cache = Arc::new(CacheStore::new(
        &config.wikt_cache_root,
        &config.wiki_cache_root,
    )?);

    // Reclassify cached "no article" pages without touching the network
    if config.index_from_cache {
        let scan = index::mark_cached_no_articles(&words, &cache, config.index_scan_limit);
        log::info!(
            "index-from-cache: scanned={} marked={} (limit={})",
            scan.scanned,
            scan.marked,
            config.index_scan_limit
        );
    }

    // Set up progress reporting
    let report = ProgressReport::new(words.len());

    // Advisory pre-dispatch summaries: a sampled instant estimate, then the
    // exact baseline that the heartbeat percentage builds on
    if let Some((pct, samples)) = wordlist::sampled_baseline_estimate(&words, &cache) {
        report.note(format!(
            "Baseline cached (estimate): ~{pct:.2}% based on {samples} samples"
        ));
    }
    let summary = wordlist::resolution_summary(&words, &cache);
    log::info!(
        "enqueue: known={} (wikt-only:{} wiki-only:{}) unknown={}",
        summary.known,
        summary.wikt_only,
        summary.wiki_only,
        summary.unknown
    );
    let baseline = wordlist::exact_baseline(&words, &cache);
    report.note(format!(
        "Baseline cached: {baseline}/{} ({:.2}%)",
        words.len(),
        if words.is_empty() {
            100.0
        } else {
            baseline as f64 / words.len() as f64 * 100.0
        }
    ));

    // Shared state of the run: one rate limiter and one outcome histogram
    // for everyone, one connection-pooled HTTP client per worker slot
    let limiter = Arc::new(TokenBucket::new(
        config.rpm,
        config.burst,
        config.min_sleep,
    ));
    let stats = Arc::new(RunStats::new());
    let fetchers = (0..config.workers.get())
        .map(|_| HttpFetcher::new(&config, limiter.clone(), stats.clone()).map(Arc::new))
        .collect::<Result<Vec<_>>>()?;

    // Resolve everything that is not already resolved on disk
    let records = scheduler::run_words(
        &config,
        &words,
        &cache,
        &fetchers,
        &stats,
        &report,
        baseline,
    )
    .await;
    report.finish(stats.snapshot());

    // Persist this run's batch in one go
    let json = serde_json::to_vec_pretty(&records).context("serializing the output batch")?;
    tokio::fs::write(&config.output, json)
        .await
        .with_context(|| format!("writing output batch {}", config.output.display()))?;

    // Closing summaries
    log::info!(
        "baseline hits: {baseline}; new records written: {} ({})",
        records.len(),
        config.output.display()
    );
    let (wikt_miss, wiki_miss) = wordlist::negative_summary(&words, &cache);
    log::info!("negative-cache: wikt={wikt_miss} wiki={wiki_miss}");
    log::info!("outcome histogram: {}", stats.snapshot());
    Ok(())
}

/// Use anyhow for Result type erasure
pub use anyhow::Result;

/// Set up logging
fn setup_logging() -> syslog::Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        if cfg!(feature = "log-trace") {
            LevelFilter::Trace
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        None,
    )
}
