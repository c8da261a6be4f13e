//! Run configuration

use crate::Args;
use std::{num::NonZeroUsize, path::PathBuf, sync::Arc, time::Duration};

/// Final run configuration
///
/// This is the result of digesting [`Args`]: durations become [`Duration`]s,
/// defaults that depend on other options are resolved. Please refer to
/// [`Args`] to know more about individual fields.
#[allow(missing_docs)]
#[derive(Clone, Debug)]
pub struct Config {
    /// Word list path
    pub input: PathBuf,

    /// Where the output batch of records is written
    pub output: PathBuf,

    /// Cache tree roots, one per source
    pub wikt_cache_root: PathBuf,
    pub wiki_cache_root: PathBuf,

    /// Size of the worker pool
    pub workers: NonZeroUsize,

    // Rate limiter tuning
    pub rpm: u32,
    pub burst: u32,
    pub min_sleep: Duration,

    // Fetcher tuning
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,

    // Scheduler and reporting cadence
    pub heartbeat: Duration,
    pub future_timeout: Duration,
    pub checkpoint: usize,

    // Network stack behavior
    pub insecure: bool,
    pub ipv4_only: bool,
    pub user_agent: Box<str>,

    // Offline cache reindexing pass
    pub index_from_cache: bool,
    pub index_scan_limit: usize,
}
//
impl Config {
    /// Determine the run configuration from decoded CLI arguments
    pub(crate) fn new(args: Args) -> Arc<Self> {
        let burst = args.burst();
        let Args {
            input,
            output,
            wikt_cache_root,
            wiki_cache_root,
            workers,
            rpm,
            burst: _,
            min_sleep_ms,
            timeout,
            max_retries,
            backoff_base,
            heartbeat,
            future_timeout,
            checkpoint,
            insecure,
            ipv4,
            ua,
            index_from_cache,
            index_scan_limit,
        } = args;
        Arc::new(Self {
            input,
            output,
            wikt_cache_root,
            wiki_cache_root,
            workers,
            rpm,
            burst,
            min_sleep: Duration::from_millis(min_sleep_ms),
            request_timeout: Duration::from_secs_f64(timeout),
            max_retries,
            backoff_base: Duration::from_secs_f64(backoff_base),
            heartbeat: Duration::from_secs_f64(heartbeat),
            future_timeout: Duration::from_secs_f64(future_timeout),
            checkpoint,
            insecure,
            ipv4_only: ipv4,
            user_agent: ua.into(),
            index_from_cache,
            index_scan_limit,
        })
    }
}
