//! HTTP page fetching with retry, backoff and outcome classification

use crate::{config::Config, limiter::TokenBucket, Result};
use anyhow::Context;
use rand::Rng;
use std::{
    fmt,
    future::Future,
    net::{IpAddr, Ipv4Addr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

/// Sentinel status recorded when retries are exhausted without an HTTP status
const STATUS_EXHAUSTED: u16 = 599;

/// Upper bound of the random jitter added to each backoff sleep
const JITTER_MAX: Duration = Duration::from_millis(800);

/// Classified outcome of fetching one page
///
/// This is an ordinary value, not an error: a word failing to resolve at a
/// source is an expected result of a run, and flows back to the resolver as
/// data rather than unwinding through it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FetchOutcome {
    /// HTTP 200 with a page body
    Success(String),

    /// Terminal client/semantic failure, the word does not exist at this source
    Absent(u16),

    /// Retries exhausted on transient failures or transport errors
    Failed {
        /// Last HTTP status seen, or [`STATUS_EXHAUSTED`] if none
        status: u16,

        /// Human-readable description of the last failure
        detail: String,
    },
}
//
impl FetchOutcome {
    /// Reason text recorded in a negative-cache marker for this outcome
    pub fn miss_reason(&self) -> String {
        match self {
            Self::Success(_) => unreachable!("successful fetches never produce miss markers"),
            Self::Absent(status) => format!("http {status}"),
            Self::Failed { status, detail } => {
                if detail.is_empty() {
                    format!("http {status}")
                } else {
                    format!("http {status}: {detail}")
                }
            }
        }
    }
}

/// Something that can fetch a page and classify the outcome
///
/// The production implementation is [`HttpFetcher`]; tests substitute a
/// scripted one so the resolver and scheduler can be exercised without a
/// network.
pub trait FetchPage: Send + Sync {
    /// Fetch the page at `url`
    fn fetch(&self, url: &str) -> impl Future<Output = FetchOutcome> + Send;
}

/// Run-wide histogram of fetch and resolution outcomes
///
/// Shared by every worker and bumped on each classified outcome; the
/// heartbeat renders a snapshot of it. Plain atomic counters, no lock.
#[derive(Debug, Default)]
pub struct RunStats {
    /// Successful fetches
    ok: AtomicU64,

    /// HTTP 403 responses
    http_403: AtomicU64,

    /// HTTP 429 responses (individual attempts, before retries)
    http_429: AtomicU64,

    /// HTTP 503 responses (individual attempts, before retries)
    http_503: AtomicU64,

    /// Any other non-200 status
    other: AtomicU64,

    /// Cache hits that skipped the network entirely
    cache_hits: AtomicU64,

    /// Worker-local errors, transport failures and abandoned tasks
    errors: AtomicU64,
}
//
impl RunStats {
    /// Fresh histogram with all buckets at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt's HTTP status
    fn bump_status(&self, status: u16) {
        let bucket = match status {
            200 => &self.ok,
            403 => &self.http_403,
            429 => &self.http_429,
            503 => &self.http_503,
            _ => &self.other,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache hit
    pub fn bump_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a worker error, a transport failure or an abandoned task
    pub fn bump_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of errors recorded so far
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Number of cache hits recorded so far
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Point-in-time copy for display
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ok: self.ok.load(Ordering::Relaxed),
            http_403: self.http_403.load(Ordering::Relaxed),
            http_429: self.http_429.load(Ordering::Relaxed),
            http_503: self.http_503.load(Ordering::Relaxed),
            other: self.other.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Copy of the histogram at one point in time
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    pub ok: u64,
    pub http_403: u64,
    pub http_429: u64,
    pub http_503: u64,
    pub other: u64,
    pub cache_hits: u64,
    pub errors: u64,
}
//
impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ok:{} 403:{} 429:{} 503:{} other:{} cache:{} errors:{}",
            self.ok,
            self.http_403,
            self.http_429,
            self.http_503,
            self.other,
            self.cache_hits,
            self.errors
        )
    }
}

/// Page fetcher backed by one connection-pooled [`reqwest::Client`]
///
/// Each worker slot owns its own fetcher (and thus its own connection pool)
/// to avoid contention on the transport layer; only the rate limiter and the
/// histogram are shared.
#[derive(Debug)]
pub struct HttpFetcher {
    /// HTTP client owned by this worker slot
    client: reqwest::Client,

    /// Shared request rate limiter
    limiter: Arc<TokenBucket>,

    /// Shared outcome histogram
    stats: Arc<RunStats>,

    /// Number of retries after the initial attempt
    max_retries: u32,

    /// Base delay of the exponential backoff
    backoff_base: Duration,
}
//
impl HttpFetcher {
    /// Set up a fetcher for one worker slot
    pub fn new(config: &Config, limiter: Arc<TokenBucket>, stats: Arc<RunStats>) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            limiter,
            stats,
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
        })
    }

    /// Perform one GET attempt, returning the status and 200-only body
    async fn attempt(&self, url: &str) -> std::result::Result<(u16, String), reqwest::Error> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = if status == 200 {
            response.text().await?
        } else {
            String::new()
        };
        Ok((status, body))
    }
}
//
impl FetchPage for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let mut last_status = STATUS_EXHAUSTED;
        let mut last_detail = String::new();
        for attempt in 0..=self.max_retries {
            self.limiter.acquire().await;
            match self.attempt(url).await {
                Ok((200, body)) => {
                    self.stats.bump_status(200);
                    return FetchOutcome::Success(body);
                }
                Ok((status @ (429 | 503), _)) => {
                    self.stats.bump_status(status);
                    last_status = status;
                    last_detail.clear();
                    log::debug!("{url}: http {status} on attempt {attempt}, backing off");
                    tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
                }
                Ok((status, _)) if terminal_status(status) => {
                    self.stats.bump_status(status);
                    return FetchOutcome::Absent(status);
                }
                Ok((status, _)) => {
                    self.stats.bump_status(status);
                    last_status = status;
                    last_detail.clear();
                    log::debug!("{url}: unexpected http {status} on attempt {attempt}");
                    tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
                }
                Err(e) => {
                    // No HTTP status to bucket: transport failures count as
                    // errors, `other` stays a status histogram
                    self.stats.bump_error();
                    last_status = STATUS_EXHAUSTED;
                    last_detail = e.to_string();
                    log::debug!("{url}: transport error on attempt {attempt}: {e}");
                    tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
                }
            }
        }
        FetchOutcome::Failed {
            status: last_status,
            detail: last_detail,
        }
    }
}

/// Truth that a status means the word does not exist at the source
///
/// These are never retried: the response is a definitive "not here" (or a
/// refusal that retrying will not fix), and gets a negative-cache marker.
pub fn terminal_status(status: u16) -> bool {
    matches!(status, 400 | 401 | 403 | 404 | 410 | 451)
}

/// Exponential backoff with jitter: `base × 2^attempt + U(0, 0.8s)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(Duration::ZERO..JITTER_MAX);
    base.saturating_mul(1 << attempt.min(16)) + jitter
}

/// Build the HTTP client for one worker slot
///
/// Network-stack options (user agent, TLS verification, forced IPv4,
/// timeouts) are applied here, at client construction, rather than by
/// mutating any process-wide state.
fn build_client(config: &Config) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(&*config.user_agent)
        .connect_timeout(Duration::from_secs(5))
        .timeout(config.request_timeout)
        .redirect(reqwest::redirect::Policy::limited(10));
    if config.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if config.ipv4_only {
        // Binding to the unspecified v4 address restricts resolved addresses
        // to the v4 family
        builder = builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
    builder.build().context("building HTTP client")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_the_absence_class() {
        for status in [400, 401, 403, 404, 410, 451] {
            assert!(terminal_status(status), "{status} should be terminal");
        }
        for status in [200, 301, 429, 500, 503, 599] {
            assert!(!terminal_status(status), "{status} should not be terminal");
        }
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        let base = Duration::from_millis(600);
        for attempt in 0..4 {
            let delay = backoff_delay(base, attempt);
            let floor = base * (1 << attempt);
            assert!(delay >= floor);
            assert!(delay < floor + JITTER_MAX);
        }
    }

    #[test]
    fn miss_reasons_encode_the_status() {
        assert_eq!(FetchOutcome::Absent(404).miss_reason(), "http 404");
        assert_eq!(
            FetchOutcome::Failed {
                status: 599,
                detail: String::new()
            }
            .miss_reason(),
            "http 599"
        );
        assert_eq!(
            FetchOutcome::Failed {
                status: 599,
                detail: "connection reset".to_owned()
            }
            .miss_reason(),
            "http 599: connection reset"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_land_in_the_error_bucket() {
        let config = Config {
            input: "words.txt".into(),
            output: "out.json".into(),
            wikt_cache_root: "wikt".into(),
            wiki_cache_root: "wiki".into(),
            workers: std::num::NonZeroUsize::new(1).unwrap(),
            rpm: 6000,
            burst: 10,
            min_sleep: Duration::ZERO,
            request_timeout: Duration::from_secs(8),
            max_retries: 2,
            backoff_base: Duration::from_millis(600),
            heartbeat: Duration::from_secs(2),
            future_timeout: Duration::from_secs(300),
            checkpoint: 1000,
            insecure: false,
            ipv4_only: false,
            user_agent: "test".into(),
            index_from_cache: false,
            index_scan_limit: 5000,
        };
        let limiter = Arc::new(TokenBucket::new(config.rpm, config.burst, config.min_sleep));
        let stats = Arc::new(RunStats::new());
        let fetcher = HttpFetcher::new(&config, limiter, stats.clone()).unwrap();
        // A URL that cannot even be parsed fails in the client before any
        // connection is attempted, on every retry
        let outcome = fetcher.fetch("not a url").await;
        assert!(matches!(
            outcome,
            FetchOutcome::Failed {
                status: STATUS_EXHAUSTED,
                ..
            }
        ));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.errors, u64::from(config.max_retries) + 1);
        assert_eq!(snapshot.other, 0);
    }

    #[test]
    fn histogram_buckets_increment_independently() {
        let stats = RunStats::new();
        stats.bump_status(200);
        stats.bump_status(403);
        stats.bump_status(429);
        stats.bump_status(503);
        stats.bump_status(500);
        stats.bump_cache_hit();
        stats.bump_error();
        assert_eq!(
            stats.snapshot(),
            StatsSnapshot {
                ok: 1,
                http_403: 1,
                http_429: 1,
                http_503: 1,
                other: 1,
                cache_hits: 1,
                errors: 1,
            }
        );
    }
}

/// Scripted fetcher for exercising the resolver and scheduler without a network
#[cfg(test)]
pub(crate) mod testing {
    use super::{FetchOutcome, FetchPage};
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicU64, Ordering},
    };

    /// Fetcher that replays scripted outcomes keyed by URL
    #[derive(Debug, Default)]
    pub struct ScriptedFetcher {
        /// Outcome served for each known URL
        outcomes: HashMap<String, FetchOutcome>,

        /// Number of fetches performed
        calls: AtomicU64,

        /// If set, never complete any fetch
        hang: bool,
    }
    //
    impl ScriptedFetcher {
        pub fn new(outcomes: impl IntoIterator<Item = (String, FetchOutcome)>) -> Self {
            Self {
                outcomes: outcomes.into_iter().collect(),
                calls: AtomicU64::new(0),
                hang: false,
            }
        }

        /// Fetcher whose fetches never complete, for abandonment tests
        pub fn hanging() -> Self {
            Self {
                hang: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> u64 {
            self.calls.load(Ordering::Relaxed)
        }
    }
    //
    impl FetchPage for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> FetchOutcome {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.outcomes
                .get(url)
                .cloned()
                .unwrap_or(FetchOutcome::Absent(404))
        }
    }
}
