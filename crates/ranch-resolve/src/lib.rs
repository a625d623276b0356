//! Candidate-host webpage resolution: probes, bounded retries, per-run outcome cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "ranch-resolve";

pub const PROBE_RETRIES: u32 = 3;
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Existence verdict for one (host, path) URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Exists,
    NotFound,
    Inconclusive,
}

/// What a single wire-level check produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeAttempt {
    Status(u16),
    TimedOut,
    TransportFailed,
}

#[async_trait]
pub trait ProbeTransport: Send + Sync {
    async fn head(&self, url: &str) -> ProbeAttempt;
    async fn get(&self, url: &str) -> ProbeAttempt;
}

/// reqwest-backed transport; redirects are followed, each call carries its
/// own timeout.
#[derive(Debug)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        Self::with_timeout(user_agent, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(user_agent: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .build()?;
        Ok(Self { client, timeout })
    }

    async fn send(&self, method: reqwest::Method, url: &str) -> ProbeAttempt {
        let mut request = self.client.request(method.clone(), url).timeout(self.timeout);
        if method == reqwest::Method::GET {
            request = request.header(reqwest::header::ACCEPT, "text/html");
        }
        match request.send().await {
            Ok(response) => ProbeAttempt::Status(response.status().as_u16()),
            Err(err) if err.is_timeout() => ProbeAttempt::TimedOut,
            Err(_) => ProbeAttempt::TransportFailed,
        }
    }
}

#[async_trait]
impl ProbeTransport for HttpProbe {
    async fn head(&self, url: &str) -> ProbeAttempt {
        self.send(reqwest::Method::HEAD, url).await
    }

    async fn get(&self, url: &str) -> ProbeAttempt {
        self.send(reqwest::Method::GET, url).await
    }
}

/// Retry pacing for probes, kept pure so it is testable without I/O.
#[derive(Debug, Clone, Copy)]
pub struct ProbeBackoff {
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for ProbeBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(120),
            jitter: Duration::from_millis(80),
        }
    }
}

impl ProbeBackoff {
    /// Deterministic delay component after a failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt)
    }

    /// Full delay including the random jitter component.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    }
}

/// Terminal resolution failure; the record is dropped with this reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveFailure {
    BothNotFound,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub url: String,
    /// The pick could not be definitively confirmed; kept as a best guess.
    pub ambiguous: bool,
}

/// Probes two candidate hosts for a candidate path, caching conclusive
/// outcomes per fully-qualified URL for the resolver's lifetime (one run).
pub struct LinkResolver {
    transport: Arc<dyn ProbeTransport>,
    primary_base: String,
    secondary_base: String,
    backoff: ProbeBackoff,
    cache: Mutex<HashMap<String, ProbeOutcome>>,
}

impl LinkResolver {
    pub fn new(
        transport: Arc<dyn ProbeTransport>,
        primary_base: impl Into<String>,
        secondary_base: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            primary_base: trim_base(primary_base.into()),
            secondary_base: trim_base(secondary_base.into()),
            backoff: ProbeBackoff::default(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backoff(mut self, backoff: ProbeBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Cheapest check first: any non-404 HEAD status is existence. A GET
    /// then either confirms existence, returns a definitive 404, or fails;
    /// transport failures are retried with backoff. Only conclusive
    /// outcomes are cached -- `Inconclusive` must be re-probed on the next
    /// occurrence of the same URL.
    async fn probe(&self, url: &str) -> ProbeOutcome {
        if let Some(cached) = self.cache.lock().await.get(url) {
            return *cached;
        }

        for attempt in 1..=PROBE_RETRIES {
            if let ProbeAttempt::Status(status) = self.transport.head(url).await {
                if status != 404 {
                    self.cache
                        .lock()
                        .await
                        .insert(url.to_string(), ProbeOutcome::Exists);
                    return ProbeOutcome::Exists;
                }
            }

            match self.transport.get(url).await {
                ProbeAttempt::Status(404) => {
                    self.cache
                        .lock()
                        .await
                        .insert(url.to_string(), ProbeOutcome::NotFound);
                    return ProbeOutcome::NotFound;
                }
                ProbeAttempt::Status(_) => {
                    self.cache
                        .lock()
                        .await
                        .insert(url.to_string(), ProbeOutcome::Exists);
                    return ProbeOutcome::Exists;
                }
                ProbeAttempt::TimedOut | ProbeAttempt::TransportFailed => {}
            }

            if attempt < PROBE_RETRIES {
                tokio::time::sleep(self.backoff.jittered_delay(attempt)).await;
            }
        }

        debug!(url, "probe exhausted retries");
        ProbeOutcome::Inconclusive
    }

    /// Two-host resolution. The policy is asymmetric on purpose: when the
    /// primary host is merely inconclusive a best-guess URL is returned and
    /// flagged, but a confirmed miss on the primary requires certainty from
    /// the secondary.
    pub async fn resolve(&self, path: &str) -> Result<Resolved, ResolveFailure> {
        if path.is_empty() {
            return Err(ResolveFailure::BothNotFound);
        }

        let primary_url = format!("{}/{path}", self.primary_base);
        let secondary_url = format!("{}/{path}", self.secondary_base);

        match self.probe(&primary_url).await {
            ProbeOutcome::Exists => Ok(Resolved {
                url: primary_url,
                ambiguous: false,
            }),
            ProbeOutcome::Inconclusive => match self.probe(&secondary_url).await {
                ProbeOutcome::Exists => Ok(Resolved {
                    url: secondary_url,
                    ambiguous: false,
                }),
                ProbeOutcome::NotFound | ProbeOutcome::Inconclusive => Ok(Resolved {
                    url: primary_url,
                    ambiguous: true,
                }),
            },
            ProbeOutcome::NotFound => match self.probe(&secondary_url).await {
                ProbeOutcome::Exists => Ok(Resolved {
                    url: secondary_url,
                    ambiguous: false,
                }),
                ProbeOutcome::Inconclusive => Err(ResolveFailure::Inconclusive),
                ProbeOutcome::NotFound => Err(ResolveFailure::BothNotFound),
            },
        }
    }
}

fn trim_base(base: String) -> String {
    base.trim_end_matches('/').to_string()
}
