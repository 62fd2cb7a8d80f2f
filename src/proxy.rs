use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use reqwest::StatusCode;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    config::{ProxyConfig, ProxyListQuery},
    error::ResolveError,
};

/// A `scheme://host:port` proxy taken from the provider list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCandidate(String);

impl ProxyCandidate {
    /// Accepts a list line when it starts with `http` once trimmed.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.starts_with("http") {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candidates in list order. Duplicates are kept.
pub fn parse_candidates(body: &str) -> Vec<ProxyCandidate> {
    body.lines().filter_map(ProxyCandidate::parse).collect()
}

#[async_trait]
pub trait ProxyListSource: Send + Sync {
    async fn fetch(&self) -> Result<String, ResolveError>;
}

#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// `true` only when the echo endpoint answered 200 through `candidate`.
    async fn probe(&self, candidate: &ProxyCandidate) -> bool;
}

/// Plaintext list provider queried over HTTP.
pub struct HttpProxyList {
    url: Url,
    query: ProxyListQuery,
    timeout: Duration,
}

impl HttpProxyList {
    pub fn new(url: Url, query: ProxyListQuery, timeout: Duration) -> Self {
        Self {
            url,
            query,
            timeout,
        }
    }

    fn query_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("request", "displayproxies".to_string()),
            ("proxy_format", "protocolipport".to_string()),
            ("timeout", self.query.timeout_ms.to_string()),
            ("country", self.query.country.clone()),
            ("ssl", self.query.ssl.clone()),
            ("anonymity", self.query.anonymity.clone()),
            ("format", "text".to_string()),
        ]
    }
}

#[async_trait]
impl ProxyListSource for HttpProxyList {
    async fn fetch(&self) -> Result<String, ResolveError> {
        info!("Requesting proxy list from {}", self.url);
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| ResolveError::ProxyList(format!("could not build HTTP client: {error}")))?;
        let response = client
            .get(self.url.clone())
            .query(&self.query_params())
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    ResolveError::ProxyList(format!(
                        "provider did not answer within {}s",
                        self.timeout.as_secs_f32()
                    ))
                } else {
                    ResolveError::ProxyList(error.to_string())
                }
            })?;

        let status = response.status();
        debug!(%status, headers = ?response.headers(), "proxy list response");
        if !status.is_success() {
            return Err(ResolveError::ProxyList(format!(
                "provider returned status {status}"
            )));
        }

        response
            .text()
            .await
            .map_err(|error| ResolveError::ProxyList(error.to_string()))
    }
}

/// Liveness check that routes a GET to a fixed echo endpoint through the candidate.
pub struct HttpProbe {
    url: Url,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self { url, timeout }
    }
}

#[async_trait]
impl ProxyProbe for HttpProbe {
    async fn probe(&self, candidate: &ProxyCandidate) -> bool {
        debug!("Checking proxy {candidate}");

        let proxy = match reqwest::Proxy::all(candidate.as_str()) {
            Ok(proxy) => proxy,
            Err(error) => {
                warn!("Proxy {candidate} is not usable: {error}");
                return false;
            }
        };
        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(self.timeout)
            .build()
        {
            Ok(client) => client,
            Err(error) => {
                warn!("Could not build probe client for {candidate}: {error}");
                return false;
            }
        };

        match client.get(self.url.clone()).send().await {
            Ok(response) => {
                debug!(status = %response.status(), headers = ?response.headers(), "probe response via {candidate}");
                response.status() == StatusCode::OK
            }
            Err(error) => {
                warn!("Proxy check failed for {candidate}: {error}");
                false
            }
        }
    }
}

/// Finds the first working proxy from a freshly fetched list.
pub struct ProxyAcquirer {
    source: Arc<dyn ProxyListSource>,
    probe: Arc<dyn ProxyProbe>,
    delay: Duration,
    concurrency: usize,
}

impl ProxyAcquirer {
    pub fn new(source: Arc<dyn ProxyListSource>, probe: Arc<dyn ProxyProbe>) -> Self {
        Self {
            source,
            probe,
            delay: Duration::from_secs(1),
            concurrency: 1,
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        let source = HttpProxyList::new(
            config.list_url.clone(),
            config.query.clone(),
            config.list_fetch_timeout,
        );
        let probe = HttpProbe::new(config.probe_url.clone(), config.probe_timeout);
        Self::new(Arc::new(source), Arc::new(probe))
            .with_delay(config.probe_delay)
            .with_concurrency(config.probe_concurrency)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Values above 1 probe in parallel and skip the pacing delay.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn acquire(&self) -> Result<ProxyCandidate, ResolveError> {
        let body = self.source.fetch().await?;
        if body.trim().is_empty() {
            return Err(ResolveError::ProxyList("empty response".to_string()));
        }

        let candidates = parse_candidates(&body);
        info!("Proxy list returned {} candidates", candidates.len());

        let found = if self.concurrency > 1 {
            self.scan_parallel(candidates).await
        } else {
            self.scan_sequential(candidates).await
        };

        match found {
            Some(candidate) => {
                info!("Using proxy {candidate}");
                Ok(candidate)
            }
            None => Err(ResolveError::NoProxyAvailable),
        }
    }

    async fn scan_sequential(&self, candidates: Vec<ProxyCandidate>) -> Option<ProxyCandidate> {
        for (index, candidate) in candidates.into_iter().enumerate() {
            if index > 0 {
                sleep(self.delay).await;
            }
            if self.probe.probe(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn scan_parallel(&self, candidates: Vec<ProxyCandidate>) -> Option<ProxyCandidate> {
        let probe = &self.probe;
        // `buffered` yields in input order, so the earliest healthy entry wins.
        let mut results = stream::iter(candidates)
            .map(move |candidate| async move {
                let healthy = probe.probe(&candidate).await;
                (candidate, healthy)
            })
            .buffered(self.concurrency);

        while let Some((candidate, healthy)) = results.next().await {
            if healthy {
                return Some(candidate);
            }
        }
        None
    }
}
