//! This module fetches candidate papers from the arXiv API.
use crate::atom::parse_feed;
use crate::common::{Paper, SortBy, SortOrder};
use crate::errors::FeedError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::store::PaperStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub const ARXIV_API_URL: &str = "http://export.arxiv.org/api/query";
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// arXiv sometimes answers 200 with a plain-text throttling message instead of a 429.
const RATE_LIMIT_MARKER: &str = "Rate exceeded";

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeedQuery {
    pub categories: BTreeSet<String>,
    pub max_results: usize,
    pub offset: usize,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

impl FeedQuery {
    pub fn new(categories: BTreeSet<String>, max_results: usize, offset: usize) -> Self {
        FeedQuery {
            categories,
            max_results,
            offset,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
        }
    }

    pub fn sorted(mut self, sort_by: SortBy, sort_order: SortOrder) -> Self {
        self.sort_by = sort_by;
        self.sort_order = sort_order;
        self
    }

    /// `cat:cs.AI OR cat:cs.LG ...`
    pub fn search_query(&self) -> String {
        self.categories
            .iter()
            .map(|c| format!("cat:{}", c))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

#[derive(Clone)]
pub struct FeedSource {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn PaperStore>,
    base_url: String,
    retry: RetryPolicy,
}

impl FeedSource {
    pub fn new(transport: Arc<dyn HttpTransport>, store: Arc<dyn PaperStore>) -> Self {
        FeedSource {
            transport,
            store,
            base_url: ARXIV_API_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn build_request(&self, query: &FeedQuery) -> HttpRequest {
        HttpRequest::get(&self.base_url, REQUEST_TIMEOUT)
            .query_param("search_query", &query.search_query())
            .query_param("start", &query.offset.to_string())
            .query_param("max_results", &query.max_results.to_string())
            .query_param("sortBy", query.sort_by.as_query_value())
            .query_param("sortOrder", query.sort_order.as_query_value())
    }

    async fn fetch_once(&self, query: &FeedQuery) -> Result<Vec<Paper>, FeedError> {
        let request = self.build_request(query);
        let response = self.transport.execute(request).await.map_err(|e| match e {
            TransportError::Timeout => FeedError::Network("request timed out".to_string()),
            TransportError::Network(message) => FeedError::Network(message),
        })?;
        check_response(&response)?;
        parse_feed(&response.body)
    }

    /// Fetches one page of papers, retrying with exponential backoff while rate limited.
    ///
    /// Unseen papers are inserted into the store; every parsed paper is returned,
    /// including ones the store already knew.
    pub async fn fetch(&self, query: &FeedQuery) -> Result<Vec<Paper>, FeedError> {
        if query.categories.is_empty() {
            return Err(FeedError::InvalidQuery);
        }

        let mut attempt = 0u32;
        let papers = loop {
            match self.fetch_once(query).await {
                Ok(papers) => break papers,
                Err(FeedError::RateLimited) if attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        "arXiv rate limit hit, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let inserted = self.store.insert_new_papers(&papers)?;
        info!(
            offset = query.offset,
            fetched = papers.len(),
            inserted,
            "Fetched arXiv papers"
        );
        Ok(papers)
    }
}

/// Normalizes both forms of throttling to `RateLimited`.
pub fn check_response(response: &HttpResponse) -> Result<(), FeedError> {
    if response.status == 429 {
        return Err(FeedError::RateLimited);
    }
    if !response.is_success() {
        debug!(status = response.status, "arXiv returned an error status");
        return Err(FeedError::Http(response.status));
    }
    // an Atom document is a real page, whatever its abstracts say
    let body = response.body.trim_start();
    let is_atom = body.starts_with("<?xml") || body.starts_with("<feed");
    if !is_atom && body.contains(RATE_LIMIT_MARKER) {
        return Err(FeedError::RateLimited);
    }
    Ok(())
}
