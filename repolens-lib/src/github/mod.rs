//! GitHub implementations of the pipeline's remote capabilities.
//!
//! [`GitHub`] lists repositories, analyzes them, and reads the quota, all through one
//! [`GitHubClient`] and one shared [`RateGovernor`].

mod analyzer;
mod client;
mod lister;
mod scoring;
mod tree_analysis;
mod types;

pub use client::{ApiError, DEFAULT_API_URL, Fetched, GitHubClient};
pub use scoring::{ScoreInputs, score};
pub use tree_analysis::TreeSummary;

use crate::Result;
use crate::pipeline::{CallGate, ListingError, MAX_RATE_LIMITED_ATTEMPTS, QuotaExhausted, QuotaSource, RateGovernor, RateState, RetryPolicy};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

const LOG_TARGET: &str = "    github";

/// Days without a commit after which a repository counts as inactive, unless configured.
pub const DEFAULT_INACTIVE_AFTER_DAYS: u32 = 180;

/// Access to one GitHub account through the REST API.
#[derive(Debug)]
pub struct GitHub {
    client: GitHubClient,
    governor: Arc<RateGovernor>,
    retry: RetryPolicy,
    inactive_after_days: u32,
    viewer: OnceCell<Option<String>>,
}

impl GitHub {
    #[must_use]
    pub fn new(client: GitHubClient, governor: Arc<RateGovernor>) -> Self {
        Self {
            client,
            governor,
            retry: RetryPolicy::default(),
            inactive_after_days: DEFAULT_INACTIVE_AFTER_DAYS,
            viewer: OnceCell::new(),
        }
    }

    /// Retry policy for listing calls. Analysis retries are driven by the worker pool.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_inactive_after_days(mut self, days: u32) -> Self {
        self.inactive_after_days = days;
        self
    }

    #[must_use]
    pub const fn client(&self) -> &GitHubClient {
        &self.client
    }

    /// Login of the token's owner, or `None` without a token.
    async fn viewer(&self) -> Result<Option<&str>, ListingError> {
        let viewer = self
            .viewer
            .get_or_try_init(|| async {
                if !self.client.is_authenticated() {
                    return Ok(None);
                }

                let user: types::User = self.fetch("the authenticated user", self.client.endpoint(&["user"])).await?.data;
                log::debug!(target: LOG_TARGET, "Authenticated as '{}'", user.login);
                Ok::<_, ListingError>(Some(user.login))
            })
            .await?;

        Ok(viewer.as_deref())
    }

    /// Fetch one page outside of any repository analysis.
    ///
    /// Transient failures are retried with the listing retry policy. Rate-limited responses
    /// are reported to the governor and tried again once it admits another call; too many in
    /// a row count as an exhausted quota.
    async fn fetch<T: DeserializeOwned>(&self, what: &str, url: Url) -> Result<Fetched<T>, ApiError> {
        let mut rate_limited = 0;
        loop {
            let gate = CallGate::unpaid(&self.governor);
            let result = self
                .retry
                .run(what, || self.client.get_json(&gate, url.clone()), ApiError::is_transient)
                .await;

            match result {
                Err(ApiError::RateLimited { retry_after, state }) => {
                    rate_limited += 1;
                    if rate_limited >= MAX_RATE_LIMITED_ATTEMPTS {
                        return Err(ApiError::QuotaExhausted(QuotaExhausted {
                            reason: format!("rate limited {rate_limited} times in a row while fetching {what}"),
                        }));
                    }

                    log::debug!(target: LOG_TARGET, "Rate limited while fetching {what}, trying again once the quota allows");
                    self.governor.rate_limited(retry_after, state);
                }
                result => return result,
            }
        }
    }
}

impl QuotaSource for GitHub {
    async fn fetch_rate_state(&self) -> Result<RateState> {
        self.client.fetch_rate_state().await
    }
}
