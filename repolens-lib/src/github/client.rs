//! GitHub API client
//!
//! Thin client over the GitHub REST API. Every call goes through a [`CallGate`], and the quota
//! carried by each response's `x-ratelimit-*` headers is fed back to the gate, so the rate
//! governor stays current without separate polling.

use super::types::RateLimit;
use crate::Result;
use crate::pipeline::{AnalysisError, CallGate, QuotaExhausted, QuotaSource, RateState};
use chrono::DateTime;
use core::fmt::{Display, Formatter};
use core::time::Duration;
use ohno::{AppError, IntoAppError, app_err};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, RETRY_AFTER};
use serde::de::DeserializeOwned;
use url::Url;

const LOG_TARGET: &str = "    github";

/// The public GitHub API.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";

/// Why a GitHub API call failed.
#[derive(Debug)]
pub enum ApiError {
    /// Network trouble, a timeout, or a server error.
    Transient(AppError),

    /// The primary or a secondary rate limit was hit.
    RateLimited {
        retry_after: Option<Duration>,
        state: Option<RateState>,
    },

    /// 404: the resource does not exist or is not visible to the token.
    NotFound,

    /// 409: the resource is in a conflicting state, e.g. an empty repository.
    Conflict(String),

    /// Any other failure, including responses that could not be decoded.
    Failed(AppError),

    /// The governor gave up waiting for quota.
    QuotaExhausted(QuotaExhausted),
}

impl ApiError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transient(e) | Self::Failed(e) => f.write_str(&e.message()),
            Self::RateLimited {
                retry_after: Some(retry_after), ..
            } => write!(f, "rate limited, retry after {}s", retry_after.as_secs()),
            Self::RateLimited { .. } => f.write_str("rate limited"),
            Self::NotFound => f.write_str("not found"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::QuotaExhausted(e) => Display::fmt(e, f),
        }
    }
}

impl core::error::Error for ApiError {}

impl From<ApiError> for AnalysisError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Transient(e) => Self::Transient(e),
            ApiError::RateLimited { retry_after, state } => Self::RateLimited { retry_after, state },
            ApiError::NotFound => Self::Permanent(app_err!("repository not found or not accessible")),
            ApiError::Conflict(message) => Self::Permanent(app_err!("repository unavailable: {message}")),
            ApiError::Failed(e) => Self::Permanent(e),
            ApiError::QuotaExhausted(e) => Self::QuotaExhausted(e),
        }
    }
}

/// A decoded response body along with the next page, if the endpoint is paginated.
#[derive(Debug)]
pub struct Fetched<T> {
    pub data: T,
    pub next: Option<Url>,
}

/// GitHub API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: Url,
    authenticated: bool,
}

impl GitHubClient {
    /// Create a client for `api_url`, authenticating with `token` if given.
    ///
    /// `timeout` bounds every individual request.
    pub fn new(token: Option<&str>, api_url: &str, timeout: Duration) -> Result<Self> {
        let mut api_url = Url::parse(api_url).into_app_err_with(|| format!("invalid API URL '{api_url}'"))?;
        if api_url.cannot_be_a_base() {
            return Err(app_err!("invalid API URL '{api_url}': not a base URL"));
        }
        if !api_url.path().ends_with('/') {
            let path = format!("{}/", api_url.path());
            api_url.set_path(&path);
        }

        let mut headers = HeaderMap::new();
        let _ = headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        let _ = headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));

        if let Some(token) = token {
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}")).into_app_err("invalid GitHub token")?;
            auth.set_sensitive(true);
            let _ = headers.insert(AUTHORIZATION, auth);
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("repolens/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .into_app_err("could not create the HTTP client")?;

        Ok(Self {
            http,
            api_url,
            authenticated: token.is_some(),
        })
    }

    #[must_use]
    pub const fn api_url(&self) -> &Url {
        &self.api_url
    }

    /// Whether requests carry a token.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// URL of the endpoint made of `segments`, each percent-encoded as a single path segment.
    #[must_use]
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            let _ = path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Fetch and decode one page, waiting on `gate` first.
    pub async fn get_json<T: DeserializeOwned>(&self, gate: &CallGate<'_>, url: Url) -> Result<Fetched<T>, ApiError> {
        gate.acquire().await.map_err(ApiError::QuotaExhausted)?;

        let (rate, response) = self.send(&url).await;
        if let Some(rate) = rate {
            gate.observe(rate);
        }

        let response = response?;
        let next = next_page(response.headers());
        let data = response
            .json::<T>()
            .await
            .into_app_err_with(|| format!("decoding response from '{url}'"))
            .map_err(ApiError::Failed)?;

        Ok(Fetched { data, next })
    }

    /// Fetch every page starting at `url`, stopping after `max_pages` pages if given.
    pub async fn get_all<T: DeserializeOwned>(&self, gate: &CallGate<'_>, url: Url, max_pages: Option<usize>) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut next = Some(url);
        let mut pages = 0;

        while let Some(url) = next {
            if max_pages.is_some_and(|max| pages >= max) {
                log::debug!(target: LOG_TARGET, "Stopping after {pages} pages at '{url}'");
                break;
            }

            let page: Fetched<Vec<T>> = self.get_json(gate, url).await?;
            items.extend(page.data);
            next = page.next;
            pages += 1;
        }

        Ok(items)
    }

    /// Issue a GET and classify the response. The quota headers are returned even on failure.
    async fn send(&self, url: &Url) -> (Option<RateState>, Result<reqwest::Response, ApiError>) {
        log::trace!(target: LOG_TARGET, "GET {url}");

        let response = match self.http.get(url.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                let e = AppError::from(e);
                return (None, Err(ApiError::Transient(e)));
            }
        };

        let rate = rate_state(response.headers());
        let status = response.status();
        if status.is_success() {
            return (rate, Ok(response));
        }

        let retry_after = retry_after(response.headers());
        let message = error_message(response).await;
        log::debug!(target: LOG_TARGET, "GET {url} returned {status}: {message}");

        let error = match status {
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { retry_after, state: rate },
            StatusCode::FORBIDDEN
                if retry_after.is_some()
                    || rate.is_some_and(|r| r.remaining == Some(0))
                    || message.to_ascii_lowercase().contains("rate limit") =>
            {
                ApiError::RateLimited { retry_after, state: rate }
            }
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::CONFLICT => ApiError::Conflict(message),
            status if status.is_server_error() => ApiError::Transient(app_err!("{status} from '{url}': {message}")),
            status => ApiError::Failed(app_err!("{status} from '{url}': {message}")),
        };

        (rate, Err(error))
    }
}

impl QuotaSource for GitHubClient {
    /// Read the core quota. This endpoint does not count against the quota itself.
    async fn fetch_rate_state(&self) -> Result<RateState> {
        let url = self.endpoint(&["rate_limit"]);
        let (_, response) = self.send(&url).await;
        let response = response?;

        let body: RateLimit = response.json().await.into_app_err("decoding the rate limit response")?;
        let core = body.resources.core;
        let reset_at = DateTime::from_timestamp(core.reset, 0).ok_or_else(|| app_err!("invalid reset time {}", core.reset))?;

        Ok(RateState::reported(Some(core.limit), core.remaining, reset_at))
    }
}

/// Read the quota from `x-ratelimit-*` response headers.
fn rate_state(headers: &HeaderMap) -> Option<RateState> {
    let header = |name: &str| headers.get(name)?.to_str().ok();

    let remaining = header("x-ratelimit-remaining")?.parse::<u64>().ok()?;
    let reset = header("x-ratelimit-reset")?.parse::<i64>().ok()?;
    let reset_at = DateTime::from_timestamp(reset, 0)?;
    let limit = header("x-ratelimit-limit").and_then(|v| v.parse::<u64>().ok());

    Some(RateState::reported(limit, remaining, reset_at))
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let seconds = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(seconds))
}

/// Find the `rel="next"` target in a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;

    link.split(',').find_map(|part| {
        let mut pieces = part.split(';');
        let target = pieces.next()?.trim().strip_prefix('<')?.strip_suffix('>')?;
        pieces
            .any(|param| param.trim() == r#"rel="next""#)
            .then(|| Url::parse(target).ok())
            .flatten()
    })
}

/// The `message` field of a GitHub error body, or the raw body.
async fn error_message(response: reqwest::Response) -> String {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        message: String,
    }

    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&text).map_or(text, |body| body.message)
}
