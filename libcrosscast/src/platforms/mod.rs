//! Platform adapter abstraction and implementations.
//!
//! Each supported platform implements one trait covering the full
//! capability set: verify credentials, refresh tokens, upload media, and
//! publish. Adapters are selected once per account through a sealed
//! registry; the orchestrator never dispatches on platform names at call
//! sites.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use libcrosscast::config::PlatformsConfig;
//! use libcrosscast::platforms::AdapterRegistry;
//! use libcrosscast::session::SessionCache;
//! use libcrosscast::types::PlatformKind;
//!
//! let sessions = Arc::new(SessionCache::new(64, Duration::from_secs(3600)));
//! let registry = AdapterRegistry::from_config(&PlatformsConfig::default(), sessions);
//! let adapter = registry.adapter_for(PlatformKind::Mastodon).unwrap();
//! assert_eq!(adapter.platform(), PlatformKind::Mastodon);
//! ```

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::PlatformsConfig;
use crate::error::AttemptError;
use crate::session::SessionCache;
use crate::types::{Account, AccountProfile, MediaFile, PlatformKind, PostType, RefreshedToken};

pub mod bluesky;
pub mod facebook;
pub mod instagram;
pub mod mastodon;
pub mod pinterest;
pub mod reddit;
pub mod x;

// Mock adapter is available for all builds (not just tests) to support
// integration tests.
pub mod mock;

/// Per-attempt call context: the account being published for and its
/// freshly decrypted access token. The token is dropped (and zeroed) when
/// the attempt ends.
pub struct AdapterContext<'a> {
    pub account: &'a Account,
    pub token: &'a SecretString,
}

/// The content handed to `publish` after media has been uploaded.
pub struct PublishInput<'a> {
    pub content: &'a str,
    /// Platform-native media references from `upload_media`, in order.
    pub media_refs: &'a [String],
    pub post_type: PostType,
}

/// Capability set every platform adapter provides.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> PlatformKind;

    /// Check that the token works and return the profile behind it.
    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError>;

    /// Exchange a refresh token for fresh credentials.
    ///
    /// Platforms without refresh tokens keep this default, which reports
    /// the capability as absent; the orchestrator then flips the account
    /// to its error status.
    async fn refresh_token(
        &self,
        _account: &Account,
        _refresh_token: &SecretString,
    ) -> Result<RefreshedToken, AttemptError> {
        Err(AttemptError::Auth(format!(
            "{} does not issue refresh tokens",
            self.platform().display_name()
        )))
    }

    /// Turn a raw file into a platform-native media reference.
    async fn upload_media(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError>;

    /// Publish content, returning the platform-side post id.
    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError>;
}

/// The sealed set of adapters, selected once per account.
pub struct AdapterRegistry {
    adapters: HashMap<PlatformKind, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Build the full adapter set from configuration. One HTTP client is
    /// shared across adapters.
    pub fn from_config(config: &PlatformsConfig, sessions: Arc<SessionCache>) -> Self {
        let http = reqwest::Client::new();
        let mut registry = Self::empty();

        registry.register(Arc::new(mastodon::MastodonAdapter::new(http.clone())));
        registry.register(Arc::new(x::XAdapter::new(http.clone(), config.x.clone())));
        registry.register(Arc::new(pinterest::PinterestAdapter::new(
            http.clone(),
            config.pinterest.clone(),
        )));
        registry.register(Arc::new(bluesky::BlueskyAdapter::new(
            http.clone(),
            config.bluesky.clone(),
            sessions,
        )));
        registry.register(Arc::new(facebook::FacebookAdapter::new(
            http.clone(),
            config.facebook.clone(),
        )));
        registry.register(Arc::new(instagram::InstagramAdapter::new(
            http.clone(),
            config.instagram.clone(),
        )));
        registry.register(Arc::new(reddit::RedditAdapter::new(http, config.reddit.clone())));

        registry
    }

    /// Install an adapter, replacing any previous one for the same
    /// platform. Tests use this to swap in mocks.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform(), adapter);
    }

    pub fn adapter_for(&self, platform: PlatformKind) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }
}

/// Wait applied when a platform throttles us without saying for how long.
pub(crate) const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 900;

/// Map a transport-level failure (connect, TLS, timeout) to the shared
/// taxonomy.
pub(crate) fn transport_error(
    platform: PlatformKind,
    context: &str,
    error: reqwest::Error,
) -> AttemptError {
    AttemptError::Platform(format!(
        "{} request failed ({}): {}",
        platform.display_name(),
        context,
        error
    ))
}

/// Consume a non-success response and classify it.
pub(crate) async fn error_from_response(
    platform: PlatformKind,
    context: &str,
    response: reqwest::Response,
) -> AttemptError {
    let status = response.status().as_u16();
    let retry_after = retry_after_secs(response.headers(), chrono::Utc::now().timestamp());
    let body = response.text().await.unwrap_or_default();
    classify_status(platform, context, status, retry_after, &body)
}

/// Classify an HTTP status into the attempt-error taxonomy.
///
/// 401/403 become auth errors (eligible for the one-shot refresh), 429
/// becomes a rate-limit error carrying the computed wait, 400/422 become
/// validation errors, and everything else is a platform error.
pub(crate) fn classify_status(
    platform: PlatformKind,
    context: &str,
    status: u16,
    retry_after: Option<u64>,
    body: &str,
) -> AttemptError {
    let name = platform.display_name();
    match status {
        401 | 403 => AttemptError::Auth(format!(
            "{} rejected the credentials ({}): {}",
            name,
            context,
            snippet(body)
        )),
        429 => {
            let wait_secs = retry_after.unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS);
            AttemptError::RateLimit {
                message: format!(
                    "{} rate limit hit ({}); retry in about {}",
                    name,
                    context,
                    humanize_wait(wait_secs)
                ),
                wait_secs,
            }
        }
        400 | 422 => AttemptError::Validation(format!(
            "{} rejected the request ({}): {}",
            name,
            context,
            snippet(body)
        )),
        _ => AttemptError::Platform(format!(
            "{} returned HTTP {} ({}): {}",
            name,
            status,
            context,
            snippet(body)
        )),
    }
}

/// How long a throttled caller should wait, from response headers.
///
/// `retry-after` (delta seconds) wins; otherwise the rate-limit reset
/// epoch headers are compared against `now`.
pub(crate) fn retry_after_secs(headers: &HeaderMap, now: i64) -> Option<u64> {
    if let Some(value) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
    {
        return Some(value);
    }

    for header in ["x-rate-limit-reset", "x-ratelimit-reset"] {
        if let Some(reset) = headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<i64>().ok())
        {
            return Some(reset.saturating_sub(now).max(0) as u64);
        }
    }

    None
}

/// Render a wait as rough human-readable text ("45 seconds", "2 minutes").
pub fn humanize_wait(secs: u64) -> String {
    if secs < 60 {
        format!("{} second{}", secs, if secs == 1 { "" } else { "s" })
    } else if secs < 3600 {
        let minutes = (secs + 59) / 60;
        format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        let hours = secs / 3600;
        let minutes = (secs % 3600 + 59) / 60;
        if minutes == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!(
                "{} hour{} {} minute{}",
                hours,
                if hours == 1 { "" } else { "s" },
                minutes,
                if minutes == 1 { "" } else { "s" }
            )
        }
    }
}

fn snippet(body: &str) -> String {
    let cleaned = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.is_empty() {
        return "no response body".to_string();
    }
    if cleaned.chars().count() > 200 {
        let truncated: String = cleaned.chars().take(200).collect();
        format!("{}…", truncated)
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_statuses() {
        for status in [401, 403] {
            let error = classify_status(PlatformKind::Mastodon, "publish", status, None, "denied");
            match error {
                AttemptError::Auth(msg) => {
                    assert!(msg.contains("Mastodon"));
                    assert!(msg.contains("publish"));
                }
                other => panic!("expected auth error for {}, got {:?}", status, other),
            }
        }
    }

    #[test]
    fn test_classify_rate_limit_uses_retry_after() {
        let error = classify_status(PlatformKind::X, "upload media", 429, Some(120), "");
        match error {
            AttemptError::RateLimit { message, wait_secs } => {
                assert_eq!(wait_secs, 120);
                assert!(message.contains("2 minutes"));
            }
            other => panic!("expected rate limit error, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rate_limit_default_wait() {
        let error = classify_status(PlatformKind::Reddit, "publish", 429, None, "");
        match error {
            AttemptError::RateLimit { message, wait_secs } => {
                assert_eq!(wait_secs, DEFAULT_RATE_LIMIT_WAIT_SECS);
                assert!(message.contains("15 minutes"));
            }
            other => panic!("expected rate limit error, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_validation_statuses() {
        for status in [400, 422] {
            let error = classify_status(PlatformKind::Pinterest, "create pin", status, None, "bad");
            assert!(matches!(error, AttemptError::Validation(_)), "status {}", status);
        }
    }

    #[test]
    fn test_classify_server_error_is_platform_error() {
        let error = classify_status(PlatformKind::Facebook, "publish", 503, None, "oops");
        match error {
            AttemptError::Platform(msg) => assert!(msg.contains("503")),
            other => panic!("expected platform error, got {:?}", other),
        }
    }

    #[test]
    fn test_retry_after_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "120".parse().unwrap());
        headers.insert("x-rate-limit-reset", "9999999999".parse().unwrap());
        assert_eq!(retry_after_secs(&headers, 1_000), Some(120));
    }

    #[test]
    fn test_rate_limit_reset_relative_to_now() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", "1300".parse().unwrap());
        assert_eq!(retry_after_secs(&headers, 1_000), Some(300));
    }

    #[test]
    fn test_rate_limit_reset_in_the_past_is_zero() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", "500".parse().unwrap());
        assert_eq!(retry_after_secs(&headers, 1_000), Some(0));
    }

    #[test]
    fn test_no_rate_limit_headers() {
        assert_eq!(retry_after_secs(&HeaderMap::new(), 1_000), None);
    }

    #[test]
    fn test_humanize_wait() {
        assert_eq!(humanize_wait(1), "1 second");
        assert_eq!(humanize_wait(45), "45 seconds");
        assert_eq!(humanize_wait(60), "1 minute");
        assert_eq!(humanize_wait(90), "2 minutes");
        assert_eq!(humanize_wait(120), "2 minutes");
        assert_eq!(humanize_wait(900), "15 minutes");
        assert_eq!(humanize_wait(3600), "1 hour");
        assert_eq!(humanize_wait(3900), "1 hour 5 minutes");
    }

    #[test]
    fn test_snippet_truncates_and_flattens() {
        let long = "x".repeat(500);
        let result = snippet(&long);
        assert!(result.chars().count() <= 201);

        assert_eq!(snippet("a\n  b"), "a b");
        assert_eq!(snippet(""), "no response body");
    }

    #[test]
    fn test_registry_contains_all_platforms() {
        let sessions = Arc::new(SessionCache::new(4, std::time::Duration::from_secs(60)));
        let registry = AdapterRegistry::from_config(&PlatformsConfig::default(), sessions);

        for platform in PlatformKind::ALL {
            let adapter = registry
                .adapter_for(platform)
                .unwrap_or_else(|| panic!("missing adapter for {}", platform));
            assert_eq!(adapter.platform(), platform);
        }
    }

    #[test]
    fn test_registry_register_replaces() {
        let sessions = Arc::new(SessionCache::new(4, std::time::Duration::from_secs(60)));
        let mut registry = AdapterRegistry::from_config(&PlatformsConfig::default(), sessions);

        registry.register(Arc::new(mock::MockAdapter::success(PlatformKind::Mastodon)));
        let adapter = registry.adapter_for(PlatformKind::Mastodon).unwrap();
        assert_eq!(adapter.platform(), PlatformKind::Mastodon);
    }
}
