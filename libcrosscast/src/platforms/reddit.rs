//! Reddit adapter.
//!
//! Submissions are `self` (text) or `link` (url) kind against the
//! account's profile subreddit. A `self` post with empty text is rejected
//! before the network call, the same pre-flight pattern Pinterest uses
//! for pins without images.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::RedditConfig;
use crate::error::AttemptError;
use crate::platforms::{
    error_from_response, transport_error, AdapterContext, PlatformAdapter, PublishInput,
    DEFAULT_RATE_LIMIT_WAIT_SECS,
};
use crate::types::{Account, AccountProfile, MediaFile, PlatformKind, RefreshedToken};

const MAX_TITLE_CHARS: usize = 300;

pub struct RedditAdapter {
    http: reqwest::Client,
    config: RedditConfig,
}

#[derive(Deserialize)]
struct RedditMe {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    json: SubmitJson,
}

#[derive(Deserialize)]
struct SubmitJson {
    #[serde(default)]
    errors: Vec<Vec<serde_json::Value>>,
    #[serde(default)]
    data: Option<SubmitData>,
}

#[derive(Deserialize)]
struct SubmitData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// First line of the content, truncated to Reddit's title cap on a char
/// boundary.
fn submission_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return "(untitled)".to_string();
    }
    first_line.chars().take(MAX_TITLE_CHARS).collect()
}

impl RedditAdapter {
    pub fn new(http: reqwest::Client, config: RedditConfig) -> Self {
        Self { http, config }
    }

    fn oauth(&self, path: &str) -> String {
        format!("{}/{}", self.config.oauth_base.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl PlatformAdapter for RedditAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Reddit
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        let response = self
            .http
            .get(self.oauth("api/v1/me"))
            .bearer_auth(ctx.token.expose_secret())
            .header(reqwest::header::USER_AGENT, &self.config.user_agent)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Reddit, "verify credentials", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Reddit, "verify credentials", response).await);
        }

        let me: RedditMe = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Reddit returned an unreadable profile: {}", e))
        })?;

        Ok(AccountProfile {
            id: me.id,
            username: me.name,
            display_name: None,
        })
    }

    async fn refresh_token(
        &self,
        _account: &Account,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken, AttemptError> {
        let (client_id, client_secret) = match (&self.config.client_id, &self.config.client_secret)
        {
            (Some(id), Some(secret)) => (id.clone(), secret.clone()),
            _ => {
                return Err(AttemptError::Auth(
                    "Reddit token refresh requires configured app credentials".to_string(),
                ))
            }
        };

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret().as_str()),
        ];

        let response = self
            .http
            .post(format!(
                "{}/api/v1/access_token",
                self.config.auth_base.trim_end_matches('/')
            ))
            .basic_auth(client_id, Some(client_secret))
            .header(reqwest::header::USER_AGENT, &self.config.user_agent)
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Reddit, "refresh token", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Reddit, "refresh token", response).await);
        }

        let grant: TokenGrant = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Reddit returned an unreadable token grant: {}", e))
        })?;

        // Reddit does not rotate the refresh token on this grant.
        Ok(RefreshedToken {
            access_token: grant.access_token,
            refresh_token: None,
            expires_in: grant.expires_in,
        })
    }

    async fn upload_media(
        &self,
        _ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError> {
        Err(AttemptError::Platform(format!(
            "Reddit media upload is not supported here; submit {} as a link post with a hosted URL instead",
            media.file_name
        )))
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        let link_url = input.media_refs.first();
        let kind = if link_url.is_some() { "link" } else { "self" };

        if kind == "self" && input.content.trim().is_empty() {
            return Err(AttemptError::Validation(
                "Reddit self posts require non-empty text".to_string(),
            ));
        }

        let subreddit = format!("u_{}", ctx.account.username);
        let title = submission_title(input.content);

        let mut params: Vec<(&str, String)> = vec![
            ("api_type", "json".to_string()),
            ("kind", kind.to_string()),
            ("sr", subreddit),
            ("title", title),
        ];
        match link_url {
            Some(url) => params.push(("url", url.clone())),
            None => params.push(("text", input.content.to_string())),
        }

        let response = self
            .http
            .post(self.oauth("api/submit"))
            .bearer_auth(ctx.token.expose_secret())
            .header(reqwest::header::USER_AGENT, &self.config.user_agent)
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Reddit, "submit post", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Reddit, "submit post", response).await);
        }

        let submitted: SubmitResponse = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Reddit returned an unreadable submission: {}", e))
        })?;

        if !submitted.json.errors.is_empty() {
            let joined = submitted
                .json
                .errors
                .iter()
                .flatten()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
                .join("; ");

            if joined.contains("RATELIMIT") {
                return Err(AttemptError::RateLimit {
                    message: format!("Reddit rate limit hit (submit post): {}", joined),
                    wait_secs: DEFAULT_RATE_LIMIT_WAIT_SECS,
                });
            }
            return Err(AttemptError::Platform(format!(
                "Reddit rejected the submission: {}",
                joined
            )));
        }

        submitted
            .json
            .data
            .and_then(|d| d.name.or(d.url))
            .ok_or_else(|| {
                AttemptError::Platform("Reddit returned no submission id".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountStatus, PostType};

    fn account() -> Account {
        Account {
            id: "acct-reddit".to_string(),
            user_id: "user-1".to_string(),
            platform: PlatformKind::Reddit,
            instance_url: None,
            username: "lurker".to_string(),
            encrypted_access_token: "aa:bb".to_string(),
            encrypted_refresh_token: Some("cc:dd".to_string()),
            token_expires_at: None,
            status: AccountStatus::Active,
            last_used_at: None,
            created_at: 0,
        }
    }

    fn unroutable_adapter() -> RedditAdapter {
        RedditAdapter::new(
            reqwest::Client::new(),
            RedditConfig {
                oauth_base: "https://unreachable.invalid".to_string(),
                auth_base: "https://unreachable.invalid".to_string(),
                client_id: None,
                client_secret: None,
                user_agent: "crosscast-test/0.2".to_string(),
            },
        )
    }

    #[test]
    fn test_submission_title_first_line() {
        assert_eq!(submission_title("Hello world\nsecond line"), "Hello world");
        assert_eq!(submission_title("  trimmed  "), "trimmed");
        assert_eq!(submission_title(""), "(untitled)");
    }

    #[test]
    fn test_submission_title_truncated_on_char_boundary() {
        let long = "🦀".repeat(400);
        let title = submission_title(&long);
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
    }

    #[tokio::test]
    async fn test_empty_self_post_rejected_before_network() {
        let adapter = unroutable_adapter();
        let account = account();
        let token = SecretString::new("token".to_string());
        let ctx = AdapterContext { account: &account, token: &token };

        let input = PublishInput { content: "   ", media_refs: &[], post_type: PostType::Text };
        let error = adapter.publish(&ctx, &input).await.unwrap_err();

        match error {
            AttemptError::Validation(msg) => assert!(msg.contains("non-empty text")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_media_not_supported() {
        let adapter = unroutable_adapter();
        let account = account();
        let token = SecretString::new("token".to_string());
        let ctx = AdapterContext { account: &account, token: &token };

        let media = MediaFile::new("meme.png", "image/png", vec![0u8; 10]);
        let error = adapter.upload_media(&ctx, &media).await.unwrap_err();
        assert!(matches!(error, AttemptError::Platform(_)));
    }

    #[tokio::test]
    async fn test_refresh_without_app_credentials_is_auth_error() {
        let adapter = unroutable_adapter();
        let refresh = SecretString::new("refresh".to_string());

        let error = adapter.refresh_token(&account(), &refresh).await.unwrap_err();
        assert!(matches!(error, AttemptError::Auth(_)));
    }
}
