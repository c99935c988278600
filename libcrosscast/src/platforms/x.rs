//! X (Twitter) adapter.
//!
//! Media upload is the awkward part: the v1.1 upload endpoint accepts
//! several transports, and real files fail in platform-specific ways. The
//! adapter keeps an ordered strategy list (plain multipart, base64 form,
//! chunked INIT/APPEND/FINALIZE) tried against each configured upload host,
//! short-circuiting on the first success. Large files and video/GIF skip
//! straight to chunked, and chunked uploads that come back with
//! `processing_info` are polled until the platform finishes transcoding.

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::XConfig;
use crate::error::AttemptError;
use crate::platforms::{
    error_from_response, transport_error, AdapterContext, PlatformAdapter, PublishInput,
};
use crate::types::{Account, AccountProfile, MediaFile, PlatformKind, RefreshedToken};

/// Above this the simple transports are pointless; go straight to chunked.
const SIMPLE_UPLOAD_LIMIT: u64 = 5 * 1024 * 1024;

/// APPEND segment size. The endpoint caps segments at 5 MB.
const APPEND_SEGMENT_BYTES: usize = 4 * 1024 * 1024;

/// Upper bound on the whole processing-status poll loop.
const PROCESSING_DEADLINE: Duration = Duration::from_secs(300);

const DEFAULT_POLL_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStrategy {
    Multipart,
    Base64,
    Chunked,
}

/// Pick the transports worth trying for a file, in order.
pub fn strategies_for(media: &MediaFile) -> Vec<UploadStrategy> {
    if media.size > SIMPLE_UPLOAD_LIMIT || requires_processing(&media.mime_type) {
        vec![UploadStrategy::Chunked]
    } else {
        vec![
            UploadStrategy::Multipart,
            UploadStrategy::Base64,
            UploadStrategy::Chunked,
        ]
    }
}

/// Video and GIF uploads are transcoded server-side and must go through
/// the chunked flow.
fn requires_processing(mime: &str) -> bool {
    mime.starts_with("video/") || mime.eq_ignore_ascii_case("image/gif")
}

fn media_category(mime: &str) -> &'static str {
    if mime.starts_with("video/") {
        "tweet_video"
    } else if mime.eq_ignore_ascii_case("image/gif") {
        "tweet_gif"
    } else {
        "tweet_image"
    }
}

#[derive(Deserialize)]
struct MediaUploadResponse {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Deserialize, Debug, Clone)]
struct ProcessingInfo {
    state: String,
    #[serde(default)]
    check_after_secs: Option<u64>,
    #[serde(default)]
    error: Option<ProcessingFailure>,
}

#[derive(Deserialize, Debug, Clone)]
struct ProcessingFailure {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct MeResponse {
    data: MeData,
}

#[derive(Deserialize)]
struct MeData {
    id: String,
    username: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

#[derive(Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

pub struct XAdapter {
    http: reqwest::Client,
    config: XConfig,
}

impl XAdapter {
    pub fn new(http: reqwest::Client, config: XConfig) -> Self {
        Self { http, config }
    }

    fn upload_url(host: &str) -> String {
        format!("{}/1.1/media/upload.json", host.trim_end_matches('/'))
    }

    async fn try_strategy(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
        host: &str,
        strategy: UploadStrategy,
    ) -> Result<String, AttemptError> {
        match strategy {
            UploadStrategy::Multipart => self.upload_multipart(ctx, media, host).await,
            UploadStrategy::Base64 => self.upload_base64(ctx, media, host).await,
            UploadStrategy::Chunked => self.upload_chunked(ctx, media, host).await,
        }
    }

    async fn upload_multipart(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
        host: &str,
    ) -> Result<String, AttemptError> {
        let part = reqwest::multipart::Part::bytes(media.buffer.clone())
            .file_name(media.file_name.clone())
            .mime_str(&media.mime_type)
            .map_err(|e| AttemptError::Upload(format!("invalid media mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("media", part);

        let response = self
            .http
            .post(Self::upload_url(host))
            .bearer_auth(ctx.token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "upload media (multipart)", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::X, "upload media (multipart)", response).await);
        }

        let uploaded: MediaUploadResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Platform(format!("X returned an unreadable upload response: {}", e)))?;
        Ok(uploaded.media_id_string)
    }

    async fn upload_base64(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
        host: &str,
    ) -> Result<String, AttemptError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&media.buffer);
        let params = [("media_data", encoded)];

        let response = self
            .http
            .post(Self::upload_url(host))
            .bearer_auth(ctx.token.expose_secret())
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "upload media (base64)", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::X, "upload media (base64)", response).await);
        }

        let uploaded: MediaUploadResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Platform(format!("X returned an unreadable upload response: {}", e)))?;
        Ok(uploaded.media_id_string)
    }

    async fn upload_chunked(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
        host: &str,
    ) -> Result<String, AttemptError> {
        // INIT
        let init_params = [
            ("command", "INIT".to_string()),
            ("total_bytes", media.size.to_string()),
            ("media_type", media.mime_type.clone()),
            ("media_category", media_category(&media.mime_type).to_string()),
        ];

        let response = self
            .http
            .post(Self::upload_url(host))
            .bearer_auth(ctx.token.expose_secret())
            .form(&init_params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "upload media (chunked INIT)", e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(PlatformKind::X, "upload media (chunked INIT)", response).await
            );
        }

        let init: MediaUploadResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Platform(format!("X returned an unreadable INIT response: {}", e)))?;
        let media_id = init.media_id_string;

        // APPEND, one segment at a time
        for (index, segment) in media.buffer.chunks(APPEND_SEGMENT_BYTES).enumerate() {
            let form = reqwest::multipart::Form::new()
                .text("command", "APPEND")
                .text("media_id", media_id.clone())
                .text("segment_index", index.to_string())
                .part(
                    "media",
                    reqwest::multipart::Part::bytes(segment.to_vec())
                        .file_name(media.file_name.clone()),
                );

            let response = self
                .http
                .post(Self::upload_url(host))
                .bearer_auth(ctx.token.expose_secret())
                .multipart(form)
                .send()
                .await
                .map_err(|e| transport_error(PlatformKind::X, "upload media (chunked APPEND)", e))?;

            if !response.status().is_success() {
                return Err(error_from_response(
                    PlatformKind::X,
                    "upload media (chunked APPEND)",
                    response,
                )
                .await);
            }
        }

        // FINALIZE
        let finalize_params = [("command", "FINALIZE".to_string()), ("media_id", media_id.clone())];
        let response = self
            .http
            .post(Self::upload_url(host))
            .bearer_auth(ctx.token.expose_secret())
            .form(&finalize_params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "upload media (chunked FINALIZE)", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(
                PlatformKind::X,
                "upload media (chunked FINALIZE)",
                response,
            )
            .await);
        }

        let finalized: MediaUploadResponse = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("X returned an unreadable FINALIZE response: {}", e))
        })?;

        if let Some(info) = finalized.processing_info {
            self.poll_processing(ctx, host, &media_id, info).await?;
        }

        Ok(media_id)
    }

    /// Wait for server-side transcoding to finish, sleeping
    /// `check_after_secs` between polls. The whole loop is capped at five
    /// minutes; the result then counts as a platform failure, not a
    /// validation one.
    async fn poll_processing(
        &self,
        ctx: &AdapterContext<'_>,
        host: &str,
        media_id: &str,
        initial: ProcessingInfo,
    ) -> Result<(), AttemptError> {
        let deadline = tokio::time::Instant::now() + PROCESSING_DEADLINE;
        let mut info = initial;

        loop {
            match info.state.as_str() {
                "succeeded" => return Ok(()),
                "failed" => {
                    let reason = info
                        .error
                        .as_ref()
                        .and_then(|e| e.message.clone().or_else(|| e.name.clone()))
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Err(AttemptError::Upload(format!(
                        "X media processing failed: {}",
                        reason
                    )));
                }
                state => debug!(media_id, state, "X media still processing"),
            }

            let wait = Duration::from_secs(info.check_after_secs.unwrap_or(DEFAULT_POLL_SECS));
            if tokio::time::Instant::now() + wait > deadline {
                return Err(AttemptError::Platform(
                    "X media processing did not finish within 5 minutes".to_string(),
                ));
            }
            tokio::time::sleep(wait).await;

            let response = self
                .http
                .get(Self::upload_url(host))
                .bearer_auth(ctx.token.expose_secret())
                .query(&[("command", "STATUS"), ("media_id", media_id)])
                .send()
                .await
                .map_err(|e| transport_error(PlatformKind::X, "upload media (STATUS)", e))?;

            if !response.status().is_success() {
                return Err(
                    error_from_response(PlatformKind::X, "upload media (STATUS)", response).await
                );
            }

            let status: MediaUploadResponse = response.json().await.map_err(|e| {
                AttemptError::Platform(format!("X returned an unreadable STATUS response: {}", e))
            })?;

            match status.processing_info {
                Some(next) => info = next,
                // No processing info anymore means the platform is done.
                None => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for XAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::X
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        let response = self
            .http
            .get(format!("{}/2/users/me", self.config.api_base.trim_end_matches('/')))
            .bearer_auth(ctx.token.expose_secret())
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "verify credentials", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::X, "verify credentials", response).await);
        }

        let me: MeResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Platform(format!("X returned an unreadable profile: {}", e)))?;

        Ok(AccountProfile {
            id: me.data.id,
            username: me.data.username,
            display_name: me.data.name,
        })
    }

    async fn refresh_token(
        &self,
        _account: &Account,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken, AttemptError> {
        let client_id = self.config.client_id.as_deref().ok_or_else(|| {
            AttemptError::Auth("X token refresh requires a configured OAuth client id".to_string())
        })?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret().as_str()),
            ("client_id", client_id),
        ];

        let response = self
            .http
            .post(format!(
                "{}/2/oauth2/token",
                self.config.api_base.trim_end_matches('/')
            ))
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "refresh token", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::X, "refresh token", response).await);
        }

        let grant: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Platform(format!("X returned an unreadable token grant: {}", e)))?;

        Ok(RefreshedToken {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_in: grant.expires_in,
        })
    }

    async fn upload_media(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError> {
        let strategies = strategies_for(media);
        let mut last_error: Option<AttemptError> = None;

        for host in &self.config.upload_bases {
            for strategy in &strategies {
                match self.try_strategy(ctx, media, host, *strategy).await {
                    Ok(media_id) => return Ok(media_id),
                    // Auth failures must reach the refresh logic, and a
                    // throttled endpoint should not be hammered with the
                    // remaining transports.
                    Err(error @ AttemptError::Auth(_))
                    | Err(error @ AttemptError::RateLimit { .. }) => return Err(error),
                    Err(error) => {
                        warn!(
                            host = %host,
                            strategy = ?strategy,
                            file = %media.file_name,
                            "X upload strategy failed: {}",
                            error
                        );
                        last_error = Some(error);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            AttemptError::Upload("no X upload strategy was applicable".to_string())
        }))
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        let mut body = serde_json::json!({ "text": input.content });
        if !input.media_refs.is_empty() {
            body["media"] = serde_json::json!({ "media_ids": input.media_refs });
        }

        let response = self
            .http
            .post(format!("{}/2/tweets", self.config.api_base.trim_end_matches('/')))
            .bearer_auth(ctx.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::X, "publish tweet", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::X, "publish tweet", response).await);
        }

        let tweet: TweetResponse = response
            .json()
            .await
            .map_err(|e| AttemptError::Platform(format!("X returned an unreadable tweet: {}", e)))?;

        Ok(tweet.data.id)
    }
}
