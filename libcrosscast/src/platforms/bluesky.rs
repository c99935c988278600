//! Bluesky adapter (AT Protocol over XRPC).
//!
//! Sessions are expensive to create and short-lived, so they are cached
//! per account id and reused across calls; a missing or expired entry
//! triggers a fresh login. Blobs are hard-capped at one megabyte and
//! oversized files are rejected before any request is made.

use async_trait::async_trait;
use chrono::SecondsFormat;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::BlueskyConfig;
use crate::error::AttemptError;
use crate::media::BLUESKY_BLOB_LIMIT;
use crate::platforms::{
    error_from_response, transport_error, AdapterContext, PlatformAdapter, PublishInput,
};
use crate::session::{BlueskySession, SessionCache};
use crate::types::{AccountProfile, MediaFile, PlatformKind};

pub struct BlueskyAdapter {
    http: reqwest::Client,
    config: BlueskyConfig,
    sessions: Arc<SessionCache>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSession {
    did: String,
    handle: String,
    access_jwt: String,
}

#[derive(Deserialize)]
struct UploadedBlob {
    blob: serde_json::Value,
}

#[derive(Deserialize)]
struct CreatedRecord {
    uri: String,
}

impl BlueskyAdapter {
    pub fn new(http: reqwest::Client, config: BlueskyConfig, sessions: Arc<SessionCache>) -> Self {
        Self {
            http,
            config,
            sessions,
        }
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.config.service_base.trim_end_matches('/'), method)
    }

    /// Reuse the cached session for this account, logging in fresh when
    /// there is none.
    async fn session(&self, ctx: &AdapterContext<'_>) -> Result<BlueskySession, AttemptError> {
        if let Some(session) = self.sessions.get(&ctx.account.id) {
            debug!(account = %ctx.account.id, "reusing cached Bluesky session");
            return Ok(session);
        }

        let body = serde_json::json!({
            "identifier": ctx.account.username,
            "password": ctx.token.expose_secret(),
        });

        let response = self
            .http
            .post(self.xrpc("com.atproto.server.createSession"))
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Bluesky, "create session", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Bluesky, "create session", response).await);
        }

        let created: CreatedSession = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Bluesky returned an unreadable session: {}", e))
        })?;

        let session = BlueskySession {
            did: created.did,
            handle: created.handle,
            access_jwt: created.access_jwt,
        };
        self.sessions.insert(&ctx.account.id, session.clone());
        debug!(account = %ctx.account.id, did = %session.did, "created Bluesky session");

        Ok(session)
    }

    /// Drop the cached session when the PDS stops accepting its token, so
    /// the next attempt logs in from scratch.
    fn on_error(&self, account_id: &str, error: &AttemptError) {
        if error.is_auth() {
            self.sessions.invalidate(account_id);
        }
    }
}

#[async_trait]
impl PlatformAdapter for BlueskyAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Bluesky
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        let session = self.session(ctx).await?;
        Ok(AccountProfile {
            id: session.did,
            username: session.handle,
            display_name: None,
        })
    }

    async fn upload_media(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError> {
        // Enforced here as well as in the media pipeline: no byte of an
        // oversized file may leave the process.
        if media.size > BLUESKY_BLOB_LIMIT {
            return Err(AttemptError::Upload(format!(
                "{} is {} bytes and exceeds Bluesky's {}-byte blob limit",
                media.file_name, media.size, BLUESKY_BLOB_LIMIT
            )));
        }

        let session = self.session(ctx).await?;

        let response = self
            .http
            .post(self.xrpc("com.atproto.repo.uploadBlob"))
            .bearer_auth(&session.access_jwt)
            .header(reqwest::header::CONTENT_TYPE, &media.mime_type)
            .body(media.buffer.clone())
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Bluesky, "upload blob", e))?;

        if !response.status().is_success() {
            let error = error_from_response(PlatformKind::Bluesky, "upload blob", response).await;
            self.on_error(&ctx.account.id, &error);
            return Err(error);
        }

        let uploaded: UploadedBlob = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Bluesky returned an unreadable blob: {}", e))
        })?;

        // The opaque blob object is the media reference; it gets embedded
        // verbatim into the post record.
        Ok(uploaded.blob.to_string())
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        let session = self.session(ctx).await?;

        let mut record = serde_json::json!({
            "$type": "app.bsky.feed.post",
            "text": input.content,
            "createdAt": chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        });

        if !input.media_refs.is_empty() {
            let mut images = Vec::with_capacity(input.media_refs.len());
            for media_ref in input.media_refs {
                let blob: serde_json::Value = serde_json::from_str(media_ref).map_err(|_| {
                    AttemptError::Platform("malformed Bluesky blob reference".to_string())
                })?;
                images.push(serde_json::json!({ "image": blob, "alt": "" }));
            }
            record["embed"] = serde_json::json!({
                "$type": "app.bsky.embed.images",
                "images": images,
            });
        }

        let body = serde_json::json!({
            "repo": session.did,
            "collection": "app.bsky.feed.post",
            "record": record,
        });

        let response = self
            .http
            .post(self.xrpc("com.atproto.repo.createRecord"))
            .bearer_auth(&session.access_jwt)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Bluesky, "create record", e))?;

        if !response.status().is_success() {
            let error = error_from_response(PlatformKind::Bluesky, "create record", response).await;
            self.on_error(&ctx.account.id, &error);
            return Err(error);
        }

        let created: CreatedRecord = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Bluesky returned an unreadable record: {}", e))
        })?;

        Ok(created.uri)
    }
}
