//! Mastodon adapter.
//!
//! Talks to the instance named by the account (Mastodon is the only
//! platform here with per-account hosts). Media is a single-shot multipart
//! upload whose id feeds straight into the status create call.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::error::AttemptError;
use crate::platforms::{
    error_from_response, transport_error, AdapterContext, PlatformAdapter, PublishInput,
};
use crate::types::{AccountProfile, MediaFile, PlatformKind};

pub struct MastodonAdapter {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct VerifiedAccount {
    id: String,
    username: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct UploadedMedia {
    id: String,
}

#[derive(Deserialize)]
struct CreatedStatus {
    id: String,
}

impl MastodonAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    fn base_url(account: &crate::types::Account) -> Result<String, AttemptError> {
        let instance = account.instance_url.as_deref().ok_or_else(|| {
            AttemptError::Validation("Mastodon account has no instance URL".to_string())
        })?;
        Ok(normalize_instance(instance))
    }
}

/// Ensure the instance URL has a scheme and no trailing slash.
fn normalize_instance(instance: &str) -> String {
    let trimmed = instance.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

#[async_trait]
impl PlatformAdapter for MastodonAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Mastodon
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        let base = Self::base_url(ctx.account)?;

        let response = self
            .http
            .get(format!("{}/api/v1/accounts/verify_credentials", base))
            .bearer_auth(ctx.token.expose_secret())
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Mastodon, "verify credentials", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Mastodon, "verify credentials", response).await);
        }

        let account: VerifiedAccount = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Mastodon returned an unreadable profile: {}", e))
        })?;

        Ok(AccountProfile {
            id: account.id,
            username: account.username,
            display_name: account.display_name,
        })
    }

    async fn upload_media(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError> {
        let base = Self::base_url(ctx.account)?;

        let part = reqwest::multipart::Part::bytes(media.buffer.clone())
            .file_name(media.file_name.clone())
            .mime_str(&media.mime_type)
            .map_err(|e| AttemptError::Upload(format!("invalid media mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/api/v2/media", base))
            .bearer_auth(ctx.token.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Mastodon, "upload media", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Mastodon, "upload media", response).await);
        }

        let media: UploadedMedia = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Mastodon returned an unreadable media response: {}", e))
        })?;

        Ok(media.id)
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        if input.content.trim().is_empty() && input.media_refs.is_empty() {
            return Err(AttemptError::Validation(
                "Mastodon statuses need text or at least one attachment".to_string(),
            ));
        }

        let base = Self::base_url(ctx.account)?;
        let body = serde_json::json!({
            "status": input.content,
            "media_ids": input.media_refs,
        });

        let response = self
            .http
            .post(format!("{}/api/v1/statuses", base))
            .bearer_auth(ctx.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Mastodon, "publish status", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Mastodon, "publish status", response).await);
        }

        let status: CreatedStatus = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Mastodon returned an unreadable status: {}", e))
        })?;

        Ok(status.id)
    }
}
