//! Facebook adapter (Graph API).
//!
//! Publishing happens on a Page, never on the user node, so every attempt
//! resolves the user's first Page and uses that Page's own access token
//! for the page-scoped endpoints. Photos are uploaded unpublished and
//! attached to a feed post; videos post directly at upload time with no
//! separate publish step.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::FacebookConfig;
use crate::error::AttemptError;
use crate::platforms::{
    error_from_response, transport_error, AdapterContext, PlatformAdapter, PublishInput,
};
use crate::types::{Account, AccountProfile, MediaFile, PlatformKind, RefreshedToken};

const VIDEO_REF_PREFIX: &str = "video:";
const PHOTO_REF_PREFIX: &str = "photo:";

pub struct FacebookAdapter {
    http: reqwest::Client,
    config: FacebookConfig,
}

#[derive(Deserialize)]
struct MeNode {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct PagesResponse {
    #[serde(default)]
    data: Vec<PageNode>,
}

#[derive(Deserialize)]
struct PageNode {
    id: String,
    access_token: String,
}

#[derive(Deserialize)]
struct CreatedNode {
    id: String,
}

#[derive(Deserialize)]
struct ExchangedToken {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct ResolvedPage {
    id: String,
    access_token: String,
}

impl FacebookAdapter {
    pub fn new(http: reqwest::Client, config: FacebookConfig) -> Self {
        Self { http, config }
    }

    fn graph(&self, path: &str) -> String {
        format!("{}/{}", self.config.graph_base.trim_end_matches('/'), path)
    }

    /// Find the Page to publish on. The Page id must be distinct from the
    /// user id, and the Page's own token authorizes the page-scoped calls.
    async fn resolve_page(&self, ctx: &AdapterContext<'_>) -> Result<ResolvedPage, AttemptError> {
        let response = self
            .http
            .get(self.graph("me"))
            .query(&[("fields", "id"), ("access_token", ctx.token.expose_secret().as_str())])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "resolve user", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Facebook, "resolve user", response).await);
        }

        let me: MeNode = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Facebook returned an unreadable user node: {}", e))
        })?;

        let response = self
            .http
            .get(self.graph("me/accounts"))
            .query(&[("access_token", ctx.token.expose_secret().as_str())])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "resolve page", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Facebook, "resolve page", response).await);
        }

        let pages: PagesResponse = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Facebook returned an unreadable page list: {}", e))
        })?;

        let page = pages.data.into_iter().next().ok_or_else(|| {
            AttemptError::Validation(
                "no Facebook Page is connected to this account; publishing requires a Page"
                    .to_string(),
            )
        })?;

        if page.id == me.id {
            return Err(AttemptError::Validation(
                "resolved Facebook Page id matches the user id; a distinct Page is required"
                    .to_string(),
            ));
        }

        Ok(ResolvedPage {
            id: page.id,
            access_token: page.access_token,
        })
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Facebook
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        let response = self
            .http
            .get(self.graph("me"))
            .query(&[
                ("fields", "id,name"),
                ("access_token", ctx.token.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "verify credentials", e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(PlatformKind::Facebook, "verify credentials", response).await
            );
        }

        let me: MeNode = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Facebook returned an unreadable profile: {}", e))
        })?;

        Ok(AccountProfile {
            id: me.id,
            username: me.name.clone().unwrap_or_default(),
            display_name: me.name,
        })
    }

    async fn refresh_token(
        &self,
        _account: &Account,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken, AttemptError> {
        let (app_id, app_secret) = match (&self.config.app_id, &self.config.app_secret) {
            (Some(id), Some(secret)) => (id.as_str(), secret.as_str()),
            _ => {
                return Err(AttemptError::Auth(
                    "Facebook token exchange requires configured app credentials".to_string(),
                ))
            }
        };

        let response = self
            .http
            .get(self.graph("oauth/access_token"))
            .query(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", app_id),
                ("client_secret", app_secret),
                ("fb_exchange_token", refresh_token.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "refresh token", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Facebook, "refresh token", response).await);
        }

        let grant: ExchangedToken = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Facebook returned an unreadable token grant: {}", e))
        })?;

        Ok(RefreshedToken {
            access_token: grant.access_token,
            refresh_token: None,
            expires_in: grant.expires_in,
        })
    }

    async fn upload_media(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError> {
        let page = self.resolve_page(ctx).await?;

        if media.mime_type.starts_with("video/") {
            let part = reqwest::multipart::Part::bytes(media.buffer.clone())
                .file_name(media.file_name.clone())
                .mime_str(&media.mime_type)
                .map_err(|e| AttemptError::Upload(format!("invalid media mime type: {}", e)))?;
            let form = reqwest::multipart::Form::new()
                .text("access_token", page.access_token.clone())
                .part("source", part);

            let response = self
                .http
                .post(self.graph(&format!("{}/videos", page.id)))
                .multipart(form)
                .send()
                .await
                .map_err(|e| transport_error(PlatformKind::Facebook, "upload video", e))?;

            if !response.status().is_success() {
                return Err(
                    error_from_response(PlatformKind::Facebook, "upload video", response).await
                );
            }

            let created: CreatedNode = response.json().await.map_err(|e| {
                AttemptError::Platform(format!("Facebook returned an unreadable video node: {}", e))
            })?;

            // Video uploads ARE the post; publish only relays the id.
            return Ok(format!("{}{}", VIDEO_REF_PREFIX, created.id));
        }

        let part = reqwest::multipart::Part::bytes(media.buffer.clone())
            .file_name(media.file_name.clone())
            .mime_str(&media.mime_type)
            .map_err(|e| AttemptError::Upload(format!("invalid media mime type: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .text("access_token", page.access_token.clone())
            .text("published", "false")
            .part("source", part);

        let response = self
            .http
            .post(self.graph(&format!("{}/photos", page.id)))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "upload photo", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Facebook, "upload photo", response).await);
        }

        let created: CreatedNode = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Facebook returned an unreadable photo node: {}", e))
        })?;

        Ok(format!("{}{}", PHOTO_REF_PREFIX, created.id))
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        // A video upload already created the post.
        if let Some(video_ref) = input
            .media_refs
            .iter()
            .find(|r| r.starts_with(VIDEO_REF_PREFIX))
        {
            return Ok(video_ref.trim_start_matches(VIDEO_REF_PREFIX).to_string());
        }

        let page = self.resolve_page(ctx).await?;

        let mut params: Vec<(String, String)> = vec![
            ("message".to_string(), input.content.to_string()),
            ("access_token".to_string(), page.access_token.clone()),
        ];
        for (index, media_ref) in input
            .media_refs
            .iter()
            .filter(|r| r.starts_with(PHOTO_REF_PREFIX))
            .enumerate()
        {
            let media_id = media_ref.trim_start_matches(PHOTO_REF_PREFIX);
            params.push((
                format!("attached_media[{}]", index),
                serde_json::json!({ "media_fbid": media_id }).to_string(),
            ));
        }

        let response = self
            .http
            .post(self.graph(&format!("{}/feed", page.id)))
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Facebook, "publish feed post", e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(PlatformKind::Facebook, "publish feed post", response).await
            );
        }

        let created: CreatedNode = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Facebook returned an unreadable post node: {}", e))
        })?;

        Ok(created.id)
    }
}
