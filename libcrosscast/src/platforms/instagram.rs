//! Instagram adapter (Graph API).
//!
//! Instagram publishing is a two-step protocol: create a media container,
//! then publish it. Containers only take a publicly reachable URL, and
//! hosting a caller's buffer somewhere public is an external concern this
//! core does not own, so `upload_media` refuses with an explicit
//! not-implemented error instead of pretending to succeed.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::InstagramConfig;
use crate::error::AttemptError;
use crate::platforms::{
    error_from_response, transport_error, AdapterContext, PlatformAdapter, PublishInput,
};
use crate::types::{Account, AccountProfile, MediaFile, PlatformKind, PostType, RefreshedToken};

pub struct InstagramAdapter {
    http: reqwest::Client,
    config: InstagramConfig,
}

#[derive(Deserialize)]
struct IgUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct CreatedNode {
    id: String,
}

#[derive(Deserialize)]
struct RefreshedGrant {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl InstagramAdapter {
    pub fn new(http: reqwest::Client, config: InstagramConfig) -> Self {
        Self { http, config }
    }

    fn graph(&self, path: &str) -> String {
        format!("{}/{}", self.config.graph_base.trim_end_matches('/'), path)
    }

    async fn user_id(&self, ctx: &AdapterContext<'_>) -> Result<String, AttemptError> {
        let response = self
            .http
            .get(self.graph("me"))
            .query(&[("fields", "id"), ("access_token", ctx.token.expose_secret().as_str())])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "resolve user", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Instagram, "resolve user", response).await);
        }

        let user: IgUser = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Instagram returned an unreadable user: {}", e))
        })?;
        Ok(user.id)
    }
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Instagram
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        let response = self
            .http
            .get(self.graph("me"))
            .query(&[
                ("fields", "id,username"),
                ("access_token", ctx.token.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "verify credentials", e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(PlatformKind::Instagram, "verify credentials", response).await
            );
        }

        let user: IgUser = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Instagram returned an unreadable profile: {}", e))
        })?;

        Ok(AccountProfile {
            id: user.id,
            username: user.username.unwrap_or_default(),
            display_name: None,
        })
    }

    async fn refresh_token(
        &self,
        _account: &Account,
        refresh_token: &SecretString,
    ) -> Result<RefreshedToken, AttemptError> {
        let response = self
            .http
            .get(format!(
                "{}/refresh_access_token",
                self.config.refresh_base.trim_end_matches('/')
            ))
            .query(&[
                ("grant_type", "ig_refresh_token"),
                ("access_token", refresh_token.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "refresh token", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Instagram, "refresh token", response).await);
        }

        let grant: RefreshedGrant = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Instagram returned an unreadable token grant: {}", e))
        })?;

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
        // Containers need a public URL; pushing the buffer to a public
        // host is an external collaborator's job.
        Err(AttemptError::Platform(format!(
            "Instagram publishing requires a publicly hosted media URL; uploading {} from a local buffer is not implemented",
            media.file_name
        )))
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        let media_url = input.media_refs.first().ok_or_else(|| {
            AttemptError::Validation(
                "Instagram posts require at least one hosted image or video URL".to_string(),
            )
        })?;

        if !media_url.starts_with("http://") && !media_url.starts_with("https://") {
            return Err(AttemptError::Platform(
                "Instagram media references must be publicly hosted URLs; local uploads are not implemented"
                    .to_string(),
            ));
        }

        let user_id = self.user_id(ctx).await?;

        // Step one: create the media container.
        let mut params: Vec<(String, String)> = vec![
            ("caption".to_string(), input.content.to_string()),
            ("access_token".to_string(), ctx.token.expose_secret().to_string()),
        ];
        match input.post_type {
            PostType::Video => {
                params.push(("media_type".to_string(), "VIDEO".to_string()));
                params.push(("video_url".to_string(), media_url.clone()));
            }
            PostType::Reel => {
                params.push(("media_type".to_string(), "REELS".to_string()));
                params.push(("video_url".to_string(), media_url.clone()));
            }
            _ => params.push(("image_url".to_string(), media_url.clone())),
        }

        let response = self
            .http
            .post(self.graph(&format!("{}/media", user_id)))
            .form(&params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "create container", e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(PlatformKind::Instagram, "create container", response).await
            );
        }

        let container: CreatedNode = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Instagram returned an unreadable container: {}", e))
        })?;

        // Step two: publish the container.
        let publish_params = [
            ("creation_id", container.id.as_str()),
            ("access_token", ctx.token.expose_secret().as_str()),
        ];

        let response = self
            .http
            .post(self.graph(&format!("{}/media_publish", user_id)))
            .form(&publish_params)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Instagram, "publish container", e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(PlatformKind::Instagram, "publish container", response).await
            );
        }

        let published: CreatedNode = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Instagram returned an unreadable post: {}", e))
        })?;

        Ok(published.id)
    }
}
