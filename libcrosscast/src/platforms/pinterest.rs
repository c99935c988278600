//! Pinterest adapter.
//!
//! Pins always hang off a board, and the API has no "post without media"
//! shape at all, so both conditions are checked before any request goes
//! out. The image itself travels inside the pin-create call as an
//! `image_base64` media source; `upload_media` therefore encodes locally
//! and never touches the network.

use async_trait::async_trait;
use base64::Engine;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::PinterestConfig;
use crate::error::AttemptError;
use crate::platforms::{
    error_from_response, transport_error, AdapterContext, PlatformAdapter, PublishInput,
};
use crate::types::{AccountProfile, MediaFile, PlatformKind};

pub struct PinterestAdapter {
    http: reqwest::Client,
    config: PinterestConfig,
}

#[derive(Deserialize)]
struct UserAccount {
    username: String,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct BoardsPage {
    #[serde(default)]
    items: Vec<Board>,
}

#[derive(Deserialize)]
struct Board {
    id: String,
}

#[derive(Deserialize)]
struct CreatedPin {
    id: String,
}

impl PinterestAdapter {
    pub fn new(http: reqwest::Client, config: PinterestConfig) -> Self {
        Self { http, config }
    }

    fn base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    async fn first_board(&self, ctx: &AdapterContext<'_>) -> Result<String, AttemptError> {
        let response = self
            .http
            .get(format!("{}/boards", self.base()))
            .bearer_auth(ctx.token.expose_secret())
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Pinterest, "list boards", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Pinterest, "list boards", response).await);
        }

        let boards: BoardsPage = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Pinterest returned an unreadable board list: {}", e))
        })?;

        boards.items.into_iter().next().map(|b| b.id).ok_or_else(|| {
            AttemptError::Validation(
                "Pinterest account has no boards; create a board before publishing pins"
                    .to_string(),
            )
        })
    }
}

/// Media refs are carried as `mime:base64data` so publish can rebuild the
/// media source without re-reading the file.
fn encode_media_ref(media: &MediaFile) -> String {
    format!(
        "{}:{}",
        media.mime_type,
        base64::engine::general_purpose::STANDARD.encode(&media.buffer)
    )
}

fn decode_media_ref(media_ref: &str) -> Result<(&str, &str), AttemptError> {
    media_ref.split_once(':').ok_or_else(|| {
        AttemptError::Platform("malformed Pinterest media reference".to_string())
    })
}

#[async_trait]
impl PlatformAdapter for PinterestAdapter {
    fn platform(&self) -> PlatformKind {
        PlatformKind::Pinterest
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        let response = self
            .http
            .get(format!("{}/user_account", self.base()))
            .bearer_auth(ctx.token.expose_secret())
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Pinterest, "verify credentials", e))?;

        if !response.status().is_success() {
            return Err(
                error_from_response(PlatformKind::Pinterest, "verify credentials", response).await
            );
        }

        let user: UserAccount = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Pinterest returned an unreadable profile: {}", e))
        })?;

        Ok(AccountProfile {
            id: user.id.unwrap_or_else(|| user.username.clone()),
            username: user.username,
            display_name: None,
        })
    }

    async fn upload_media(
        &self,
        _ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError> {
        if !media.mime_type.starts_with("image/") {
            return Err(AttemptError::Upload(format!(
                "Pinterest pins take images only, not {}",
                media.mime_type
            )));
        }
        Ok(encode_media_ref(media))
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        // Both checks run before any request: a pin without an image is a
        // caller mistake, not a platform failure.
        let media_ref = input.media_refs.first().ok_or_else(|| {
            AttemptError::Validation("Pinterest pins require at least one image".to_string())
        })?;

        let board_id = self.first_board(ctx).await?;
        let (content_type, data) = decode_media_ref(media_ref)?;

        let body = serde_json::json!({
            "board_id": board_id,
            "description": input.content,
            "media_source": {
                "source_type": "image_base64",
                "content_type": content_type,
                "data": data,
            },
        });

        let response = self
            .http
            .post(format!("{}/pins", self.base()))
            .bearer_auth(ctx.token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(PlatformKind::Pinterest, "create pin", e))?;

        if !response.status().is_success() {
            return Err(error_from_response(PlatformKind::Pinterest, "create pin", response).await);
        }

        let pin: CreatedPin = response.json().await.map_err(|e| {
            AttemptError::Platform(format!("Pinterest returned an unreadable pin: {}", e))
        })?;

        Ok(pin.id)
    }
}
