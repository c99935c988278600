//! Core types for Crosscast

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AttemptError;

/// The closed set of platforms this core can publish to.
///
/// Adapters are registered once per kind in the
/// [`AdapterRegistry`](crate::platforms::AdapterRegistry); there is no
/// plugin mechanism for arbitrary new platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Mastodon,
    X,
    Pinterest,
    Bluesky,
    Facebook,
    Instagram,
    Reddit,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 7] = [
        PlatformKind::Mastodon,
        PlatformKind::X,
        PlatformKind::Pinterest,
        PlatformKind::Bluesky,
        PlatformKind::Facebook,
        PlatformKind::Instagram,
        PlatformKind::Reddit,
    ];

    /// Lowercase identifier used in storage and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Mastodon => "mastodon",
            PlatformKind::X => "x",
            PlatformKind::Pinterest => "pinterest",
            PlatformKind::Bluesky => "bluesky",
            PlatformKind::Facebook => "facebook",
            PlatformKind::Instagram => "instagram",
            PlatformKind::Reddit => "reddit",
        }
    }

    /// Capitalized name for user-facing error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlatformKind::Mastodon => "Mastodon",
            PlatformKind::X => "X",
            PlatformKind::Pinterest => "Pinterest",
            PlatformKind::Bluesky => "Bluesky",
            PlatformKind::Facebook => "Facebook",
            PlatformKind::Instagram => "Instagram",
            PlatformKind::Reddit => "Reddit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mastodon" => Some(PlatformKind::Mastodon),
            "x" | "twitter" => Some(PlatformKind::X),
            "pinterest" => Some(PlatformKind::Pinterest),
            "bluesky" => Some(PlatformKind::Bluesky),
            "facebook" => Some(PlatformKind::Facebook),
            "instagram" => Some(PlatformKind::Instagram),
            "reddit" => Some(PlatformKind::Reddit),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(AccountStatus::Active),
            "error" => Some(AccountStatus::Error),
            _ => None,
        }
    }
}

/// A connected platform account.
///
/// Tokens are stored encrypted in the vault format; the orchestrator
/// mutates `status` and `last_used_at`, token refresh mutates the token
/// columns. Accounts are never deleted by this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub platform: PlatformKind,
    /// Base URL of the home instance. Mastodon only; `None` elsewhere.
    pub instance_url: Option<String>,
    pub username: String,
    pub encrypted_access_token: String,
    pub encrypted_refresh_token: Option<String>,
    pub token_expires_at: Option<i64>,
    pub status: AccountStatus,
    pub last_used_at: Option<i64>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "scheduled" => Some(PostStatus::Scheduled),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }

    /// Status transitions are monotonic: a post never re-enters `draft`,
    /// and `published`/`failed` are terminal. A `scheduled` post moves on
    /// only when the dispatch sweep publishes it.
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        match self {
            PostStatus::Draft => next != PostStatus::Draft,
            PostStatus::Scheduled => {
                matches!(next, PostStatus::Published | PostStatus::Failed)
            }
            PostStatus::Published | PostStatus::Failed => false,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted authoring intent plus its aggregate outcome.
///
/// Per-account attempt details live only in the returned
/// [`PublishOutcome`]; the post row carries a generic error marker at most.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub media_refs: Vec<String>,
    pub target_account_ids: Vec<String>,
    pub status: PostStatus,
    pub scheduled_for: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub published_at: Option<i64>,
}

impl Post {
    pub fn new(user_id: &str, request: &PublishRequest) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: request.content.clone(),
            media_refs: request.media.iter().map(|m| m.file_name.clone()).collect(),
            target_account_ids: request.target_account_ids.clone(),
            status: PostStatus::Draft,
            scheduled_for: request.scheduled_for.map(|t| t.timestamp()),
            error_message: None,
            created_at: Utc::now().timestamp(),
            published_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Text,
    Image,
    Video,
    Reel,
}

impl PostType {
    /// Derive the post type from the attached media when the caller did
    /// not pick one explicitly.
    pub fn infer(media: &[MediaFile]) -> Self {
        if media.iter().any(|m| m.mime_type.starts_with("video/")) {
            PostType::Video
        } else if media.iter().any(|m| m.mime_type.starts_with("image/")) {
            PostType::Image
        } else {
            PostType::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Text => "text",
            PostType::Image => "image",
            PostType::Video => "video",
            PostType::Reel => "reel",
        }
    }
}

/// A raw media file handed in by the caller. Transient: bytes are uploaded
/// to each platform and never persisted by this subsystem.
#[derive(Clone)]
pub struct MediaFile {
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub buffer: Vec<u8>,
}

impl MediaFile {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, buffer: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            size: buffer.len() as u64,
            buffer,
        }
    }
}

impl std::fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .finish()
    }
}

/// A publish request as handed over by the HTTP controller.
///
/// Content length and target count are validated upstream; the
/// orchestrator re-checks only what it needs to stay safe.
#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub content: String,
    pub target_account_ids: Vec<String>,
    pub media: Vec<MediaFile>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub post_type: Option<PostType>,
}

/// Fresh tokens returned by an adapter's refresh call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Some platforms rotate the refresh token on every grant.
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

/// Profile data from `verify_credentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountProfile {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
}

/// Outcome of one account's attempt within a fan-out. Ephemeral: returned
/// to the caller, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub account_id: String,
    pub platform: PlatformKind,
    pub success: bool,
    pub platform_post_id: Option<String>,
    pub error: Option<AttemptError>,
}

impl PublishAttempt {
    pub fn succeeded(account_id: String, platform: PlatformKind, platform_post_id: String) -> Self {
        Self {
            account_id,
            platform,
            success: true,
            platform_post_id: Some(platform_post_id),
            error: None,
        }
    }

    pub fn failed(account_id: String, platform: PlatformKind, error: AttemptError) -> Self {
        Self {
            account_id,
            platform,
            success: false,
            platform_post_id: None,
            error: Some(error),
        }
    }
}

/// What the caller gets back from [`Publisher::publish`](crate::publisher::Publisher::publish).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub post_id: String,
    pub status: PostStatus,
    pub scheduled_for: Option<DateTime<Utc>>,
    /// One entry per resolved account, order not guaranteed. Absent for
    /// scheduled posts.
    pub results: Option<Vec<PublishAttempt>>,
}
