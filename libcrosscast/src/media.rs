//! Per-platform media constraints.
//!
//! The orchestrator runs these checks before a single byte leaves the
//! process, so constraint violations are raised as typed validation/upload
//! errors and never masquerade as transport failures.

use crate::error::AttemptError;
use crate::types::{MediaFile, PlatformKind};

/// Hard cap on a single Bluesky blob.
pub const BLUESKY_BLOB_LIMIT: u64 = 1_000_000;

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png", "image/gif", "image/webp"];
const VIDEO_TYPES: &[&str] = &["video/mp4", "video/quicktime", "video/webm"];
const IMAGE_AND_VIDEO: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "video/mp4",
    "video/quicktime",
    "video/webm",
];

/// What a platform accepts for attachments.
#[derive(Debug, Clone, Copy)]
pub struct MediaPolicy {
    pub max_count: usize,
    pub max_bytes: u64,
    pub allowed_types: &'static [&'static str],
    pub requires_media: bool,
}

pub fn policy_for(platform: PlatformKind) -> MediaPolicy {
    match platform {
        PlatformKind::Mastodon => MediaPolicy {
            max_count: 4,
            max_bytes: 40 * 1024 * 1024,
            allowed_types: IMAGE_AND_VIDEO,
            requires_media: false,
        },
        PlatformKind::X => MediaPolicy {
            max_count: 4,
            max_bytes: 512 * 1024 * 1024,
            allowed_types: IMAGE_AND_VIDEO,
            requires_media: false,
        },
        PlatformKind::Pinterest => MediaPolicy {
            max_count: 1,
            max_bytes: 20 * 1024 * 1024,
            allowed_types: IMAGE_TYPES,
            requires_media: true,
        },
        PlatformKind::Bluesky => MediaPolicy {
            max_count: 4,
            max_bytes: BLUESKY_BLOB_LIMIT,
            allowed_types: IMAGE_TYPES,
            requires_media: false,
        },
        PlatformKind::Facebook => MediaPolicy {
            max_count: 10,
            max_bytes: 100 * 1024 * 1024,
            allowed_types: IMAGE_AND_VIDEO,
            requires_media: false,
        },
        PlatformKind::Instagram => MediaPolicy {
            max_count: 1,
            max_bytes: 100 * 1024 * 1024,
            allowed_types: &["image/jpeg", "image/jpg", "video/mp4"],
            requires_media: true,
        },
        // Reddit submissions are text or link only here; media goes through
        // a lease-based upload flow this core does not speak.
        PlatformKind::Reddit => MediaPolicy {
            max_count: 0,
            max_bytes: 0,
            allowed_types: &[],
            requires_media: false,
        },
    }
}

/// Validate a batch of media files against one platform's policy.
///
/// Missing required media is a validation error; size and type violations
/// are upload errors. Both fire before any network call.
pub fn check_media(platform: PlatformKind, media: &[MediaFile]) -> Result<(), AttemptError> {
    let policy = policy_for(platform);

    if policy.requires_media && media.is_empty() {
        return Err(AttemptError::Validation(requires_media_message(platform)));
    }

    if media.is_empty() {
        return Ok(());
    }

    if policy.max_count == 0 {
        return Err(AttemptError::Upload(format!(
            "{} does not accept direct media uploads; link posts take a hosted URL instead",
            platform.display_name()
        )));
    }

    if media.len() > policy.max_count {
        return Err(AttemptError::Upload(format!(
            "{} accepts at most {} attachment(s), got {}",
            platform.display_name(),
            policy.max_count,
            media.len()
        )));
    }

    for file in media {
        if !mime_allowed(&policy, &file.mime_type) {
            return Err(AttemptError::Upload(format!(
                "{} does not accept {} uploads ({})",
                platform.display_name(),
                file.mime_type,
                file.file_name
            )));
        }

        if file.size > policy.max_bytes {
            return Err(AttemptError::Upload(format!(
                "{} is {} bytes and exceeds the {} limit of {} bytes",
                file.file_name,
                file.size,
                platform.display_name(),
                policy.max_bytes
            )));
        }
    }

    Ok(())
}

fn mime_allowed(policy: &MediaPolicy, mime: &str) -> bool {
    policy
        .allowed_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(mime))
}

fn requires_media_message(platform: PlatformKind) -> String {
    match platform {
        PlatformKind::Pinterest => "Pinterest pins require at least one image".to_string(),
        PlatformKind::Instagram => {
            "Instagram posts require at least one image or video".to_string()
        }
        other => format!("{} posts require at least one media file", other.display_name()),
    }
}
