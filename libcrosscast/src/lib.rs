//! Crosscast — the multi-platform publish core of a social publishing
//! application.
//!
//! One authoring intent (text + media + target accounts) fans out to up to
//! seven platform APIs, each with its own authentication-refresh
//! semantics, media-upload protocol and rate-limit behavior, producing one
//! coherent partial-success result per request.

pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod platforms;
pub mod publisher;
pub mod session;
pub mod store;
pub mod types;
pub mod vault;

// Re-export commonly used types
pub use config::Config;
pub use error::{AttemptError, CrosscastError, CryptoError, Result};
pub use publisher::{Publisher, PublisherOptions};
pub use store::{AccountStore, MemoryStore, PostStore, SqliteStore};
pub use types::{
    Account, AccountStatus, MediaFile, PlatformKind, Post, PostStatus, PostType, PublishAttempt,
    PublishOutcome, PublishRequest,
};
pub use vault::TokenVault;
