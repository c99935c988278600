//! Configurable mock adapter for testing.
//!
//! Simulates successes, typed failures, token gating and latency without
//! credentials or network access, and counts every call so tests can
//! assert what did (or did not) reach the adapter boundary.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::AttemptError;
use crate::platforms::{AdapterContext, PlatformAdapter, PublishInput};
use crate::types::{Account, AccountProfile, MediaFile, PlatformKind, RefreshedToken};

/// One successful publish as seen by the mock.
#[derive(Debug, Clone)]
pub struct PublishedPost {
    pub account_id: String,
    pub content: String,
    pub media_refs: Vec<String>,
}

pub struct MockAdapter {
    platform: PlatformKind,
    /// When set, publish/upload succeed only for these plaintext tokens.
    accept_tokens: Option<Vec<String>>,
    publish_error: Option<AttemptError>,
    upload_error: Option<AttemptError>,
    refresh_result: Option<Result<RefreshedToken, AttemptError>>,
    delay: Duration,
    verify_calls: Arc<Mutex<usize>>,
    upload_calls: Arc<Mutex<usize>>,
    publish_calls: Arc<Mutex<usize>>,
    refresh_calls: Arc<Mutex<usize>>,
    published: Arc<Mutex<Vec<PublishedPost>>>,
}

impl MockAdapter {
    /// A mock that accepts any token and always succeeds.
    pub fn success(platform: PlatformKind) -> Self {
        Self {
            platform,
            accept_tokens: None,
            publish_error: None,
            upload_error: None,
            refresh_result: None,
            delay: Duration::from_millis(0),
            verify_calls: Arc::new(Mutex::new(0)),
            upload_calls: Arc::new(Mutex::new(0)),
            publish_calls: Arc::new(Mutex::new(0)),
            refresh_calls: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every publish with the given error.
    pub fn publish_failure(platform: PlatformKind, error: AttemptError) -> Self {
        let mut mock = Self::success(platform);
        mock.publish_error = Some(error);
        mock
    }

    /// Fail every upload with the given error.
    pub fn upload_failure(platform: PlatformKind, error: AttemptError) -> Self {
        let mut mock = Self::success(platform);
        mock.upload_error = Some(error);
        mock
    }

    /// Accept only the given plaintext tokens; anything else fails with an
    /// auth error, which is how an expired token presents.
    pub fn accepting_tokens(mut self, tokens: &[&str]) -> Self {
        self.accept_tokens = Some(tokens.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Answer refresh calls with the given result instead of the default
    /// "no refresh tokens" failure.
    pub fn with_refresh(mut self, result: Result<RefreshedToken, AttemptError>) -> Self {
        self.refresh_result = Some(result);
        self
    }

    /// Sleep before completing operations, simulating a slow platform.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn verify_calls(&self) -> usize {
        *self.verify_calls.lock().unwrap()
    }

    pub fn upload_calls(&self) -> usize {
        *self.upload_calls.lock().unwrap()
    }

    pub fn publish_calls(&self) -> usize {
        *self.publish_calls.lock().unwrap()
    }

    pub fn refresh_calls(&self) -> usize {
        *self.refresh_calls.lock().unwrap()
    }

    pub fn published(&self) -> Vec<PublishedPost> {
        self.published.lock().unwrap().clone()
    }

    fn check_token(&self, token: &SecretString) -> Result<(), AttemptError> {
        if let Some(accepted) = &self.accept_tokens {
            if !accepted.iter().any(|t| t == token.expose_secret()) {
                return Err(AttemptError::Auth("mock rejected the token".to_string()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> PlatformKind {
        self.platform
    }

    async fn verify_credentials(
        &self,
        ctx: &AdapterContext<'_>,
    ) -> Result<AccountProfile, AttemptError> {
        *self.verify_calls.lock().unwrap() += 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.check_token(ctx.token)?;

        Ok(AccountProfile {
            id: format!("{}-profile", self.platform),
            username: ctx.account.username.clone(),
            display_name: None,
        })
    }

    async fn refresh_token(
        &self,
        _account: &Account,
        _refresh_token: &SecretString,
    ) -> Result<RefreshedToken, AttemptError> {
        *self.refresh_calls.lock().unwrap() += 1;

        match &self.refresh_result {
            Some(Ok(grant)) => Ok(grant.clone()),
            Some(Err(error)) => Err(error.clone()),
            None => Err(AttemptError::Auth(format!(
                "{} does not issue refresh tokens",
                self.platform.display_name()
            ))),
        }
    }

    async fn upload_media(
        &self,
        ctx: &AdapterContext<'_>,
        media: &MediaFile,
    ) -> Result<String, AttemptError> {
        *self.upload_calls.lock().unwrap() += 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.check_token(ctx.token)?;

        if let Some(error) = &self.upload_error {
            return Err(error.clone());
        }

        Ok(format!("{}-media-{}", self.platform, media.file_name))
    }

    async fn publish(
        &self,
        ctx: &AdapterContext<'_>,
        input: &PublishInput<'_>,
    ) -> Result<String, AttemptError> {
        *self.publish_calls.lock().unwrap() += 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        self.check_token(ctx.token)?;

        if let Some(error) = &self.publish_error {
            return Err(error.clone());
        }

        self.published.lock().unwrap().push(PublishedPost {
            account_id: ctx.account.id.clone(),
            content: input.content.to_string(),
            media_refs: input.media_refs.to_vec(),
        });

        Ok(format!("{}-post-{}", self.platform, uuid::Uuid::new_v4()))
    }
}
