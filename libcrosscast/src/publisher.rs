//! Multi-account publish orchestration.
//!
//! One publish request fans out to every resolved target account with
//! bounded parallelism. Each attempt is independent: it decrypts its own
//! token, runs the platform's media pipeline, gets exactly one
//! refresh-and-retry on auth failure, and reports a typed outcome. One
//! account's failure never aborts the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use secrecy::SecretString;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::PublishConfig;
use crate::error::{AttemptError, CrosscastError, Result};
use crate::media;
use crate::platforms::{AdapterContext, AdapterRegistry, PlatformAdapter, PublishInput};
use crate::store::{AccountStore, PostStore};
use crate::types::{
    Account, AccountStatus, Post, PostStatus, PostType, PublishAttempt, PublishOutcome,
    PublishRequest,
};
use crate::vault::TokenVault;

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    /// How many account attempts run at once.
    pub concurrency: usize,
    /// Overall cap per account attempt.
    pub account_timeout: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            account_timeout: Duration::from_secs(120),
        }
    }
}

impl PublisherOptions {
    pub fn from_config(config: &PublishConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            account_timeout: Duration::from_secs(config.account_timeout_secs),
        }
    }
}

pub struct Publisher {
    accounts: Arc<dyn AccountStore>,
    posts: Arc<dyn PostStore>,
    vault: Arc<TokenVault>,
    registry: Arc<AdapterRegistry>,
    options: PublisherOptions,
    /// Token refresh is a critical section per account: two concurrent
    /// refreshes must not race and overwrite each other's grant.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Publisher {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        posts: Arc<dyn PostStore>,
        vault: Arc<TokenVault>,
        registry: Arc<AdapterRegistry>,
        options: PublisherOptions,
    ) -> Self {
        Self {
            accounts,
            posts,
            vault,
            registry,
            options,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Publish one request across its target accounts.
    ///
    /// Returns a result per resolved account (order not guaranteed), or —
    /// for a future `scheduled_for` — a scheduled outcome with no results
    /// and no adapter traffic. Dispatching scheduled posts later is the
    /// caller's sweep, which re-invokes this method with `scheduled_for`
    /// absent.
    pub async fn publish(&self, user_id: &str, request: PublishRequest) -> Result<PublishOutcome> {
        if request.target_account_ids.is_empty() {
            return Err(CrosscastError::InvalidInput(
                "a publish request needs at least one target account".to_string(),
            ));
        }

        let accounts = self.accounts.get_accounts(&request.target_account_ids).await?;

        for account in &accounts {
            if account.user_id != user_id {
                return Err(CrosscastError::ForeignAccount(account.id.clone()));
            }
        }

        if accounts.is_empty() {
            return Err(CrosscastError::NoActiveAccounts);
        }

        if accounts.len() != request.target_account_ids.len() {
            let missing = request
                .target_account_ids
                .iter()
                .find(|id| !accounts.iter().any(|a| &a.id == *id));
            return Err(CrosscastError::InvalidInput(match missing {
                Some(id) => format!("unknown target account: {}", id),
                None => "duplicate target account ids".to_string(),
            }));
        }

        if !accounts.iter().any(|a| a.status == AccountStatus::Active) {
            return Err(CrosscastError::NoActiveAccounts);
        }

        let post = Post::new(user_id, &request);
        self.posts.create_post(&post).await?;

        if let Some(at) = request.scheduled_for {
            if at > Utc::now() {
                self.posts
                    .update_post_status(&post.id, PostStatus::Scheduled, None, None)
                    .await?;
                info!(post_id = %post.id, scheduled_for = %at, "post scheduled for later dispatch");
                return Ok(PublishOutcome {
                    post_id: post.id,
                    status: PostStatus::Scheduled,
                    scheduled_for: Some(at),
                    results: None,
                });
            }
        }

        let post_type = request
            .post_type
            .unwrap_or_else(|| PostType::infer(&request.media));

        let results: Vec<PublishAttempt> = stream::iter(accounts)
            .map(|account| self.attempt_account(&post, &request, post_type, account))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;

        let status = if failed == 0 {
            PostStatus::Published
        } else {
            PostStatus::Failed
        };
        // Per-account detail stays in the returned results; the post row
        // only carries a generic marker.
        let error_message = match (succeeded, failed) {
            (_, 0) => None,
            (0, _) => Some("all accounts failed"),
            _ => Some("some accounts failed"),
        };
        let published_at = (failed == 0).then(|| Utc::now().timestamp());

        self.posts
            .update_post_status(&post.id, status, error_message, published_at)
            .await?;

        info!(post_id = %post.id, succeeded, failed, "publish fan-out finished");

        Ok(PublishOutcome {
            post_id: post.id,
            status,
            scheduled_for: None,
            results: Some(results),
        })
    }

    /// One account's attempt, bounded by the per-account timeout. Always
    /// produces a result; errors never escape as panics or call failures.
    async fn attempt_account(
        &self,
        post: &Post,
        request: &PublishRequest,
        post_type: PostType,
        account: Account,
    ) -> PublishAttempt {
        let account_id = account.id.clone();
        let platform = account.platform;

        // An account already flipped to error fails fast: no decryption,
        // no network, but still one entry in the results.
        if account.status == AccountStatus::Error {
            return PublishAttempt::failed(
                account_id,
                platform,
                AttemptError::Auth(
                    "account is marked as errored; reconnect it before publishing".to_string(),
                ),
            );
        }

        match timeout(
            self.options.account_timeout,
            self.attempt_inner(post, request, post_type, &account),
        )
        .await
        {
            Ok(Ok(platform_post_id)) => {
                if let Err(e) = self
                    .accounts
                    .touch_last_used(&account_id, Utc::now().timestamp())
                    .await
                {
                    warn!(account = %account_id, "failed to update last-used timestamp: {}", e);
                }
                info!(account = %account_id, platform = %platform, post = %platform_post_id, "published");
                PublishAttempt::succeeded(account_id, platform, platform_post_id)
            }
            Ok(Err(error)) => {
                if let AttemptError::RateLimit { wait_secs, .. } = &error {
                    warn!(
                        account = %account_id,
                        platform = %platform,
                        "rate limited; platform asks for a {} pause",
                        humantime::format_duration(Duration::from_secs(*wait_secs))
                    );
                } else {
                    warn!(account = %account_id, platform = %platform, "publish attempt failed: {}", error);
                }
                PublishAttempt::failed(account_id, platform, error)
            }
            Err(_) => PublishAttempt::failed(
                account_id,
                platform,
                AttemptError::Platform(format!(
                    "attempt timed out after {}",
                    humantime::format_duration(self.options.account_timeout)
                )),
            ),
        }
    }

    async fn attempt_inner(
        &self,
        post: &Post,
        request: &PublishRequest,
        post_type: PostType,
        account: &Account,
    ) -> std::result::Result<String, AttemptError> {
        let adapter = self.registry.adapter_for(account.platform).ok_or_else(|| {
            AttemptError::Platform(format!("no adapter registered for {}", account.platform))
        })?;

        // Constraint violations must surface before any bytes leave the
        // process, distinguishable from transport errors.
        media::check_media(account.platform, &request.media)?;

        self.with_auth_retry(adapter.as_ref(), account, request, post, post_type)
            .await
    }

    /// The shared refresh-and-retry policy: run the attempt with the
    /// vault-decrypted token; on an auth failure perform exactly one
    /// refresh through the adapter and retry once with the new token.
    /// Refresh failure (or a missing refresh token) flips the account to
    /// its error status and the auth error becomes terminal.
    async fn with_auth_retry(
        &self,
        adapter: &dyn PlatformAdapter,
        account: &Account,
        request: &PublishRequest,
        post: &Post,
        post_type: PostType,
    ) -> std::result::Result<String, AttemptError> {
        let token = self
            .vault
            .decrypt(&account.encrypted_access_token)
            .map_err(AttemptError::from)?;

        match self
            .run_attempt(adapter, account, request, post, post_type, &token)
            .await
        {
            Err(AttemptError::Auth(reason)) => {
                debug!(account = %account.id, %reason, "auth failure; attempting a one-shot token refresh");
                let refreshed = self.refresh_account(adapter, account).await?;
                self.run_attempt(adapter, account, request, post, post_type, &refreshed)
                    .await
            }
            other => other,
        }
    }

    /// Upload every media file, then publish. The decrypted token lives
    /// only for the duration of this call.
    async fn run_attempt(
        &self,
        adapter: &dyn PlatformAdapter,
        account: &Account,
        request: &PublishRequest,
        post: &Post,
        post_type: PostType,
        token: &SecretString,
    ) -> std::result::Result<String, AttemptError> {
        let ctx = AdapterContext { account, token };

        let mut media_refs = Vec::with_capacity(request.media.len());
        for media in &request.media {
            media_refs.push(adapter.upload_media(&ctx, media).await?);
        }

        let input = PublishInput {
            content: &post.content,
            media_refs: &media_refs,
            post_type,
        };
        adapter.publish(&ctx, &input).await
    }

    /// Exchange the refresh token for fresh credentials under the
    /// account's refresh lock, persisting the re-encrypted grant.
    async fn refresh_account(
        &self,
        adapter: &dyn PlatformAdapter,
        account: &Account,
    ) -> std::result::Result<SecretString, AttemptError> {
        let lock = self.refresh_lock(&account.id).await;
        let _guard = lock.lock().await;

        let refresh_ciphertext = match &account.encrypted_refresh_token {
            Some(ciphertext) => ciphertext,
            None => {
                self.mark_account_errored(&account.id).await;
                return Err(AttemptError::Auth(format!(
                    "{} rejected the token and the account has no refresh token",
                    account.platform.display_name()
                )));
            }
        };

        let refresh_token = match self.vault.decrypt(refresh_ciphertext) {
            Ok(token) => token,
            Err(error) => {
                self.mark_account_errored(&account.id).await;
                return Err(error.into());
            }
        };

        match adapter.refresh_token(account, &refresh_token).await {
            Ok(grant) => {
                let encrypted_access = self
                    .vault
                    .encrypt(&grant.access_token)
                    .map_err(AttemptError::from)?;
                let encrypted_refresh = match &grant.refresh_token {
                    Some(token) => Some(self.vault.encrypt(token).map_err(AttemptError::from)?),
                    None => None,
                };
                let expires_at = grant.expires_in.map(|secs| Utc::now().timestamp() + secs);

                if let Err(e) = self
                    .accounts
                    .update_tokens(
                        &account.id,
                        &encrypted_access,
                        encrypted_refresh.as_deref(),
                        expires_at,
                    )
                    .await
                {
                    warn!(account = %account.id, "failed to persist refreshed tokens: {}", e);
                }

                info!(account = %account.id, platform = %account.platform, "token refreshed");
                Ok(SecretString::new(grant.access_token))
            }
            Err(refresh_error) => {
                self.mark_account_errored(&account.id).await;
                Err(AttemptError::Auth(format!(
                    "token refresh failed: {}",
                    refresh_error
                )))
            }
        }
    }

    async fn mark_account_errored(&self, account_id: &str) {
        if let Err(e) = self
            .accounts
            .update_status(account_id, AccountStatus::Error)
            .await
        {
            warn!(account = %account_id, "failed to flip account status to error: {}", e);
        }
    }

    async fn refresh_lock(&self, account_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
