//! End-to-end orchestrator tests over mock adapters and the in-memory
//! store: fan-out, aggregation, scheduling, refresh-and-retry, rate
//! limits, and failure isolation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use secrecy::ExposeSecret;

use libcrosscast::error::{AttemptError, CrosscastError};
use libcrosscast::platforms::mock::MockAdapter;
use libcrosscast::platforms::AdapterRegistry;
use libcrosscast::store::MemoryStore;
use libcrosscast::types::{
    Account, AccountStatus, MediaFile, PlatformKind, PostStatus, PublishRequest, RefreshedToken,
};
use libcrosscast::{Publisher, PublisherOptions, TokenVault};

const VAULT_SECRET: &str = "fanout-test-secret";
const USER: &str = "user-1";

fn vault() -> Arc<TokenVault> {
    Arc::new(TokenVault::new(VAULT_SECRET))
}

async fn seed_account(
    store: &MemoryStore,
    vault: &TokenVault,
    id: &str,
    platform: PlatformKind,
    token: &str,
    refresh_token: Option<&str>,
    status: AccountStatus,
) {
    use libcrosscast::store::AccountStore;

    let account = Account {
        id: id.to_string(),
        user_id: USER.to_string(),
        platform,
        instance_url: (platform == PlatformKind::Mastodon)
            .then(|| "https://mastodon.social".to_string()),
        username: format!("{}-user", id),
        encrypted_access_token: vault.encrypt(token).unwrap(),
        encrypted_refresh_token: refresh_token.map(|t| vault.encrypt(t).unwrap()),
        token_expires_at: None,
        status,
        last_used_at: None,
        created_at: Utc::now().timestamp(),
    };
    store.insert_account(&account).await.unwrap();
}

fn publisher_with(
    store: Arc<MemoryStore>,
    vault: Arc<TokenVault>,
    adapters: Vec<Arc<MockAdapter>>,
    options: PublisherOptions,
) -> Publisher {
    let mut registry = AdapterRegistry::empty();
    for adapter in adapters {
        registry.register(adapter);
    }
    Publisher::new(store.clone(), store, vault, Arc::new(registry), options)
}

fn request(targets: &[&str]) -> PublishRequest {
    PublishRequest {
        content: "Hello".to_string(),
        target_account_ids: targets.iter().map(|t| t.to_string()).collect(),
        media: vec![],
        scheduled_for: None,
        post_type: None,
    }
}

#[tokio::test]
async fn test_all_accounts_succeed() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-masto", PlatformKind::Mastodon, "token-a", None, AccountStatus::Active).await;
    seed_account(&store, &vault, "acct-x", PlatformKind::X, "token-b", None, AccountStatus::Active).await;

    let mastodon = Arc::new(MockAdapter::success(PlatformKind::Mastodon));
    let x = Arc::new(MockAdapter::success(PlatformKind::X));
    let publisher = publisher_with(
        store.clone(),
        vault,
        vec![mastodon.clone(), x.clone()],
        PublisherOptions::default(),
    );

    let outcome = publisher
        .publish(USER, request(&["acct-masto", "acct-x"]))
        .await
        .unwrap();

    assert_eq!(outcome.status, PostStatus::Published);
    let results = outcome.results.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.success));
    assert!(results.iter().all(|r| r.platform_post_id.is_some()));

    let post = store.post(&outcome.post_id).await.unwrap();
    assert_eq!(post.status, PostStatus::Published);
    assert!(post.error_message.is_none());
    assert!(post.published_at.is_some());

    // Successful attempts bump last-used on the account.
    assert!(store.account("acct-masto").await.unwrap().last_used_at.is_some());
    assert_eq!(mastodon.publish_calls(), 1);
    assert_eq!(x.publish_calls(), 1);
}

#[tokio::test]
async fn test_partial_failure_marks_post_failed() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-ok", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;
    seed_account(&store, &vault, "acct-bad", PlatformKind::Reddit, "token", None, AccountStatus::Active).await;

    let good = Arc::new(MockAdapter::success(PlatformKind::Mastodon));
    let bad = Arc::new(MockAdapter::publish_failure(
        PlatformKind::Reddit,
        AttemptError::Platform("upstream 500".to_string()),
    ));
    let publisher = publisher_with(store.clone(), vault, vec![good, bad], PublisherOptions::default());

    let outcome = publisher
        .publish(USER, request(&["acct-ok", "acct-bad"]))
        .await
        .unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    let results = outcome.results.unwrap();
    assert_eq!(results.len(), 2);

    let ok = results.iter().find(|r| r.account_id == "acct-ok").unwrap();
    assert!(ok.success, "one platform's failure must not abort the others");

    let failed = results.iter().find(|r| r.account_id == "acct-bad").unwrap();
    assert!(!failed.success);
    assert!(matches!(failed.error, Some(AttemptError::Platform(_))));

    let post = store.post(&outcome.post_id).await.unwrap();
    assert_eq!(post.error_message.as_deref(), Some("some accounts failed"));
}

#[tokio::test]
async fn test_all_failures_use_all_failed_marker() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-1", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;

    let bad = Arc::new(MockAdapter::publish_failure(
        PlatformKind::Mastodon,
        AttemptError::Platform("down".to_string()),
    ));
    let publisher = publisher_with(store.clone(), vault, vec![bad], PublisherOptions::default());

    let outcome = publisher.publish(USER, request(&["acct-1"])).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    let post = store.post(&outcome.post_id).await.unwrap();
    assert_eq!(post.error_message.as_deref(), Some("all accounts failed"));
}

#[tokio::test]
async fn test_scheduled_post_never_touches_adapters() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-1", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;

    let mock = Arc::new(MockAdapter::success(PlatformKind::Mastodon));
    let publisher = publisher_with(store.clone(), vault, vec![mock.clone()], PublisherOptions::default());

    let mut req = request(&["acct-1"]);
    let scheduled_for = Utc::now() + chrono::Duration::days(1);
    req.scheduled_for = Some(scheduled_for);

    let outcome = publisher.publish(USER, req).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Scheduled);
    assert!(outcome.results.is_none());
    assert_eq!(outcome.scheduled_for, Some(scheduled_for));

    assert_eq!(mock.publish_calls(), 0);
    assert_eq!(mock.upload_calls(), 0);
    assert_eq!(mock.verify_calls(), 0);

    let post = store.post(&outcome.post_id).await.unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
}

#[tokio::test]
async fn test_scheduled_time_in_the_past_publishes_now() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-1", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;

    let mock = Arc::new(MockAdapter::success(PlatformKind::Mastodon));
    let publisher = publisher_with(store.clone(), vault, vec![mock.clone()], PublisherOptions::default());

    let mut req = request(&["acct-1"]);
    req.scheduled_for = Some(Utc::now() - chrono::Duration::hours(1));

    let outcome = publisher.publish(USER, req).await.unwrap();
    assert_eq!(outcome.status, PostStatus::Published);
    assert_eq!(mock.publish_calls(), 1);
}

#[tokio::test]
async fn test_expired_token_refreshes_once_and_retries() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(
        &store,
        &vault,
        "acct-x",
        PlatformKind::X,
        "expired-token",
        Some("refresh-1"),
        AccountStatus::Active,
    )
    .await;

    let x = Arc::new(
        MockAdapter::success(PlatformKind::X)
            .accepting_tokens(&["fresh-token"])
            .with_refresh(Ok(RefreshedToken {
                access_token: "fresh-token".to_string(),
                refresh_token: Some("refresh-2".to_string()),
                expires_in: Some(3600),
            })),
    );
    let publisher = publisher_with(store.clone(), vault.clone(), vec![x.clone()], PublisherOptions::default());

    let outcome = publisher.publish(USER, request(&["acct-x"])).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Published);
    assert_eq!(x.refresh_calls(), 1, "exactly one refresh");
    assert_eq!(x.publish_calls(), 2, "one failed attempt, one retry");

    // The refreshed grant is re-encrypted and persisted.
    let account = store.account("acct-x").await.unwrap();
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(
        vault.decrypt(&account.encrypted_access_token).unwrap().expose_secret(),
        "fresh-token"
    );
    assert_eq!(
        vault
            .decrypt(account.encrypted_refresh_token.as_ref().unwrap())
            .unwrap()
            .expose_secret(),
        "refresh-2"
    );
    assert!(account.token_expires_at.is_some());
}

#[tokio::test]
async fn test_refresh_failure_marks_account_errored() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(
        &store,
        &vault,
        "acct-x",
        PlatformKind::X,
        "expired-token",
        Some("refresh-1"),
        AccountStatus::Active,
    )
    .await;

    let x = Arc::new(
        MockAdapter::success(PlatformKind::X)
            .accepting_tokens(&["never-issued"])
            .with_refresh(Err(AttemptError::Auth("grant revoked".to_string()))),
    );
    let publisher = publisher_with(store.clone(), vault, vec![x.clone()], PublisherOptions::default());

    let outcome = publisher.publish(USER, request(&["acct-x"])).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    let results = outcome.results.unwrap();
    assert!(matches!(results[0].error, Some(AttemptError::Auth(_))));

    assert_eq!(x.publish_calls(), 1, "no retry after a failed refresh");
    assert_eq!(x.refresh_calls(), 1);
    assert_eq!(
        store.account("acct-x").await.unwrap().status,
        AccountStatus::Error
    );
}

#[tokio::test]
async fn test_missing_refresh_token_is_terminal() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-x", PlatformKind::X, "expired-token", None, AccountStatus::Active).await;

    let x = Arc::new(MockAdapter::success(PlatformKind::X).accepting_tokens(&["other"]));
    let publisher = publisher_with(store.clone(), vault, vec![x.clone()], PublisherOptions::default());

    let outcome = publisher.publish(USER, request(&["acct-x"])).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    assert_eq!(x.refresh_calls(), 0, "nothing to refresh with");
    assert_eq!(
        store.account("acct-x").await.unwrap().status,
        AccountStatus::Error
    );
}

#[tokio::test]
async fn test_rate_limit_is_never_retried() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-x", PlatformKind::X, "token", None, AccountStatus::Active).await;

    let x = Arc::new(MockAdapter::publish_failure(
        PlatformKind::X,
        AttemptError::RateLimit {
            message: "X rate limit hit (publish tweet); retry in about 2 minutes".to_string(),
            wait_secs: 120,
        },
    ));
    let publisher = publisher_with(store.clone(), vault, vec![x.clone()], PublisherOptions::default());

    let outcome = publisher.publish(USER, request(&["acct-x"])).await.unwrap();

    assert_eq!(x.publish_calls(), 1, "rate limits must not trigger retries");
    assert_eq!(x.refresh_calls(), 0);

    let results = outcome.results.unwrap();
    match &results[0].error {
        Some(AttemptError::RateLimit { message, wait_secs }) => {
            assert!(message.contains("2 minutes"));
            assert_eq!(*wait_secs, 120);
        }
        other => panic!("expected rate limit error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_foreign_account_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-1", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;

    let publisher = publisher_with(
        store,
        vault,
        vec![Arc::new(MockAdapter::success(PlatformKind::Mastodon))],
        PublisherOptions::default(),
    );

    let error = publisher
        .publish("someone-else", request(&["acct-1"]))
        .await
        .unwrap_err();
    assert!(matches!(error, CrosscastError::ForeignAccount(id) if id == "acct-1"));
}

#[tokio::test]
async fn test_unknown_account_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-1", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;

    let publisher = publisher_with(
        store,
        vault,
        vec![Arc::new(MockAdapter::success(PlatformKind::Mastodon))],
        PublisherOptions::default(),
    );

    let error = publisher
        .publish(USER, request(&["acct-1", "ghost"]))
        .await
        .unwrap_err();
    match error {
        CrosscastError::InvalidInput(msg) => assert!(msg.contains("ghost")),
        other => panic!("expected invalid input, got {:?}", other.to_string()),
    }
}

#[tokio::test]
async fn test_no_active_accounts() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-1", PlatformKind::Mastodon, "token", None, AccountStatus::Error).await;

    let publisher = publisher_with(
        store,
        vault,
        vec![Arc::new(MockAdapter::success(PlatformKind::Mastodon))],
        PublisherOptions::default(),
    );

    let error = publisher.publish(USER, request(&["acct-1"])).await.unwrap_err();
    assert!(matches!(error, CrosscastError::NoActiveAccounts));
}

#[tokio::test]
async fn test_nothing_resolves_is_no_active_accounts() {
    let store = Arc::new(MemoryStore::new());
    let publisher = publisher_with(store, vault(), vec![], PublisherOptions::default());

    let error = publisher.publish(USER, request(&["ghost"])).await.unwrap_err();
    assert!(matches!(error, CrosscastError::NoActiveAccounts));
}

#[tokio::test]
async fn test_errored_account_fails_fast_but_still_counts() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-ok", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;
    seed_account(&store, &vault, "acct-dead", PlatformKind::X, "token", None, AccountStatus::Error).await;

    let mastodon = Arc::new(MockAdapter::success(PlatformKind::Mastodon));
    let x = Arc::new(MockAdapter::success(PlatformKind::X));
    let publisher = publisher_with(
        store,
        vault,
        vec![mastodon, x.clone()],
        PublisherOptions::default(),
    );

    let outcome = publisher
        .publish(USER, request(&["acct-ok", "acct-dead"]))
        .await
        .unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    let results = outcome.results.unwrap();
    assert_eq!(results.len(), 2, "one result per resolved account");

    let dead = results.iter().find(|r| r.account_id == "acct-dead").unwrap();
    assert!(matches!(dead.error, Some(AttemptError::Auth(_))));
    assert_eq!(x.publish_calls(), 0, "errored accounts fail fast, no network");
}

#[tokio::test]
async fn test_oversized_bluesky_media_fails_before_adapter() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-bsky", PlatformKind::Bluesky, "app-password", None, AccountStatus::Active).await;

    let bluesky = Arc::new(MockAdapter::success(PlatformKind::Bluesky));
    let publisher = publisher_with(store, vault, vec![bluesky.clone()], PublisherOptions::default());

    let mut req = request(&["acct-bsky"]);
    req.media = vec![MediaFile::new("big.jpg", "image/jpeg", vec![0u8; 2 * 1024 * 1024])];

    let outcome = publisher.publish(USER, req).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    let results = outcome.results.unwrap();
    match &results[0].error {
        Some(AttemptError::Upload(msg)) => assert!(msg.contains("exceeds")),
        other => panic!("expected upload error, got {:?}", other),
    }

    // The pre-flight check fired before the adapter boundary.
    assert_eq!(bluesky.upload_calls(), 0);
    assert_eq!(bluesky.publish_calls(), 0);
}

#[tokio::test]
async fn test_pinterest_without_media_fails_before_adapter() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-pin", PlatformKind::Pinterest, "token", None, AccountStatus::Active).await;

    let pinterest = Arc::new(MockAdapter::success(PlatformKind::Pinterest));
    let publisher = publisher_with(store, vault, vec![pinterest.clone()], PublisherOptions::default());

    let outcome = publisher.publish(USER, request(&["acct-pin"])).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    let results = outcome.results.unwrap();
    match &results[0].error {
        Some(AttemptError::Validation(msg)) => {
            assert!(msg.contains("Pinterest pins require at least one image"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
    assert_eq!(pinterest.upload_calls(), 0);
    assert_eq!(pinterest.publish_calls(), 0);
}

#[tokio::test]
async fn test_media_refs_flow_from_upload_to_publish() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-masto", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;

    let mastodon = Arc::new(MockAdapter::success(PlatformKind::Mastodon));
    let publisher = publisher_with(store, vault, vec![mastodon.clone()], PublisherOptions::default());

    let mut req = request(&["acct-masto"]);
    req.media = vec![MediaFile::new("photo.png", "image/png", vec![0u8; 64])];

    let outcome = publisher.publish(USER, req).await.unwrap();
    assert_eq!(outcome.status, PostStatus::Published);

    assert_eq!(mastodon.upload_calls(), 1);
    let published = mastodon.published();
    assert_eq!(published[0].media_refs, vec!["mastodon-media-photo.png".to_string()]);
    assert_eq!(published[0].content, "Hello");
}

#[tokio::test]
async fn test_slow_platform_hits_per_account_timeout() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "acct-slow", PlatformKind::Facebook, "token", None, AccountStatus::Active).await;

    let slow = Arc::new(
        MockAdapter::success(PlatformKind::Facebook).with_delay(Duration::from_millis(300)),
    );
    let options = PublisherOptions {
        concurrency: 4,
        account_timeout: Duration::from_millis(50),
    };
    let publisher = publisher_with(store, vault, vec![slow], options);

    let outcome = publisher.publish(USER, request(&["acct-slow"])).await.unwrap();

    assert_eq!(outcome.status, PostStatus::Failed);
    let results = outcome.results.unwrap();
    match &results[0].error {
        Some(AttemptError::Platform(msg)) => assert!(msg.contains("timed out")),
        other => panic!("expected timeout platform error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_result_count_matches_targets_and_is_order_insensitive() {
    let store = Arc::new(MemoryStore::new());
    let vault = vault();
    seed_account(&store, &vault, "a1", PlatformKind::Mastodon, "token", None, AccountStatus::Active).await;
    seed_account(&store, &vault, "a2", PlatformKind::X, "token", None, AccountStatus::Active).await;
    seed_account(&store, &vault, "a3", PlatformKind::Reddit, "token", None, AccountStatus::Active).await;

    let publisher = publisher_with(
        store,
        vault,
        vec![
            Arc::new(MockAdapter::success(PlatformKind::Mastodon)),
            Arc::new(
                MockAdapter::publish_failure(
                    PlatformKind::X,
                    AttemptError::Platform("down".to_string()),
                ),
            ),
            Arc::new(MockAdapter::success(PlatformKind::Reddit)),
        ],
        PublisherOptions { concurrency: 2, account_timeout: Duration::from_secs(5) },
    );

    let outcome = publisher.publish(USER, request(&["a1", "a2", "a3"])).await.unwrap();
    let results = outcome.results.unwrap();

    assert_eq!(results.len(), 3);
    let mut ids: Vec<&str> = results.iter().map(|r| r.account_id.as_str()).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["a1", "a2", "a3"]);
}
