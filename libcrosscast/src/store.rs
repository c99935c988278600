//! Account and post storage.
//!
//! The orchestrator only knows the `AccountStore`/`PostStore` traits; the
//! surrounding application owns the real database. `SqliteStore` is the
//! reference implementation, `MemoryStore` backs tests and embedding and is
//! compiled for all builds so integration tests can use it.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::types::{Account, AccountStatus, Post, PostStatus};

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch the accounts for the given ids. Unknown ids are simply absent
    /// from the result; the caller decides whether that is an error.
    async fn get_accounts(&self, ids: &[String]) -> Result<Vec<Account>>;

    async fn insert_account(&self, account: &Account) -> Result<()>;

    /// Persist refreshed tokens. A `None` refresh token leaves the stored
    /// one untouched (platforms that do not rotate it).
    async fn update_tokens(
        &self,
        account_id: &str,
        encrypted_access_token: &str,
        encrypted_refresh_token: Option<&str>,
        token_expires_at: Option<i64>,
    ) -> Result<()>;

    async fn update_status(&self, account_id: &str, status: AccountStatus) -> Result<()>;

    async fn touch_last_used(&self, account_id: &str, at: i64) -> Result<()>;
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create_post(&self, post: &Post) -> Result<()>;

    /// Move a post through its status machine. Invalid transitions (e.g.
    /// anything out of a terminal state) are rejected.
    async fn update_post_status(
        &self,
        post_id: &str,
        status: PostStatus,
        error_message: Option<&str>,
        published_at: Option<i64>,
    ) -> Result<()>;

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations.
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool = if db_path == ":memory:" {
            // A single connection: every pooled handle must see the same
            // in-memory database.
            sqlx::sqlite::SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .map_err(StoreError::Sqlx)?
        } else {
            let expanded_path = shellexpand::tilde(db_path).to_string();
            let path = Path::new(&expanded_path);

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
            }

            // Forward slashes work for SQLite URLs on both Windows and Unix;
            // mode=rwc creates the file when missing.
            let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));
            SqlitePool::connect(&db_url).await.map_err(StoreError::Sqlx)?
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::Migration)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Account {
        let platform = crate::types::PlatformKind::parse(&row.get::<String, _>("platform"))
            .unwrap_or(crate::types::PlatformKind::Mastodon);
        let status =
            AccountStatus::parse(&row.get::<String, _>("status")).unwrap_or(AccountStatus::Error);

        Account {
            id: row.get("id"),
            user_id: row.get("user_id"),
            platform,
            instance_url: row.get("instance_url"),
            username: row.get("username"),
            encrypted_access_token: row.get("encrypted_access_token"),
            encrypted_refresh_token: row.get("encrypted_refresh_token"),
            token_expires_at: row.get("token_expires_at"),
            status,
            last_used_at: row.get("last_used_at"),
            created_at: row.get("created_at"),
        }
    }

    fn post_from_row(row: &sqlx::sqlite::SqliteRow) -> Post {
        let media_refs: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("media_refs")).unwrap_or_default();
        let target_account_ids: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("target_account_ids")).unwrap_or_default();
        let status =
            PostStatus::parse(&row.get::<String, _>("status")).unwrap_or(PostStatus::Failed);

        Post {
            id: row.get("id"),
            user_id: row.get("user_id"),
            content: row.get("content"),
            media_refs,
            target_account_ids,
            status,
            scheduled_for: row.get("scheduled_for"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            published_at: row.get("published_at"),
        }
    }
}

#[async_trait]
impl AccountStore for SqliteStore {
    async fn get_accounts(&self, ids: &[String]) -> Result<Vec<Account>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let query_str = format!(
            r#"
            SELECT id, user_id, platform, instance_url, username,
                   encrypted_access_token, encrypted_refresh_token,
                   token_expires_at, status, last_used_at, created_at
            FROM accounts WHERE id IN ({})
            "#,
            placeholders
        );

        let mut query = sqlx::query(&query_str);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(StoreError::Sqlx)?;

        Ok(rows.iter().map(Self::account_from_row).collect())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, user_id, platform, instance_url, username,
                                  encrypted_access_token, encrypted_refresh_token,
                                  token_expires_at, status, last_used_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&account.id)
        .bind(&account.user_id)
        .bind(account.platform.as_str())
        .bind(&account.instance_url)
        .bind(&account.username)
        .bind(&account.encrypted_access_token)
        .bind(&account.encrypted_refresh_token)
        .bind(account.token_expires_at)
        .bind(account.status.as_str())
        .bind(account.last_used_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    async fn update_tokens(
        &self,
        account_id: &str,
        encrypted_access_token: &str,
        encrypted_refresh_token: Option<&str>,
        token_expires_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET encrypted_access_token = ?,
                encrypted_refresh_token = COALESCE(?, encrypted_refresh_token),
                token_expires_at = ?
            WHERE id = ?
            "#,
        )
        .bind(encrypted_access_token)
        .bind(encrypted_refresh_token)
        .bind(token_expires_at)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    async fn update_status(&self, account_id: &str, status: AccountStatus) -> Result<()> {
        sqlx::query("UPDATE accounts SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    async fn touch_last_used(&self, account_id: &str, at: i64) -> Result<()> {
        sqlx::query("UPDATE accounts SET last_used_at = ? WHERE id = ?")
            .bind(at)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Sqlx)?;

        Ok(())
    }
}

#[async_trait]
impl PostStore for SqliteStore {
    async fn create_post(&self, post: &Post) -> Result<()> {
        let media_refs = serde_json::to_string(&post.media_refs).unwrap_or_else(|_| "[]".into());
        let target_account_ids =
            serde_json::to_string(&post.target_account_ids).unwrap_or_else(|_| "[]".into());

        sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, content, media_refs, target_account_ids,
                               status, scheduled_for, error_message, created_at, published_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.content)
        .bind(media_refs)
        .bind(target_account_ids)
        .bind(post.status.as_str())
        .bind(post.scheduled_for)
        .bind(&post.error_message)
        .bind(post.created_at)
        .bind(post.published_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    async fn update_post_status(
        &self,
        post_id: &str,
        status: PostStatus,
        error_message: Option<&str>,
        published_at: Option<i64>,
    ) -> Result<()> {
        let current = self
            .get_post(post_id)
            .await?
            .ok_or_else(|| StoreError::Sqlx(sqlx::Error::RowNotFound))?;

        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            }
            .into());
        }

        sqlx::query(
            r#"
            UPDATE posts SET status = ?, error_message = ?, published_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(published_at)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, content, media_refs, target_account_ids,
                   status, scheduled_for, error_message, created_at, published_at
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Sqlx)?;

        Ok(row.as_ref().map(Self::post_from_row))
    }
}

/// In-memory store for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<String, Account>>,
    posts: RwLock<HashMap<String, Post>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read access for assertions.
    pub async fn account(&self, id: &str) -> Option<Account> {
        self.accounts.read().await.get(id).cloned()
    }

    pub async fn post(&self, id: &str) -> Option<Post> {
        self.posts.read().await.get(id).cloned()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_accounts(&self, ids: &[String]) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        Ok(ids.iter().filter_map(|id| accounts.get(id).cloned()).collect())
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn update_tokens(
        &self,
        account_id: &str,
        encrypted_access_token: &str,
        encrypted_refresh_token: Option<&str>,
        token_expires_at: Option<i64>,
    ) -> Result<()> {
        if let Some(account) = self.accounts.write().await.get_mut(account_id) {
            account.encrypted_access_token = encrypted_access_token.to_string();
            if let Some(refresh) = encrypted_refresh_token {
                account.encrypted_refresh_token = Some(refresh.to_string());
            }
            account.token_expires_at = token_expires_at;
        }
        Ok(())
    }

    async fn update_status(&self, account_id: &str, status: AccountStatus) -> Result<()> {
        if let Some(account) = self.accounts.write().await.get_mut(account_id) {
            account.status = status;
        }
        Ok(())
    }

    async fn touch_last_used(&self, account_id: &str, at: i64) -> Result<()> {
        if let Some(account) = self.accounts.write().await.get_mut(account_id) {
            account.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[async_trait]
impl PostStore for MemoryStore {
    async fn create_post(&self, post: &Post) -> Result<()> {
        self.posts.write().await.insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn update_post_status(
        &self,
        post_id: &str,
        status: PostStatus,
        error_message: Option<&str>,
        published_at: Option<i64>,
    ) -> Result<()> {
        let mut posts = self.posts.write().await;
        let post = posts
            .get_mut(post_id)
            .ok_or_else(|| StoreError::Sqlx(sqlx::Error::RowNotFound))?;

        if !post.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: post.status.to_string(),
                to: status.to_string(),
            }
            .into());
        }

        post.status = status;
        post.error_message = error_message.map(|s| s.to_string());
        post.published_at = published_at;
        Ok(())
    }

    async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        Ok(self.posts.read().await.get(post_id).cloned())
    }
}
