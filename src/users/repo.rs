use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub avatar_url: String,
    pub subscription: String,
    /// Active session token; None while logged out. A new login overwrites
    /// it, which is the only way older sessions get invalidated.
    pub token: Option<String>,
    pub created_at: OffsetDateTime,
}

impl User {
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, avatar_url, subscription, token, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, avatar_url, subscription, token, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        avatar_url: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, avatar_url)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash, avatar_url, subscription, token, created_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(avatar_url)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Set or clear the active session token.
    pub async fn set_token(db: &PgPool, id: Uuid, token: Option<&str>) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET token = $2
            WHERE id = $1
            RETURNING id, email, password_hash, avatar_url, subscription, token, created_at
            "#,
        )
        .bind(id)
        .bind(token)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn set_subscription(
        db: &PgPool,
        id: Uuid,
        subscription: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET subscription = $2
            WHERE id = $1
            RETURNING id, email, password_hash, avatar_url, subscription, token, created_at
            "#,
        )
        .bind(id)
        .bind(subscription)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    pub async fn set_avatar_url(db: &PgPool, id: Uuid, avatar_url: &str) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users SET avatar_url = $2
            WHERE id = $1
            RETURNING id, email, password_hash, avatar_url, subscription, token, created_at
            "#,
        )
        .bind(id)
        .bind(avatar_url)
        .fetch_one(db)
        .await?;
        Ok(user)
    }
}
