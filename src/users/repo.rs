use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub nickname: String,
    pub phone: String,
    pub image_key: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Narrow projection for credential checks: only what login needs.
#[derive(Debug, Clone, FromRow)]
pub struct LoginRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
}

impl User {
    /// Find a full user record by email.
    pub async fn find_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, nickname, phone, image_key,
                   created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Credential projection by email, avoiding the wider row.
    pub async fn find_login_by_email(db: &PgPool, email: &str) -> anyhow::Result<Option<LoginRow>> {
        let row = sqlx::query_as::<_, LoginRow>(
            r#"
            SELECT id, email, password_hash
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(db)
        .await?;
        Ok(row)
    }

    pub async fn find_by_id(db: &PgPool, id: i64) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, name, nickname, phone, image_key,
                   created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Insert a new user. The unique index on email backs up the pre-insert
    /// existence check; a 23505 from here means a concurrent registration won.
    pub async fn create(
        db: &PgPool,
        email: &str,
        password_hash: &str,
        name: &str,
        nickname: &str,
        phone: &str,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, password_hash, name, nickname, phone)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email, password_hash, name, nickname, phone, image_key,
                      created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(name)
        .bind(nickname)
        .bind(phone)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Partial profile update: absent fields keep their stored values.
    pub async fn update_profile(
        db: &PgPool,
        id: i64,
        nickname: Option<&str>,
        phone: Option<&str>,
        image_key: Option<&str>,
    ) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET nickname = COALESCE($2, nickname),
                phone = COALESCE($3, phone),
                image_key = COALESCE($4, image_key),
                updated_at = now()
            WHERE id = $1
            RETURNING id, email, password_hash, name, nickname, phone, image_key,
                      created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(nickname)
        .bind(phone)
        .bind(image_key)
        .fetch_one(db)
        .await?;
        Ok(user)
    }

    /// Delete by id. Dependent posts and comments go via FK cascade.
    pub async fn delete(db: &PgPool, id: i64) -> anyhow::Result<u64> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}
