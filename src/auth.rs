use crate::error::{constraint_name, ApiError};
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Stored user account
///
/// `password_hash` is a bcrypt hash and stays out of API responses;
/// handlers project users through view structs.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// Unique user ID
    pub id: Uuid,
    /// Login name, unique
    pub username: String,
    /// bcrypt hash of the password
    pub password_hash: String,
    /// When the account was created
    pub created_at: DateTime<Utc>,
    /// When the account was last updated
    pub updated_at: DateTime<Utc>,
}

/// User accounts and opaque bearer tokens in PostgreSQL
///
/// Tokens are minted once and handed to the caller; only their SHA-256
/// digest is stored, so login rotates the token rather than echoing it.
pub struct AuthService {
    pool: PgPool,
}

impl AuthService {
    /// Create a new auth service on an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a new account and mint its bearer token
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn register(&self, username: &str, password: &str) -> Result<(User, String), ApiError> {
        validate_username(username)?;
        validate_password(password)?;

        let username = username.trim();
        let password_hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| ApiError::Internal(e.into()))?;
        let token = mint_token();
        let digest = token_digest(&token);

        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING id, username, password_hash, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(&password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match constraint_name(&err) {
            Some("users_username_key") => ApiError::validation("username is already taken"),
            _ => ApiError::from(err),
        })?;

        sqlx::query(
            r#"
            INSERT INTO auth_tokens (token_digest, user_id, created_at)
            VALUES ($1, $2, NOW())
            "#,
        )
        .bind(&digest)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(user_id = %user.id, "User registered");
        metrics::counter!("api.users.registered").increment(1);

        Ok((user, token))
    }

    /// Verify credentials and rotate the account's bearer token
    ///
    /// Rotation is what makes login possible at all with digests at
    /// rest: the previous token cannot be recovered, so a fresh one is
    /// issued and the old one stops working.
    #[instrument(skip(self, password), fields(username = %username))]
    pub async fn login(&self, username: &str, password: &str) -> Result<String, ApiError> {
        let user = self
            .find_by_username(username.trim())
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid username or password".to_string()))?;

        let valid = bcrypt::verify(password, &user.password_hash)
            .map_err(|e| ApiError::Internal(e.into()))?;
        if !valid {
            return Err(ApiError::Unauthorized(
                "invalid username or password".to_string(),
            ));
        }

        let token = mint_token();
        sqlx::query(
            r#"
            INSERT INTO auth_tokens (token_digest, user_id, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id)
            DO UPDATE SET token_digest = EXCLUDED.token_digest, created_at = NOW()
            "#,
        )
        .bind(token_digest(&token))
        .bind(user.id)
        .execute(&self.pool)
        .await?;

        debug!(user_id = %user.id, "Token rotated on login");

        Ok(token)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, created_at, updated_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Resolve a bearer token to its user
    pub async fn authenticate(&self, token: &str) -> Result<User, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.password_hash, u.created_at, u.updated_at
            FROM users u
            JOIN auth_tokens t ON t.user_id = u.id
            WHERE t.token_digest = $1
            "#,
        )
        .bind(token_digest(token))
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or_else(|| ApiError::Unauthorized("invalid authentication token".to_string()))
    }

    /// Get a user by ID
    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// List all users
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, created_at, updated_at
            FROM users
            ORDER BY username ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    /// Replace a user's username and password
    #[instrument(skip(self, password), fields(user_id = %user_id))]
    pub async fn update_user(
        &self,
        user_id: Uuid,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, ApiError> {
        validate_username(username)?;
        validate_password(password)?;

        let password_hash =
            bcrypt::hash(password, bcrypt::DEFAULT_COST).map_err(|e| ApiError::Internal(e.into()))?;

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username = $2, password_hash = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, username, password_hash, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(username.trim())
        .bind(&password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| match constraint_name(&err) {
            Some("users_username_key") => ApiError::validation("username is already taken"),
            _ => ApiError::from(err),
        })?;

        Ok(user)
    }

    /// Delete a user; ratings and token go with it
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_user(&self, user_id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Authenticated user, extracted from the `Authorization` header
///
/// Rejects with 401 before any database work when the header is missing
/// or not a bearer token.
pub struct AuthUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AuthService>: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing authorization header".to_string()))?;

        let token = header_value.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError::Unauthorized("authorization header must be a bearer token".to_string())
        })?;

        let auth = Arc::<AuthService>::from_ref(state);
        let user = auth.authenticate(token).await?;

        Ok(AuthUser(user))
    }
}

/// Mint an opaque bearer token
fn mint_token() -> String {
    format!(
        "mr_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

/// SHA-256 digest of a token as lowercase hex, the at-rest form
fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|byte| format!("{:02x}", byte)).collect()
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(ApiError::validation("username must not be blank"));
    }
    if trimmed.chars().count() > 150 {
        return Err(ApiError::validation(
            "username must be at most 150 characters",
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }
    Ok(())
}
