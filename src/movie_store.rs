use crate::error::ApiError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{info, instrument};
use uuid::Uuid;

/// Stored movie
///
/// Rating aggregates are not stored here; the rating engine computes
/// them on read.
#[derive(Debug, Clone, FromRow)]
pub struct Movie {
    /// Unique movie ID
    pub id: Uuid,
    /// Title, at most 150 characters
    pub title: String,
    /// Short description, at most 360 characters
    pub description: String,
    /// Poster image URL, if one has been attached
    pub image_path: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
}

/// Client-supplied movie fields for create and full update
#[derive(Debug, Deserialize)]
pub struct MovieInput {
    /// Title, required and non-blank
    #[serde(default)]
    pub title: String,
    /// Description, may be empty
    #[serde(default)]
    pub description: String,
    /// Poster image URL
    #[serde(default)]
    pub image_path: Option<String>,
}

/// Movie catalog in PostgreSQL
pub struct MovieStore {
    pool: PgPool,
}

impl MovieStore {
    /// Create a new movie store on an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a movie
    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create(&self, input: &MovieInput) -> Result<Movie, ApiError> {
        validate_movie_input(input)?;

        let movie = sqlx::query_as::<_, Movie>(
            r#"
            INSERT INTO movies (id, title, description, image_path, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            RETURNING id, title, description, image_path, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.title.trim())
        .bind(&input.description)
        .bind(&input.image_path)
        .fetch_one(&self.pool)
        .await?;

        info!(movie_id = %movie.id, "Movie created");
        metrics::counter!("api.movies.created").increment(1);

        Ok(movie)
    }

    /// Get a movie by ID
    pub async fn get(&self, movie_id: Uuid) -> Result<Option<Movie>, ApiError> {
        let movie = sqlx::query_as::<_, Movie>(
            r#"
            SELECT id, title, description, image_path, created_at, updated_at
            FROM movies
            WHERE id = $1
            "#,
        )
        .bind(movie_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(movie)
    }

    /// List movies, oldest first
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Movie>, ApiError> {
        let movies = sqlx::query_as::<_, Movie>(
            r#"
            SELECT id, title, description, image_path, created_at, updated_at
            FROM movies
            ORDER BY created_at ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(movies)
    }

    /// Replace a movie's fields
    #[instrument(skip(self, input), fields(movie_id = %movie_id))]
    pub async fn update(&self, movie_id: Uuid, input: &MovieInput) -> Result<Option<Movie>, ApiError> {
        validate_movie_input(input)?;

        let updated = sqlx::query(
            r#"
            UPDATE movies
            SET title = $2, description = $3, image_path = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(movie_id)
        .bind(input.title.trim())
        .bind(&input.description)
        .bind(&input.image_path)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        self.get(movie_id).await
    }

    /// Delete a movie; its ratings cascade away
    #[instrument(skip(self), fields(movie_id = %movie_id))]
    pub async fn delete(&self, movie_id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(movie_id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(movie_id = %movie_id, "Movie deleted");
        }

        Ok(deleted)
    }
}

fn validate_movie_input(input: &MovieInput) -> Result<(), ApiError> {
    let title = input.title.trim();
    if title.is_empty() {
        return Err(ApiError::validation("title must not be blank"));
    }
    if title.chars().count() > 150 {
        return Err(ApiError::validation("title must be at most 150 characters"));
    }
    if input.description.chars().count() > 360 {
        return Err(ApiError::validation(
            "description must be at most 360 characters",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(title: &str, description: &str) -> MovieInput {
        MovieInput {
            title: title.to_string(),
            description: description.to_string(),
            image_path: None,
        }
    }

    #[test]
    fn title_must_be_present_and_bounded() {
        assert!(validate_movie_input(&input("Heat", "")).is_ok());
        assert!(validate_movie_input(&input("", "")).is_err());
        assert!(validate_movie_input(&input("   ", "")).is_err());
        assert!(validate_movie_input(&input(&"x".repeat(151), "")).is_err());
        assert!(validate_movie_input(&input(&"x".repeat(150), "")).is_ok());
    }

    #[test]
    fn description_is_bounded() {
        assert!(validate_movie_input(&input("Heat", &"d".repeat(360))).is_ok());
        assert!(validate_movie_input(&input("Heat", &"d".repeat(361))).is_err());
    }

    #[test]
    fn length_bounds_count_characters_not_bytes() {
        // 150 CJK characters are 450 bytes; the limit is on characters.
        assert!(validate_movie_input(&input(&"映".repeat(150), "")).is_ok());
        assert!(validate_movie_input(&input(&"映".repeat(151), "")).is_err());
        assert!(validate_movie_input(&input("Heat", &"画".repeat(360))).is_ok());
        assert!(validate_movie_input(&input("Heat", &"画".repeat(361))).is_err());
    }
}
