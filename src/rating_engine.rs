use crate::error::{constraint_name, ApiError};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Rating failures
#[derive(Debug, Error)]
pub enum RatingError {
    #[error("You need to provide stars")]
    MissingStars,

    #[error("stars must be between 1 and 5, got {0}")]
    StarsOutOfRange(i16),

    #[error("movie not found: {0}")]
    MovieNotFound(Uuid),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl From<RatingError> for ApiError {
    fn from(err: RatingError) -> Self {
        match err {
            RatingError::MissingStars | RatingError::StarsOutOfRange(_) => {
                ApiError::validation(err.to_string())
            }
            RatingError::MovieNotFound(id) => ApiError::not_found("movie", id),
            RatingError::Db(db_err) => ApiError::from(db_err),
        }
    }
}

/// One user's rating of one movie
#[derive(Debug, Clone, FromRow)]
pub struct Rating {
    /// Unique rating ID
    pub id: Uuid,
    /// Rated movie
    pub movie_id: Uuid,
    /// Rating user
    pub user_id: Uuid,
    /// Stars, 1 through 5
    pub stars: i16,
    /// When the rating was first submitted
    pub created_at: DateTime<Utc>,
    /// When the stars were last changed
    pub updated_at: DateTime<Utc>,
}

/// Whether a rate call inserted a fresh rating or moved an existing one
#[derive(Debug)]
pub enum RateOutcome {
    Created(Rating),
    Updated(Rating),
}

impl RateOutcome {
    /// The rating either way
    pub fn rating(&self) -> &Rating {
        match self {
            RateOutcome::Created(rating) | RateOutcome::Updated(rating) => rating,
        }
    }
}

/// Rating aggregates for one movie
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MovieAggregates {
    /// Number of ratings submitted
    pub rating_count: i64,
    /// Mean stars, 0.0 when there are no ratings
    pub average_rating: f64,
}

#[derive(FromRow)]
struct UpsertRow {
    id: Uuid,
    movie_id: Uuid,
    user_id: Uuid,
    stars: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    newly_created: bool,
}

#[derive(FromRow)]
struct AggregateRow {
    movie_id: Uuid,
    rating_count: i64,
    average_rating: f64,
}

/// Rating writes and aggregates in PostgreSQL
///
/// One rating per (movie, user) pair, enforced by a unique constraint.
/// The rate operation is a single upsert statement, so concurrent
/// first-time rates of the same pair leave exactly one row: the loser
/// of the insert race becomes an update inside the database.
pub struct RatingEngine {
    pool: PgPool,
}

impl RatingEngine {
    /// Create a new rating engine on an existing pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Rate a movie for a user, creating or moving their rating
    #[instrument(skip(self), fields(movie_id = %movie_id, user_id = %user_id))]
    pub async fn rate(
        &self,
        movie_id: Uuid,
        user_id: Uuid,
        stars: Option<i16>,
    ) -> Result<RateOutcome, RatingError> {
        let stars = validate_stars(stars)?;

        let row = sqlx::query_as::<_, UpsertRow>(
            r#"
            INSERT INTO ratings (id, movie_id, user_id, stars, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (movie_id, user_id)
            DO UPDATE SET stars = EXCLUDED.stars, updated_at = NOW()
            RETURNING id, movie_id, user_id, stars, created_at, updated_at,
                      (xmax = 0) AS newly_created
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(movie_id)
        .bind(user_id)
        .bind(stars)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match constraint_name(&err) {
            Some("ratings_movie_id_fkey") => RatingError::MovieNotFound(movie_id),
            _ => RatingError::Db(err),
        })?;

        let rating = Rating {
            id: row.id,
            movie_id: row.movie_id,
            user_id: row.user_id,
            stars: row.stars,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };

        if row.newly_created {
            debug!(rating_id = %rating.id, stars = stars, "Rating created");
            metrics::counter!("api.ratings.created").increment(1);
            Ok(RateOutcome::Created(rating))
        } else {
            debug!(rating_id = %rating.id, stars = stars, "Rating updated");
            metrics::counter!("api.ratings.updated").increment(1);
            Ok(RateOutcome::Updated(rating))
        }
    }

    /// Rating count and average for one movie
    pub async fn aggregates(&self, movie_id: Uuid) -> Result<MovieAggregates, RatingError> {
        let row: (i64, f64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(AVG(stars), 0)::float8
            FROM ratings
            WHERE movie_id = $1
            "#,
        )
        .bind(movie_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(MovieAggregates {
            rating_count: row.0,
            average_rating: row.1,
        })
    }

    /// Aggregates for a batch of movies in one query
    ///
    /// Movies without ratings are absent from the map; callers fall back
    /// to the zero default.
    pub async fn aggregates_for(
        &self,
        movie_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, MovieAggregates>, RatingError> {
        if movie_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT movie_id,
                   COUNT(*) AS rating_count,
                   COALESCE(AVG(stars), 0)::float8 AS average_rating
            FROM ratings
            WHERE movie_id = ANY($1)
            GROUP BY movie_id
            "#,
        )
        .bind(movie_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                (
                    row.movie_id,
                    MovieAggregates {
                        rating_count: row.rating_count,
                        average_rating: row.average_rating,
                    },
                )
            })
            .collect())
    }

    /// Get a rating by ID
    pub async fn get(&self, rating_id: Uuid) -> Result<Option<Rating>, RatingError> {
        let rating = sqlx::query_as::<_, Rating>(
            r#"
            SELECT id, movie_id, user_id, stars, created_at, updated_at
            FROM ratings
            WHERE id = $1
            "#,
        )
        .bind(rating_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rating)
    }

    /// List ratings, oldest first
    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Rating>, RatingError> {
        let ratings = sqlx::query_as::<_, Rating>(
            r#"
            SELECT id, movie_id, user_id, stars, created_at, updated_at
            FROM ratings
            ORDER BY created_at ASC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(ratings)
    }
}

fn validate_stars(stars: Option<i16>) -> Result<i16, RatingError> {
    let stars = stars.ok_or(RatingError::MissingStars)?;
    if !(1..=5).contains(&stars) {
        return Err(RatingError::StarsOutOfRange(stars));
    }
    Ok(stars)
}
