//! Movie Rater API
//!
//! Backend service for a movie rating application. It exposes a JSON HTTP API
//! for registering users, browsing a movie catalog, submitting one-per-user
//! star ratings with aggregate counts and averages computed on read, and
//! authorizing direct-to-S3 image uploads through short-lived presigned URLs.
//!
//! ## Features
//!
//! - **Opaque Token Auth**: Register/login issue bearer tokens stored only as
//!   SHA-256 digests; every protected route authenticates per request
//! - **Atomic Ratings**: One rating per (user, movie) enforced by the database,
//!   created or replaced in a single upsert
//! - **Aggregates on Read**: Rating counts and averages are computed from the
//!   ratings table, never stored denormalized
//! - **Presigned Uploads**: Validated, per-user rate-limited authorization for
//!   direct PUT uploads of movie images to S3
//!
//! ## Architecture
//!
//! ```text
//! HTTP Clients                 PostgreSQL                S3 Bucket
//! ┌──────────────┐            ┌──────────────┐          ┌──────────────┐
//! │ Axum Router  │            │ users        │          │ media/       │
//! │  /api/...    │───────────▶│ auth_tokens  │          │   movies/    │
//! └──────────────┘            │ movies       │          └──────────────┘
//!        │                    │ ratings      │                 ▲
//!        │                    └──────────────┘                 │
//!        ▼                           ▲                         │
//! ┌──────────────┐                   │                         │
//! │ Auth         │───────────────────┤                         │
//! │ Service      │                   │                  presigned PUT
//! └──────────────┘                   │                         │
//!        │                          │                          │
//!        ▼                          │                          │
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────┐
//! │ Movie Store  │           │ Rating       │          │ Upload       │
//! │              │           │ Engine       │          │ Authorizer   │
//! └──────────────┘           └──────────────┘          └──────────────┘
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod movie_store;
pub mod object_store;
pub mod rating_engine;
pub mod upload_auth;
pub mod upload_limiter;

pub use api::{AppState, create_router, start_api_server};
pub use auth::{AuthService, AuthUser, User};
pub use config::Config;
pub use error::ApiError;
pub use movie_store::{Movie, MovieInput, MovieStore};
pub use object_store::ObjectStore;
pub use rating_engine::{MovieAggregates, RateOutcome, Rating, RatingEngine};
pub use upload_auth::{UploadAuthorizer, UploadCredential, UploadRequest};
pub use upload_limiter::UploadRateLimiter;
