//! Personal and shared household finance records.
//!
//! Records are either personal or owned by a group ("couple"). The
//! [`authz`] resolver decides visibility and mutation rights; [`invites`]
//! and [`groups`] run the membership state machines; the record services
//! ([`categories`], [`goals`], [`expenses`], [`savings`]) delegate every
//! permission decision to the resolver. [`api`] is the boundary that turns
//! all of it into discriminated [`Outcome`]s.

pub mod api;
pub mod authz;
pub mod categories;
pub mod config;
pub mod db;
pub mod entries;
pub mod error;
pub mod expenses;
pub mod goals;
pub mod groups;
pub mod id;
pub mod identity;
pub mod invites;
pub mod logging;
pub mod membership;
pub mod migrate;
pub mod model;
pub mod outcome;
pub mod payload;
pub mod reports;
pub mod savings;
pub mod state;
pub mod time;
pub mod util;

pub use error::{AppError, AppResult, ErrorCode};
pub use outcome::Outcome;
pub use state::AppState;

/// Opens the database at `path` and brings its schema up to date.
pub async fn open_database(path: &std::path::Path) -> anyhow::Result<sqlx::SqlitePool> {
    let pool = db::open_sqlite_pool(path).await?;
    migrate::apply_migrations(&pool).await?;
    Ok(pool)
}
