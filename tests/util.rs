#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use couplefy_lib::authz::RequestScope;
use couplefy_lib::db::{open_memory_pool, open_sqlite_pool};
use couplefy_lib::groups::create_group;
use couplefy_lib::identity::{sync_user, ExternalPrincipal, IdentityHandle, StaticIdentity};
use couplefy_lib::invites::{accept_invite, generate_invite, InvitePolicy};
use couplefy_lib::migrate::apply_migrations;
use couplefy_lib::model::{Group, User};
use couplefy_lib::time::now_ms;
use couplefy_lib::AppState;
use sqlx::SqlitePool;

pub async fn temp_pool() -> SqlitePool {
    let pool = open_memory_pool().await.expect("open sqlite::memory:");
    apply_migrations(&pool).await.expect("apply migrations");
    pool
}

/// WAL database on disk with a multi-connection pool, so concurrent writers
/// contend for the SQLite write lock. Keep the directory alive with the pool.
pub async fn file_pool() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().expect("tempdir");
    let pool = open_sqlite_pool(&dir.path().join("couplefy.sqlite3"))
        .await
        .expect("open file database");
    apply_migrations(&pool).await.expect("apply migrations");
    (dir, pool)
}

pub fn principal(handle: &str) -> ExternalPrincipal {
    ExternalPrincipal {
        external_id: format!("ext-{handle}"),
        email: format!("{handle}@example.com"),
        name: Some(handle.to_string()),
        avatar_url: None,
    }
}

pub async fn seed_user(pool: &SqlitePool, handle: &str) -> User {
    sync_user(pool, &principal(handle)).await.expect("sync user")
}

pub async fn scope(pool: &SqlitePool, user: &User) -> RequestScope {
    RequestScope::load(pool, user.clone())
        .await
        .expect("load request scope")
}

pub fn state_for(pool: &SqlitePool, user: &User) -> AppState {
    AppState::new(
        pool.clone(),
        IdentityHandle::new(StaticIdentity::external_id(user.external_id.clone())),
    )
}

pub fn anonymous_state(pool: &SqlitePool) -> AppState {
    AppState::new(pool.clone(), IdentityHandle::new(StaticIdentity::anonymous()))
}

/// `first` creates a group and `second` joins it through an invite.
pub async fn couple(pool: &SqlitePool, first: &User, second: &User, name: &str) -> Group {
    let group = create_group(pool, first, name.to_string())
        .await
        .expect("create group");
    let creator_scope = scope(pool, first).await;
    let invite = generate_invite(
        pool,
        &creator_scope,
        &group.id,
        &InvitePolicy::default(),
        now_ms(),
    )
    .await
    .expect("generate invite");
    accept_invite(pool, second, &invite.code, now_ms())
        .await
        .expect("accept invite");
    group
}

pub async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.expect("count query")
}
