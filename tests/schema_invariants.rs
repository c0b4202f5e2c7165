#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use couplefy_lib::db::{is_foreign_key_violation, is_unique_violation};
use couplefy_lib::groups::create_group;
use couplefy_lib::migrate::apply_migrations;
use sqlx::SqlitePool;
#[path = "util.rs"]
mod util;

async fn exec(pool: &SqlitePool, sql: &str) -> Result<(), sqlx::Error> {
    sqlx::query(sql).execute(pool).await.map(|_| ())
}

#[tokio::test]
async fn migrations_are_recorded_once() -> Result<()> {
    let pool = util::temp_pool().await;
    let applied = util::count(&pool, "SELECT COUNT(*) FROM schema_migrations").await;
    assert!(applied >= 4);
    apply_migrations(&pool).await?;
    assert_eq!(
        util::count(&pool, "SELECT COUNT(*) FROM schema_migrations").await,
        applied
    );
    Ok(())
}

#[tokio::test]
async fn categories_are_personal_xor_shared() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let group = create_group(&pool, &ann, "Home".into()).await?;

    let both = format!(
        "INSERT INTO categories (id, name, user_id, group_id, created_at, updated_at)
         VALUES ('c1', 'x', '{}', '{}', 0, 0)",
        ann.id, group.id
    );
    assert!(exec(&pool, &both).await.is_err());
    let neither = "INSERT INTO categories (id, name, created_at, updated_at) VALUES ('c2', 'x', 0, 0)";
    assert!(exec(&pool, neither).await.is_err());
    let neither_goal = "INSERT INTO goals (id, name, created_at, updated_at) VALUES ('g2', 'x', 0, 0)";
    assert!(exec(&pool, neither_goal).await.is_err());
    Ok(())
}

#[tokio::test]
async fn memberships_and_codes_are_unique() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let group = create_group(&pool, &ann, "Home".into()).await?;

    let dup = format!(
        "INSERT INTO group_members (id, group_id, user_id, joined_at) VALUES ('m2', '{}', '{}', 0)",
        group.id, ann.id
    );
    let err = exec(&pool, &dup).await.expect_err("duplicate membership");
    assert!(is_unique_violation(&err));

    let insert_invite = |id: &str, code: &str| {
        format!(
            "INSERT INTO invites (id, group_id, invited_by, code, expires_at, created_at)
             VALUES ('{id}', '{}', '{}', '{code}', 0, 0)",
            group.id, ann.id
        )
    };
    exec(&pool, &insert_invite("i1", "ABCDEF12")).await?;
    let err = exec(&pool, &insert_invite("i2", "abcdef12"))
        .await
        .expect_err("codes collide case-insensitively");
    assert!(is_unique_violation(&err));

    let bad_status = "UPDATE invites SET status = 'revoked' WHERE id = 'i1'";
    assert!(exec(&pool, bad_status).await.is_err());
    Ok(())
}

#[tokio::test]
async fn entries_reference_existing_categories() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let orphan = format!(
        "INSERT INTO expenses (id, user_id, category_id, amount, date, created_at, updated_at)
         VALUES ('e1', '{}', 'missing', '1.00', 0, 0, 0)",
        ann.id
    );
    let err = exec(&pool, &orphan).await.expect_err("dangling category");
    assert!(is_foreign_key_violation(&err));
    Ok(())
}
