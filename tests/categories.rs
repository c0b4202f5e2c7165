#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use couplefy_lib::categories::{
    create_category, delete_category, get_category, list_categories, update_category,
};
use couplefy_lib::expenses::create_expense;
use couplefy_lib::payload::{CategoryPatch, NewCategory, NewEntry};
use couplefy_lib::time::now_ms;
use couplefy_lib::ErrorCode;
use rust_decimal::Decimal;
#[path = "util.rs"]
mod util;

fn new_category(name: &str, group_id: Option<&str>) -> NewCategory {
    NewCategory {
        name: name.to_string(),
        color: "#6366f1".to_string(),
        icon: Some("cart".to_string()),
        group_id: group_id.map(str::to_string),
    }
}

#[tokio::test]
async fn personal_categories_are_private() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let ann_scope = util::scope(&pool, &ann).await;
    let bob_scope = util::scope(&pool, &bob).await;

    let created = create_category(&pool, &ann_scope, new_category("Books", None)).await?;
    assert_eq!(created.user_id.as_deref(), Some(ann.id.as_str()));
    assert_eq!(created.group_id, None);

    assert_eq!(get_category(&pool, &ann_scope, &created.id).await?, created);
    let err = get_category(&pool, &bob_scope, &created.id)
        .await
        .expect_err("not bob's");
    assert!(err.is(ErrorCode::NotFound));
    assert!(list_categories(&pool, &bob_scope, None).await?.is_empty());

    let patch = CategoryPatch {
        name: Some("Mine now".into()),
        ..Default::default()
    };
    let err = update_category(&pool, &bob_scope, &created.id, patch)
        .await
        .expect_err("not bob's");
    assert!(err.is(ErrorCode::Unauthorized));
    let err = delete_category(&pool, &bob_scope, &created.id)
        .await
        .expect_err("not bob's");
    assert!(err.is(ErrorCode::Unauthorized));
    Ok(())
}

#[tokio::test]
async fn shared_categories_belong_to_every_member() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;
    let ann_scope = util::scope(&pool, &ann).await;
    let bob_scope = util::scope(&pool, &bob).await;

    let shared = create_category(&pool, &ann_scope, new_category("Groceries", Some(&group.id))).await?;
    assert_eq!(shared.user_id, None);
    assert_eq!(shared.group_id.as_deref(), Some(group.id.as_str()));

    let patch = CategoryPatch {
        color: Some("#000000".into()),
        icon: Some(None),
        ..Default::default()
    };
    let updated = update_category(&pool, &bob_scope, &shared.id, patch).await?;
    assert_eq!(updated.color, "#000000");
    assert_eq!(updated.icon, None);
    assert_eq!(updated.name, "Groceries");
    assert_eq!(get_category(&pool, &ann_scope, &shared.id).await?, updated);

    delete_category(&pool, &bob_scope, &shared.id).await?;
    let err = get_category(&pool, &ann_scope, &shared.id)
        .await
        .expect_err("gone");
    assert!(err.is(ErrorCode::NotFound));
    Ok(())
}

#[tokio::test]
async fn creating_in_a_foreign_group_is_unauthorized() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let eve = util::seed_user(&pool, "eve").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;
    let eve_scope = util::scope(&pool, &eve).await;

    let err = create_category(&pool, &eve_scope, new_category("Sneaky", Some(&group.id)))
        .await
        .expect_err("outsider");
    assert!(err.is(ErrorCode::Unauthorized));
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM categories").await, 0);
    Ok(())
}

#[tokio::test]
async fn listing_is_sorted_and_filterable() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;
    let scope = util::scope(&pool, &ann).await;
    create_category(&pool, &scope, new_category("rent", Some(&group.id))).await?;
    create_category(&pool, &scope, new_category("Books", None)).await?;
    create_category(&pool, &scope, new_category("Dining", Some(&group.id))).await?;

    let names: Vec<String> = list_categories(&pool, &scope, None)
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["Books", "Dining", "rent"]);

    let shared: Vec<String> = list_categories(&pool, &scope, Some(&group.id))
        .await?
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(shared, vec!["Dining", "rent"]);
    Ok(())
}

#[tokio::test]
async fn categories_in_use_cannot_be_deleted() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let scope = util::scope(&pool, &ann).await;
    let cat = create_category(&pool, &scope, new_category("Books", None)).await?;
    create_expense(
        &pool,
        &scope,
        NewEntry {
            amount: Decimal::from(20),
            reference_id: cat.id.clone(),
            description: None,
            date: now_ms(),
            group_id: None,
            paid_by: None,
        },
    )
    .await?;

    let err = delete_category(&pool, &scope, &cat.id)
        .await
        .expect_err("referenced");
    assert!(err.is(ErrorCode::Conflict));
    assert!(get_category(&pool, &scope, &cat.id).await.is_ok());

    let err = delete_category(&pool, &scope, "missing")
        .await
        .expect_err("missing");
    assert!(err.is(ErrorCode::NotFound));
    Ok(())
}
