#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use couplefy_lib::categories::create_category;
use couplefy_lib::expenses::create_expense;
use couplefy_lib::goals::create_goal;
use couplefy_lib::groups::{
    create_group, group_details, leave_group, list_groups, remove_member, rename_group,
};
use couplefy_lib::invites::{generate_invite, InvitePolicy};
use couplefy_lib::membership::{is_member, member_count};
use couplefy_lib::payload::{NewCategory, NewEntry, NewGoal};
use couplefy_lib::savings::create_saving;
use couplefy_lib::time::now_ms;
use couplefy_lib::ErrorCode;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
#[path = "util.rs"]
mod util;

fn category(name: &str, group_id: Option<&str>) -> NewCategory {
    NewCategory {
        name: name.to_string(),
        color: "#123456".to_string(),
        icon: None,
        group_id: group_id.map(str::to_string),
    }
}

fn goal(name: &str, group_id: Option<&str>) -> NewGoal {
    NewGoal {
        name: name.to_string(),
        target_amount: Some(Decimal::from(1000)),
        color: "#10b981".to_string(),
        icon: None,
        description: None,
        group_id: group_id.map(str::to_string),
    }
}

fn entry(reference_id: &str, group_id: Option<&str>) -> NewEntry {
    NewEntry {
        amount: Decimal::new(1250, 2),
        reference_id: reference_id.to_string(),
        description: None,
        date: now_ms(),
        group_id: group_id.map(str::to_string),
        paid_by: None,
    }
}

async fn group_exists(pool: &SqlitePool, group_id: &str) -> bool {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM household_groups WHERE id = ?1")
        .bind(group_id)
        .fetch_one(pool)
        .await
        .unwrap();
    n == 1
}

#[tokio::test]
async fn creator_is_the_first_member() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let group = create_group(&pool, &ann, "Home".into()).await?;
    assert_eq!(group.created_by, ann.id);
    assert!(is_member(&pool, &group.id, &ann.id).await?);
    assert_eq!(member_count(&pool, &group.id).await?, 1);

    let scope = util::scope(&pool, &ann).await;
    let listed = list_groups(&pool, &scope).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].members.len(), 1);
    assert_eq!(listed[0].members[0].name, "ann");
    Ok(())
}

#[tokio::test]
async fn details_and_rename_need_membership() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let eve = util::seed_user(&pool, "eve").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;

    let bob_scope = util::scope(&pool, &bob).await;
    let details = group_details(&pool, &bob_scope, &group.id).await?;
    assert_eq!(details.members.len(), 2);
    let renamed = rename_group(&pool, &bob_scope, &group.id, "Our place".into()).await?;
    assert_eq!(renamed.name, "Our place");

    let eve_scope = util::scope(&pool, &eve).await;
    let err = group_details(&pool, &eve_scope, &group.id)
        .await
        .expect_err("outsider");
    assert!(err.is(ErrorCode::NotFound));
    let err = rename_group(&pool, &eve_scope, &group.id, "Mine".into())
        .await
        .expect_err("outsider rename");
    assert!(err.is(ErrorCode::Unauthorized));
    let err = rename_group(&pool, &eve_scope, "missing", "Mine".into())
        .await
        .expect_err("missing group");
    assert!(err.is(ErrorCode::NotFound));
    Ok(())
}

#[tokio::test]
async fn creator_stays_while_others_remain() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;

    let err = remove_member(&pool, &bob.id, &group.id, &ann.id)
        .await
        .expect_err("creator removal");
    assert!(err.is(ErrorCode::CannotRemoveCreator));
    let err = leave_group(&pool, &ann.id, &group.id)
        .await
        .expect_err("creator leaving");
    assert!(err.is(ErrorCode::CannotRemoveCreator));
    assert_eq!(member_count(&pool, &group.id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn member_removal_keeps_the_group() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;

    let removal = remove_member(&pool, &ann.id, &group.id, &bob.id).await?;
    assert_eq!(removal.removed_user_id, bob.id);
    assert!(!removal.group_deleted);
    assert!(group_exists(&pool, &group.id).await);
    assert!(!is_member(&pool, &group.id, &bob.id).await?);

    let err = remove_member(&pool, &ann.id, &group.id, &bob.id)
        .await
        .expect_err("already gone");
    assert!(err.is(ErrorCode::NotFound));
    Ok(())
}

#[tokio::test]
async fn outsiders_cannot_remove_anyone() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let eve = util::seed_user(&pool, "eve").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;

    let err = remove_member(&pool, &eve.id, &group.id, &bob.id)
        .await
        .expect_err("outsider");
    assert!(err.is(ErrorCode::Unauthorized));
    let err = remove_member(&pool, &ann.id, "missing", &bob.id)
        .await
        .expect_err("missing group");
    assert!(err.is(ErrorCode::NotFound));
    assert_eq!(member_count(&pool, &group.id).await?, 2);
    Ok(())
}

#[tokio::test]
async fn last_member_leaving_tears_the_group_down() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;
    let scope = util::scope(&pool, &ann).await;

    let shared_cat = create_category(&pool, &scope, category("Rent", Some(&group.id))).await?;
    let shared_goal = create_goal(&pool, &scope, goal("Holiday", Some(&group.id))).await?;
    let personal_cat = create_category(&pool, &scope, category("Books", None)).await?;
    create_expense(&pool, &scope, entry(&shared_cat.id, Some(&group.id))).await?;
    create_saving(&pool, &scope, entry(&shared_goal.id, Some(&group.id))).await?;
    create_expense(&pool, &scope, entry(&personal_cat.id, None)).await?;
    generate_invite(&pool, &scope, &group.id, &InvitePolicy::default(), now_ms()).await?;

    leave_group(&pool, &bob.id, &group.id).await?;
    let removal = leave_group(&pool, &ann.id, &group.id).await?;
    assert!(removal.group_deleted);
    assert!(!group_exists(&pool, &group.id).await);

    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM group_members").await, 0);
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM invites").await, 0);
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM goals").await, 0);
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM savings").await, 0);
    assert_eq!(
        util::count(&pool, "SELECT COUNT(*) FROM categories WHERE group_id IS NOT NULL").await,
        0
    );
    // Personal records survive.
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM expenses").await, 1);
    assert_eq!(util::count(&pool, "SELECT COUNT(*) FROM categories").await, 1);
    Ok(())
}

#[tokio::test]
async fn teardown_is_refused_while_personal_entries_use_shared_categories() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let group = create_group(&pool, &ann, "Solo".into()).await?;
    let scope = util::scope(&pool, &ann).await;
    let shared_cat = create_category(&pool, &scope, category("Rent", Some(&group.id))).await?;
    create_expense(&pool, &scope, entry(&shared_cat.id, None)).await?;

    let err = leave_group(&pool, &ann.id, &group.id)
        .await
        .expect_err("personal expense pins the category");
    assert!(err.is(ErrorCode::Conflict));
    // Rolled back as a whole.
    assert!(group_exists(&pool, &group.id).await);
    assert!(is_member(&pool, &group.id, &ann.id).await?);
    Ok(())
}

#[tokio::test]
async fn departed_member_loses_visibility_but_keeps_attribution() -> Result<()> {
    let pool = util::temp_pool().await;
    let ann = util::seed_user(&pool, "ann").await;
    let bob = util::seed_user(&pool, "bob").await;
    let group = util::couple(&pool, &ann, &bob, "Home").await;
    let bob_scope = util::scope(&pool, &bob).await;
    let cat = create_category(&pool, &bob_scope, category("Food", Some(&group.id))).await?;
    let expense = create_expense(&pool, &bob_scope, entry(&cat.id, Some(&group.id))).await?;

    leave_group(&pool, &bob.id, &group.id).await?;

    let bob_scope = util::scope(&pool, &bob).await;
    let err = couplefy_lib::expenses::get_expense(&pool, &bob_scope, &expense.id)
        .await
        .expect_err("no longer visible");
    assert!(err.is(ErrorCode::NotFound));

    let ann_scope = util::scope(&pool, &ann).await;
    let seen = couplefy_lib::expenses::get_expense(&pool, &ann_scope, &expense.id).await?;
    assert_eq!(seen.user_id, bob.id);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_leaves_leave_no_orphans() -> Result<()> {
    let (_dir, pool) = util::file_pool().await;
    let ann = util::seed_user(&pool, "ann").await;

    for round in 0..10 {
        let bob = util::seed_user(&pool, &format!("bob{round}")).await;
        let group = create_group(&pool, &ann, format!("Home {round}")).await?;
        let scope = util::scope(&pool, &ann).await;
        let invite =
            generate_invite(&pool, &scope, &group.id, &InvitePolicy::default(), now_ms()).await?;
        couplefy_lib::invites::accept_invite(&pool, &bob, &invite.code, now_ms()).await?;

        let leaving = {
            let (pool, bob_id, group_id) = (pool.clone(), bob.id.clone(), group.id.clone());
            tokio::spawn(async move { leave_group(&pool, &bob_id, &group_id).await })
        };
        let removing = {
            let (pool, ann_id, bob_id, group_id) =
                (pool.clone(), ann.id.clone(), bob.id.clone(), group.id.clone());
            tokio::spawn(async move { remove_member(&pool, &ann_id, &group_id, &bob_id).await })
        };
        let (a, b) = (leaving.await?, removing.await?);

        // A late leave finds its actor gone; a late removal finds its target gone.
        match (&a, &b) {
            (Err(late_leave), Ok(_)) => assert!(late_leave.is(ErrorCode::Unauthorized)),
            (Ok(_), Err(late_removal)) => assert!(late_removal.is(ErrorCode::NotFound)),
            other => panic!("round {round}: {other:?}"),
        }
        assert_eq!(member_count(&pool, &group.id).await?, 1, "round {round}");
        assert!(group_exists(&pool, &group.id).await);
    }
    let orphans = util::count(
        &pool,
        "SELECT COUNT(*) FROM household_groups g
         WHERE NOT EXISTS (SELECT 1 FROM group_members m WHERE m.group_id = g.id)",
    )
    .await;
    assert_eq!(orphans, 0);
    Ok(())
}
