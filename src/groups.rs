use futures::FutureExt;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::authz::RequestScope;
use crate::db::{is_foreign_key_violation, run_in_tx};
use crate::id::new_uuid_v7;
use crate::membership::{get_group, insert_member, is_member, list_members, member_count, user_groups};
use crate::model::{Group, GroupWithMembers, User};
use crate::time::now_ms;
use crate::{AppError, AppResult, ErrorCode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRemoval {
    pub group_id: String,
    pub removed_user_id: String,
    /// The group had no members left and was deleted with its shared records.
    pub group_deleted: bool,
}

/// Creates the group and the creator's membership together.
pub async fn create_group(pool: &SqlitePool, creator: &User, name: String) -> AppResult<Group> {
    let now = now_ms();
    let group = Group {
        id: new_uuid_v7(),
        name,
        created_by: creator.id.clone(),
        created_at: now,
        updated_at: now,
    };
    let row = group.clone();
    run_in_tx(pool, move |conn| {
        async move {
            sqlx::query(
                "INSERT INTO household_groups (id, name, created_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&row.id)
            .bind(&row.name)
            .bind(&row.created_by)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&mut *conn)
            .await?;
            insert_member(&mut *conn, &row.id, &row.created_by, row.created_at).await?;
            Ok::<_, AppError>(())
        }
        .boxed()
    })
    .await?;
    tracing::info!(
        target: "couplefy",
        event = "group_created",
        group_id = %group.id,
        user_id = %creator.id
    );
    Ok(group)
}

pub async fn rename_group(
    pool: &SqlitePool,
    scope: &RequestScope,
    group_id: &str,
    name: String,
) -> AppResult<Group> {
    let Some(mut group) = get_group(pool, group_id).await? else {
        return Err(AppError::not_found("Group"));
    };
    scope.require_member(group_id)?;
    let now = now_ms();
    sqlx::query("UPDATE household_groups SET name = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(&name)
        .bind(now)
        .bind(group_id)
        .execute(pool)
        .await?;
    group.name = name;
    group.updated_at = now;
    tracing::info!(target: "couplefy", event = "group_renamed", group_id = %group.id);
    Ok(group)
}

/// Groups of the acting user with their members.
pub async fn list_groups(pool: &SqlitePool, scope: &RequestScope) -> AppResult<Vec<GroupWithMembers>> {
    user_groups(pool, scope.user_id()).await
}

pub async fn group_details(
    pool: &SqlitePool,
    scope: &RequestScope,
    group_id: &str,
) -> AppResult<GroupWithMembers> {
    let group = scope.require_visible(get_group(pool, group_id).await?, "Group")?;
    let members = list_members(pool, group_id).await?;
    Ok(GroupWithMembers { group, members })
}

/// Removes `target_user_id` from the group on behalf of `acting_user_id`.
///
/// Membership is checked against live rows inside the transaction. The first
/// statement writes the group row, so concurrent removals from one group run
/// one after the other and each sees the member count left by the previous.
/// When the last member goes, the group's shared entries are deleted and the
/// group row follows; categories, goals, invites and memberships cascade.
pub async fn remove_member(
    pool: &SqlitePool,
    acting_user_id: &str,
    group_id: &str,
    target_user_id: &str,
) -> AppResult<MemberRemoval> {
    let acting = acting_user_id.to_string();
    let group_id = group_id.to_string();
    let target = target_user_id.to_string();
    let now = now_ms();

    let removal = run_in_tx(pool, move |conn| {
        async move {
            let touched = sqlx::query("UPDATE household_groups SET updated_at = ?1 WHERE id = ?2")
                .bind(now)
                .bind(&group_id)
                .execute(&mut *conn)
                .await?;
            if touched.rows_affected() == 0 {
                return Err(AppError::not_found("Group"));
            }
            if !is_member(&mut *conn, &group_id, &acting).await? {
                tracing::warn!(
                    target: "couplefy",
                    event = "authz_denied",
                    action = "remove_member",
                    group_id = %group_id,
                    user_id = %acting
                );
                return Err(AppError::unauthorized().with_context("entity", "group"));
            }
            if !is_member(&mut *conn, &group_id, &target).await? {
                return Err(AppError::not_found("Member"));
            }
            let group = get_group(&mut *conn, &group_id)
                .await?
                .ok_or_else(|| AppError::not_found("Group"))?;
            let remaining = member_count(&mut *conn, &group_id).await?;
            if target == group.created_by && remaining > 1 {
                return Err(ErrorCode::CannotRemoveCreator.into_error());
            }

            sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
                .bind(&group_id)
                .bind(&target)
                .execute(&mut *conn)
                .await?;

            let group_deleted = remaining <= 1;
            if group_deleted {
                teardown_group(&mut *conn, &group_id).await?;
            }
            Ok::<_, AppError>(MemberRemoval {
                group_id,
                removed_user_id: target,
                group_deleted,
            })
        }
        .boxed()
    })
    .await?;

    tracing::info!(
        target: "couplefy",
        event = "member_removed",
        group_id = %removal.group_id,
        user_id = %removal.removed_user_id,
        acting_user_id
    );
    if removal.group_deleted {
        tracing::info!(target: "couplefy", event = "group_deleted", group_id = %removal.group_id);
    }
    Ok(removal)
}

pub async fn leave_group(pool: &SqlitePool, user_id: &str, group_id: &str) -> AppResult<MemberRemoval> {
    remove_member(pool, user_id, group_id, user_id).await
}

async fn teardown_group(conn: &mut sqlx::SqliteConnection, group_id: &str) -> AppResult<()> {
    for sql in [
        "DELETE FROM expenses WHERE group_id = ?1",
        "DELETE FROM savings WHERE group_id = ?1",
        "DELETE FROM household_groups WHERE id = ?1",
    ] {
        sqlx::query(sql)
            .bind(group_id)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    AppError::conflict(
                        "Personal records still use this group's categories or goals",
                    )
                    .with_context("group_id", group_id.to_string())
                } else {
                    AppError::from(e)
                }
            })?;
    }
    Ok(())
}
