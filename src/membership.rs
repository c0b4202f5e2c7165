use std::collections::BTreeSet;

use sqlx::{Executor, Sqlite};

use crate::id::new_uuid_v7;
use crate::model::{Group, GroupMember, GroupWithMembers, MemberProfile};
use crate::{AppError, AppResult};

pub async fn user_group_ids<'e, E>(executor: E, user_id: &str) -> AppResult<BTreeSet<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT group_id FROM group_members WHERE user_id = ?1")
            .bind(user_id)
            .fetch_all(executor)
            .await?;
    Ok(ids.into_iter().collect())
}

pub async fn is_member<'e, E>(executor: E, group_id: &str, user_id: &str) -> AppResult<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let hit: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM group_members WHERE group_id = ?1 AND user_id = ?2")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(executor)
            .await?;
    Ok(hit.is_some())
}

pub async fn member_count<'e, E>(executor: E, group_id: &str) -> AppResult<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_members WHERE group_id = ?1")
        .bind(group_id)
        .fetch_one(executor)
        .await?;
    Ok(count)
}

pub async fn get_group<'e, E>(executor: E, group_id: &str) -> AppResult<Option<Group>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT id, name, created_by, created_at, updated_at FROM household_groups WHERE id = ?1",
    )
    .bind(group_id)
    .fetch_optional(executor)
    .await?;
    row.as_ref().map(Group::try_from).transpose().map_err(AppError::from)
}

/// Members of a group with their display fields, oldest first.
pub async fn list_members<'e, E>(executor: E, group_id: &str) -> AppResult<Vec<MemberProfile>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT m.user_id, u.name, u.email, m.joined_at
           FROM group_members m
           JOIN users u ON u.id = m.user_id
          WHERE m.group_id = ?1
          ORDER BY m.joined_at, m.id",
    )
    .bind(group_id)
    .fetch_all(executor)
    .await?;
    rows.iter()
        .map(MemberProfile::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

/// Every group the user belongs to, each with its member list.
pub async fn user_groups(
    pool: &sqlx::SqlitePool,
    user_id: &str,
) -> AppResult<Vec<GroupWithMembers>> {
    let rows = sqlx::query(
        "SELECT g.id, g.name, g.created_by, g.created_at, g.updated_at
           FROM household_groups g
           JOIN group_members m ON m.group_id = g.id
          WHERE m.user_id = ?1
          ORDER BY m.joined_at, g.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let group = Group::try_from(row)?;
        let members = list_members(pool, &group.id).await?;
        out.push(GroupWithMembers { group, members });
    }
    Ok(out)
}

/// Plain insert; the `(group_id, user_id)` unique index rejects duplicates.
pub(crate) async fn insert_member<'e, E>(
    executor: E,
    group_id: &str,
    user_id: &str,
    joined_at: i64,
) -> Result<GroupMember, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let member = GroupMember {
        id: new_uuid_v7(),
        group_id: group_id.to_string(),
        user_id: user_id.to_string(),
        joined_at,
    };
    sqlx::query("INSERT INTO group_members (id, group_id, user_id, joined_at) VALUES (?1, ?2, ?3, ?4)")
        .bind(&member.id)
        .bind(&member.group_id)
        .bind(&member.user_id)
        .bind(member.joined_at)
        .execute(executor)
        .await?;
    Ok(member)
}
