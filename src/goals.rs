use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};

use crate::authz::RequestScope;
use crate::db::is_foreign_key_violation;
use crate::id::new_uuid_v7;
use crate::model::{amount_to_text, Goal};
use crate::payload::{GoalPatch, NewGoal};
use crate::time::now_ms;
use crate::{AppError, AppResult};

const GOAL_COLUMNS: &str =
    "id, name, target_amount, color, icon, description, user_id, group_id, created_at, updated_at";

pub(crate) async fn find_goal<'e, E>(executor: E, id: &str) -> AppResult<Option<Goal>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?1"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Goal::try_from).transpose().map_err(AppError::from)
}

pub async fn create_goal(pool: &SqlitePool, scope: &RequestScope, new: NewGoal) -> AppResult<Goal> {
    scope.require_create_in(new.group_id.as_deref(), "goal")?;
    let now = now_ms();
    let goal = Goal {
        id: new_uuid_v7(),
        name: new.name,
        target_amount: new.target_amount,
        color: new.color,
        icon: new.icon,
        description: new.description,
        user_id: match new.group_id {
            Some(_) => None,
            None => Some(scope.user_id().to_string()),
        },
        group_id: new.group_id,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO goals (id, name, target_amount, color, icon, description, user_id, group_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )
    .bind(&goal.id)
    .bind(&goal.name)
    .bind(goal.target_amount.map(amount_to_text))
    .bind(&goal.color)
    .bind(&goal.icon)
    .bind(&goal.description)
    .bind(&goal.user_id)
    .bind(&goal.group_id)
    .bind(goal.created_at)
    .bind(goal.updated_at)
    .execute(pool)
    .await?;
    tracing::info!(
        target: "couplefy",
        event = "record_created",
        entity = "goal",
        id = %goal.id,
        shared = goal.group_id.is_some()
    );
    Ok(goal)
}

/// Visible goals, newest first.
pub async fn list_goals(
    pool: &SqlitePool,
    scope: &RequestScope,
    group_id: Option<&str>,
) -> AppResult<Vec<Goal>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {GOAL_COLUMNS} FROM goals WHERE "));
    scope.push_visibility_predicate(&mut qb, None);
    if let Some(group) = group_id {
        qb.push(" AND group_id = ").push_bind(group.to_string());
    }
    qb.push(" ORDER BY created_at DESC, id DESC");
    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(Goal::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

pub async fn get_goal(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<Goal> {
    scope.require_visible(find_goal(pool, id).await?, "Goal")
}

pub async fn update_goal(
    pool: &SqlitePool,
    scope: &RequestScope,
    id: &str,
    patch: GoalPatch,
) -> AppResult<Goal> {
    let mut goal = find_goal(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Goal"))?;
    scope.require_mutate(&goal, "goal", id)?;

    if let Some(name) = patch.name {
        goal.name = name;
    }
    if let Some(target) = patch.target_amount {
        goal.target_amount = target;
    }
    if let Some(color) = patch.color {
        goal.color = color;
    }
    if let Some(icon) = patch.icon {
        goal.icon = icon;
    }
    if let Some(description) = patch.description {
        goal.description = description;
    }
    goal.updated_at = now_ms();

    sqlx::query(
        "UPDATE goals SET name = ?1, target_amount = ?2, color = ?3, icon = ?4, description = ?5, updated_at = ?6
          WHERE id = ?7",
    )
    .bind(&goal.name)
    .bind(goal.target_amount.map(amount_to_text))
    .bind(&goal.color)
    .bind(&goal.icon)
    .bind(&goal.description)
    .bind(goal.updated_at)
    .bind(&goal.id)
    .execute(pool)
    .await?;
    tracing::info!(target: "couplefy", event = "record_updated", entity = "goal", id);
    Ok(goal)
}

/// Goals with recorded savings are kept; the call fails with `Conflict`.
pub async fn delete_goal(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<()> {
    let goal = find_goal(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Goal"))?;
    scope.require_mutate(&goal, "goal", id)?;

    sqlx::query("DELETE FROM goals WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::conflict("This goal has savings recorded against it")
                    .with_context("entity", "goal")
            } else {
                AppError::from(e)
            }
        })?;
    tracing::info!(target: "couplefy", event = "record_deleted", entity = "goal", id);
    Ok(())
}
