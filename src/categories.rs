use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};

use crate::authz::RequestScope;
use crate::db::is_foreign_key_violation;
use crate::id::new_uuid_v7;
use crate::model::Category;
use crate::payload::{CategoryPatch, NewCategory};
use crate::time::now_ms;
use crate::{AppError, AppResult};

const CATEGORY_COLUMNS: &str = "id, name, color, icon, user_id, group_id, created_at, updated_at";

pub(crate) async fn find_category<'e, E>(executor: E, id: &str) -> AppResult<Option<Category>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = ?1"))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Category::try_from).transpose().map_err(AppError::from)
}

pub async fn create_category(
    pool: &SqlitePool,
    scope: &RequestScope,
    new: NewCategory,
) -> AppResult<Category> {
    scope.require_create_in(new.group_id.as_deref(), "category")?;
    let now = now_ms();
    let category = Category {
        id: new_uuid_v7(),
        name: new.name,
        color: new.color,
        icon: new.icon,
        user_id: match new.group_id {
            Some(_) => None,
            None => Some(scope.user_id().to_string()),
        },
        group_id: new.group_id,
        created_at: now,
        updated_at: now,
    };
    sqlx::query(
        "INSERT INTO categories (id, name, color, icon, user_id, group_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&category.id)
    .bind(&category.name)
    .bind(&category.color)
    .bind(&category.icon)
    .bind(&category.user_id)
    .bind(&category.group_id)
    .bind(category.created_at)
    .bind(category.updated_at)
    .execute(pool)
    .await?;
    tracing::info!(
        target: "couplefy",
        event = "record_created",
        entity = "category",
        id = %category.id,
        shared = category.group_id.is_some()
    );
    Ok(category)
}

/// Visible categories by name; `group_id` narrows to one group's shared set.
pub async fn list_categories(
    pool: &SqlitePool,
    scope: &RequestScope,
    group_id: Option<&str>,
) -> AppResult<Vec<Category>> {
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {CATEGORY_COLUMNS} FROM categories WHERE "
    ));
    scope.push_visibility_predicate(&mut qb, None);
    if let Some(group) = group_id {
        qb.push(" AND group_id = ").push_bind(group.to_string());
    }
    qb.push(" ORDER BY name COLLATE NOCASE, id");
    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(Category::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

pub async fn get_category(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<Category> {
    scope.require_visible(find_category(pool, id).await?, "Category")
}

pub async fn update_category(
    pool: &SqlitePool,
    scope: &RequestScope,
    id: &str,
    patch: CategoryPatch,
) -> AppResult<Category> {
    let mut category = find_category(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Category"))?;
    scope.require_mutate(&category, "category", id)?;

    if let Some(name) = patch.name {
        category.name = name;
    }
    if let Some(color) = patch.color {
        category.color = color;
    }
    if let Some(icon) = patch.icon {
        category.icon = icon;
    }
    category.updated_at = now_ms();

    sqlx::query("UPDATE categories SET name = ?1, color = ?2, icon = ?3, updated_at = ?4 WHERE id = ?5")
        .bind(&category.name)
        .bind(&category.color)
        .bind(&category.icon)
        .bind(category.updated_at)
        .bind(&category.id)
        .execute(pool)
        .await?;
    tracing::info!(target: "couplefy", event = "record_updated", entity = "category", id);
    Ok(category)
}

/// Categories still referenced by an expense are kept; the call fails with `Conflict`.
pub async fn delete_category(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<()> {
    let category = find_category(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Category"))?;
    scope.require_mutate(&category, "category", id)?;

    sqlx::query("DELETE FROM categories WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                AppError::conflict("This category is used by existing expenses")
                    .with_context("entity", "category")
            } else {
                AppError::from(e)
            }
        })?;
    tracing::info!(target: "couplefy", event = "record_deleted", entity = "category", id);
    Ok(())
}
