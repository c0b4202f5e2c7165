//! Shared implementation of expenses and savings.
//!
//! Both are dated amounts attributed to a user, optionally owned by a group,
//! that reference a category (expenses) or goal (savings) in a compatible
//! scope. Only the table and reference names differ.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::authz::{Owned, Ownership, RequestScope};
use crate::db::is_foreign_key_violation;
use crate::id::new_uuid_v7;
use crate::membership::is_member;
use crate::model::{amount_to_text, Expense, Saving};
use crate::payload::{EntryFilter, EntryUpdate, NewEntry};
use crate::time::now_ms;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Expense,
    Saving,
}

impl EntryKind {
    pub fn table(self) -> &'static str {
        match self {
            EntryKind::Expense => "expenses",
            EntryKind::Saving => "savings",
        }
    }

    pub fn reference_column(self) -> &'static str {
        match self {
            EntryKind::Expense => "category_id",
            EntryKind::Saving => "goal_id",
        }
    }

    pub fn reference_table(self) -> &'static str {
        match self {
            EntryKind::Expense => "categories",
            EntryKind::Saving => "goals",
        }
    }

    /// Payload field naming the reference.
    pub fn reference_field(self) -> &'static str {
        match self {
            EntryKind::Expense => "categoryId",
            EntryKind::Saving => "goalId",
        }
    }

    pub fn entity(self) -> &'static str {
        match self {
            EntryKind::Expense => "expense",
            EntryKind::Saving => "saving",
        }
    }

    fn display(self) -> &'static str {
        match self {
            EntryKind::Expense => "Expense",
            EntryKind::Saving => "Saving",
        }
    }

    fn reference_display(self) -> &'static str {
        match self {
            EntryKind::Expense => "Category",
            EntryKind::Saving => "Goal",
        }
    }

    fn columns(self) -> String {
        format!(
            "id, user_id, group_id, {}, amount, description, date, created_at, updated_at",
            self.reference_column()
        )
    }
}

pub trait EntryRecord: Owned + Sized + Send + Unpin + 'static {
    const KIND: EntryKind;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error>;
}

impl EntryRecord for Expense {
    const KIND: EntryKind = EntryKind::Expense;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Expense::try_from(row)
    }
}

impl EntryRecord for Saving {
    const KIND: EntryKind = EntryKind::Saving;

    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Saving::try_from(row)
    }
}

async fn find_entry<R: EntryRecord>(pool: &SqlitePool, id: &str) -> AppResult<Option<R>> {
    let kind = R::KIND;
    let row = sqlx::query(&format!(
        "SELECT {} FROM {} WHERE id = ?1",
        kind.columns(),
        kind.table()
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(R::from_row).transpose().map_err(AppError::from)
}

/// The referenced category/goal must be visible, and a group entry may only
/// reference a record shared in that same group.
async fn check_reference(
    pool: &SqlitePool,
    scope: &RequestScope,
    kind: EntryKind,
    reference_id: &str,
    entry_group: Option<&str>,
) -> AppResult<()> {
    let field = kind.reference_field();
    let row: Option<(Option<String>, Option<String>)> = sqlx::query_as(&format!(
        "SELECT user_id, group_id FROM {} WHERE id = ?1",
        kind.reference_table()
    ))
    .bind(reference_id)
    .fetch_optional(pool)
    .await?;

    let ownership = row.and_then(|(user, group)| Ownership::from_columns(user.as_deref(), group.as_deref()));
    let Some(ownership) = ownership.filter(|o| scope.visible(o)) else {
        return Err(AppError::validation(
            field,
            format!("{} not found", kind.reference_display()),
        ));
    };
    if let Some(group) = entry_group {
        if ownership.group_id() != Some(group) {
            return Err(AppError::validation(
                field,
                format!(
                    "Group {}s must use a {} from the same group",
                    kind.entity(),
                    kind.reference_display().to_ascii_lowercase()
                ),
            ));
        }
    }
    Ok(())
}

fn map_write_error(kind: EntryKind, err: sqlx::Error) -> AppError {
    if is_foreign_key_violation(&err) {
        AppError::validation(
            kind.reference_field(),
            format!("{} not found", kind.reference_display()),
        )
    } else {
        AppError::from(err)
    }
}

pub async fn create_entry<R: EntryRecord>(
    pool: &SqlitePool,
    scope: &RequestScope,
    new: NewEntry,
) -> AppResult<R> {
    let kind = R::KIND;
    scope.require_create_in(new.group_id.as_deref(), kind.entity())?;
    check_reference(pool, scope, kind, &new.reference_id, new.group_id.as_deref()).await?;

    let attributed_to = match (&new.group_id, &new.paid_by) {
        (Some(group), Some(payer)) => {
            if !is_member(pool, group, payer).await? {
                return Err(AppError::validation(
                    "paidBy",
                    "The payer must be a current member of the group",
                ));
            }
            payer.clone()
        }
        _ => scope.user_id().to_string(),
    };

    let id = new_uuid_v7();
    let now = now_ms();
    sqlx::query(&format!(
        "INSERT INTO {} (id, user_id, group_id, {}, amount, description, date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        kind.table(),
        kind.reference_column()
    ))
    .bind(&id)
    .bind(&attributed_to)
    .bind(&new.group_id)
    .bind(&new.reference_id)
    .bind(amount_to_text(new.amount))
    .bind(&new.description)
    .bind(new.date)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| map_write_error(kind, e))?;

    tracing::info!(
        target: "couplefy",
        event = "record_created",
        entity = kind.entity(),
        id = %id,
        shared = new.group_id.is_some()
    );
    find_entry::<R>(pool, &id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.display()))
}

/// Visible entries, newest first, narrowed by the filter.
pub async fn list_entries<R: EntryRecord>(
    pool: &SqlitePool,
    scope: &RequestScope,
    filter: &EntryFilter,
) -> AppResult<Vec<R>> {
    let kind = R::KIND;
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "SELECT {} FROM {} WHERE ",
        kind.columns(),
        kind.table()
    ));
    scope.push_visibility_predicate(&mut qb, None);
    if let Some(group) = &filter.group_id {
        qb.push(" AND group_id = ").push_bind(group.clone());
    }
    if let Some(from) = filter.from {
        qb.push(" AND date >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND date <= ").push_bind(to);
    }
    qb.push(" ORDER BY date DESC, created_at DESC, id DESC");
    let rows = qb.build().fetch_all(pool).await?;
    rows.iter()
        .map(R::from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

pub async fn get_entry<R: EntryRecord>(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<R> {
    scope.require_visible(find_entry::<R>(pool, id).await?, R::KIND.display())
}

/// Replaces amount, reference, description and date. Scope and attribution stay as created.
pub async fn update_entry<R: EntryRecord>(
    pool: &SqlitePool,
    scope: &RequestScope,
    id: &str,
    update: EntryUpdate,
) -> AppResult<R> {
    let kind = R::KIND;
    let existing = find_entry::<R>(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.display()))?;
    scope.require_mutate(&existing, kind.entity(), id)?;
    let entry_group = existing.ownership().and_then(|o| o.group_id().map(str::to_string));
    check_reference(pool, scope, kind, &update.reference_id, entry_group.as_deref()).await?;

    sqlx::query(&format!(
        "UPDATE {} SET {} = ?1, amount = ?2, description = ?3, date = ?4, updated_at = ?5 WHERE id = ?6",
        kind.table(),
        kind.reference_column()
    ))
    .bind(&update.reference_id)
    .bind(amount_to_text(update.amount))
    .bind(&update.description)
    .bind(update.date)
    .bind(now_ms())
    .bind(id)
    .execute(pool)
    .await
    .map_err(|e| map_write_error(kind, e))?;

    tracing::info!(target: "couplefy", event = "record_updated", entity = kind.entity(), id);
    find_entry::<R>(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.display()))
}

pub async fn delete_entry<R: EntryRecord>(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<()> {
    let kind = R::KIND;
    let existing = find_entry::<R>(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found(kind.display()))?;
    scope.require_mutate(&existing, kind.entity(), id)?;
    sqlx::query(&format!("DELETE FROM {} WHERE id = ?1", kind.table()))
        .bind(id)
        .execute(pool)
        .await?;
    tracing::info!(target: "couplefy", event = "record_deleted", entity = kind.entity(), id);
    Ok(())
}
