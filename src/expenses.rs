use sqlx::SqlitePool;

use crate::authz::RequestScope;
use crate::entries::{create_entry, delete_entry, get_entry, list_entries, update_entry};
use crate::model::Expense;
use crate::payload::{EntryFilter, EntryUpdate, NewEntry};
use crate::AppResult;

/// Group expenses are attributed to `paid_by` when that user is a current member.
pub async fn create_expense(pool: &SqlitePool, scope: &RequestScope, new: NewEntry) -> AppResult<Expense> {
    create_entry(pool, scope, new).await
}

pub async fn list_expenses(
    pool: &SqlitePool,
    scope: &RequestScope,
    filter: &EntryFilter,
) -> AppResult<Vec<Expense>> {
    list_entries(pool, scope, filter).await
}

pub async fn get_expense(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<Expense> {
    get_entry(pool, scope, id).await
}

pub async fn update_expense(
    pool: &SqlitePool,
    scope: &RequestScope,
    id: &str,
    update: EntryUpdate,
) -> AppResult<Expense> {
    update_entry(pool, scope, id, update).await
}

pub async fn delete_expense(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<()> {
    delete_entry::<Expense>(pool, scope, id).await
}
