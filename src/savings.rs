use sqlx::SqlitePool;

use crate::authz::RequestScope;
use crate::entries::{create_entry, delete_entry, get_entry, list_entries, update_entry};
use crate::model::Saving;
use crate::payload::{EntryFilter, EntryUpdate, NewEntry};
use crate::AppResult;

pub async fn create_saving(pool: &SqlitePool, scope: &RequestScope, new: NewEntry) -> AppResult<Saving> {
    create_entry(pool, scope, new).await
}

/// Visible savings, newest first.
pub async fn list_savings(
    pool: &SqlitePool,
    scope: &RequestScope,
    filter: &EntryFilter,
) -> AppResult<Vec<Saving>> {
    list_entries(pool, scope, filter).await
}

pub async fn get_saving(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<Saving> {
    get_entry(pool, scope, id).await
}

pub async fn update_saving(
    pool: &SqlitePool,
    scope: &RequestScope,
    id: &str,
    update: EntryUpdate,
) -> AppResult<Saving> {
    update_entry(pool, scope, id, update).await
}

pub async fn delete_saving(pool: &SqlitePool, scope: &RequestScope, id: &str) -> AppResult<()> {
    delete_entry::<Saving>(pool, scope, id).await
}
