use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::db::is_unique_violation;
use crate::id::new_uuid_v7;
use crate::model::User;
use crate::time::now_ms;
use crate::{AppError, AppResult, ErrorCode};

/// The authenticated principal handed over by the external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPrincipal {
    pub external_id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

pub trait IdentityBridge: Send + Sync {
    fn current_principal(&self) -> Option<ExternalPrincipal>;
}

#[derive(Clone)]
pub struct IdentityHandle(Arc<dyn IdentityBridge>);

impl IdentityHandle {
    pub fn new(bridge: impl IdentityBridge + 'static) -> Self {
        IdentityHandle(Arc::new(bridge))
    }

    pub fn current_principal(&self) -> Option<ExternalPrincipal> {
        self.0.current_principal()
    }
}

impl std::fmt::Debug for IdentityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHandle").finish_non_exhaustive()
    }
}

/// Fixed principal (or none). Used by the CLI and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<ExternalPrincipal>);

impl StaticIdentity {
    pub fn signed_in(principal: ExternalPrincipal) -> Self {
        StaticIdentity(Some(principal))
    }

    pub fn external_id(external_id: impl Into<String>) -> Self {
        let external_id = external_id.into();
        StaticIdentity(Some(ExternalPrincipal {
            email: String::new(),
            external_id,
            name: None,
            avatar_url: None,
        }))
    }

    pub fn anonymous() -> Self {
        StaticIdentity(None)
    }
}

impl IdentityBridge for StaticIdentity {
    fn current_principal(&self) -> Option<ExternalPrincipal> {
        self.0.clone()
    }
}

const USER_COLUMNS: &str = "id, external_id, email, name, avatar_url, created_at, updated_at";

pub async fn find_user_by_external_id<'e, E>(executor: E, external_id: &str) -> AppResult<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1"
    ))
    .bind(external_id)
    .fetch_optional(executor)
    .await?;
    row.as_ref().map(User::try_from).transpose().map_err(AppError::from)
}

pub async fn find_user<'e, E>(executor: E, user_id: &str) -> AppResult<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))
        .bind(user_id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(User::try_from).transpose().map_err(AppError::from)
}

fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email).trim()
}

/// Creates the local user on first sign-in and refreshes its profile afterwards.
///
/// `external_id` is the identity key and never changes. A blank incoming name
/// keeps the stored one; a new user without a name is named after the e-mail
/// local part.
pub async fn sync_user(pool: &SqlitePool, principal: &ExternalPrincipal) -> AppResult<User> {
    let external_id = principal.external_id.trim();
    if external_id.is_empty() {
        return Err(AppError::validation("externalId", "External id is required"));
    }
    let email = principal.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("email", "A valid e-mail address is required"));
    }
    let incoming_name = principal
        .name
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    let initial_name = if incoming_name.is_empty() {
        email_local_part(email)
    } else {
        incoming_name
    };
    let avatar_url = principal
        .avatar_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let now = now_ms();
    sqlx::query(
        "INSERT INTO users (id, external_id, email, name, avatar_url, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(external_id) DO UPDATE SET
           email = excluded.email,
           name = CASE WHEN ?7 = '' THEN users.name ELSE ?7 END,
           avatar_url = COALESCE(excluded.avatar_url, users.avatar_url),
           updated_at = excluded.updated_at",
    )
    .bind(new_uuid_v7())
    .bind(external_id)
    .bind(email)
    .bind(initial_name)
    .bind(avatar_url)
    .bind(now)
    .bind(incoming_name)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("This e-mail address belongs to another account")
                .with_context("field", "email")
        } else {
            AppError::from(e)
        }
    })?;

    let user = find_user_by_external_id(pool, external_id)
        .await?
        .ok_or_else(|| ErrorCode::OperationFailed.into_error())?;
    tracing::info!(target: "couplefy", event = "user_synced", user_id = %user.id);
    Ok(user)
}

/// Resolves the caller to a local user, or `NotAuthenticated`.
pub async fn current_user(pool: &SqlitePool, identity: &IdentityHandle) -> AppResult<User> {
    let Some(principal) = identity.current_principal() else {
        return Err(ErrorCode::NotAuthenticated.into_error());
    };
    find_user_by_external_id(pool, principal.external_id.trim())
        .await?
        .ok_or_else(|| ErrorCode::NotAuthenticated.into_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_part_is_used_for_default_names() {
        assert_eq!(email_local_part("ann@example.com"), "ann");
        assert_eq!(email_local_part("plain"), "plain");
    }

    #[test]
    fn anonymous_identity_has_no_principal() {
        let handle = IdentityHandle::new(StaticIdentity::anonymous());
        assert!(handle.current_principal().is_none());
        let handle = IdentityHandle::new(StaticIdentity::external_id("ext-1"));
        assert_eq!(
            handle.current_principal().map(|p| p.external_id),
            Some("ext-1".to_string())
        );
    }
}
