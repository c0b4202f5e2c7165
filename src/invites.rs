//! Invite codes: generation, acceptance and the lazy expiry transition.
//!
//! `pending` is the only live state. `accepted`, `rejected` and `expired` are
//! terminal, and acceptance flips the status and inserts the membership in one
//! transaction.

use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};

use crate::authz::RequestScope;
use crate::db::{is_unique_violation, run_in_tx};
use crate::id::new_uuid_v7;
use crate::logging::code_hint;
use crate::membership::{get_group, insert_member, is_member};
use crate::model::{Invite, InviteStatus, User};
use crate::time::DAY_MS;
use crate::{AppError, AppResult, ErrorCode};

const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvitePolicy {
    pub ttl_days: i64,
    pub code_len: usize,
}

impl Default for InvitePolicy {
    fn default() -> Self {
        InvitePolicy {
            ttl_days: crate::config::DEFAULT_INVITE_TTL_DAYS,
            code_len: crate::config::DEFAULT_INVITE_CODE_LEN,
        }
    }
}

impl InvitePolicy {
    pub fn ttl_ms(&self) -> i64 {
        self.ttl_days * DAY_MS
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedInvite {
    pub group_id: String,
    pub group_name: String,
}

/// Random uppercase alphanumeric code.
pub fn generate_code(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

const INVITE_COLUMNS: &str = "id, group_id, invited_by, code, status, expires_at, created_at";

/// Case-insensitive lookup; the column is declared `COLLATE NOCASE`.
pub async fn find_invite_by_code<'e, E>(executor: E, code: &str) -> AppResult<Option<Invite>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {INVITE_COLUMNS} FROM invites WHERE code = ?1"))
        .bind(code)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Invite::try_from).transpose().map_err(AppError::from)
}

pub async fn find_invite<'e, E>(executor: E, invite_id: &str) -> AppResult<Option<Invite>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("SELECT {INVITE_COLUMNS} FROM invites WHERE id = ?1"))
        .bind(invite_id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Invite::try_from).transpose().map_err(AppError::from)
}

pub async fn generate_invite(
    pool: &SqlitePool,
    scope: &RequestScope,
    group_id: &str,
    policy: &InvitePolicy,
    now: i64,
) -> AppResult<Invite> {
    if get_group(pool, group_id).await?.is_none() {
        return Err(AppError::not_found("Group"));
    }
    scope.require_member(group_id)?;

    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let invite = Invite {
            id: new_uuid_v7(),
            group_id: group_id.to_string(),
            invited_by: scope.user_id().to_string(),
            code: generate_code(policy.code_len),
            status: InviteStatus::Pending,
            expires_at: now + policy.ttl_ms(),
            created_at: now,
        };
        let res = sqlx::query(
            "INSERT INTO invites (id, group_id, invited_by, code, status, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&invite.id)
        .bind(&invite.group_id)
        .bind(&invite.invited_by)
        .bind(&invite.code)
        .bind(invite.status.as_str())
        .bind(invite.expires_at)
        .bind(invite.created_at)
        .execute(pool)
        .await;
        match res {
            Ok(_) => {
                tracing::info!(
                    target: "couplefy",
                    event = "invite_generated",
                    group_id = %invite.group_id,
                    code = %code_hint(&invite.code),
                    expires_at = invite.expires_at
                );
                return Ok(invite);
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::warn!(target: "couplefy", event = "invite_code_collision", attempt);
            }
            Err(e) => return Err(e.into()),
        }
    }
    tracing::error!(
        target: "couplefy",
        event = "invite_code_exhausted",
        attempts = MAX_CODE_ATTEMPTS
    );
    Err(ErrorCode::OperationFailed.into_error())
}

async fn mark_expired(pool: &SqlitePool, invite_id: &str) -> AppResult<()> {
    sqlx::query("UPDATE invites SET status = 'expired' WHERE id = ?1 AND status = 'pending'")
        .bind(invite_id)
        .execute(pool)
        .await?;
    Ok(())
}

fn consumed() -> AppError {
    AppError::conflict("This invite has already been used")
}

/// Consumes a pending invite for `user`.
///
/// The expiry transition is persisted even though the call fails with `Expired`.
pub async fn accept_invite(
    pool: &SqlitePool,
    user: &User,
    code: &str,
    now: i64,
) -> AppResult<AcceptedInvite> {
    let code = code.trim();
    if code.is_empty() {
        return Err(AppError::validation("code", "Invite code is required"));
    }
    let invite = find_invite_by_code(pool, code)
        .await?
        .ok_or_else(|| AppError::not_found("Invite"))?;

    match invite.status {
        InviteStatus::Accepted | InviteStatus::Rejected => return Err(consumed()),
        InviteStatus::Expired => return Err(ErrorCode::Expired.into_error()),
        InviteStatus::Pending if now > invite.expires_at => {
            mark_expired(pool, &invite.id).await?;
            tracing::info!(
                target: "couplefy",
                event = "invite_expired",
                invite_id = %invite.id,
                code = %code_hint(&invite.code)
            );
            return Err(ErrorCode::Expired.into_error());
        }
        InviteStatus::Pending => {}
    }

    if is_member(pool, &invite.group_id, &user.id).await? {
        return Err(ErrorCode::AlreadyMember.into_error());
    }

    let invite_id = invite.id.clone();
    let group_id = invite.group_id.clone();
    let user_id = user.id.clone();
    let accepted = run_in_tx(pool, move |conn| {
        async move {
            let updated = sqlx::query(
                "UPDATE invites SET status = 'accepted' WHERE id = ?1 AND status = 'pending'",
            )
            .bind(&invite_id)
            .execute(&mut *conn)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(consumed());
            }
            insert_member(&mut *conn, &group_id, &user_id, now)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ErrorCode::AlreadyMember.into_error()
                    } else {
                        AppError::from(e)
                    }
                })?;
            let group = get_group(&mut *conn, &group_id)
                .await?
                .ok_or_else(|| AppError::not_found("Group"))?;
            Ok::<_, AppError>(AcceptedInvite {
                group_id: group.id,
                group_name: group.name,
            })
        }
        .boxed()
    })
    .await?;

    tracing::info!(
        target: "couplefy",
        event = "invite_accepted",
        invite_id = %invite.id,
        group_id = %accepted.group_id,
        user_id = %user.id
    );
    Ok(accepted)
}

/// Administrative pending → rejected transition.
pub async fn reject_invite(pool: &SqlitePool, invite_id: &str) -> AppResult<Invite> {
    let updated =
        sqlx::query("UPDATE invites SET status = 'rejected' WHERE id = ?1 AND status = 'pending'")
            .bind(invite_id)
            .execute(pool)
            .await?;
    let invite = find_invite(pool, invite_id)
        .await?
        .ok_or_else(|| AppError::not_found("Invite"))?;
    if updated.rows_affected() == 0 {
        return Err(AppError::conflict("Only pending invites can be rejected")
            .with_context("status", invite.status.as_str()));
    }
    tracing::info!(target: "couplefy", event = "invite_rejected", invite_id = %invite.id);
    Ok(invite)
}

/// Invites of a group, newest first. Pending invites past expiry are expired on the way.
pub async fn list_group_invites(
    pool: &SqlitePool,
    scope: &RequestScope,
    group_id: &str,
    now: i64,
) -> AppResult<Vec<Invite>> {
    scope.require_member(group_id)?;
    let expired = sqlx::query(
        "UPDATE invites SET status = 'expired'
          WHERE group_id = ?1 AND status = 'pending' AND expires_at < ?2",
    )
    .bind(group_id)
    .bind(now)
    .execute(pool)
    .await?;
    if expired.rows_affected() > 0 {
        tracing::info!(
            target: "couplefy",
            event = "invite_expired",
            group_id,
            count = expired.rows_affected()
        );
    }
    let rows = sqlx::query(&format!(
        "SELECT {INVITE_COLUMNS} FROM invites WHERE group_id = ?1 ORDER BY created_at DESC, id DESC"
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(Invite::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_uppercase_alphanumeric() {
        for len in [6, 8, 32] {
            let code = generate_code(len);
            assert_eq!(code.len(), len);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn default_policy_is_a_week() {
        let policy = InvitePolicy::default();
        assert_eq!(policy.ttl_ms(), 7 * DAY_MS);
        assert_eq!(policy.code_len, 8);
    }
}
