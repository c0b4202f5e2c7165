use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use sqlx::{Executor, Row, SqlitePool};
use std::collections::HashMap;

use crate::time::now_ms;
use tracing::{error, info};

static ADD_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^ALTER\s+TABLE\s+(\w+)\s+ADD\s+COLUMN\s+(\w+)").expect("static regex")
});

fn preview(sql: &str) -> String {
    let one_line = sql.replace(['\n', '\t'], " ");
    let trimmed = one_line.trim();
    if trimmed.chars().count() > 160 {
        let head: String = trimmed.chars().take(160).collect();
        format!("{head}…")
    } else {
        trimmed.to_string()
    }
}

pub(crate) static MIGRATIONS: &[(&str, &str)] = &[
    (
        "202401150900_users_groups.sql",
        include_str!("../migrations/202401150900_users_groups.sql"),
    ),
    (
        "202401150930_records.sql",
        include_str!("../migrations/202401150930_records.sql"),
    ),
    (
        "202401201200_scope_indexes.sql",
        include_str!("../migrations/202401201200_scope_indexes.sql"),
    ),
    (
        "202402031000_users_avatar.sql",
        include_str!("../migrations/202402031000_users_avatar.sql"),
    ),
    (
        "202410160900_users_email_unique.sql",
        include_str!("../migrations/202410160900_users_email_unique.sql"),
    ),
];

fn strip_comments(raw_sql: &str) -> String {
    raw_sql
        .lines()
        .filter(|line| {
            let t = line.trim_start();
            !(t.is_empty() || t.starts_with("--"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn checksum(cleaned: &str) -> String {
    format!("{:x}", Sha256::digest(cleaned.as_bytes()))
}

/// Applies every pending migration, each in its own transaction.
///
/// Fails if a migration that was already applied has since been edited.
pub async fn apply_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    pool.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (\
           version   TEXT PRIMARY KEY,\
           applied_at INTEGER NOT NULL,\
           checksum TEXT NOT NULL\
         )",
    )
    .await?;

    let rows = sqlx::query("SELECT version, checksum FROM schema_migrations")
        .fetch_all(pool)
        .await?;
    let mut applied: HashMap<String, String> = HashMap::new();
    for r in rows {
        if let (Ok(v), Ok(c)) = (
            r.try_get::<String, _>("version"),
            r.try_get::<String, _>("checksum"),
        ) {
            applied.insert(v, c);
        }
    }

    for (filename, raw_sql) in MIGRATIONS {
        let cleaned = strip_comments(raw_sql);
        let sum = checksum(&cleaned);

        if let Some(stored) = applied.get(*filename) {
            if stored != &sum {
                anyhow::bail!("migration {} edited after application", filename);
            }
            info!(target: "couplefy", event = "migration_skip_file", file = %filename);
            continue;
        }

        let mut tx = pool.begin().await?;
        for stmt in cleaned.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            let upper = s.to_ascii_uppercase();
            if upper == "BEGIN" || upper == "COMMIT" {
                continue;
            }
            if let Some(caps) = ADD_COLUMN_RE.captures(s) {
                let (Some(table), Some(col)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                let exists: Option<i64> = sqlx::query_scalar(
                    "SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2",
                )
                .bind(table.as_str())
                .bind(col.as_str())
                .fetch_optional(&mut *tx)
                .await?;
                if exists.is_some() {
                    info!(target: "couplefy", event = "migration_stmt_skip", file = %filename, sql = %preview(s));
                    continue;
                }
            }
            info!(target: "couplefy", event = "migration_stmt", file = %filename, sql = %preview(s));
            if let Err(e) = sqlx::query(s).execute(&mut *tx).await {
                error!(target: "couplefy", event = "migration_stmt_error", file = %filename, sql = %preview(s), error = %e);
                return Err(e.into());
            }
        }

        sqlx::query(
            "INSERT INTO schema_migrations (version, applied_at, checksum) VALUES (?, ?, ?)",
        )
        .bind(*filename)
        .bind(now_ms())
        .bind(&sum)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(target: "couplefy", event = "migration_file_applied", file = %filename);
    }

    Ok(())
}
