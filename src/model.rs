use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::{AppError, ErrorCode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub external_id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: String,
    pub name: String,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub id: String,
    pub group_id: String,
    pub user_id: String,
    pub joined_at: i64,
}

/// A member row joined with the user's display fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub joined_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupWithMembers {
    #[serde(flatten)]
    pub group: Group,
    pub members: Vec<MemberProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl InviteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InviteStatus::Pending => "pending",
            InviteStatus::Accepted => "accepted",
            InviteStatus::Rejected => "rejected",
            InviteStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InviteStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InviteStatus::Pending),
            "accepted" => Ok(InviteStatus::Accepted),
            "rejected" => Ok(InviteStatus::Rejected),
            "expired" => Ok(InviteStatus::Expired),
            other => Err(ErrorCode::OperationFailed
                .into_error()
                .with_context("invite_status", other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: String,
    pub group_id: String,
    pub invited_by: String,
    pub code: String,
    pub status: InviteStatus,
    pub expires_at: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub color: String,
    pub icon: Option<String>,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub target_amount: Option<Decimal>,
    pub color: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub category_id: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub date: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Saving {
    pub id: String,
    pub user_id: String,
    pub group_id: Option<String>,
    pub goal_id: String,
    pub amount: Decimal,
    pub description: Option<String>,
    pub date: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Canonical storage form: two fractional digits.
pub fn amount_to_text(amount: Decimal) -> String {
    let mut canonical = amount;
    canonical.rescale(2);
    canonical.to_string()
}

pub(crate) fn decode_amount(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn decode_optional_amount(row: &SqliteRow, column: &str) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

impl TryFrom<&SqliteRow> for User {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.try_get("id")?,
            external_id: row.try_get("external_id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            avatar_url: row.try_get("avatar_url")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for Group {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Group {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for MemberProfile {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(MemberProfile {
            user_id: row.try_get("user_id")?,
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            joined_at: row.try_get("joined_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for Invite {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        let status: String = row.try_get("status")?;
        let status = InviteStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".into(),
            source: Box::new(e),
        })?;
        Ok(Invite {
            id: row.try_get("id")?,
            group_id: row.try_get("group_id")?,
            invited_by: row.try_get("invited_by")?,
            code: row.try_get("code")?,
            status,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for Category {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Category {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            color: row.try_get("color")?,
            icon: row.try_get("icon")?,
            user_id: row.try_get("user_id")?,
            group_id: row.try_get("group_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for Goal {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Goal {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            target_amount: decode_optional_amount(row, "target_amount")?,
            color: row.try_get("color")?,
            icon: row.try_get("icon")?,
            description: row.try_get("description")?,
            user_id: row.try_get("user_id")?,
            group_id: row.try_get("group_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for Expense {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Expense {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            group_id: row.try_get("group_id")?,
            category_id: row.try_get("category_id")?,
            amount: decode_amount(row, "amount")?,
            description: row.try_get("description")?,
            date: row.try_get("date")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<&SqliteRow> for Saving {
    type Error = sqlx::Error;

    fn try_from(row: &SqliteRow) -> Result<Self, Self::Error> {
        Ok(Saving {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            group_id: row.try_get("group_id")?,
            goal_id: row.try_get("goal_id")?,
            amount: decode_amount(row, "amount")?,
            description: row.try_get("description")?,
            date: row.try_get("date")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amounts_are_stored_with_two_decimals() {
        assert_eq!(amount_to_text(Decimal::from_str("42.5").unwrap()), "42.50");
        assert_eq!(amount_to_text(Decimal::from(7)), "7.00");
    }

    #[test]
    fn invite_status_round_trips_through_text() {
        for status in [
            InviteStatus::Pending,
            InviteStatus::Accepted,
            InviteStatus::Rejected,
            InviteStatus::Expired,
        ] {
            assert_eq!(InviteStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(InviteStatus::from_str("revoked").is_err());
    }

    #[test]
    fn expense_serializes_camel_case_with_string_amount() {
        let expense = Expense {
            id: "e1".into(),
            user_id: "u1".into(),
            group_id: None,
            category_id: "c1".into(),
            amount: Decimal::from_str("42.50").unwrap(),
            description: None,
            date: 0,
            created_at: 0,
            updated_at: 0,
        };
        let value = serde_json::to_value(&expense).unwrap();
        assert_eq!(value.get("categoryId"), Some(&json!("c1")));
        assert_eq!(value.get("amount"), Some(&json!("42.50")));
        assert_eq!(value.get("groupId"), Some(&json!(null)));
    }
}
