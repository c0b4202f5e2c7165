//! Loosely typed request payloads and their parse into typed commands.
//!
//! Every payload is parsed before the resolver sees the request, so malformed
//! input always surfaces as a validation failure first.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::time::parse_entry_date;
use crate::AppError;

pub const DEFAULT_CATEGORY_COLOR: &str = "#6366f1";
pub const DEFAULT_GOAL_COLOR: &str = "#10b981";
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_GROUP_NAME_LEN: usize = 255;
pub const MAX_ICON_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 500;

static COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("static regex"));

static MAX_AMOUNT: Lazy<Decimal> = Lazy::new(|| Decimal::new(9_999_999_999, 2));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} must be a hex color like #6366f1")]
    Color { field: &'static str },
    #[error("{field} must be a positive amount")]
    Amount { field: &'static str },
    #[error("{field} can have at most 2 decimal places")]
    Precision { field: &'static str },
    #[error("{field} must not exceed 99,999,999.99")]
    TooLarge { field: &'static str },
    #[error("{field} must be a date like 2024-03-01")]
    Date { field: &'static str },
    #[error("Nothing to update")]
    EmptyPatch,
}

impl PayloadError {
    pub fn field(&self) -> &'static str {
        match self {
            PayloadError::Missing { field }
            | PayloadError::TooLong { field, .. }
            | PayloadError::Color { field }
            | PayloadError::Amount { field }
            | PayloadError::Precision { field }
            | PayloadError::TooLarge { field }
            | PayloadError::Date { field } => field,
            PayloadError::EmptyPatch => "payload",
        }
    }
}

impl From<PayloadError> for AppError {
    fn from(err: PayloadError) -> Self {
        AppError::validation(err.field(), err.to_string())
    }
}

/// Deserializes a request payload; shape errors become validation failures.
pub fn parse_payload<T: DeserializeOwned>(value: Value) -> Result<T, AppError> {
    let value = if value.is_null() {
        Value::Object(Default::default())
    } else {
        value
    };
    Ok(serde_json::from_value(value)?)
}

/// Form fields arrive as strings or numbers; both are read as text.
fn loose_text(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Trimmed, with blank treated as absent.
fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

pub fn parse_name(
    raw: Option<&str>,
    field: &'static str,
    max: usize,
) -> Result<String, PayloadError> {
    let name = present(raw).ok_or(PayloadError::Missing { field })?;
    if name.chars().count() > max {
        return Err(PayloadError::TooLong { field, max });
    }
    Ok(name.to_string())
}

fn parse_color(raw: Option<&str>) -> Result<Option<String>, PayloadError> {
    match present(raw) {
        None => Ok(None),
        Some(c) if COLOR_RE.is_match(c) => Ok(Some(c.to_ascii_lowercase())),
        Some(_) => Err(PayloadError::Color { field: "color" }),
    }
}

fn parse_icon(raw: Option<&str>) -> Result<Option<String>, PayloadError> {
    match present(raw) {
        None => Ok(None),
        Some(icon) if icon.chars().count() > MAX_ICON_LEN => Err(PayloadError::TooLong {
            field: "icon",
            max: MAX_ICON_LEN,
        }),
        Some(icon) => Ok(Some(icon.to_string())),
    }
}

fn parse_description(raw: Option<&str>) -> Result<Option<String>, PayloadError> {
    match present(raw) {
        None => Ok(None),
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LEN => Err(PayloadError::TooLong {
            field: "description",
            max: MAX_DESCRIPTION_LEN,
        }),
        Some(d) => Ok(Some(d.to_string())),
    }
}

pub fn parse_amount(raw: &str, field: &'static str) -> Result<Decimal, PayloadError> {
    let amount = Decimal::from_str(raw.trim()).map_err(|_| PayloadError::Amount { field })?;
    if amount <= Decimal::ZERO {
        return Err(PayloadError::Amount { field });
    }
    if amount.normalize().scale() > 2 {
        return Err(PayloadError::Precision { field });
    }
    if amount > *MAX_AMOUNT {
        return Err(PayloadError::TooLarge { field });
    }
    Ok(amount)
}

fn required_amount(raw: Option<String>) -> Result<Decimal, PayloadError> {
    let raw = raw
        .filter(|s| !s.trim().is_empty())
        .ok_or(PayloadError::Missing { field: "amount" })?;
    parse_amount(&raw, "amount")
}

fn required_date(raw: Option<&str>) -> Result<i64, PayloadError> {
    let raw = present(raw).ok_or(PayloadError::Missing { field: "date" })?;
    parse_entry_date(raw).ok_or(PayloadError::Date { field: "date" })
}

fn required_id(raw: Option<&str>, field: &'static str) -> Result<String, PayloadError> {
    present(raw)
        .map(str::to_string)
        .ok_or(PayloadError::Missing { field })
}

fn optional_id(raw: Option<&str>) -> Option<String> {
    present(raw).map(str::to_string)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPayload {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    #[serde(alias = "group_id")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCategory {
    pub name: String,
    pub color: String,
    pub icon: Option<String>,
    pub group_id: Option<String>,
}

/// `None` leaves a field untouched. `icon: Some(None)` clears the icon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<Option<String>>,
}

impl CategoryPayload {
    pub fn into_new(self) -> Result<NewCategory, PayloadError> {
        Ok(NewCategory {
            name: parse_name(self.name.as_deref(), "name", MAX_NAME_LEN)?,
            color: parse_color(self.color.as_deref())?
                .unwrap_or_else(|| DEFAULT_CATEGORY_COLOR.to_string()),
            icon: parse_icon(self.icon.as_deref())?,
            group_id: optional_id(self.group_id.as_deref()),
        })
    }

    /// Ownership is fixed at creation, so `groupId` is ignored here.
    pub fn into_patch(self) -> Result<CategoryPatch, PayloadError> {
        let patch = CategoryPatch {
            name: match self.name.as_deref() {
                Some(raw) => Some(parse_name(Some(raw), "name", MAX_NAME_LEN)?),
                None => None,
            },
            color: parse_color(self.color.as_deref())?,
            icon: match self.icon.as_deref() {
                Some(raw) => Some(parse_icon(Some(raw))?),
                None => None,
            },
        };
        if patch == CategoryPatch::default() {
            return Err(PayloadError::EmptyPatch);
        }
        Ok(patch)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalPayload {
    pub name: Option<String>,
    #[serde(alias = "target_amount")]
    pub target_amount: Option<Value>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
    #[serde(alias = "group_id")]
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGoal {
    pub name: String,
    pub target_amount: Option<Decimal>,
    pub color: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalPatch {
    pub name: Option<String>,
    pub target_amount: Option<Option<Decimal>>,
    pub color: Option<String>,
    pub icon: Option<Option<String>>,
    pub description: Option<Option<String>>,
}

fn optional_amount(raw: Option<String>, field: &'static str) -> Result<Option<Decimal>, PayloadError> {
    match raw.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(text) => parse_amount(text, field).map(Some),
    }
}

impl GoalPayload {
    pub fn into_new(self) -> Result<NewGoal, PayloadError> {
        Ok(NewGoal {
            name: parse_name(self.name.as_deref(), "name", MAX_NAME_LEN)?,
            target_amount: optional_amount(loose_text(&self.target_amount), "targetAmount")?,
            color: parse_color(self.color.as_deref())?
                .unwrap_or_else(|| DEFAULT_GOAL_COLOR.to_string()),
            icon: parse_icon(self.icon.as_deref())?,
            description: parse_description(self.description.as_deref())?,
            group_id: optional_id(self.group_id.as_deref()),
        })
    }

    pub fn into_patch(self) -> Result<GoalPatch, PayloadError> {
        let patch = GoalPatch {
            name: match self.name.as_deref() {
                Some(raw) => Some(parse_name(Some(raw), "name", MAX_NAME_LEN)?),
                None => None,
            },
            target_amount: match &self.target_amount {
                None => None,
                Some(_) => Some(optional_amount(loose_text(&self.target_amount), "targetAmount")?),
            },
            color: parse_color(self.color.as_deref())?,
            icon: match self.icon.as_deref() {
                Some(raw) => Some(parse_icon(Some(raw))?),
                None => None,
            },
            description: match self.description.as_deref() {
                Some(raw) => Some(parse_description(Some(raw))?),
                None => None,
            },
        };
        if patch == GoalPatch::default() {
            return Err(PayloadError::EmptyPatch);
        }
        Ok(patch)
    }
}

/// A new expense or saving. `reference_id` is the category or goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub amount: Decimal,
    pub reference_id: String,
    pub description: Option<String>,
    pub date: i64,
    pub group_id: Option<String>,
    pub paid_by: Option<String>,
}

/// Full replacement of the editable entry fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUpdate {
    pub amount: Decimal,
    pub reference_id: String,
    pub description: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensePayload {
    pub amount: Option<Value>,
    #[serde(alias = "category_id")]
    pub category_id: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    #[serde(alias = "group_id")]
    pub group_id: Option<String>,
    #[serde(alias = "paidById", alias = "paid_by")]
    pub paid_by: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingPayload {
    pub amount: Option<Value>,
    #[serde(alias = "goal_id")]
    pub goal_id: Option<String>,
    pub description: Option<String>,
    pub date: Option<String>,
    #[serde(alias = "group_id")]
    pub group_id: Option<String>,
    #[serde(alias = "savedById", alias = "paidById", alias = "paid_by")]
    pub paid_by: Option<String>,
}

fn new_entry(
    amount: &Option<Value>,
    reference: Option<&str>,
    reference_field: &'static str,
    description: Option<&str>,
    date: Option<&str>,
    group_id: Option<&str>,
    paid_by: Option<&str>,
) -> Result<NewEntry, PayloadError> {
    Ok(NewEntry {
        amount: required_amount(loose_text(amount))?,
        reference_id: required_id(reference, reference_field)?,
        description: parse_description(description)?,
        date: required_date(date)?,
        group_id: optional_id(group_id),
        paid_by: optional_id(paid_by),
    })
}

impl ExpensePayload {
    pub fn into_new(self) -> Result<NewEntry, PayloadError> {
        new_entry(
            &self.amount,
            self.category_id.as_deref(),
            "categoryId",
            self.description.as_deref(),
            self.date.as_deref(),
            self.group_id.as_deref(),
            self.paid_by.as_deref(),
        )
    }

    pub fn into_update(self) -> Result<EntryUpdate, PayloadError> {
        let entry = self.into_new()?;
        Ok(EntryUpdate {
            amount: entry.amount,
            reference_id: entry.reference_id,
            description: entry.description,
            date: entry.date,
        })
    }
}

impl SavingPayload {
    pub fn into_new(self) -> Result<NewEntry, PayloadError> {
        new_entry(
            &self.amount,
            self.goal_id.as_deref(),
            "goalId",
            self.description.as_deref(),
            self.date.as_deref(),
            self.group_id.as_deref(),
            self.paid_by.as_deref(),
        )
    }

    pub fn into_update(self) -> Result<EntryUpdate, PayloadError> {
        let entry = self.into_new()?;
        Ok(EntryUpdate {
            amount: entry.amount,
            reference_id: entry.reference_id,
            description: entry.description,
            date: entry.date,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNamePayload {
    pub name: Option<String>,
}

impl GroupNamePayload {
    pub fn into_name(self) -> Result<String, PayloadError> {
        parse_name(self.name.as_deref(), "name", MAX_GROUP_NAME_LEN)
    }
}

/// Group filter for category and goal listings, which carry no dates.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GroupFilter {
    #[serde(default, alias = "group_id")]
    pub group_id: Option<String>,
}

impl GroupFilter {
    pub fn into_group_id(self) -> Option<String> {
        optional_id(self.group_id.as_deref())
    }
}

/// Optional filters for entry listings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListFilter {
    #[serde(default, alias = "group_id")]
    pub group_id: Option<String>,
    #[serde(default, alias = "startDate")]
    pub from: Option<String>,
    #[serde(default, alias = "endDate")]
    pub to: Option<String>,
}

/// Parsed listing filter; bounds are inclusive epoch ms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub group_id: Option<String>,
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl ListFilter {
    pub fn into_entry_filter(self) -> Result<EntryFilter, PayloadError> {
        let bound = |raw: Option<&str>, field: &'static str| -> Result<Option<i64>, PayloadError> {
            match present(raw) {
                None => Ok(None),
                Some(text) => parse_entry_date(text)
                    .map(Some)
                    .ok_or(PayloadError::Date { field }),
            }
        };
        Ok(EntryFilter {
            group_id: optional_id(self.group_id.as_deref()),
            from: bound(self.from.as_deref(), "from")?,
            to: bound(self.to.as_deref(), "to")?,
        })
    }
}
