use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::authz::RequestScope;
use crate::categories::list_categories;
use crate::entries::list_entries;
use crate::goals::list_goals;
use crate::membership::get_group;
use crate::model::{Expense, Saving};
use crate::payload::EntryFilter;
use crate::{AppError, AppResult};

/// Inclusive UTC bounds of one calendar month, in epoch ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthRange {
    pub start: i64,
    pub end: i64,
}

impl MonthRange {
    pub fn new(year: i32, month: u32) -> AppResult<Self> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| AppError::validation("month", "Month must be between 1 and 12"))?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| AppError::validation("year", "Year is out of range"))?;
        let start = first
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| AppError::validation("month", "Invalid month"))?;
        let next_start = next
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| AppError::validation("month", "Invalid month"))?;
        Ok(MonthRange {
            start,
            end: next_start - 1,
        })
    }

    pub fn current() -> AppResult<Self> {
        let today = chrono::Utc::now().date_naive();
        Self::new(today.year(), today.month())
    }

    fn filter(&self) -> EntryFilter {
        EntryFilter {
            group_id: None,
            from: Some(self.start),
            to: Some(self.end),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupTotal {
    pub group_id: String,
    pub group_name: String,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryTotal {
    pub category_id: String,
    pub name: String,
    pub color: String,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonTotal {
    pub user_id: String,
    pub name: String,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgress {
    pub goal_id: String,
    pub name: String,
    pub saved: Decimal,
    pub target: Decimal,
    /// Capped at 100.
    pub percentage: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSummary {
    pub range: MonthRange,
    pub personal_expenses: Decimal,
    pub group_expenses: Vec<GroupTotal>,
    pub total_expenses: Decimal,
    pub total_savings: Decimal,
    pub savings_entries: usize,
    pub by_category: Vec<CategoryTotal>,
    pub by_person: Vec<PersonTotal>,
    pub goals: Vec<GoalProgress>,
}

fn sorted_by_total<T, F>(mut items: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> (Decimal, String),
{
    items.sort_by(|a, b| {
        let (ta, na) = key(a);
        let (tb, nb) = key(b);
        tb.cmp(&ta).then(na.cmp(&nb))
    });
    items
}

pub(crate) fn goal_percentage(saved: Decimal, target: Decimal) -> Decimal {
    if target <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let pct = (saved * Decimal::ONE_HUNDRED / target).round_dp(2);
    pct.min(Decimal::ONE_HUNDRED)
}

/// Totals over everything the user can see within `range`.
///
/// Goal progress counts all visible savings, not only those in the range.
pub async fn dashboard_summary(
    pool: &SqlitePool,
    scope: &RequestScope,
    range: MonthRange,
) -> AppResult<DashboardSummary> {
    let expenses: Vec<Expense> = list_entries(pool, scope, &range.filter()).await?;
    let savings: Vec<Saving> = list_entries(pool, scope, &range.filter()).await?;

    let personal_expenses: Decimal = expenses
        .iter()
        .filter(|e| e.group_id.is_none())
        .map(|e| e.amount)
        .sum();

    let mut group_expenses = Vec::with_capacity(scope.group_ids().len());
    for group_id in scope.group_ids() {
        let Some(group) = get_group(pool, group_id).await? else {
            continue;
        };
        let total = expenses
            .iter()
            .filter(|e| e.group_id.as_deref() == Some(group_id.as_str()))
            .map(|e| e.amount)
            .sum();
        group_expenses.push(GroupTotal {
            group_id: group.id,
            group_name: group.name,
            total,
        });
    }
    group_expenses.sort_by(|a, b| a.group_name.cmp(&b.group_name));

    let total_expenses: Decimal = expenses.iter().map(|e| e.amount).sum();
    let total_savings: Decimal = savings.iter().map(|s| s.amount).sum();

    let categories: HashMap<String, (String, String)> = list_categories(pool, scope, None)
        .await?
        .into_iter()
        .map(|c| (c.id, (c.name, c.color)))
        .collect();
    let mut per_category: BTreeMap<String, Decimal> = BTreeMap::new();
    for e in &expenses {
        *per_category.entry(e.category_id.clone()).or_default() += e.amount;
    }
    let by_category = sorted_by_total(
        per_category
            .into_iter()
            .map(|(category_id, total)| {
                let (name, color) = categories
                    .get(&category_id)
                    .cloned()
                    .unwrap_or_else(|| ("Uncategorized".to_string(), "#9ca3af".to_string()));
                CategoryTotal {
                    category_id,
                    name,
                    color,
                    total,
                }
            })
            .collect(),
        |c| (c.total, c.name.clone()),
    );

    let mut per_person: BTreeMap<String, Decimal> = BTreeMap::new();
    for e in &expenses {
        *per_person.entry(e.user_id.clone()).or_default() += e.amount;
    }
    let mut by_person = Vec::with_capacity(per_person.len());
    for (user_id, total) in per_person {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM users WHERE id = ?1")
            .bind(&user_id)
            .fetch_optional(pool)
            .await?;
        by_person.push(PersonTotal {
            name: name.unwrap_or_else(|| "Unknown".to_string()),
            user_id,
            total,
        });
    }
    let by_person = sorted_by_total(by_person, |p| (p.total, p.name.clone()));

    let all_savings: Vec<Saving> = list_entries(pool, scope, &EntryFilter::default()).await?;
    let mut saved_per_goal: HashMap<&str, Decimal> = HashMap::new();
    for s in &all_savings {
        *saved_per_goal.entry(s.goal_id.as_str()).or_default() += s.amount;
    }
    let goals = list_goals(pool, scope, None)
        .await?
        .into_iter()
        .filter_map(|g| {
            let target = g.target_amount?;
            let saved = saved_per_goal.get(g.id.as_str()).copied().unwrap_or_default();
            Some(GoalProgress {
                percentage: goal_percentage(saved, target),
                goal_id: g.id,
                name: g.name,
                saved,
                target,
            })
        })
        .collect();

    Ok(DashboardSummary {
        range,
        personal_expenses,
        group_expenses,
        total_expenses,
        total_savings,
        savings_entries: savings.len(),
        by_category,
        by_person,
        goals,
    })
}
