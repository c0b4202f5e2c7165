//! Transport-neutral entry points.
//!
//! Every function resolves the caller first (`NotAuthenticated` before any
//! data access), parses its payload (`Validation` before any authorization
//! check), loads the request scope once, runs the service, signals the views
//! it touched and folds everything into an [`Outcome`]. Nothing here returns
//! `Err` or unwinds past the boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::authz::RequestScope;
use crate::groups::MemberRemoval;
use crate::identity::{current_user, sync_user};
use crate::invites::AcceptedInvite;
use crate::model::{Category, Expense, Goal, Group, GroupWithMembers, Invite, Saving, User};
use crate::outcome::{dispatch, Outcome};
use crate::payload::{
    parse_payload, CategoryPayload, ExpensePayload, GoalPayload, GroupFilter, GroupNamePayload,
    ListFilter, SavingPayload,
};
use crate::reports::{DashboardSummary, MonthRange};
use crate::state::{AppState, View};
use crate::time::now_ms;
use crate::{categories, expenses, goals, groups, invites, reports, savings};
use crate::{AppError, AppResult, ErrorCode};

const ALL_VIEWS: [View; 6] = [
    View::Expenses,
    View::Savings,
    View::Categories,
    View::Goals,
    View::Groups,
    View::Dashboard,
];

async fn scope_for(state: &AppState) -> AppResult<RequestScope> {
    let user = current_user(&state.pool, &state.identity).await?;
    RequestScope::load(&state.pool, user).await
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupList {
    pub groups: Vec<GroupWithMembers>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteList {
    pub invites: Vec<Invite>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryList {
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoalList {
    pub goals: Vec<Goal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseList {
    pub expenses: Vec<Expense>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SavingList {
    pub savings: Vec<Saving>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptPayload {
    pub code: Option<String>,
}

/// Creates or refreshes the local user for the signed-in principal.
pub async fn users_sync(state: &AppState) -> Outcome<User> {
    dispatch("users_sync", || async move {
        let principal = state
            .identity
            .current_principal()
            .ok_or_else(|| ErrorCode::NotAuthenticated.into_error())?;
        sync_user(&state.pool, &principal).await
    })
    .await
}

pub async fn groups_create(state: &AppState, payload: Value) -> Outcome<Group> {
    dispatch("groups_create", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let name = parse_payload::<GroupNamePayload>(payload)?.into_name()?;
        let group = groups::create_group(&state.pool, &user, name).await?;
        state.invalidator.invalidate(&[View::Groups, View::Dashboard]);
        Ok(group)
    })
    .await
}

pub async fn groups_rename(state: &AppState, group_id: &str, payload: Value) -> Outcome<Group> {
    dispatch("groups_rename", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let name = parse_payload::<GroupNamePayload>(payload)?.into_name()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let group = groups::rename_group(&state.pool, &scope, group_id, name).await?;
        state.invalidator.invalidate(&[View::Groups, View::Dashboard]);
        Ok(group)
    })
    .await
}

pub async fn groups_list(state: &AppState) -> Outcome<GroupList> {
    dispatch("groups_list", || async move {
        let scope = scope_for(state).await?;
        Ok(GroupList {
            groups: groups::list_groups(&state.pool, &scope).await?,
        })
    })
    .await
}

pub async fn groups_get(state: &AppState, group_id: &str) -> Outcome<GroupWithMembers> {
    dispatch("groups_get", || async move {
        let scope = scope_for(state).await?;
        groups::group_details(&state.pool, &scope, group_id).await
    })
    .await
}

fn removal_views(removal: &MemberRemoval) -> &'static [View] {
    if removal.group_deleted {
        &ALL_VIEWS
    } else {
        &[View::Groups, View::Dashboard]
    }
}

pub async fn groups_remove_member(
    state: &AppState,
    group_id: &str,
    target_user_id: &str,
) -> Outcome<MemberRemoval> {
    dispatch("groups_remove_member", || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        if target_user_id.trim().is_empty() {
            return Err(AppError::validation("userId", "userId is required"));
        }
        let removal =
            groups::remove_member(&state.pool, &user.id, group_id, target_user_id.trim()).await?;
        state.invalidator.invalidate(removal_views(&removal));
        Ok(removal)
    })
    .await
}

pub async fn groups_leave(state: &AppState, group_id: &str) -> Outcome<MemberRemoval> {
    dispatch("groups_leave", || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let removal = groups::leave_group(&state.pool, &user.id, group_id).await?;
        state.invalidator.invalidate(removal_views(&removal));
        Ok(removal)
    })
    .await
}

pub async fn invites_generate(state: &AppState, group_id: &str) -> Outcome<Invite> {
    dispatch("invites_generate", || async move {
        let scope = scope_for(state).await?;
        let invite = invites::generate_invite(
            &state.pool,
            &scope,
            group_id,
            &state.invite_policy,
            now_ms(),
        )
        .await?;
        state.invalidator.invalidate(&[View::Groups]);
        Ok(invite)
    })
    .await
}

pub async fn invites_accept(state: &AppState, payload: Value) -> Outcome<AcceptedInvite> {
    dispatch("invites_accept", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let code = parse_payload::<AcceptPayload>(payload)?
            .code
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::validation("code", "Invite code is required"))?;
        let joined = invites::accept_invite(&state.pool, &user, &code, now_ms()).await?;
        state.invalidator.invalidate(&ALL_VIEWS);
        Ok(joined)
    })
    .await
}

pub async fn invites_list(state: &AppState, group_id: &str) -> Outcome<InviteList> {
    dispatch("invites_list", || async move {
        let scope = scope_for(state).await?;
        Ok(InviteList {
            invites: invites::list_group_invites(&state.pool, &scope, group_id, now_ms()).await?,
        })
    })
    .await
}

/// Members of the invite's group may withdraw it while it is pending.
pub async fn invites_reject(state: &AppState, invite_id: &str) -> Outcome<Invite> {
    dispatch("invites_reject", || async move {
        let scope = scope_for(state).await?;
        let invite = invites::find_invite(&state.pool, invite_id)
            .await?
            .ok_or_else(|| AppError::not_found("Invite"))?;
        scope.require_member(&invite.group_id)?;
        let rejected = invites::reject_invite(&state.pool, invite_id).await?;
        state.invalidator.invalidate(&[View::Groups]);
        Ok(rejected)
    })
    .await
}

pub async fn categories_create(state: &AppState, payload: Value) -> Outcome<Category> {
    dispatch("categories_create", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let new = parse_payload::<CategoryPayload>(payload)?.into_new()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let category = categories::create_category(&state.pool, &scope, new).await?;
        state.invalidator.invalidate(&[View::Categories, View::Dashboard]);
        Ok(category)
    })
    .await
}

pub async fn categories_list(state: &AppState, filter: Value) -> Outcome<CategoryList> {
    dispatch("categories_list", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let group_id = parse_payload::<GroupFilter>(filter)?.into_group_id();
        let scope = RequestScope::load(&state.pool, user).await?;
        Ok(CategoryList {
            categories: categories::list_categories(&state.pool, &scope, group_id.as_deref())
                .await?,
        })
    })
    .await
}

pub async fn categories_get(state: &AppState, id: &str) -> Outcome<Category> {
    dispatch("categories_get", || async move {
        let scope = scope_for(state).await?;
        categories::get_category(&state.pool, &scope, id).await
    })
    .await
}

pub async fn categories_update(state: &AppState, id: &str, payload: Value) -> Outcome<Category> {
    dispatch("categories_update", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let patch = parse_payload::<CategoryPayload>(payload)?.into_patch()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let category = categories::update_category(&state.pool, &scope, id, patch).await?;
        state
            .invalidator
            .invalidate(&[View::Categories, View::Expenses, View::Dashboard]);
        Ok(category)
    })
    .await
}

pub async fn categories_delete(state: &AppState, id: &str) -> Outcome<Deleted> {
    dispatch("categories_delete", || async move {
        let scope = scope_for(state).await?;
        categories::delete_category(&state.pool, &scope, id).await?;
        state.invalidator.invalidate(&[View::Categories, View::Dashboard]);
        Ok(Deleted { id: id.to_string() })
    })
    .await
}

pub async fn goals_create(state: &AppState, payload: Value) -> Outcome<Goal> {
    dispatch("goals_create", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let new = parse_payload::<GoalPayload>(payload)?.into_new()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let goal = goals::create_goal(&state.pool, &scope, new).await?;
        state.invalidator.invalidate(&[View::Goals, View::Dashboard]);
        Ok(goal)
    })
    .await
}

pub async fn goals_list(state: &AppState, filter: Value) -> Outcome<GoalList> {
    dispatch("goals_list", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let group_id = parse_payload::<GroupFilter>(filter)?.into_group_id();
        let scope = RequestScope::load(&state.pool, user).await?;
        Ok(GoalList {
            goals: goals::list_goals(&state.pool, &scope, group_id.as_deref()).await?,
        })
    })
    .await
}

pub async fn goals_get(state: &AppState, id: &str) -> Outcome<Goal> {
    dispatch("goals_get", || async move {
        let scope = scope_for(state).await?;
        goals::get_goal(&state.pool, &scope, id).await
    })
    .await
}

pub async fn goals_update(state: &AppState, id: &str, payload: Value) -> Outcome<Goal> {
    dispatch("goals_update", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let patch = parse_payload::<GoalPayload>(payload)?.into_patch()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let goal = goals::update_goal(&state.pool, &scope, id, patch).await?;
        state
            .invalidator
            .invalidate(&[View::Goals, View::Savings, View::Dashboard]);
        Ok(goal)
    })
    .await
}

pub async fn goals_delete(state: &AppState, id: &str) -> Outcome<Deleted> {
    dispatch("goals_delete", || async move {
        let scope = scope_for(state).await?;
        goals::delete_goal(&state.pool, &scope, id).await?;
        state.invalidator.invalidate(&[View::Goals, View::Dashboard]);
        Ok(Deleted { id: id.to_string() })
    })
    .await
}

pub async fn expenses_create(state: &AppState, payload: Value) -> Outcome<Expense> {
    dispatch("expenses_create", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let new = parse_payload::<ExpensePayload>(payload)?.into_new()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let expense = expenses::create_expense(&state.pool, &scope, new).await?;
        state.invalidator.invalidate(&[View::Expenses, View::Dashboard]);
        Ok(expense)
    })
    .await
}

pub async fn expenses_list(state: &AppState, filter: Value) -> Outcome<ExpenseList> {
    dispatch("expenses_list", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let filter = parse_payload::<ListFilter>(filter)?.into_entry_filter()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        Ok(ExpenseList {
            expenses: expenses::list_expenses(&state.pool, &scope, &filter).await?,
        })
    })
    .await
}

pub async fn expenses_get(state: &AppState, id: &str) -> Outcome<Expense> {
    dispatch("expenses_get", || async move {
        let scope = scope_for(state).await?;
        expenses::get_expense(&state.pool, &scope, id).await
    })
    .await
}

pub async fn expenses_update(state: &AppState, id: &str, payload: Value) -> Outcome<Expense> {
    dispatch("expenses_update", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let update = parse_payload::<ExpensePayload>(payload)?.into_update()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let expense = expenses::update_expense(&state.pool, &scope, id, update).await?;
        state.invalidator.invalidate(&[View::Expenses, View::Dashboard]);
        Ok(expense)
    })
    .await
}

pub async fn expenses_delete(state: &AppState, id: &str) -> Outcome<Deleted> {
    dispatch("expenses_delete", || async move {
        let scope = scope_for(state).await?;
        expenses::delete_expense(&state.pool, &scope, id).await?;
        state.invalidator.invalidate(&[View::Expenses, View::Dashboard]);
        Ok(Deleted { id: id.to_string() })
    })
    .await
}

pub async fn savings_create(state: &AppState, payload: Value) -> Outcome<Saving> {
    dispatch("savings_create", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let new = parse_payload::<SavingPayload>(payload)?.into_new()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let saving = savings::create_saving(&state.pool, &scope, new).await?;
        state
            .invalidator
            .invalidate(&[View::Savings, View::Goals, View::Dashboard]);
        Ok(saving)
    })
    .await
}

pub async fn savings_list(state: &AppState, filter: Value) -> Outcome<SavingList> {
    dispatch("savings_list", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let filter = parse_payload::<ListFilter>(filter)?.into_entry_filter()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        Ok(SavingList {
            savings: savings::list_savings(&state.pool, &scope, &filter).await?,
        })
    })
    .await
}

pub async fn savings_get(state: &AppState, id: &str) -> Outcome<Saving> {
    dispatch("savings_get", || async move {
        let scope = scope_for(state).await?;
        savings::get_saving(&state.pool, &scope, id).await
    })
    .await
}

pub async fn savings_update(state: &AppState, id: &str, payload: Value) -> Outcome<Saving> {
    dispatch("savings_update", move || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let update = parse_payload::<SavingPayload>(payload)?.into_update()?;
        let scope = RequestScope::load(&state.pool, user).await?;
        let saving = savings::update_saving(&state.pool, &scope, id, update).await?;
        state
            .invalidator
            .invalidate(&[View::Savings, View::Goals, View::Dashboard]);
        Ok(saving)
    })
    .await
}

pub async fn savings_delete(state: &AppState, id: &str) -> Outcome<Deleted> {
    dispatch("savings_delete", || async move {
        let scope = scope_for(state).await?;
        savings::delete_saving(&state.pool, &scope, id).await?;
        state
            .invalidator
            .invalidate(&[View::Savings, View::Goals, View::Dashboard]);
        Ok(Deleted { id: id.to_string() })
    })
    .await
}

pub async fn dashboard_summary(state: &AppState, year: i32, month: u32) -> Outcome<DashboardSummary> {
    dispatch("dashboard_summary", || async move {
        let user = current_user(&state.pool, &state.identity).await?;
        let range = MonthRange::new(year, month)?;
        let scope = RequestScope::load(&state.pool, user).await?;
        reports::dashboard_summary(&state.pool, &scope, range).await
    })
    .await
}
