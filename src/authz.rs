//! Visibility and mutation rules for personal and group-owned records.
//!
//! A record is either personal (owned by one user) or shared (owned by one
//! group). Personal records are visible to and mutable by their owner only;
//! shared records are visible to and mutable by any current member of the
//! owning group. Anything that does not decode to exactly one of the two is
//! denied.

use std::collections::BTreeSet;

use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::membership::user_group_ids;
use crate::model::{Category, Expense, Goal, Group, Saving, User};
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ownership {
    Personal(String),
    Shared(String),
}

impl Ownership {
    /// Decodes a category/goal style `(user_id, group_id)` pair; exactly one must be set.
    pub fn from_columns(user_id: Option<&str>, group_id: Option<&str>) -> Option<Self> {
        match (user_id, group_id) {
            (Some(user), None) => Some(Ownership::Personal(user.to_string())),
            (None, Some(group)) => Some(Ownership::Shared(group.to_string())),
            _ => None,
        }
    }

    /// Entries always carry attribution; the group decides the scope.
    pub fn for_entry(user_id: &str, group_id: Option<&str>) -> Option<Self> {
        match group_id {
            Some(group) => Some(Ownership::Shared(group.to_string())),
            None if !user_id.is_empty() => Some(Ownership::Personal(user_id.to_string())),
            None => None,
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            Ownership::Shared(group) => Some(group),
            Ownership::Personal(_) => None,
        }
    }
}

/// Anything the resolver can decide on.
pub trait Owned {
    fn ownership(&self) -> Option<Ownership>;
}

impl Owned for Category {
    fn ownership(&self) -> Option<Ownership> {
        Ownership::from_columns(self.user_id.as_deref(), self.group_id.as_deref())
    }
}

impl Owned for Goal {
    fn ownership(&self) -> Option<Ownership> {
        Ownership::from_columns(self.user_id.as_deref(), self.group_id.as_deref())
    }
}

impl Owned for Expense {
    fn ownership(&self) -> Option<Ownership> {
        Ownership::for_entry(&self.user_id, self.group_id.as_deref())
    }
}

impl Owned for Saving {
    fn ownership(&self) -> Option<Ownership> {
        Ownership::for_entry(&self.user_id, self.group_id.as_deref())
    }
}

impl Owned for Group {
    fn ownership(&self) -> Option<Ownership> {
        Some(Ownership::Shared(self.id.clone()))
    }
}

/// The acting user and their group ids, resolved once per request.
#[derive(Debug, Clone)]
pub struct RequestScope {
    user: User,
    group_ids: BTreeSet<String>,
}

impl RequestScope {
    pub async fn load(pool: &SqlitePool, user: User) -> AppResult<Self> {
        let group_ids = user_group_ids(pool, &user.id).await?;
        Ok(RequestScope { user, group_ids })
    }

    pub fn new(user: User, group_ids: impl IntoIterator<Item = String>) -> Self {
        RequestScope {
            user,
            group_ids: group_ids.into_iter().collect(),
        }
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn group_ids(&self) -> &BTreeSet<String> {
        &self.group_ids
    }

    pub fn is_member(&self, group_id: &str) -> bool {
        self.group_ids.contains(group_id)
    }

    pub fn visible(&self, ownership: &Ownership) -> bool {
        match ownership {
            Ownership::Personal(owner) => owner == &self.user.id,
            Ownership::Shared(group) => self.is_member(group),
        }
    }

    pub fn can_see<R: Owned>(&self, record: &R) -> bool {
        record
            .ownership()
            .map(|o| self.visible(&o))
            .unwrap_or(false)
    }

    /// Same rule as visibility; per-row authorship inside a group is not checked.
    pub fn can_mutate(&self, ownership: Option<&Ownership>) -> bool {
        ownership.map(|o| self.visible(o)).unwrap_or(false)
    }

    pub fn can_create_in(&self, group_id: Option<&str>) -> bool {
        match group_id {
            None => true,
            Some(group) => self.is_member(group),
        }
    }

    /// Invisible and missing records look the same to the caller.
    pub fn require_visible<R: Owned>(&self, record: Option<R>, entity: &str) -> AppResult<R> {
        match record {
            Some(r) if self.can_see(&r) => Ok(r),
            _ => Err(AppError::not_found(entity)),
        }
    }

    pub fn require_mutate<R: Owned>(&self, record: &R, entity: &str, id: &str) -> AppResult<()> {
        if self.can_mutate(record.ownership().as_ref()) {
            return Ok(());
        }
        tracing::warn!(
            target: "couplefy",
            event = "authz_denied",
            action = "mutate",
            entity,
            record_id = %id,
            user_id = %self.user.id
        );
        Err(AppError::unauthorized().with_context("entity", entity.to_string()))
    }

    pub fn require_create_in(&self, group_id: Option<&str>, entity: &str) -> AppResult<()> {
        if self.can_create_in(group_id) {
            return Ok(());
        }
        tracing::warn!(
            target: "couplefy",
            event = "authz_denied",
            action = "create",
            entity,
            group_id = group_id.unwrap_or_default(),
            user_id = %self.user.id
        );
        Err(AppError::unauthorized().with_context("entity", entity.to_string()))
    }

    pub fn require_member(&self, group_id: &str) -> AppResult<()> {
        if self.is_member(group_id) {
            return Ok(());
        }
        tracing::warn!(
            target: "couplefy",
            event = "authz_denied",
            action = "group",
            group_id,
            user_id = %self.user.id
        );
        Err(AppError::unauthorized().with_context("entity", "group"))
    }

    /// Appends the visibility predicate for a table carrying `user_id`/`group_id`.
    ///
    /// Emits `((user_id = ? AND group_id IS NULL) OR group_id IN (...))`, or only
    /// the personal half when the user belongs to no group.
    pub fn push_visibility_predicate(&self, qb: &mut QueryBuilder<'_, Sqlite>, alias: Option<&str>) {
        let col = |name: &str| match alias {
            Some(a) => format!("{a}.{name}"),
            None => name.to_string(),
        };
        qb.push("((")
            .push(col("user_id"))
            .push(" = ")
            .push_bind(self.user.id.clone())
            .push(" AND ")
            .push(col("group_id"))
            .push(" IS NULL)");
        if !self.group_ids.is_empty() {
            qb.push(" OR ").push(col("group_id")).push(" IN (");
            let mut separated = qb.separated(", ");
            for group in &self.group_ids {
                separated.push_bind(group.clone());
            }
            separated.push_unseparated(")");
        }
        qb.push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            external_id: format!("ext-{id}"),
            email: format!("{id}@example.com"),
            name: id.to_string(),
            avatar_url: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn scope(id: &str, groups: &[&str]) -> RequestScope {
        RequestScope::new(user(id), groups.iter().map(|g| g.to_string()))
    }

    #[test]
    fn invalid_pairs_never_decode() {
        assert_eq!(Ownership::from_columns(None, None), None);
        assert_eq!(Ownership::from_columns(Some("u"), Some("g")), None);
        assert_eq!(Ownership::for_entry("", None), None);
        assert_eq!(
            Ownership::for_entry("u", Some("g")),
            Some(Ownership::Shared("g".into()))
        );
    }

    #[test]
    fn invalid_records_are_denied() {
        let s = scope("a", &["g1"]);
        let broken = Category {
            id: "c".into(),
            name: "Broken".into(),
            color: "#000000".into(),
            icon: None,
            user_id: Some("a".into()),
            group_id: Some("g1".into()),
            created_at: 0,
            updated_at: 0,
        };
        assert!(!s.can_see(&broken));
        assert!(!s.can_mutate(broken.ownership().as_ref()));
        assert!(s.require_mutate(&broken, "category", "c").is_err());
    }

    #[test]
    fn personal_creation_always_allowed() {
        let s = scope("a", &[]);
        assert!(s.can_create_in(None));
        assert!(!s.can_create_in(Some("g1")));
    }

    #[test]
    fn predicate_without_groups_is_personal_only() {
        let s = scope("a", &[]);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM categories c WHERE ");
        s.push_visibility_predicate(&mut qb, Some("c"));
        assert_eq!(
            qb.sql(),
            "SELECT * FROM categories c WHERE ((c.user_id = ? AND c.group_id IS NULL))"
        );
    }

    #[test]
    fn predicate_lists_every_group() {
        let s = scope("a", &["g1", "g2"]);
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM expenses WHERE ");
        s.push_visibility_predicate(&mut qb, None);
        assert_eq!(
            qb.sql(),
            "SELECT * FROM expenses WHERE ((user_id = ? AND group_id IS NULL) OR group_id IN (?, ?))"
        );
    }

    proptest! {
        #[test]
        fn shared_mutation_iff_member(
            groups in proptest::collection::btree_set("[a-d]", 0..4),
            target in "[a-d]",
        ) {
            let s = RequestScope::new(user("me"), groups.clone());
            let owned = Ownership::Shared(target.clone());
            prop_assert_eq!(s.can_mutate(Some(&owned)), groups.contains(&target));
            prop_assert_eq!(s.visible(&owned), groups.contains(&target));
            prop_assert_eq!(s.can_create_in(Some(&target)), groups.contains(&target));
        }

        #[test]
        fn personal_records_belong_to_their_owner_only(
            owner in "[a-c]",
            groups in proptest::collection::btree_set("[a-d]", 0..4),
        ) {
            let s = RequestScope::new(user("a"), groups);
            let owned = Ownership::Personal(owner.clone());
            prop_assert_eq!(s.visible(&owned), owner == "a");
            prop_assert_eq!(s.can_mutate(Some(&owned)), owner == "a");
        }

        #[test]
        fn entries_in_groups_ignore_attribution(
            payer in "[a-c]",
            group in "[a-d]",
            groups in proptest::collection::btree_set("[a-d]", 0..4),
        ) {
            let s = RequestScope::new(user("a"), groups.clone());
            let owned = Ownership::for_entry(&payer, Some(&group));
            prop_assert_eq!(s.can_mutate(owned.as_ref()), groups.contains(&group));
        }
    }
}
