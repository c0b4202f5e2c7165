use std::sync::{Arc, Mutex};

use serde::Serialize;
use sqlx::SqlitePool;

use crate::identity::IdentityHandle;
use crate::invites::InvitePolicy;

/// Cached views a write can make stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Expenses,
    Savings,
    Categories,
    Goals,
    Groups,
    Dashboard,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::Expenses => "expenses",
            View::Savings => "savings",
            View::Categories => "categories",
            View::Goals => "goals",
            View::Groups => "groups",
            View::Dashboard => "dashboard",
        }
    }
}

pub trait ViewInvalidator: Send + Sync {
    fn invalidate(&self, view: View);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl ViewInvalidator for NoopInvalidator {
    fn invalidate(&self, _view: View) {}
}

/// Remembers every signal, in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingInvalidator {
    seen: Arc<Mutex<Vec<View>>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn views(&self) -> Vec<View> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl ViewInvalidator for RecordingInvalidator {
    fn invalidate(&self, view: View) {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(view);
    }
}

#[derive(Clone)]
pub struct InvalidatorHandle(Arc<dyn ViewInvalidator>);

impl InvalidatorHandle {
    pub fn new(invalidator: impl ViewInvalidator + 'static) -> Self {
        InvalidatorHandle(Arc::new(invalidator))
    }

    pub fn invalidate(&self, views: &[View]) {
        for view in views {
            tracing::debug!(target: "couplefy", event = "view_invalidated", view = view.as_str());
            self.0.invalidate(*view);
        }
    }
}

impl Default for InvalidatorHandle {
    fn default() -> Self {
        InvalidatorHandle::new(NoopInvalidator)
    }
}

impl std::fmt::Debug for InvalidatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidatorHandle").finish_non_exhaustive()
    }
}

/// Everything a boundary call needs. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AppState {
    pub pool: SqlitePool,
    pub identity: IdentityHandle,
    pub invalidator: InvalidatorHandle,
    pub invite_policy: InvitePolicy,
}

impl AppState {
    pub fn new(pool: SqlitePool, identity: IdentityHandle) -> Self {
        AppState {
            pool,
            identity,
            invalidator: InvalidatorHandle::default(),
            invite_policy: InvitePolicy::default(),
        }
    }

    pub fn with_invalidator(mut self, invalidator: impl ViewInvalidator + 'static) -> Self {
        self.invalidator = InvalidatorHandle::new(invalidator);
        self
    }

    pub fn with_invite_policy(mut self, policy: InvitePolicy) -> Self {
        self.invite_policy = policy;
        self
    }

    /// Same pool and collaborators, different caller.
    pub fn as_identity(&self, identity: IdentityHandle) -> Self {
        AppState {
            identity,
            ..self.clone()
        }
    }
}
