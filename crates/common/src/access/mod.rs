//! Permission evaluation
//!
//! Policies are plain values evaluated against an explicit [`Caller`].
//! Collection checks run before a resource is resolved; object checks
//! run against the resolved resource's author.

use crate::config::AccessConfig;
use crate::db::models::{Role, User};
use crate::errors::{AppError, Result};
use crate::metrics;
use axum::http::Method;
use tracing::debug;

/// Decides which identities count as administrators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminPolicy {
    pub superuser_is_admin: bool,
}

impl AdminPolicy {
    pub fn new(superuser_is_admin: bool) -> Self {
        Self { superuser_is_admin }
    }

    pub fn from_config(config: &AccessConfig) -> Self {
        Self::new(config.superuser_is_admin)
    }

    pub fn is_admin(&self, principal: &Principal) -> bool {
        principal.role == Role::Admin || (self.superuser_is_admin && principal.is_superuser)
    }
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self::from_config(&AccessConfig::default())
    }
}

/// Authenticated identity attached to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: i32,
    pub username: String,
    pub role: Role,
    pub is_superuser: bool,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            is_superuser: user.is_superuser,
        }
    }
}

/// Who is making the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(Principal),
}

impl Caller {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Caller::Anonymous => None,
            Caller::User(principal) => Some(principal),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Caller::User(_))
    }

    /// The principal, or `Unauthorized` for anonymous callers
    pub fn require_principal(&self) -> Result<&Principal> {
        self.principal().ok_or_else(|| AppError::Unauthorized {
            message: "authentication credentials were not provided".to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

impl Action {
    /// GET, HEAD and OPTIONS are reads
    pub fn from_method(method: &Method) -> Self {
        if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
            Action::Read
        } else {
            Action::Write
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Action::Read)
    }
}

/// A composable authorization rule
pub trait Permission {
    /// Label used in logs and metrics
    fn name(&self) -> &'static str;

    /// Collection-level decision
    fn allows(&self, caller: &Caller, action: Action) -> bool;

    /// Instance-level decision for a resource authored by `owner_id`
    fn allows_object(&self, caller: &Caller, action: Action, _owner_id: i32) -> bool {
        self.allows(caller, action)
    }

    fn check(&self, caller: &Caller, action: Action) -> Result<()> {
        if self.allows(caller, action) {
            Ok(())
        } else {
            Err(deny(self.name(), caller))
        }
    }

    fn check_object(&self, caller: &Caller, action: Action, owner_id: i32) -> Result<()> {
        if self.allows_object(caller, action, owner_id) {
            Ok(())
        } else {
            Err(deny(self.name(), caller))
        }
    }
}

fn deny(policy: &'static str, caller: &Caller) -> AppError {
    match caller {
        Caller::Anonymous => {
            metrics::record_access_denied(policy, "unauthenticated");
            debug!(policy, "Anonymous request denied");
            AppError::Unauthorized {
                message: "authentication credentials were not provided".to_string(),
            }
        }
        Caller::User(principal) => {
            metrics::record_access_denied(policy, "forbidden");
            debug!(policy, user_id = principal.id, role = principal.role.as_str(), "Request denied");
            AppError::Forbidden {
                message: "you do not have permission to perform this action".to_string(),
            }
        }
    }
}

/// Any authenticated caller
#[derive(Debug, Clone, Copy, Default)]
pub struct Authenticated;

impl Permission for Authenticated {
    fn name(&self) -> &'static str {
        "authenticated"
    }

    fn allows(&self, caller: &Caller, _action: Action) -> bool {
        caller.is_authenticated()
    }
}

/// Administrators only, for every method
#[derive(Debug, Clone, Copy)]
pub struct AdminOnly(pub AdminPolicy);

impl Permission for AdminOnly {
    fn name(&self) -> &'static str {
        "admin_only"
    }

    fn allows(&self, caller: &Caller, _action: Action) -> bool {
        caller.principal().is_some_and(|p| self.0.is_admin(p))
    }
}

/// Reads for everyone, writes for administrators
#[derive(Debug, Clone, Copy)]
pub struct AdminReadOnly(pub AdminPolicy);

impl Permission for AdminReadOnly {
    fn name(&self) -> &'static str {
        "admin_read_only"
    }

    fn allows(&self, caller: &Caller, action: Action) -> bool {
        action.is_read() || caller.principal().is_some_and(|p| self.0.is_admin(p))
    }
}

/// Reads for everyone, creation for any authenticated caller, changes to an
/// existing resource for staff and the resource's author
#[derive(Debug, Clone, Copy)]
pub struct AdminModeratorOwnerOrReadOnly(pub AdminPolicy);

impl Permission for AdminModeratorOwnerOrReadOnly {
    fn name(&self) -> &'static str {
        "admin_moderator_owner_or_read_only"
    }

    fn allows(&self, caller: &Caller, action: Action) -> bool {
        action.is_read() || caller.is_authenticated()
    }

    fn allows_object(&self, caller: &Caller, action: Action, owner_id: i32) -> bool {
        if action.is_read() {
            return true;
        }
        caller.principal().is_some_and(|p| {
            self.0.is_admin(p) || p.role == Role::Moderator || p.id == owner_id
        })
    }
}
