//! Identity service: signup, code exchange, profiles and user administration

use crate::access::{Action, AdminOnly, AdminPolicy, Authenticated, Caller, Permission};
use crate::auth::{ConfirmationCodes, JwtManager};
use crate::db::models::user::{BIO_MAX_LEN, EMAIL_MAX_LEN, NAME_MAX_LEN, USERNAME_MAX_LEN};
use crate::db::models::{Role, User};
use crate::db::{Repository, UserChanges};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::outbox::{Notification, Outbox};
use crate::validators::validate_username;
use chrono::{Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Signup payload, echoed back on success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = USERNAME_MAX_LEN), custom(function = "validate_username"))]
    pub username: String,

    #[validate(email, length(max = EMAIL_MAX_LEN))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct TokenRequest {
    #[validate(length(min = 1, max = USERNAME_MAX_LEN))]
    pub username: String,

    #[validate(length(min = 1))]
    pub confirmation_code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = USERNAME_MAX_LEN), custom(function = "validate_username"))]
    pub username: String,

    #[validate(email, length(max = EMAIL_MAX_LEN))]
    pub email: String,

    #[serde(default)]
    pub role: Option<Role>,

    #[serde(default)]
    #[validate(length(max = BIO_MAX_LEN))]
    pub bio: Option<String>,

    #[serde(default)]
    #[validate(length(max = NAME_MAX_LEN))]
    pub first_name: Option<String>,

    #[serde(default)]
    #[validate(length(max = NAME_MAX_LEN))]
    pub last_name: Option<String>,
}

/// Partial profile update; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1, max = USERNAME_MAX_LEN), custom(function = "validate_username"))]
    pub username: Option<String>,

    #[validate(email, length(max = EMAIL_MAX_LEN))]
    pub email: Option<String>,

    pub role: Option<Role>,

    #[validate(length(max = BIO_MAX_LEN))]
    pub bio: Option<String>,

    #[validate(length(max = NAME_MAX_LEN))]
    pub first_name: Option<String>,

    #[validate(length(max = NAME_MAX_LEN))]
    pub last_name: Option<String>,
}

impl From<UpdateUserRequest> for UserChanges {
    fn from(request: UpdateUserRequest) -> Self {
        Self {
            username: request.username,
            email: request.email,
            role: request.role,
            bio: request.bio,
            first_name: request.first_name,
            last_name: request.last_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserResponse {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub bio: String,
    pub role: Role,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            bio: user.bio,
            role: user.role,
        }
    }
}

#[derive(Clone)]
pub struct AccountService {
    repo: Repository,
    codes: ConfirmationCodes,
    jwt: Arc<JwtManager>,
    outbox: Outbox,
    admin: AdminPolicy,
}

impl AccountService {
    pub fn new(
        repo: Repository,
        codes: ConfirmationCodes,
        jwt: Arc<JwtManager>,
        outbox: Outbox,
        admin: AdminPolicy,
    ) -> Self {
        Self { repo, codes, jwt, outbox, admin }
    }

    // ========================================================================
    // Signup and token exchange
    // ========================================================================

    /// Register (or re-confirm) an identity and mail it a confirmation code.
    ///
    /// Repeating the call with the same (username, email) pair succeeds and
    /// sends a fresh copy of the current code.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn request_signup(&self, request: SignupRequest) -> Result<SignupRequest> {
        if let Err(e) = request.validate() {
            metrics::record_signup("invalid");
            return Err(e.into());
        }

        let (user, created) = match self.existing_signup(&request).await? {
            Some(user) => (user, false),
            None => match self
                .repo
                .create_user(
                    request.username.clone(),
                    request.email.clone(),
                    Role::User,
                    String::new(),
                    String::new(),
                    String::new(),
                )
                .await
            {
                Ok(user) => (user, true),
                // A concurrent signup won the insert
                Err(AppError::Conflict { .. }) => match self.existing_signup(&request).await? {
                    Some(user) => (user, false),
                    None => {
                        metrics::record_signup("conflict");
                        return Err(AppError::Conflict {
                            message: "username or email already registered".to_string(),
                            field: None,
                        });
                    }
                },
                Err(e) => return Err(e),
            },
        };

        let code = self.codes.make(&user);
        self.outbox.enqueue(Notification::ConfirmationCode {
            username: user.username.clone(),
            email: user.email.clone(),
            code,
        });

        metrics::record_signup(if created { "created" } else { "resent" });
        info!(user_id = user.id, created, "Confirmation code issued");

        Ok(request)
    }

    /// The identity owning exactly this (username, email) pair, if any
    async fn existing_signup(&self, request: &SignupRequest) -> Result<Option<User>> {
        let by_username = self.repo.find_user_by_username(&request.username).await?;
        let by_email = self.repo.find_user_by_email(&request.email).await?;

        let conflict = match (by_username, by_email) {
            (Some(u), Some(e)) if u.id == e.id => return Ok(Some(u)),
            (None, None) => return Ok(None),
            (Some(_), _) => AppError::conflict("username", "username is registered with a different email"),
            (None, Some(_)) => AppError::conflict("email", "email is registered with a different username"),
        };

        metrics::record_signup("conflict");
        metrics::record_conflict("identity");
        Err(conflict)
    }

    /// Trade a confirmation code for an access token.
    ///
    /// A successful exchange moves `last_login`, which retires the code.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn exchange_code(&self, request: TokenRequest) -> Result<TokenResponse> {
        request.validate()?;

        let Some(user) = self.repo.find_user_by_username(&request.username).await? else {
            metrics::record_token_exchange("unknown_user");
            return Err(AppError::not_found("user", &request.username));
        };

        if !self.codes.check(&user, &request.confirmation_code) {
            metrics::record_token_exchange("rejected");
            warn!(user_id = user.id, "Confirmation code mismatch");
            return Err(AppError::InvalidConfirmationCode);
        }

        let mut now = Utc::now().trunc_subsecs(6);
        if let Some(previous) = user.last_login {
            if now <= previous {
                now = previous + Duration::microseconds(1);
            }
        }

        if !self.repo.advance_last_login(user.id, user.last_login, now).await? {
            metrics::record_token_exchange("rejected");
            warn!(user_id = user.id, "Confirmation code consumed concurrently");
            return Err(AppError::InvalidConfirmationCode);
        }

        let token = self.jwt.issue_access_token(user.id)?;
        metrics::record_token_exchange("issued");
        info!(user_id = user.id, "Access token issued");

        Ok(TokenResponse { token })
    }

    // ========================================================================
    // Self-service profile
    // ========================================================================

    pub async fn me(&self, caller: &Caller) -> Result<UserResponse> {
        Authenticated.check(caller, Action::Read)?;
        let user = self.current_user(caller).await?;
        Ok(user.into())
    }

    /// Update the caller's own profile; `role` is dropped unless the caller is an admin
    pub async fn update_me(&self, caller: &Caller, mut request: UpdateUserRequest) -> Result<UserResponse> {
        Authenticated.check(caller, Action::Write)?;
        let principal = caller.require_principal()?;

        if !self.admin.is_admin(principal) {
            request.role = None;
        }
        request.validate()?;

        let user = self.current_user(caller).await?;
        self.apply_update(user, request).await
    }

    async fn current_user(&self, caller: &Caller) -> Result<User> {
        let principal = caller.require_principal()?;
        self.repo
            .find_user_by_id(principal.id)
            .await?
            .ok_or_else(|| AppError::not_found("user", &principal.username))
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub async fn list_users(&self, caller: &Caller, search: Option<&str>) -> Result<Vec<UserResponse>> {
        AdminOnly(self.admin).check(caller, Action::Read)?;

        let users = self.repo.list_users(search).await?;
        Ok(users.into_iter().map(UserResponse::from).collect())
    }

    pub async fn create_user(&self, caller: &Caller, request: CreateUserRequest) -> Result<UserResponse> {
        AdminOnly(self.admin).check(caller, Action::Write)?;
        request.validate()?;

        self.ensure_available(Some(&request.username), Some(&request.email), None)
            .await?;

        let user = self
            .repo
            .create_user(
                request.username,
                request.email,
                request.role.unwrap_or_default(),
                request.bio.unwrap_or_default(),
                request.first_name.unwrap_or_default(),
                request.last_name.unwrap_or_default(),
            )
            .await
            .inspect_err(|e| {
                if matches!(e, AppError::Conflict { .. }) {
                    metrics::record_conflict("identity");
                }
            })?;

        info!(user_id = user.id, role = user.role.as_str(), "User created by admin");
        Ok(user.into())
    }

    pub async fn get_user(&self, caller: &Caller, username: &str) -> Result<UserResponse> {
        AdminOnly(self.admin).check(caller, Action::Read)?;
        Ok(self.user_by_username(username).await?.into())
    }

    pub async fn update_user(
        &self,
        caller: &Caller,
        username: &str,
        request: UpdateUserRequest,
    ) -> Result<UserResponse> {
        AdminOnly(self.admin).check(caller, Action::Write)?;
        request.validate()?;

        let user = self.user_by_username(username).await?;
        self.apply_update(user, request).await
    }

    pub async fn delete_user(&self, caller: &Caller, username: &str) -> Result<()> {
        AdminOnly(self.admin).check(caller, Action::Write)?;

        if !self.repo.delete_user_by_username(username).await? {
            return Err(AppError::not_found("user", username));
        }

        info!(username, "User deleted by admin");
        Ok(())
    }

    async fn user_by_username(&self, username: &str) -> Result<User> {
        self.repo
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| AppError::not_found("user", username))
    }

    async fn apply_update(&self, user: User, request: UpdateUserRequest) -> Result<UserResponse> {
        let username = request.username.as_deref().filter(|u| *u != user.username);
        let email = request.email.as_deref().filter(|e| *e != user.email);
        self.ensure_available(username, email, Some(user.id)).await?;

        let updated = self
            .repo
            .update_user(user, request.into())
            .await
            .inspect_err(|e| {
                if matches!(e, AppError::Conflict { .. }) {
                    metrics::record_conflict("identity");
                }
            })?;

        Ok(updated.into())
    }

    /// Field-specific uniqueness pre-check; storage remains the final arbiter
    async fn ensure_available(
        &self,
        username: Option<&str>,
        email: Option<&str>,
        except_id: Option<i32>,
    ) -> Result<()> {
        if let Some(username) = username {
            if let Some(existing) = self.repo.find_user_by_username(username).await? {
                if Some(existing.id) != except_id {
                    metrics::record_conflict("identity");
                    return Err(AppError::conflict("username", "username is already taken"));
                }
            }
        }

        if let Some(email) = email {
            if let Some(existing) = self.repo.find_user_by_email(email).await? {
                if Some(existing.id) != except_id {
                    metrics::record_conflict("identity");
                    return Err(AppError::conflict("email", "email is already registered"));
                }
            }
        }

        Ok(())
    }
}
