//! Domain services
//!
//! Each service takes the caller explicitly and evaluates its permission
//! policy before touching storage.

mod accounts;
mod catalog;
mod reviews;

pub use accounts::{
    AccountService, CreateUserRequest, SignupRequest, TokenRequest, TokenResponse,
    UpdateUserRequest, UserResponse,
};
pub use catalog::{
    CatalogEntryRequest, CatalogEntryResponse, CatalogService, CreateTitleRequest,
    TitleResponse, UpdateTitleRequest,
};
pub use reviews::{
    rounded_mean, CommentRequest, CommentResponse, CreateReviewRequest, ReviewResponse,
    ReviewService, UpdateReviewRequest,
};

#[cfg(test)]
pub(crate) mod testing {
    use crate::access::{AdminPolicy, Caller, Principal};
    use crate::db::models::{Role, User};
    use crate::db::{test_pool, Repository};

    pub async fn repo() -> Repository {
        Repository::new(test_pool().await)
    }

    pub async fn user_with_role(repo: &Repository, username: &str, role: Role) -> User {
        repo.create_user(
            username.to_string(),
            format!("{username}@example.com"),
            role,
            String::new(),
            String::new(),
            String::new(),
        )
        .await
        .unwrap()
    }

    pub fn caller(user: &User) -> Caller {
        Caller::User(Principal::from(user))
    }

    pub fn admin_policy() -> AdminPolicy {
        AdminPolicy::new(true)
    }
}
