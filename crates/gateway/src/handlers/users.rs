//! User profile and administration handlers

use axum::{extract::State, http::StatusCode, Json};
use yamdb_common::{
    access::Caller,
    errors::Result,
    services::{AccountService, CreateUserRequest, UpdateUserRequest, UserResponse},
};

use super::SearchQuery;
use crate::extract::{ApiJson, ApiPath, ApiQuery};

pub async fn me(
    State(accounts): State<AccountService>,
    caller: Caller,
) -> Result<Json<UserResponse>> {
    Ok(Json(accounts.me(&caller).await?))
}

pub async fn update_me(
    State(accounts): State<AccountService>,
    caller: Caller,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<Json<UserResponse>> {
    Ok(Json(accounts.update_me(&caller, request).await?))
}

pub async fn list_users(
    State(accounts): State<AccountService>,
    caller: Caller,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<Vec<UserResponse>>> {
    Ok(Json(accounts.list_users(&caller, query.search.as_deref()).await?))
}

pub async fn create_user(
    State(accounts): State<AccountService>,
    caller: Caller,
    ApiJson(request): ApiJson<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    let user = accounts.create_user(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(accounts): State<AccountService>,
    caller: Caller,
    ApiPath(username): ApiPath<String>,
) -> Result<Json<UserResponse>> {
    Ok(Json(accounts.get_user(&caller, &username).await?))
}

pub async fn update_user(
    State(accounts): State<AccountService>,
    caller: Caller,
    ApiPath(username): ApiPath<String>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> Result<Json<UserResponse>> {
    Ok(Json(accounts.update_user(&caller, &username, request).await?))
}

pub async fn delete_user(
    State(accounts): State<AccountService>,
    caller: Caller,
    ApiPath(username): ApiPath<String>,
) -> Result<StatusCode> {
    accounts.delete_user(&caller, &username).await?;
    Ok(StatusCode::NO_CONTENT)
}
