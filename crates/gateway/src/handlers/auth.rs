//! Signup and token exchange handlers

use axum::{extract::State, http::StatusCode, Json};
use yamdb_common::{
    errors::Result,
    services::{AccountService, SignupRequest, TokenRequest, TokenResponse},
};

use crate::extract::ApiJson;

/// Register or re-confirm an identity; the payload is echoed back
pub async fn signup(
    State(accounts): State<AccountService>,
    ApiJson(request): ApiJson<SignupRequest>,
) -> Result<Json<SignupRequest>> {
    Ok(Json(accounts.request_signup(request).await?))
}

/// Exchange a confirmation code for an access token
pub async fn token(
    State(accounts): State<AccountService>,
    ApiJson(request): ApiJson<TokenRequest>,
) -> Result<(StatusCode, Json<TokenResponse>)> {
    let response = accounts.exchange_code(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
