//! Review and comment handlers

use axum::{extract::State, http::StatusCode, Json};
use yamdb_common::{
    access::Caller,
    errors::Result,
    services::{
        CommentRequest, CommentResponse, CreateReviewRequest, ReviewResponse, ReviewService,
        UpdateReviewRequest,
    },
};

use crate::extract::{ApiJson, ApiPath};

// ============================================================================
// Reviews
// ============================================================================

pub async fn list_reviews(
    State(reviews): State<ReviewService>,
    ApiPath(title_id): ApiPath<i32>,
) -> Result<Json<Vec<ReviewResponse>>> {
    Ok(Json(reviews.list_reviews(title_id).await?))
}

pub async fn create_review(
    State(reviews): State<ReviewService>,
    caller: Caller,
    ApiPath(title_id): ApiPath<i32>,
    ApiJson(request): ApiJson<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ReviewResponse>)> {
    let review = reviews.create_review(&caller, title_id, request).await?;
    Ok((StatusCode::CREATED, Json(review)))
}

pub async fn get_review(
    State(reviews): State<ReviewService>,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
) -> Result<Json<ReviewResponse>> {
    Ok(Json(reviews.get_review(title_id, review_id).await?))
}

pub async fn update_review(
    State(reviews): State<ReviewService>,
    caller: Caller,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
    ApiJson(request): ApiJson<UpdateReviewRequest>,
) -> Result<Json<ReviewResponse>> {
    Ok(Json(reviews.update_review(&caller, title_id, review_id, request).await?))
}

pub async fn delete_review(
    State(reviews): State<ReviewService>,
    caller: Caller,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
) -> Result<StatusCode> {
    reviews.delete_review(&caller, title_id, review_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Comments
// ============================================================================

pub async fn list_comments(
    State(reviews): State<ReviewService>,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
) -> Result<Json<Vec<CommentResponse>>> {
    Ok(Json(reviews.list_comments(title_id, review_id).await?))
}

pub async fn create_comment(
    State(reviews): State<ReviewService>,
    caller: Caller,
    ApiPath((title_id, review_id)): ApiPath<(i32, i32)>,
    ApiJson(request): ApiJson<CommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>)> {
    let comment = reviews.create_comment(&caller, title_id, review_id, request).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn get_comment(
    State(reviews): State<ReviewService>,
    ApiPath((title_id, review_id, comment_id)): ApiPath<(i32, i32, i32)>,
) -> Result<Json<CommentResponse>> {
    Ok(Json(reviews.get_comment(title_id, review_id, comment_id).await?))
}

pub async fn update_comment(
    State(reviews): State<ReviewService>,
    caller: Caller,
    ApiPath((title_id, review_id, comment_id)): ApiPath<(i32, i32, i32)>,
    ApiJson(request): ApiJson<CommentRequest>,
) -> Result<Json<CommentResponse>> {
    let comment = reviews
        .update_comment(&caller, title_id, review_id, comment_id, request)
        .await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(reviews): State<ReviewService>,
    caller: Caller,
    ApiPath((title_id, review_id, comment_id)): ApiPath<(i32, i32, i32)>,
) -> Result<StatusCode> {
    reviews.delete_comment(&caller, title_id, review_id, comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
