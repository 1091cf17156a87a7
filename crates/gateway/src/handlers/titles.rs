//! Title handlers

use axum::{extract::State, http::StatusCode, Json};
use yamdb_common::{
    access::Caller,
    db::TitleFilter,
    errors::Result,
    services::{CatalogService, CreateTitleRequest, TitleResponse, UpdateTitleRequest},
};

use crate::extract::{ApiJson, ApiPath, ApiQuery};

/// List titles, filterable by `category`, `genre`, `name` and `year`
pub async fn list_titles(
    State(catalog): State<CatalogService>,
    ApiQuery(filter): ApiQuery<TitleFilter>,
) -> Result<Json<Vec<TitleResponse>>> {
    Ok(Json(catalog.list_titles(&filter).await?))
}

pub async fn create_title(
    State(catalog): State<CatalogService>,
    caller: Caller,
    ApiJson(request): ApiJson<CreateTitleRequest>,
) -> Result<(StatusCode, Json<TitleResponse>)> {
    let title = catalog.create_title(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(title)))
}

pub async fn get_title(
    State(catalog): State<CatalogService>,
    ApiPath(title_id): ApiPath<i32>,
) -> Result<Json<TitleResponse>> {
    Ok(Json(catalog.get_title(title_id).await?))
}

pub async fn update_title(
    State(catalog): State<CatalogService>,
    caller: Caller,
    ApiPath(title_id): ApiPath<i32>,
    ApiJson(request): ApiJson<UpdateTitleRequest>,
) -> Result<Json<TitleResponse>> {
    Ok(Json(catalog.update_title(&caller, title_id, request).await?))
}

pub async fn delete_title(
    State(catalog): State<CatalogService>,
    caller: Caller,
    ApiPath(title_id): ApiPath<i32>,
) -> Result<StatusCode> {
    catalog.delete_title(&caller, title_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
