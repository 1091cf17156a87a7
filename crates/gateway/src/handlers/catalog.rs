//! Category and genre handlers

use axum::{extract::State, http::StatusCode, Json};
use yamdb_common::{
    access::Caller,
    errors::Result,
    services::{CatalogEntryRequest, CatalogEntryResponse, CatalogService},
};

use super::SearchQuery;
use crate::extract::{ApiJson, ApiPath, ApiQuery};

pub async fn list_categories(
    State(catalog): State<CatalogService>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<Vec<CatalogEntryResponse>>> {
    Ok(Json(catalog.list_categories(query.search.as_deref()).await?))
}

pub async fn create_category(
    State(catalog): State<CatalogService>,
    caller: Caller,
    ApiJson(request): ApiJson<CatalogEntryRequest>,
) -> Result<(StatusCode, Json<CatalogEntryResponse>)> {
    let category = catalog.create_category(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn delete_category(
    State(catalog): State<CatalogService>,
    caller: Caller,
    ApiPath(slug): ApiPath<String>,
) -> Result<StatusCode> {
    catalog.delete_category(&caller, &slug).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_genres(
    State(catalog): State<CatalogService>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> Result<Json<Vec<CatalogEntryResponse>>> {
    Ok(Json(catalog.list_genres(query.search.as_deref()).await?))
}

pub async fn create_genre(
    State(catalog): State<CatalogService>,
    caller: Caller,
    ApiJson(request): ApiJson<CatalogEntryRequest>,
) -> Result<(StatusCode, Json<CatalogEntryResponse>)> {
    let genre = catalog.create_genre(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(genre)))
}

pub async fn delete_genre(
    State(catalog): State<CatalogService>,
    caller: Caller,
    ApiPath(slug): ApiPath<String>,
) -> Result<StatusCode> {
    catalog.delete_genre(&caller, &slug).await?;
    Ok(StatusCode::NO_CONTENT)
}
