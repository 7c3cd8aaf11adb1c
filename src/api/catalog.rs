//! Catalog, review and banner endpoints

use axum::extract::{Path, State};
use axum::Json;

use super::{ApiResult, AppState, CurrentUser, JsonBody};
use crate::services::catalog::{BookView, ReviewSummary, SaleRequest};
use crate::Banner;

pub async fn list_books(State(s): State<AppState>) -> ApiResult<Json<Vec<BookView>>> {
    Ok(Json(s.catalog.list_books().await?))
}

pub async fn get_book(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<BookView>> {
    Ok(Json(s.catalog.get_book(id).await?))
}

pub async fn set_sale(
    State(s): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    JsonBody(r): JsonBody<SaleRequest>,
) -> ApiResult<Json<BookView>> {
    user.require_admin()?;
    Ok(Json(s.catalog.set_sale(id, r).await?))
}

pub async fn clear_sale(State(s): State<AppState>, user: CurrentUser, Path(id): Path<i64>) -> ApiResult<Json<BookView>> {
    user.require_admin()?;
    Ok(Json(s.catalog.clear_sale(id).await?))
}

pub async fn reviews(State(s): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ReviewSummary>> {
    Ok(Json(s.catalog.reviews(id).await?))
}

pub async fn active_banners(State(s): State<AppState>) -> ApiResult<Json<Vec<Banner>>> {
    Ok(Json(s.catalog.active_banners().await?))
}
