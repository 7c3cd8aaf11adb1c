//! Cart endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use super::{ApiResult, AppState, CurrentUser, JsonBody};
use crate::services::cart::{CartChange, CartItemView};

fn one() -> i64 { 1 }

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartRequest {
    pub book_id: i64,
    #[serde(default = "one")]
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct QuantityRequest {
    pub quantity: i64,
}

pub async fn add(
    State(s): State<AppState>,
    user: CurrentUser,
    JsonBody(r): JsonBody<AddToCartRequest>,
) -> ApiResult<Json<CartChange>> {
    Ok(Json(s.cart.add(user.id, r.book_id, r.quantity).await?))
}

pub async fn set_quantity(
    State(s): State<AppState>,
    user: CurrentUser,
    Path(book_id): Path<i64>,
    JsonBody(r): JsonBody<QuantityRequest>,
) -> ApiResult<Json<CartChange>> {
    Ok(Json(s.cart.set_quantity(user.id, book_id, r.quantity).await?))
}

pub async fn remove(State(s): State<AppState>, user: CurrentUser, Path(book_id): Path<i64>) -> ApiResult<Json<CartChange>> {
    Ok(Json(s.cart.remove(user.id, book_id).await?))
}

pub async fn restore(State(s): State<AppState>, user: CurrentUser, Path(book_id): Path<i64>) -> ApiResult<Json<CartChange>> {
    Ok(Json(s.cart.restore(user.id, book_id).await?))
}

pub async fn items(State(s): State<AppState>, user: CurrentUser) -> ApiResult<Json<Vec<CartItemView>>> {
    Ok(Json(s.cart.items(user.id).await?))
}
