//! Order endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::{ApiResult, AppState, CurrentUser, JsonBody};
use crate::services::orders::{CancelOutcome, OrderView, OrdersWithDiscount, PlacedOrder, TransitionOutcome};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddToOrderRequest {
    pub book_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub claim_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClaimCodeRequest {
    pub order_id: i64,
    pub new_claim_code: String,
}

pub async fn add_to_order(
    State(s): State<AppState>,
    user: CurrentUser,
    JsonBody(r): JsonBody<AddToOrderRequest>,
) -> ApiResult<(StatusCode, Json<PlacedOrder>)> {
    let placed = s.orders.add_to_order(user.id, r.book_id).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

pub async fn approve(
    State(s): State<AppState>,
    user: CurrentUser,
    JsonBody(r): JsonBody<ApproveRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    user.require_staff()?;
    Ok(Json(s.orders.approve(&r.claim_code).await?))
}

pub async fn cancel(State(s): State<AppState>, user: CurrentUser, Path(id): Path<i64>) -> ApiResult<Json<CancelOutcome>> {
    Ok(Json(s.orders.cancel(id, user.id).await?))
}

pub async fn remove(State(s): State<AppState>, user: CurrentUser, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    s.orders.remove(id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_claim_code(
    State(s): State<AppState>,
    user: CurrentUser,
    JsonBody(r): JsonBody<UpdateClaimCodeRequest>,
) -> ApiResult<Json<TransitionOutcome>> {
    user.require_staff()?;
    Ok(Json(s.orders.update_claim_code(r.order_id, &r.new_claim_code).await?))
}

pub async fn get(State(s): State<AppState>, user: CurrentUser, Path(id): Path<i64>) -> ApiResult<Json<OrderView>> {
    Ok(Json(s.orders.get_order(id, user.id, user.role.is_staff()).await?))
}

pub async fn mine(State(s): State<AppState>, user: CurrentUser) -> ApiResult<Json<Vec<OrderView>>> {
    Ok(Json(s.orders.user_orders(user.id).await?))
}

pub async fn with_discount(State(s): State<AppState>, user: CurrentUser) -> ApiResult<Json<OrdersWithDiscount>> {
    Ok(Json(s.orders.orders_with_discount(user.id).await?))
}

pub async fn all(State(s): State<AppState>, user: CurrentUser) -> ApiResult<Json<Vec<OrderView>>> {
    user.require_staff()?;
    Ok(Json(s.orders.all_orders().await?))
}

pub async fn for_user(
    State(s): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<Vec<OrderView>>> {
    user.require_staff()?;
    Ok(Json(s.orders.user_orders(user_id).await?))
}
