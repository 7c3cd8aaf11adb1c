//! Notification and contact endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use super::{ApiResult, AppState, CurrentUser, JsonBody};
use crate::{NewContact, Notification};

pub async fn notifications(State(s): State<AppState>, user: CurrentUser) -> ApiResult<Json<Vec<Notification>>> {
    Ok(Json(s.notifications.list(user.id).await?))
}

pub async fn mark_read(State(s): State<AppState>, user: CurrentUser, Path(id): Path<i64>) -> ApiResult<Json<Notification>> {
    Ok(Json(s.notifications.mark_read(id, user.id).await?))
}

pub async fn contact(State(s): State<AppState>, JsonBody(r): JsonBody<NewContact>) -> ApiResult<Json<Value>> {
    let id = s.contact.submit(r).await?;
    Ok(Json(json!({ "message": "Thank you for contacting us. We will get back to you soon.", "id": id })))
}
