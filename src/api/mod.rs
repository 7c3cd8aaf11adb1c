//! HTTP surface

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod error;
pub mod inbox;
pub mod orders;

use std::sync::Arc;

use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::services::{CartService, CatalogService, ContactService, NotificationService, OrderLifecycle};
use crate::store::SharedStore;
use crate::workers::OutboxDispatcher;

pub use auth::{CurrentUser, JwtKeys, Role};
pub use error::{ApiError, ApiResult, JsonBody};

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderLifecycle>,
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub contact: Arc<ContactService>,
    pub notifications: Arc<NotificationService>,
    pub jwt: Arc<JwtKeys>,
}

impl AppState {
    pub fn new(store: SharedStore, dispatcher: Arc<OutboxDispatcher>, jwt: JwtKeys) -> Self {
        Self {
            orders: Arc::new(OrderLifecycle::new(store.clone(), dispatcher)),
            catalog: Arc::new(CatalogService::new(store.clone())),
            cart: Arc::new(CartService::new(store.clone())),
            contact: Arc::new(ContactService::new(store.clone())),
            notifications: Arc::new(NotificationService::new(store)),
            jwt: Arc::new(jwt),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "bookhaven"})) }))
        .route("/books", get(catalog::list_books))
        .route("/books/:id", get(catalog::get_book))
        .route("/books/:id/sale", put(catalog::set_sale).delete(catalog::clear_sale))
        .route("/books/:id/reviews", get(catalog::reviews))
        .route("/banners/active", get(catalog::active_banners))
        .route("/cart", get(cart::items).post(cart::add))
        .route("/cart/:book_id/quantity", patch(cart::set_quantity))
        .route("/cart/:book_id/remove", patch(cart::remove))
        .route("/cart/:book_id/restore", patch(cart::restore))
        .route("/orders", get(orders::mine).post(orders::add_to_order))
        .route("/orders/with-discount", get(orders::with_discount))
        .route("/orders/all", get(orders::all))
        .route("/orders/user/:user_id", get(orders::for_user))
        .route("/orders/approve", post(orders::approve))
        .route("/orders/update-claim-code", post(orders::update_claim_code))
        .route("/orders/:id", get(orders::get).delete(orders::remove))
        .route("/orders/:id/cancel", patch(orders::cancel))
        .route("/notifications", get(inbox::notifications))
        .route("/notifications/:id/read", patch(inbox::mark_read))
        .route("/contact", post(inbox::contact))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
