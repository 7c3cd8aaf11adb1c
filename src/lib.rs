//! Book Haven bookstore backend
//!
//! Catalog, cart and in-store pickup ordering for a bookshop.
//!
//! ## Features
//! - Book catalog with time-boxed sales
//! - Soft-delete shopping cart
//! - Orders redeemed in store with a claim code
//! - Purchase, quantity and sale discounts
//! - Confirmation emails and real-time notifications through an outbox
//! - Background expiry of finished sales

pub mod api;
pub mod config;
pub mod domain;
pub mod gateways;
pub mod services;
pub mod store;
pub mod workers;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::store::StoreError;

// =============================================================================
// Core Types
// =============================================================================

/// Account as seen by the bookstore; identity itself lives elsewhere.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub user_name: String,
    pub email: String,
    pub profile_picture: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: i64,
    pub user_id: i64,
    pub book_id: i64,
    pub rating: i16,
    pub comment: String,
    pub date_posted: DateTime<Utc>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub id: i64,
    pub message: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
    pub is_deleted: bool,
}

impl Banner {
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_deleted && self.start_time <= now && now <= self.end_time
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewContact {
    #[validate(length(min = 1, max = 100, message = "Name is required and must be at most 100 characters"))]
    pub name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 1, max = 200, message = "Subject is required and must be at most 200 characters"))]
    pub subject: String,
    #[validate(length(min = 1, max = 2000, message = "Message is required and must be at most 2000 characters"))]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContactSubmission {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
    pub submitted_at: DateTime<Utc>,
}

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum BookstoreError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// A business precondition does not hold (duplicate order, order already
    /// approved, nothing in the cart).
    #[error("{0}")]
    Rejected(String),

    /// The target changed under us or a unique value is taken.
    #[error("{0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl BookstoreError {
    pub fn validation(message: impl Into<String>) -> Self { Self::Validation(message.into()) }
    pub fn not_found(message: impl Into<String>) -> Self { Self::NotFound(message.into()) }
    pub fn rejected(message: impl Into<String>) -> Self { Self::Rejected(message.into()) }
    pub fn conflict(message: impl Into<String>) -> Self { Self::Conflict(message.into()) }
}

impl From<validator::ValidationErrors> for BookstoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid"),
                })
            })
            .collect();
        messages.sort();
        Self::Validation(messages.join("; "))
    }
}

pub type Result<T> = std::result::Result<T, BookstoreError>;

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_banner_visibility() {
        let now = Utc::now();
        let banner = Banner {
            id: 1,
            message: "Summer sale".into(),
            start_time: now - Duration::hours(1),
            end_time: now + Duration::hours(1),
            is_active: true,
            is_deleted: false,
        };
        assert!(banner.is_visible_at(now));
        assert!(!banner.is_visible_at(now + Duration::hours(2)));
        assert!(!Banner { is_deleted: true, ..banner }.is_visible_at(now));
    }

    #[test]
    fn test_contact_validation_messages() {
        let contact = NewContact {
            name: String::new(),
            email: "not-an-email".into(),
            subject: "Hello".into(),
            message: "Hi".into(),
        };
        let err = BookstoreError::from(contact.validate().unwrap_err());
        let BookstoreError::Validation(message) = err else { panic!("expected validation error") };
        assert!(message.contains("valid email"));
        assert!(message.contains("Name is required"));
    }
}
