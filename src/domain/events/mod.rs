//! Domain events and the outbound deliveries they produce

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: i64, user_id: i64 },
    Approved { order_id: i64, user_id: i64 },
    QuantityReduced { order_id: i64, remaining: u32 },
    Cancelled { order_id: i64, user_id: i64 },
    Removed { order_id: i64 },
    ClaimCodeChanged { order_id: i64 },
}

impl OrderEvent {
    pub fn order_id(&self) -> i64 {
        match self {
            Self::Placed { order_id, .. }
            | Self::Approved { order_id, .. }
            | Self::QuantityReduced { order_id, .. }
            | Self::Cancelled { order_id, .. }
            | Self::Removed { order_id }
            | Self::ClaimCodeChanged { order_id } => *order_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Placed { .. } => "order.placed",
            Self::Approved { .. } => "order.approved",
            Self::QuantityReduced { .. } => "order.quantity_reduced",
            Self::Cancelled { .. } => "order.cancelled",
            Self::Removed { .. } => "order.removed",
            Self::ClaimCodeChanged { .. } => "order.claim_code_changed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

/// Real-time message for one user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub user_id: i64,
    pub notification_id: i64,
    pub message: String,
}

/// One side effect waiting in the outbox.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum Delivery {
    Email(EmailMessage),
    Push(PushMessage),
}

impl Delivery {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::Email(_) => "email",
            Self::Push(_) => "push",
        }
    }
}
