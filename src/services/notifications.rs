//! In-app notifications

use crate::store::{InboxStore, SharedStore};
use crate::{BookstoreError, Notification, Result};

pub struct NotificationService {
    store: SharedStore,
}

impl NotificationService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Newest first.
    pub async fn list(&self, user_id: i64) -> Result<Vec<Notification>> {
        Ok(self.store.notifications(user_id).await?)
    }

    pub async fn mark_read(&self, id: i64, user_id: i64) -> Result<Notification> {
        self.store
            .mark_read(id, user_id)
            .await?
            .ok_or_else(|| BookstoreError::not_found("Notification not found"))
    }
}
