//! Contact form submissions

use chrono::Utc;
use validator::Validate;

use crate::store::{ContactStore, SharedStore};
use crate::{BookstoreError, NewContact, Result};

pub struct ContactService {
    store: SharedStore,
}

impl ContactService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn submit(&self, contact: NewContact) -> Result<i64> {
        contact.validate()?;
        let saved = self.store.save_contact(contact, Utc::now()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to save contact submission");
            BookstoreError::from(e)
        })?;
        tracing::info!(contact_id = saved.id, "Contact submission stored");
        Ok(saved.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::MemoryStore;

    fn contact(email: &str) -> NewContact {
        NewContact {
            name: "Ada".into(),
            email: email.into(),
            subject: "Opening hours".into(),
            message: "Are you open on Sundays?".into(),
        }
    }

    #[tokio::test]
    async fn valid_submission_is_stored() {
        let service = ContactService::new(Arc::new(MemoryStore::new()));
        assert!(service.submit(contact("ada@example.com")).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let service = ContactService::new(Arc::new(MemoryStore::new()));
        assert!(matches!(service.submit(contact("ada")).await, Err(BookstoreError::Validation(_))));
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_storage_error() {
        let store = MemoryStore::new();
        store.fail_writes(true);
        let service = ContactService::new(Arc::new(store));
        assert!(matches!(service.submit(contact("ada@example.com")).await, Err(BookstoreError::Storage(_))));
    }
}
