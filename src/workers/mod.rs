//! Background loops
//!
//! Both workers share the process-wide shutdown channel and exit at their next
//! await point once it flips to `true` (or its sender is dropped).

pub mod outbox;
pub mod sweeper;

pub use outbox::{DispatchReport, OutboxDispatcher, OutboxSettings};
pub use sweeper::{SaleExpirySweeper, SweeperSettings};

use tokio::sync::watch;

/// Resolves when shutdown has been requested.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
