//! Application services used by the HTTP layer.

pub mod cart;
pub mod catalog;
pub mod contact;
pub mod notifications;
pub mod orders;

pub use cart::CartService;
pub use catalog::CatalogService;
pub use contact::ContactService;
pub use notifications::NotificationService;
pub use orders::OrderLifecycle;
