//! Services module for sync-service.

pub mod accounts;
pub mod credentials;
pub mod metrics;
pub mod transactions;

pub use accounts::AccountService;
pub use credentials::{CredentialService, LinkRequest};
pub use metrics::{get_metrics, init_metrics};
pub use transactions::TransactionService;
