//! HTTP handlers for sync-service.
//!
//! Every `/api` handler takes the caller's [`crate::models::UserContext`] from
//! the `x-user-id` header and delegates to a service.

pub mod accounts;
pub mod health;
pub mod plaid;
pub mod transactions;
