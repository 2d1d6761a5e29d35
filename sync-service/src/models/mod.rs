//! Domain models for sync-service.
//!
//! Entities reference each other by identifier only (`credential_id`,
//! `account_id`); the store is the single owner of full rows.

#![allow(clippy::should_implement_trait)]

pub mod account;
pub mod credential;
pub mod transaction;

pub use account::{Account, AccountKind, AccountPreferences};
pub use credential::{CredentialSummary, ExternalCredential};
pub use transaction::{
    CategorySource, NewTransaction, Pagination, Transaction, TransactionFilter, TransactionPageResult,
    TransactionType, TransactionUpdate,
};

use serde::{Deserialize, Deserializer};

/// Identity of the caller, passed explicitly through every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// A single field of a partial update.
///
/// A JSON field that is absent or `null` deserializes to `Unchanged`; any other
/// value is `Set`. Fields must carry `#[serde(default)]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Patch<T> {
    #[default]
    Unchanged,
    Set(T),
}

impl<T> Patch<T> {
    /// Write the new value into `target` when set. Returns whether a write happened.
    pub fn apply_to(self, target: &mut T) -> bool {
        match self {
            Patch::Set(value) => {
                *target = value;
                true
            }
            Patch::Unchanged => false,
        }
    }
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer)
            .map(|value| value.map_or(Patch::Unchanged, Patch::Set))
    }
}
