//! Financial account synced from the provider.

use super::Patch;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local account vocabulary. Anything the provider reports outside the known
/// set lands in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Checking,
    Credit,
    Loan,
    Investment,
    Other,
}

impl AccountKind {
    /// Map a provider account type to the local vocabulary.
    pub fn from_provider_type(provider_type: &str) -> Self {
        match provider_type.to_ascii_lowercase().as_str() {
            "depository" => Self::Checking,
            "credit" => Self::Credit,
            "loan" => Self::Loan,
            "investment" => Self::Investment,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Credit => "credit",
            Self::Loan => "loan",
            Self::Investment => "investment",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "checking" => Self::Checking,
            "credit" => Self::Credit,
            "loan" => Self::Loan,
            "investment" => Self::Investment,
            _ => Self::Other,
        }
    }
}

impl std::fmt::Display for AccountKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub account_id: Uuid,
    pub user_id: String,
    /// Provider account identifier; the only key used to match rows during sync.
    pub external_id: String,
    pub name: String,
    pub official_name: Option<String>,
    pub provider_type: String,
    pub provider_subtype: Option<String>,
    pub account_type: AccountKind,
    pub account_subtype: Option<String>,
    pub current_balance: Decimal,
    pub available_balance: Option<Decimal>,
    pub credit_limit: Option<Decimal>,
    pub balance_updated_utc: Option<DateTime<Utc>>,
    // User-owned display fields. Sync never writes these.
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub is_hidden: bool,
    pub is_active: bool,
    pub deactivated_utc: Option<DateTime<Utc>>,
    pub credential_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Partial update of user-controlled account settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountPreferences {
    #[serde(default)]
    pub display_name: Patch<String>,
    #[serde(default)]
    pub color: Patch<String>,
    #[serde(default)]
    pub is_hidden: Patch<bool>,
    #[serde(default)]
    pub balance: Patch<Decimal>,
    #[serde(default)]
    pub available_balance: Patch<Decimal>,
}

impl AccountPreferences {
    /// Apply to `account`, stamping the balance timestamp with `now`.
    pub fn apply(self, account: &mut Account, now: DateTime<Utc>) {
        if let Patch::Set(name) = self.display_name {
            account.display_name = Some(name);
        }
        if let Patch::Set(color) = self.color {
            account.color = Some(color);
        }
        self.is_hidden.apply_to(&mut account.is_hidden);
        self.balance.apply_to(&mut account.current_balance);
        if let Patch::Set(available) = self.available_balance {
            account.available_balance = Some(available);
        }
        account.balance_updated_utc = Some(now);
        account.updated_utc = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_mapping() {
        assert_eq!(AccountKind::from_provider_type("depository"), AccountKind::Checking);
        assert_eq!(AccountKind::from_provider_type("credit"), AccountKind::Credit);
        assert_eq!(AccountKind::from_provider_type("loan"), AccountKind::Loan);
        assert_eq!(AccountKind::from_provider_type("investment"), AccountKind::Investment);
        assert_eq!(AccountKind::from_provider_type("brokerage"), AccountKind::Other);
        assert_eq!(AccountKind::from_provider_type(""), AccountKind::Other);
    }

    #[test]
    fn test_kind_string_roundtrip_falls_back_to_other() {
        assert_eq!(AccountKind::from_str(AccountKind::Loan.as_str()), AccountKind::Loan);
        assert_eq!(AccountKind::from_str("savings"), AccountKind::Other);
    }
}
