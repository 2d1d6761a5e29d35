//! Transaction model, user update requests, and list filters.

use super::{AccountKind, Patch};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Income,
    Expense,
    Transfer,
    Other,
}

impl TransactionType {
    /// Provider sign convention: negative amounts are money in.
    pub fn from_amount(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            Self::Income
        } else {
            Self::Expense
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Income => "income",
            Self::Expense => "expense",
            Self::Transfer => "transfer",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "income" => Self::Income,
            "expense" => Self::Expense,
            "transfer" => Self::Transfer,
            _ => Self::Other,
        }
    }
}

/// Who last set a transaction's category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    Provider,
    User,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "user" => Self::User,
            _ => Self::Provider,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub transaction_id: Uuid,
    pub user_id: String,
    /// Provider transaction identifier, or a synthesized UUID for manual rows.
    pub external_id: String,
    pub name: String,
    pub amount: Decimal,
    pub normalized_amount: Decimal,
    pub date: NaiveDate,
    pub category: Option<String>,
    pub category_source: Option<CategorySource>,
    pub category_corrected: bool,
    pub merchant_name: Option<String>,
    pub transaction_type: TransactionType,
    pub account_type: Option<AccountKind>,
    pub account_subtype: Option<String>,
    pub is_recurring: bool,
    pub excluded_from_budget: bool,
    pub tags: BTreeSet<String>,
    pub description: Option<String>,
    pub account_id: Option<Uuid>,
    pub credential_id: Option<Uuid>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Transaction {
    pub fn has_user_category(&self) -> bool {
        self.category_source == Some(CategorySource::User)
    }
}

/// Manually entered transaction.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTransaction {
    pub name: String,
    pub amount: Decimal,
    pub normalized_amount: Option<Decimal>,
    pub date: NaiveDate,
    pub category: Option<String>,
    pub merchant_name: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub account_type: Option<AccountKind>,
    pub account_subtype: Option<String>,
    pub account_id: Option<Uuid>,
    pub credential_id: Option<Uuid>,
    pub description: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    pub is_recurring: Option<bool>,
    pub excluded_from_budget: Option<bool>,
}

impl NewTransaction {
    pub fn into_transaction(self, user_id: &str, now: DateTime<Utc>) -> Transaction {
        let category_source = self.category.as_ref().map(|_| CategorySource::User);
        Transaction {
            transaction_id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            external_id: Uuid::new_v4().to_string(),
            name: self.name,
            amount: self.amount,
            normalized_amount: self.normalized_amount.unwrap_or_else(|| self.amount.abs()),
            date: self.date,
            category_corrected: false,
            category: self.category,
            category_source,
            merchant_name: self.merchant_name,
            transaction_type: self
                .transaction_type
                .unwrap_or_else(|| TransactionType::from_amount(self.amount)),
            account_type: self.account_type,
            account_subtype: self.account_subtype,
            is_recurring: self.is_recurring.unwrap_or(false),
            excluded_from_budget: self.excluded_from_budget.unwrap_or(false),
            tags: self.tags.unwrap_or_default(),
            description: self.description,
            account_id: self.account_id,
            credential_id: self.credential_id,
            created_utc: now,
            updated_utc: now,
        }
    }
}

/// Partial update of user-owned transaction fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionUpdate {
    #[serde(default)]
    pub category: Patch<String>,
    #[serde(default)]
    pub transaction_type: Patch<TransactionType>,
    #[serde(default)]
    pub merchant_name: Patch<String>,
    #[serde(default)]
    pub description: Patch<String>,
    #[serde(default)]
    pub tags: Patch<BTreeSet<String>>,
    #[serde(default)]
    pub excluded_from_budget: Patch<bool>,
}

impl TransactionUpdate {
    /// Apply to `transaction`. A category edit transfers ownership of the
    /// category to the user.
    pub fn apply(self, transaction: &mut Transaction, now: DateTime<Utc>) {
        if let Patch::Set(category) = self.category {
            transaction.category = Some(category);
            transaction.category_source = Some(CategorySource::User);
            transaction.category_corrected = true;
        }
        self.transaction_type
            .apply_to(&mut transaction.transaction_type);
        if let Patch::Set(merchant) = self.merchant_name {
            transaction.merchant_name = Some(merchant);
        }
        if let Patch::Set(description) = self.description {
            transaction.description = Some(description);
        }
        self.tags.apply_to(&mut transaction.tags);
        self.excluded_from_budget
            .apply_to(&mut transaction.excluded_from_budget);
        transaction.updated_utc = now;
    }
}

/// Transaction list filter. Empty vectors and `None` mean "no constraint".
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub categories: Vec<String>,
    pub account_types: Vec<AccountKind>,
    pub transaction_types: Vec<TransactionType>,
    pub merchant_name: Option<String>,
    pub search: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub exclude_transfers: bool,
    pub only_recurring: bool,
    pub page: u32,
    pub limit: u32,
}

impl Default for TransactionFilter {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            categories: Vec::new(),
            account_types: Vec::new(),
            transaction_types: Vec::new(),
            merchant_name: None,
            search: None,
            min_amount: None,
            max_amount: None,
            exclude_transfers: false,
            only_recurring: false,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl TransactionFilter {
    /// 1-based page, at least 1.
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    /// Page size clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    /// In-process evaluation of the filter (ignores paging).
    pub fn matches(&self, t: &Transaction) -> bool {
        if self.start_date.is_some_and(|start| t.date < start) {
            return false;
        }
        if self.end_date.is_some_and(|end| t.date > end) {
            return false;
        }
        if !self.categories.is_empty()
            && !t
                .category
                .as_ref()
                .is_some_and(|c| self.categories.contains(c))
        {
            return false;
        }
        if !self.account_types.is_empty()
            && !t
                .account_type
                .is_some_and(|k| self.account_types.contains(&k))
        {
            return false;
        }
        if !self.transaction_types.is_empty()
            && !self.transaction_types.contains(&t.transaction_type)
        {
            return false;
        }
        if let Some(merchant) = non_blank(&self.merchant_name) {
            let needle = merchant.to_lowercase();
            if !t
                .merchant_name
                .as_ref()
                .is_some_and(|m| m.to_lowercase().contains(&needle))
            {
                return false;
            }
        }
        if let Some(search) = non_blank(&self.search) {
            if !t.name.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        if self.min_amount.is_some_and(|min| t.amount < min) {
            return false;
        }
        if self.max_amount.is_some_and(|max| t.amount > max) {
            return false;
        }
        if self.exclude_transfers && t.transaction_type == TransactionType::Transfer {
            return false;
        }
        if self.only_recurring && !t.is_recurring {
            return false;
        }
        true
    }
}

pub(crate) fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionPageResult {
    pub data: Vec<Transaction>,
    pub pagination: Pagination,
}
