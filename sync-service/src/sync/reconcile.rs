//! Merge policy between provider records and local rows.
//!
//! Pure functions: no I/O, no clock. The caller supplies the existing row (if
//! any) and a [`MergeContext`]; the result is the row to upsert.

use crate::models::{Account, AccountKind, CategorySource, Transaction, TransactionType};
use crate::provider::{ProviderAccount, ProviderTransaction};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Who and when a merge happens for.
#[derive(Debug, Clone, Copy)]
pub struct MergeContext<'a> {
    pub user_id: &'a str,
    pub credential_id: Uuid,
    pub now: DateTime<Utc>,
}

/// Merge a provider account into the local row matched by external id.
///
/// Provider-sourced fields are always overwritten. `display_name`, `color`
/// and `is_hidden` are carried over from `existing` untouched.
pub fn merge_account(
    existing: Option<Account>,
    incoming: &ProviderAccount,
    ctx: &MergeContext<'_>,
) -> Account {
    let kind = AccountKind::from_provider_type(&incoming.account_type);
    let account_subtype = incoming
        .subtype
        .clone()
        .or_else(|| Some(kind.as_str().to_string()));

    let mut account = existing.unwrap_or_else(|| Account {
        account_id: Uuid::new_v4(),
        user_id: ctx.user_id.to_string(),
        external_id: incoming.external_account_id.clone(),
        name: String::new(),
        official_name: None,
        provider_type: String::new(),
        provider_subtype: None,
        account_type: kind,
        account_subtype: None,
        current_balance: Decimal::ZERO,
        available_balance: None,
        credit_limit: None,
        balance_updated_utc: None,
        display_name: None,
        color: None,
        is_hidden: false,
        is_active: true,
        deactivated_utc: None,
        credential_id: None,
        created_utc: ctx.now,
        updated_utc: ctx.now,
    });

    account.user_id = ctx.user_id.to_string();
    account.name = incoming.name.clone();
    account.official_name = incoming.official_name.clone();
    account.provider_type = incoming.account_type.clone();
    account.provider_subtype = incoming.subtype.clone();
    account.account_type = kind;
    account.account_subtype = account_subtype;
    account.current_balance = incoming.current_balance.unwrap_or(Decimal::ZERO);
    account.available_balance = incoming.available_balance;
    account.credit_limit = incoming.limit;
    account.balance_updated_utc = Some(ctx.now);
    account.credential_id = Some(ctx.credential_id);
    account.updated_utc = ctx.now;
    account
}

/// Merge an added or modified provider transaction into the local row matched
/// by external id.
///
/// `owner` is the local account resolved from the provider account id. When
/// it is absent the account link and denormalized account fields keep their
/// previous values (unset for a new row).
///
/// A `user`-sourced category is never overwritten. The transaction type is
/// recomputed from the amount sign on every merge, including rows whose type
/// was edited by the user.
pub fn merge_transaction(
    existing: Option<Transaction>,
    incoming: &ProviderTransaction,
    owner: Option<&Account>,
    ctx: &MergeContext<'_>,
) -> Transaction {
    let mut transaction = existing.unwrap_or_else(|| Transaction {
        transaction_id: Uuid::new_v4(),
        user_id: ctx.user_id.to_string(),
        external_id: incoming.external_transaction_id.clone(),
        name: String::new(),
        amount: Decimal::ZERO,
        normalized_amount: Decimal::ZERO,
        date: incoming.date,
        category: None,
        category_source: None,
        category_corrected: false,
        merchant_name: None,
        transaction_type: TransactionType::Expense,
        account_type: None,
        account_subtype: None,
        is_recurring: false,
        excluded_from_budget: false,
        tags: BTreeSet::new(),
        description: None,
        account_id: None,
        credential_id: None,
        created_utc: ctx.now,
        updated_utc: ctx.now,
    });

    transaction.user_id = ctx.user_id.to_string();
    transaction.name = incoming.name.clone();
    transaction.amount = incoming.amount;
    transaction.normalized_amount = incoming.amount.abs();
    transaction.date = incoming.date;
    transaction.merchant_name = incoming.merchant_name.clone();
    transaction.credential_id = Some(ctx.credential_id);

    if !transaction.has_user_category() {
        if let Some(leaf) = incoming.leaf_category() {
            transaction.category = Some(leaf.to_string());
            transaction.category_source = Some(CategorySource::Provider);
        }
    }

    transaction.transaction_type = TransactionType::from_amount(incoming.amount);

    if let Some(account) = owner {
        transaction.account_id = Some(account.account_id);
        transaction.account_type = Some(account.account_type);
        transaction.account_subtype = account.account_subtype.clone();
    }

    transaction.updated_utc = ctx.now;
    transaction
}
