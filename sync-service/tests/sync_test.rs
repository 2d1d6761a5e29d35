//! End-to-end sync passes against the in-process store and a scripted provider.

mod common;

use common::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use sync_service::error::SyncError;
use sync_service::models::{
    AccountKind, AccountPreferences, CategorySource, Patch, TransactionType, TransactionUpdate,
    UserContext,
};
use sync_service::services::{AccountService, TransactionService};
use sync_service::store::Store;
use sync_service::sync::SyncStatus;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const USER: &str = "user-1";
const ITEM: &str = "item-1";

fn user() -> UserContext {
    UserContext::new(USER)
}

/// Stored rows without timestamps, ordered by external id.
async fn snapshot(h: &Harness) -> Vec<(String, Decimal, TransactionType, Option<String>)> {
    h.store
        .all_transactions()
        .await
        .into_iter()
        .map(|t| (t.external_id, t.amount, t.transaction_type, t.category))
        .collect()
}

fn checking() -> Vec<sync_service::provider::ProviderAccount> {
    vec![provider_account("acc-1", "depository", Some("checking"))]
}

#[tokio::test]
async fn test_first_sync_classifies_and_persists_cursor() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.with_page(
        ITEM,
        None,
        page(
            vec![
                provider_txn("t1", "acc-1", -5000, &["Transfer", "Payroll"]),
                provider_txn("t2", "acc-1", 2500, &["Food and Drink", "Coffee"]),
            ],
            vec![],
            &[],
            "c1",
            false,
        ),
    );

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Complete);
    assert_eq!(report.added(), 2);
    assert_eq!(report.modified(), 0);
    assert_eq!(report.credentials[0].accounts, 1);

    let account = h.store.find_account_by_external_id("acc-1").await.unwrap().unwrap();
    assert_eq!(account.account_type, AccountKind::Checking);
    assert_eq!(account.user_id, USER);
    assert_eq!(account.credential_id, Some(credential.credential_id));
    assert!(account.balance_updated_utc.is_some());

    let income = h.store.find_transaction_by_external_id("t1").await.unwrap().unwrap();
    assert_eq!(income.transaction_type, TransactionType::Income);
    assert_eq!(income.amount, money(-5000));
    assert_eq!(income.normalized_amount, money(5000));
    assert_eq!(income.category.as_deref(), Some("Payroll"));
    assert_eq!(income.category_source, Some(CategorySource::Provider));
    assert_eq!(income.account_id, Some(account.account_id));
    assert_eq!(income.account_type, Some(AccountKind::Checking));
    assert_eq!(income.account_subtype.as_deref(), Some("checking"));

    let expense = h.store.find_transaction_by_external_id("t2").await.unwrap().unwrap();
    assert_eq!(expense.transaction_type, TransactionType::Expense);
    assert_eq!(expense.normalized_amount, money(2500));

    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("c1"));
    assert!(stored.last_synced_utc.is_some());
}

#[tokio::test]
async fn test_second_sync_resumes_from_cursor() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t2", "acc-1", 2500, &[])], vec![], &[], "c1", false),
    );
    h.provider.with_page(
        ITEM,
        Some("c1"),
        page(vec![], vec![provider_txn("t2", "acc-1", 3000, &[])], &[], "c2", false),
    );

    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.added(), 0);
    assert_eq!(report.modified(), 1);
    let t2 = h.store.find_transaction_by_external_id("t2").await.unwrap().unwrap();
    assert_eq!(t2.amount, money(3000));
    assert_eq!(
        h.provider.page_calls(),
        vec![
            (ITEM.to_string(), None),
            (ITEM.to_string(), Some("c1".to_string())),
        ]
    );
}

#[tokio::test]
async fn test_multi_page_changelog_follows_cursor() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &[], "c1", true),
    );
    h.provider.with_page(
        ITEM,
        Some("c1"),
        page(vec![provider_txn("t2", "acc-1", 200, &[])], vec![], &[], "c2", false),
    );

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.added(), 2);
    assert_eq!(h.provider.page_calls().len(), 2);
    assert_eq!(h.provider.page_calls()[1].1.as_deref(), Some("c1"));
    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_replaying_a_changelog_is_idempotent() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.with_page(
        ITEM,
        None,
        page(
            vec![
                provider_txn("t1", "acc-1", -5000, &["Payroll"]),
                provider_txn("t2", "acc-1", 2500, &["Coffee"]),
            ],
            vec![],
            &["t-gone"],
            "c1",
            false,
        ),
    );

    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    let first = snapshot(&h).await;
    let first_ids: Vec<_> = h
        .store
        .all_transactions()
        .await
        .into_iter()
        .map(|t| t.transaction_id)
        .collect();

    // Rewind the cursor as if the previous pass never committed.
    set_cursor(&h.store, credential.credential_id, None).await;
    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(snapshot(&h).await, first);
    let second_ids: Vec<_> = h
        .store
        .all_transactions()
        .await
        .into_iter()
        .map(|t| t.transaction_id)
        .collect();
    assert_eq!(second_ids, first_ids);
    assert_eq!(h.store.all_accounts().await.len(), 1);
}

#[tokio::test]
async fn test_user_category_survives_resync() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t1", "acc-1", 1200, &["Food", "Coffee"])], vec![], &[], "c1", false),
    );
    h.provider.with_page(
        ITEM,
        Some("c1"),
        page(vec![], vec![provider_txn("t1", "acc-1", 1300, &["Food", "Restaurants"])], &[], "c2", false),
    );
    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let service = TransactionService::new(h.store.clone());
    service
        .update_by_external_id(
            &user(),
            "t1",
            TransactionUpdate {
                category: Patch::Set("Treats".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let t1 = h.store.find_transaction_by_external_id("t1").await.unwrap().unwrap();
    assert_eq!(t1.category.as_deref(), Some("Treats"));
    assert_eq!(t1.category_source, Some(CategorySource::User));
    assert!(t1.category_corrected);
    assert_eq!(t1.amount, money(1300));
}

#[tokio::test]
async fn test_user_set_type_is_recomputed_on_resync() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t2", "acc-1", 2500, &[])], vec![], &[], "c1", false),
    );
    h.provider.with_page(
        ITEM,
        Some("c1"),
        page(vec![], vec![provider_txn("t2", "acc-1", 2500, &[])], &[], "c2", false),
    );
    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let service = TransactionService::new(h.store.clone());
    let edited = service
        .update_by_external_id(
            &user(),
            "t2",
            TransactionUpdate {
                transaction_type: Patch::Set(TransactionType::Transfer),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.transaction_type, TransactionType::Transfer);

    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let t2 = h.store.find_transaction_by_external_id("t2").await.unwrap().unwrap();
    assert_eq!(t2.transaction_type, TransactionType::Expense);
}

#[tokio::test]
async fn test_account_display_fields_survive_resync() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider
        .with_page(ITEM, None, page(vec![], vec![], &[], "c1", false));
    h.provider
        .with_page(ITEM, Some("c1"), page(vec![], vec![], &[], "c1", false));
    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let accounts = AccountService::new(h.store.clone());
    let before = accounts
        .update_preferences(
            &user(),
            "acc-1",
            AccountPreferences {
                display_name: Patch::Set("Joint".to_string()),
                color: Patch::Set("#3366ff".to_string()),
                is_hidden: Patch::Set(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut renamed = provider_account("acc-1", "depository", Some("savings"));
    renamed.name = "Everyday Savings".to_string();
    renamed.current_balance = Some(money(123_45));
    h.provider.with_accounts(ITEM, vec![renamed]);
    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let after = h.store.find_account_by_external_id("acc-1").await.unwrap().unwrap();
    assert_eq!(after.account_id, before.account_id);
    assert_eq!(after.display_name.as_deref(), Some("Joint"));
    assert_eq!(after.color.as_deref(), Some("#3366ff"));
    assert!(after.is_hidden);
    assert_eq!(after.name, "Everyday Savings");
    assert_eq!(after.account_subtype.as_deref(), Some("savings"));
    assert_eq!(after.current_balance, money(123_45));
}

#[tokio::test]
async fn test_removals_count_even_when_not_stored() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &[], "c1", false),
    );
    h.provider
        .with_page(ITEM, Some("c1"), page(vec![], vec![], &["t1", "never-seen"], "c2", false));

    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.removed(), 2);
    assert!(h.store.all_transactions().await.is_empty());
}

#[tokio::test]
async fn test_added_and_removed_in_same_page_leaves_no_row() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &["t1"], "c1", false),
    );

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.added(), 1);
    assert_eq!(report.removed(), 1);
    assert!(h.store.all_transactions().await.is_empty());
}

#[tokio::test]
async fn test_empty_next_cursor_keeps_current_cursor() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    set_cursor(&h.store, credential.credential_id, Some("c1")).await;
    h.provider.with_page(
        ITEM,
        Some("c1"),
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &[], "", false),
    );

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.added(), 1);
    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_transaction_without_known_account_is_unlinked() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t1", "acc-missing", 100, &[])], vec![], &[], "c1", false),
    );

    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let t1 = h.store.find_transaction_by_external_id("t1").await.unwrap().unwrap();
    assert_eq!(t1.account_id, None);
    assert_eq!(t1.account_type, None);
}

#[tokio::test]
async fn test_unknown_account_type_maps_to_other() {
    let h = harness();
    seed_credential(&h.store, USER, ITEM).await;
    h.provider
        .with_accounts(ITEM, vec![provider_account("acc-x", "brokerage", None)]);
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t1", "acc-x", 100, &[])], vec![], &[], "c1", false),
    );

    h.orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    let account = h.store.find_account_by_external_id("acc-x").await.unwrap().unwrap();
    assert_eq!(account.account_type, AccountKind::Other);
    assert_eq!(account.account_subtype.as_deref(), Some("other"));
    let t1 = h.store.find_transaction_by_external_id("t1").await.unwrap().unwrap();
    assert_eq!(t1.account_type, Some(AccountKind::Other));
}

#[tokio::test]
async fn test_reauth_failure_deactivates_credential() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    h.provider.fail_page(ITEM, None, "ITEM_LOGIN_REQUIRED");

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Failed);
    assert!(matches!(
        report.first_error(),
        Some(SyncError::ReauthRequired { code, .. }) if code == "ITEM_LOGIN_REQUIRED"
    ));

    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert!(stored.requires_reauth);
    assert!(!stored.is_active);
    assert_eq!(stored.error_code.as_deref(), Some("ITEM_LOGIN_REQUIRED"));
    assert_eq!(stored.cursor, None);

    // Deactivated credentials are skipped.
    let next = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(next.status, SyncStatus::Complete);
    assert!(next.credentials.is_empty());
}

#[tokio::test]
async fn test_account_failure_aborts_before_changelog() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    h.provider.fail_accounts(ITEM, "INSTITUTION_DOWN");

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Failed);
    assert_eq!(report.credentials[0].error_code.as_deref(), Some("INSTITUTION_DOWN"));
    assert!(h.provider.page_calls().is_empty());

    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.error_code.as_deref(), Some("INSTITUTION_DOWN"));
    assert!(stored.is_active);
    assert!(!stored.requires_reauth);
}

#[tokio::test]
async fn test_failing_credential_does_not_block_others() {
    let h = harness();
    let healthy = seed_credential(&h.store, USER, "item-a").await;
    let broken = seed_credential(&h.store, USER, "item-b").await;
    h.provider.with_page(
        "item-a",
        None,
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &[], "a1", false),
    );
    h.provider.fail_page("item-b", None, "INTERNAL_SERVER_ERROR");

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Partial);
    assert_eq!(report.added(), 1);
    assert_eq!(report.first_error().map(SyncError::code), Some("INTERNAL_SERVER_ERROR"));

    let healthy = h.store.credential(healthy.credential_id).await.unwrap();
    assert_eq!(healthy.cursor.as_deref(), Some("a1"));
    assert!(healthy.error_code.is_none());
    let broken = h.store.credential(broken.credential_id).await.unwrap();
    assert_eq!(broken.cursor, None);
    assert_eq!(broken.error_code.as_deref(), Some("INTERNAL_SERVER_ERROR"));
}

#[tokio::test]
async fn test_failed_page_keeps_cursor_and_rerun_converges() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_page(
        ITEM,
        None,
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &[], "c1", true),
    );
    h.provider.fail_page(ITEM, Some("c1"), "RATE_LIMIT_EXCEEDED");

    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, SyncStatus::Failed);
    // The first page stays applied; the cursor does not move.
    assert_eq!(h.store.all_transactions().await.len(), 1);
    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor, None);

    h.provider.with_page(
        ITEM,
        Some("c1"),
        page(vec![provider_txn("t2", "acc-1", 200, &[])], vec![], &[], "c2", false),
    );
    let report = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, SyncStatus::Complete);
    assert_eq!(report.added(), 2);
    assert_eq!(h.store.all_transactions().await.len(), 2);
    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("c2"));
    assert!(stored.error_code.is_none());
}

#[tokio::test]
async fn test_concurrent_sync_of_same_credential_is_rejected() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    let gate = Arc::new(Notify::new());
    h.provider.gate_page(
        ITEM,
        None,
        gate.clone(),
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &[], "c1", false),
    );

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .sync_user(&user(), CancellationToken::new())
            .await
    });
    h.provider.wait_for_page_calls(1).await;

    let second = h
        .orchestrator
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.status, SyncStatus::Failed);
    assert!(matches!(
        second.first_error(),
        Some(SyncError::SyncInProgress(id)) if *id == credential.credential_id
    ));

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, SyncStatus::Complete);
    assert_eq!(first.added(), 1);

    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("c1"));
    assert!(stored.error_code.is_none());
}

#[tokio::test]
async fn test_replicas_sharing_a_store_run_one_pass_per_credential() {
    let h = harness();
    let replica = h.replica();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    let gate = Arc::new(Notify::new());
    h.provider.gate_page(
        ITEM,
        None,
        gate.clone(),
        page(vec![provider_txn("t1", "acc-1", 100, &[])], vec![], &[], "c1", false),
    );
    h.provider.with_page(ITEM, Some("c1"), page(vec![], vec![], &[], "c1", false));

    let orchestrator = h.orchestrator.clone();
    let first = tokio::spawn(async move {
        orchestrator
            .sync_user(&user(), CancellationToken::new())
            .await
    });
    h.provider.wait_for_page_calls(1).await;

    let second = replica
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.status, SyncStatus::Failed);
    assert!(matches!(
        second.first_error(),
        Some(SyncError::SyncInProgress(id)) if *id == credential.credential_id
    ));
    assert_eq!(h.provider.page_calls().len(), 1);

    gate.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status, SyncStatus::Complete);

    // The lease is released with the pass, so the replica can sync next.
    let third = replica
        .sync_user(&user(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(third.status, SyncStatus::Complete);
    assert_eq!(
        h.provider.page_calls().last(),
        Some(&(ITEM.to_string(), Some("c1".to_string())))
    );
    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_cancelled_before_start_touches_nothing() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.orchestrator.sync_user(&user(), cancel).await.unwrap();

    assert_eq!(report.status, SyncStatus::Failed);
    assert!(matches!(report.first_error(), Some(SyncError::Cancelled)));
    assert!(h.provider.account_calls().is_empty());
    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert!(stored.error_code.is_none());
    assert!(stored.is_active);
}

#[tokio::test]
async fn test_cancel_mid_changelog_leaves_cursor_unpersisted() {
    let h = harness();
    let credential = seed_credential(&h.store, USER, ITEM).await;
    h.provider.with_accounts(ITEM, checking());
    h.provider.hang_page(ITEM, None);

    let cancel = CancellationToken::new();
    let orchestrator = h.orchestrator.clone();
    let token = cancel.clone();
    let pass = tokio::spawn(async move { orchestrator.sync_user(&user(), token).await });

    h.provider.wait_for_page_calls(1).await;
    cancel.cancel();

    let report = pass.await.unwrap().unwrap();
    assert_eq!(report.status, SyncStatus::Failed);
    assert!(matches!(report.first_error(), Some(SyncError::Cancelled)));

    // Accounts were written before the changelog started.
    assert_eq!(h.store.all_accounts().await.len(), 1);
    let stored = h.store.credential(credential.credential_id).await.unwrap();
    assert_eq!(stored.cursor, None);
    assert!(stored.last_synced_utc.is_none());
}
