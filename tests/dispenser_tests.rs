use key_dispenser::dispenser::{
    issue_to_operator, Dispenser, Issue, PaymentOutcome, UserRef, RECEIPT_MARKER,
};
use key_dispenser::inventory::KeyInventory;
use key_dispenser::{InventoryError, KeyPool};
use std::sync::Arc;

const RECEIPT: &str = "https://t.me/send?start=IVabc123";

async fn setup_dispenser() -> Dispenser {
    let inventory = KeyInventory::open_in_memory()
        .await
        .expect("Failed to open in-memory inventory");
    Dispenser::new(Arc::new(inventory))
}

fn user(id: i64) -> UserRef {
    UserRef {
        id,
        username: Some(format!("user{}", id)),
        first_name: Some("Test".to_string()),
        last_name: Some("User".to_string()),
    }
}

#[tokio::test]
async fn test_trial_issue_and_exhaustion() {
    let dispenser = setup_dispenser().await;
    dispenser.inventory().bulk_insert_trial(["t1"]).await;

    assert_eq!(dispenser.request_trial(&user(1)).await, Issue::Issued("t1".to_string()));
    assert_eq!(dispenser.request_trial(&user(2)).await, Issue::OutOfKeys);

    let stats = dispenser.stats().await.expect("stats unavailable");
    assert_eq!(stats.trial.used, 1);
    assert_eq!(stats.trial.available, 0);
}

#[tokio::test]
async fn test_payment_without_session_is_ignored() {
    let dispenser = setup_dispenser().await;
    dispenser.inventory().bulk_insert_paid(["p1"]).await;

    assert_eq!(dispenser.submit_payment(&user(1), RECEIPT).await, PaymentOutcome::NoSession);

    let stats = dispenser.stats().await.expect("stats unavailable");
    assert_eq!(stats.paid.used, 0);
}

#[tokio::test]
async fn test_purchase_flow_issues_paid_key() {
    let dispenser = setup_dispenser().await;
    dispenser.inventory().bulk_insert_paid(["p1", "p2"]).await;
    let buyer = user(10);

    dispenser.begin_purchase(buyer.id).await;
    assert!(dispenser.has_pending_purchase(buyer.id).await);
    assert!(!dispenser.has_pending_purchase(11).await);

    let outcome = dispenser.submit_payment(&buyer, RECEIPT).await;
    assert_eq!(outcome, PaymentOutcome::Issued("p1".to_string()));
    assert!(!dispenser.has_pending_purchase(buyer.id).await);

    // 会话已结束，再次发送收据不会发放第二个 key
    assert_eq!(dispenser.submit_payment(&buyer, RECEIPT).await, PaymentOutcome::NoSession);
    let stats = dispenser.stats().await.expect("stats unavailable");
    assert_eq!(stats.paid.used, 1);
}

#[tokio::test]
async fn test_invalid_receipt_clears_session() {
    let dispenser = setup_dispenser().await;
    dispenser.inventory().bulk_insert_paid(["p1"]).await;
    let buyer = user(20);

    dispenser.begin_purchase(buyer.id).await;
    assert!(!"paid, trust me".contains(RECEIPT_MARKER));
    assert_eq!(
        dispenser.submit_payment(&buyer, "paid, trust me").await,
        PaymentOutcome::InvalidReceipt
    );
    assert!(!dispenser.has_pending_purchase(buyer.id).await);

    let stats = dispenser.stats().await.expect("stats unavailable");
    assert_eq!(stats.paid.used, 0);
}

#[tokio::test]
async fn test_paid_pool_exhausted_clears_session() {
    let dispenser = setup_dispenser().await;
    let buyer = user(30);

    dispenser.begin_purchase(buyer.id).await;
    assert_eq!(dispenser.submit_payment(&buyer, RECEIPT).await, PaymentOutcome::OutOfKeys);
    assert!(!dispenser.has_pending_purchase(buyer.id).await);
}

#[tokio::test]
async fn test_sessions_are_per_user() {
    let dispenser = setup_dispenser().await;
    dispenser.inventory().bulk_insert_paid(["p1", "p2"]).await;

    dispenser.begin_purchase(1).await;
    dispenser.begin_purchase(2).await;
    assert!(dispenser.cancel_purchase(1).await);
    assert!(!dispenser.cancel_purchase(1).await);

    assert_eq!(dispenser.submit_payment(&user(1), RECEIPT).await, PaymentOutcome::NoSession);
    assert_eq!(
        dispenser.submit_payment(&user(2), RECEIPT).await,
        PaymentOutcome::Issued("p1".to_string())
    );
}

#[tokio::test]
async fn test_shutdown_releases_storage() {
    let dispenser = setup_dispenser().await;
    dispenser.inventory().bulk_insert_trial(["t1"]).await;
    dispenser.begin_purchase(5).await;

    dispenser.shutdown().await;

    assert!(!dispenser.has_pending_purchase(5).await);
    assert_eq!(dispenser.request_trial(&user(1)).await, Issue::Failed);
    assert!(dispenser.stats().await.is_none());
}

#[tokio::test]
async fn test_repeated_buy_keeps_a_single_session() {
    let dispenser = setup_dispenser().await;
    dispenser.inventory().bulk_insert_paid(["p1", "p2"]).await;
    let buyer = user(40);

    dispenser.begin_purchase(buyer.id).await;
    dispenser.begin_purchase(buyer.id).await;

    assert_eq!(
        dispenser.submit_payment(&buyer, RECEIPT).await,
        PaymentOutcome::Issued("p1".to_string())
    );
    assert_eq!(dispenser.submit_payment(&buyer, RECEIPT).await, PaymentOutcome::NoSession);
    assert!(!dispenser.cancel_purchase(buyer.id).await);
}

#[tokio::test]
async fn test_operator_take_reports_exhaustion_and_storage_failure_apart() {
    let inventory = KeyInventory::open_in_memory()
        .await
        .expect("Failed to open in-memory inventory");
    inventory.bulk_insert_trial(["t1"]).await;

    let key = issue_to_operator(&inventory, KeyPool::Trial).await.expect("expected a key");
    assert_eq!(key, "t1");

    let err = issue_to_operator(&inventory, KeyPool::Trial).await.unwrap_err();
    assert!(matches!(err, InventoryError::PoolExhausted(KeyPool::Trial)));

    inventory.close().await;
    let err = issue_to_operator(&inventory, KeyPool::Trial).await.unwrap_err();
    assert!(matches!(err, InventoryError::Storage(_)));
}
