//! Store trait contract tests.
//!
//! These verify the transactional guarantees the services rely on: one order
//! per user and book, unique claim codes, a cart line consumed at most once,
//! compare-and-swap order writes, bounded sale sweeps and outbox claims.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use bookhaven::domain::aggregates::{CartLine, LineState, NewOrder, Order, Sale};
use bookhaven::domain::claim_code;
use bookhaven::domain::events::EmailMessage;
use bookhaven::domain::value_objects::{ClaimCode, DiscountRate, Quantity, MAX_QUANTITY};
use bookhaven::store::{Constraint, SideEffect, Store, StoreError};

use super::{book, unique, Seed};

fn new_order(line: &CartLine, code: ClaimCode) -> NewOrder {
    NewOrder {
        user_id: line.user_id,
        book_id: line.book_id,
        cart_line_id: line.id,
        quantity: line.quantity,
        claim_code: code,
        discount: DiscountRate::percent(5),
        date_added: Utc::now(),
    }
}

async fn reader_with_line<S: Store + Seed>(store: &S, quantity: u32) -> CartLine {
    let user = store.seed_user(&unique("reader")).await;
    let book = store.seed_book(book(None)).await;
    store
        .add_to_line(user, book, Quantity::new(quantity), Utc::now())
        .await
        .expect("add_to_line should succeed")
}

async fn place<S: Store>(store: &S, line: &CartLine) -> Order {
    store
        .place_order(new_order(line, claim_code::generate()), vec![])
        .await
        .expect("place_order should succeed")
        .value
}

// =============================================================================
// Orders
// =============================================================================

pub async fn test_place_order_consumes_line<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 3).await;

    let order = place(store, &line).await;

    assert_eq!(order.quantity(), Quantity::new(3));
    assert_eq!(order.discount(), DiscountRate::percent(5));
    assert!(store.active_line(line.user_id, line.book_id).await.unwrap().is_none());
    let stored = store.order(order.id()).await.unwrap().expect("order should be readable");
    assert_eq!(stored.claim_code(), order.claim_code());
    assert_eq!(store.order_by_claim_code(order.claim_code().as_str()).await.unwrap().map(|o| o.id()), Some(order.id()));
}

pub async fn test_second_order_for_book_rejected<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 1).await;
    place(store, &line).await;
    let again = store
        .add_to_line(line.user_id, line.book_id, Quantity::new(2), Utc::now())
        .await
        .unwrap();
    assert_ne!(again.id, line.id);

    let result = store.place_order(new_order(&again, claim_code::generate()), vec![]).await;

    assert!(matches!(result, Err(StoreError::Duplicate(Constraint::OrderPerBook))), "got {result:?}");
    // The failed insert must not consume the new line.
    let active = store.active_line(line.user_id, line.book_id).await.unwrap();
    assert_eq!(active.map(|l| l.id), Some(again.id));
    assert_eq!(store.user_orders(line.user_id).await.unwrap().len(), 1);
}

pub async fn test_claim_code_unique_across_users<S: Store + Seed>(store: &S) {
    let first = reader_with_line(store, 1).await;
    let taken = place(store, &first).await.claim_code().clone();
    let second = reader_with_line(store, 1).await;

    let result = store.place_order(new_order(&second, taken.clone()), vec![]).await;

    assert!(matches!(result, Err(StoreError::Duplicate(Constraint::ClaimCode))), "got {result:?}");
    assert!(store.claim_code_taken(&taken).await.unwrap());
    assert!(store.active_line(second.user_id, second.book_id).await.unwrap().is_some());
    assert!(store.user_orders(second.user_id).await.unwrap().is_empty());
}

pub async fn test_cart_line_consumed_once<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 1).await;
    place(store, &line).await;

    let replay = store.place_order(new_order(&line, claim_code::generate()), vec![]).await;

    assert!(matches!(replay, Err(StoreError::Stale(_))), "got {replay:?}");
}

pub async fn test_concurrent_place_order_single_winner<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 2).await;

    let (a, b) = tokio::join!(
        store.place_order(new_order(&line, claim_code::generate()), vec![]),
        store.place_order(new_order(&line, claim_code::generate()), vec![]),
    );

    let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(wins, 1);
    assert!(matches!(a.err().or(b.err()), Some(StoreError::Stale(_))));
    assert_eq!(store.user_orders(line.user_id).await.unwrap().len(), 1);
}

pub async fn test_changed_quantity_is_stale<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 1).await;
    store
        .set_line_quantity(line.user_id, line.book_id, Quantity::new(4))
        .await
        .unwrap();

    let result = store.place_order(new_order(&line, claim_code::generate()), vec![]).await;

    assert!(matches!(result, Err(StoreError::Stale(_))), "got {result:?}");
}

pub async fn test_stale_save_rejected<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 2).await;
    let before = place(store, &line).await;
    let mut approved = before.clone();
    approved.approve().unwrap();

    store.save_order(&before, &approved, vec![]).await.expect("first save should succeed");

    let mut cancelled = before.clone();
    cancelled.cancel_one().unwrap();
    let result = store.save_order(&before, &cancelled, vec![]).await;
    assert!(matches!(result, Err(StoreError::Stale(_))), "got {result:?}");

    let stored = store.order(before.id()).await.unwrap().unwrap();
    assert!(stored.is_purchased());
    assert_eq!(stored.quantity(), Quantity::new(2));
    assert_eq!(store.purchased_count(line.user_id).await.unwrap(), 1);
}

pub async fn test_delete_order_is_conditional<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 1).await;
    let before = place(store, &line).await;
    let mut approved = before.clone();
    approved.approve().unwrap();
    store.save_order(&before, &approved, vec![]).await.unwrap();

    assert!(matches!(store.delete_order(&approved).await, Err(StoreError::Stale(_))));
    assert!(store.order(before.id()).await.unwrap().is_some());
}

// =============================================================================
// Cart
// =============================================================================

pub async fn test_add_to_line_upserts<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 2).await;

    let updated = store
        .add_to_line(line.user_id, line.book_id, Quantity::new(3), Utc::now())
        .await
        .unwrap();

    assert_eq!(updated.id, line.id);
    assert_eq!(updated.quantity, Quantity::new(5));
    assert_eq!(store.active_lines(line.user_id).await.unwrap().len(), 1);
}

pub async fn test_add_to_line_overflow<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, MAX_QUANTITY).await;

    let result = store.add_to_line(line.user_id, line.book_id, Quantity::new(1), Utc::now()).await;

    assert!(matches!(result, Err(StoreError::OutOfRange(_))), "got {result:?}");
    let active = store.active_line(line.user_id, line.book_id).await.unwrap().unwrap();
    assert_eq!(active.quantity, Quantity::new(MAX_QUANTITY));
}

pub async fn test_restore_with_active_line_is_duplicate<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 1).await;
    store
        .move_line(line.user_id, line.book_id, LineState::Active, LineState::Removed)
        .await
        .unwrap()
        .expect("line should be removable");
    store
        .add_to_line(line.user_id, line.book_id, Quantity::new(1), Utc::now())
        .await
        .unwrap();

    let result = store
        .move_line(line.user_id, line.book_id, LineState::Removed, LineState::Active)
        .await;

    assert!(matches!(result, Err(StoreError::Duplicate(Constraint::ActiveCartLine))), "got {result:?}");
}

// =============================================================================
// Sales
// =============================================================================

pub async fn test_clear_expired_sales_bounded<S: Store + Seed>(store: &S) {
    let now = Utc::now();
    let percent = Decimal::new(1250, 2);
    let mut expired = Vec::new();
    for _ in 0..3 {
        let sale = Sale::new(percent, now - Duration::days(3), now - Duration::days(1)).unwrap();
        expired.push(store.seed_book(book(Some(sale))).await);
    }
    let running = Sale::new(percent, now - Duration::days(1), now + Duration::days(1)).unwrap();
    let running = store.seed_book(book(Some(running))).await;

    let first = store.clear_expired_sales(now, 2).await.unwrap();
    let second = store.clear_expired_sales(now, 2).await.unwrap();
    let third = store.clear_expired_sales(now, 2).await.unwrap();

    assert_eq!((first.len(), second.len(), third.len()), (2, 1, 0));
    let mut cleared: Vec<i64> = first.into_iter().chain(second).collect();
    cleared.sort_unstable();
    assert_eq!(cleared, expired);
    let kept = store.book(running).await.unwrap().unwrap();
    assert_eq!(kept.sale.map(|s| s.discount().as_percent()), Some(percent));
}

// =============================================================================
// Outbox
// =============================================================================

pub async fn test_outbox_claim_and_prune<S: Store + Seed>(store: &S) {
    let line = reader_with_line(store, 1).await;
    let email = EmailMessage { to: "reader@example.com".into(), subject: "Order".into(), html_body: String::new() };
    let committed = store
        .place_order(new_order(&line, claim_code::generate()), vec![SideEffect::Email(email)])
        .await
        .unwrap();
    assert_eq!(committed.outbox.len(), 1);
    let id = committed.outbox[0].id;

    let now = Utc::now();
    let cutoff = now + Duration::minutes(1);
    let lease = now + Duration::minutes(10);
    let claimed = store.claim_deliveries(now, cutoff, lease, 10, 50).await.unwrap();
    assert_eq!(claimed.iter().map(|e| e.id).collect::<Vec<_>>(), vec![id]);
    assert!(store.claim_deliveries(now, cutoff, lease, 10, 50).await.unwrap().is_empty());

    store.record_failure(id, "relay refused").await.unwrap();
    let retried = store.claim_deliveries(now, cutoff, lease, 10, 50).await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].attempts, 1);

    store.mark_delivered(id, now - Duration::days(8)).await.unwrap();
    assert_eq!(store.prune_delivered(now - Duration::days(7)).await.unwrap(), 1);
    assert_eq!(store.prune_delivered(now - Duration::days(7)).await.unwrap(), 0);
    assert!(store.claim_deliveries(now, cutoff, lease, 10, 50).await.unwrap().is_empty());
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run every store contract test against a store implementation.
#[macro_export]
macro_rules! run_store_contract_tests {
    ($store:expr) => {
        use $crate::storage::store_contract_tests::*;

        test_place_order_consumes_line($store).await;
        println!("  test_place_order_consumes_line: PASSED");

        test_second_order_for_book_rejected($store).await;
        println!("  test_second_order_for_book_rejected: PASSED");

        test_claim_code_unique_across_users($store).await;
        println!("  test_claim_code_unique_across_users: PASSED");

        test_cart_line_consumed_once($store).await;
        println!("  test_cart_line_consumed_once: PASSED");

        test_concurrent_place_order_single_winner($store).await;
        println!("  test_concurrent_place_order_single_winner: PASSED");

        test_changed_quantity_is_stale($store).await;
        println!("  test_changed_quantity_is_stale: PASSED");

        test_stale_save_rejected($store).await;
        println!("  test_stale_save_rejected: PASSED");

        test_delete_order_is_conditional($store).await;
        println!("  test_delete_order_is_conditional: PASSED");

        test_add_to_line_upserts($store).await;
        println!("  test_add_to_line_upserts: PASSED");

        test_add_to_line_overflow($store).await;
        println!("  test_add_to_line_overflow: PASSED");

        test_restore_with_active_line_is_duplicate($store).await;
        println!("  test_restore_with_active_line_is_duplicate: PASSED");

        test_clear_expired_sales_bounded($store).await;
        println!("  test_clear_expired_sales_bounded: PASSED");

        test_outbox_claim_and_prune($store).await;
        println!("  test_outbox_claim_and_prune: PASSED");
    };
}
