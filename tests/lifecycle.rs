use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use testresult::TestResult;

use bookhaven::domain::aggregates::{Book, Sale};
use bookhaven::domain::value_objects::Money;
use bookhaven::gateways::{LogMailer, LogNotifier};
use bookhaven::services::{CartService, CatalogService, OrderLifecycle};
use bookhaven::store::{MemoryStore, SharedStore};
use bookhaven::workers::{OutboxDispatcher, OutboxSettings, SaleExpirySweeper, SweeperSettings};
use bookhaven::BookstoreError;

fn book(price: i64) -> Book {
    Book {
        id: 0,
        title: "Kindred".into(),
        author: "Octavia E. Butler".into(),
        isbn: "978-0807083697".into(),
        price: Money::new(Decimal::new(price, 0)),
        publication_year: 1979,
        description: String::new(),
        category: "Fiction".into(),
        image_path: None,
        sale: None,
    }
}

fn wire(store: &MemoryStore) -> (Arc<OrderLifecycle>, CartService, CatalogService) {
    let shared: SharedStore = Arc::new(store.clone());
    let dispatcher = Arc::new(OutboxDispatcher::new(
        shared.clone(),
        Arc::new(LogMailer),
        Arc::new(LogNotifier),
        OutboxSettings::default(),
    ));
    (
        Arc::new(OrderLifecycle::new(shared.clone(), dispatcher)),
        CartService::new(shared.clone()),
        CatalogService::new(shared),
    )
}

#[tokio::test]
async fn concurrent_orders_for_one_cart_line_place_exactly_one() -> TestResult {
    let store = MemoryStore::new();
    let user = store.insert_user("reader", "reader@example.com").await;
    let b = store.insert_book(book(12)).await;
    let (orders, cart, _) = wire(&store);
    cart.add(user.id, b.id, 3).await?;

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let orders = orders.clone();
            let (user_id, book_id) = (user.id, b.id);
            tokio::spawn(async move { orders.add_to_order(user_id, book_id).await })
        })
        .collect();

    let mut placed = 0;
    for attempt in attempts {
        match attempt.await? {
            Ok(_) => placed += 1,
            Err(BookstoreError::Rejected(_) | BookstoreError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(placed, 1);
    assert_eq!(orders.user_orders(user.id).await?.len(), 1);
    assert!(cart.items(user.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn expired_sale_stops_discounting_before_and_after_the_sweep() -> TestResult {
    let store = MemoryStore::new();
    let user = store.insert_user("reader", "reader@example.com").await;
    let now = Utc::now();
    let mut on_sale = book(40);
    on_sale.start_sale(Sale::new(Decimal::new(30, 0), now - Duration::days(10), now - Duration::hours(1))?);
    let b = store.insert_book(on_sale).await;
    let (orders, cart, catalog) = wire(&store);

    assert!(!catalog.get_book(b.id).await?.is_on_sale);

    cart.add(user.id, b.id, 1).await?;
    let placed = orders.add_to_order(user.id, b.id).await?;
    assert_eq!(placed.discount_percentage, Decimal::ZERO);

    let sweeper = SaleExpirySweeper::new(Arc::new(store.clone()), SweeperSettings::default());
    assert_eq!(sweeper.sweep_once(Utc::now()).await?, 1);
    assert_eq!(sweeper.sweep_once(Utc::now()).await?, 0);
    assert!(!catalog.get_book(b.id).await?.is_on_sale);
    Ok(())
}

#[tokio::test]
async fn running_sale_beats_smaller_tier_discount() -> TestResult {
    let store = MemoryStore::new();
    let user = store.insert_user("reader", "reader@example.com").await;
    let now = Utc::now();
    let mut on_sale = book(40);
    on_sale.start_sale(Sale::new(Decimal::new(25, 0), now - Duration::days(1), now + Duration::days(1))?);
    let b = store.insert_book(on_sale).await;
    let (orders, cart, _) = wire(&store);

    cart.add(user.id, b.id, 5).await?;
    let placed = orders.add_to_order(user.id, b.id).await?;

    assert_eq!(placed.discount_percentage, Decimal::new(25, 0));
    let view = orders.get_order(placed.order_id, user.id, false).await?;
    assert_eq!(view.unit_price.map(|m| m.amount()), Some(Decimal::new(30, 0)));
    assert_eq!(view.total.map(|m| m.amount()), Some(Decimal::new(150, 0)));
    Ok(())
}
