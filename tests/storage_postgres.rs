//! PostgreSQL storage integration tests using testcontainers.
//!
//! Run with: cargo test --test storage_postgres --features postgres-tests -- --nocapture
//!
//! Starts PostgreSQL in a container, applies the migrations and runs the store
//! contract against `PgStore`.

mod storage;

use std::time::Duration;

use async_trait::async_trait;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};

use bookhaven::domain::aggregates::Book;
use bookhaven::store::{CatalogStore, PgStore};

use storage::Seed;

#[async_trait]
impl Seed for PgStore {
    async fn seed_user(&self, email: &str) -> i64 {
        let (id,): (i64,) = sqlx::query_as("INSERT INTO users (user_name, email) VALUES ('reader', $1) RETURNING id")
            .bind(email)
            .fetch_one(self.pool())
            .await
            .expect("Failed to insert user");
        id
    }

    async fn seed_book(&self, book: Book) -> i64 {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO books (title, author, isbn, price, publication_year, description, category) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(book.price.amount())
        .bind(book.publication_year)
        .bind(&book.description)
        .bind(&book.category)
        .fetch_one(self.pool())
        .await
        .expect("Failed to insert book");
        if book.sale.is_some() {
            self.save_sale(id, book.sale).await.expect("Failed to start sale");
        }
        id
    }
}

/// Start PostgreSQL container.
///
/// Returns (container, connection_string).
async fn start_postgres() -> (testcontainers::ContainerAsync<GenericImage>, String) {
    // PostgreSQL logs the ready line once during init and once when it is
    // actually serving, hence the short sleep afterwards.
    let image = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout("database system is ready to accept connections"));

    let container = image
        .with_env_var("POSTGRES_USER", "bookhaven")
        .with_env_var("POSTGRES_PASSWORD", "bookhaven")
        .with_env_var("POSTGRES_DB", "bookhaven")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");

    tokio::time::sleep(Duration::from_secs(1)).await;

    let host_port = container.get_host_port_ipv4(5432).await.expect("Failed to get mapped port");
    let host = container.get_host().await.expect("Failed to get container host");
    let connection_string = format!("postgres://bookhaven:bookhaven@{host}:{host_port}/bookhaven");

    println!("PostgreSQL available at: {connection_string}");

    (container, connection_string)
}

#[tokio::test]
async fn test_postgres_store_contract() {
    println!("=== PostgreSQL store contract tests ===");
    println!("Starting PostgreSQL container...");

    let (_container, connection_string) = start_postgres().await;
    let store = PgStore::connect(&connection_string, 5).await.expect("Failed to connect to PostgreSQL");
    store.migrate().await.expect("Failed to run migrations");

    println!("Running store contract tests...");
    run_store_contract_tests!(&store);

    println!("=== All PostgreSQL store contract tests PASSED ===");
}

#[tokio::test]
async fn test_postgres_claim_code_length_is_bounded() {
    let (_container, connection_string) = start_postgres().await;
    let store = PgStore::connect(&connection_string, 2).await.expect("Failed to connect to PostgreSQL");
    store.migrate().await.expect("Failed to run migrations");

    let result = sqlx::query(
        "INSERT INTO orders (user_id, book_id, quantity, claim_code) \
         VALUES ($1, $2, 1, $3)",
    )
    .bind(store.seed_user(&storage::unique("reader")).await)
    .bind(store.seed_book(storage::book(None)).await)
    .bind("X".repeat(65))
    .execute(store.pool())
    .await;

    let err = result.expect_err("a 65 character claim code should violate the check");
    let constraint = err.as_database_error().and_then(|db| db.constraint().map(str::to_owned));
    assert_eq!(constraint.as_deref(), Some("orders_claim_code_length"));
}
