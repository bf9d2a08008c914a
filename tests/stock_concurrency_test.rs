use bookstore_backoffice::{
    config::AppConfig,
    db,
    services::{
        inventory_ledger::{AdjustStockRequest, StockLedger},
        orders::{CreateOrderRequest, OrderCoordinator, OrderItemRequest},
        products::{CreateProductRequest, ProductCatalogService},
    },
};
use rust_decimal_macros::dec;
use std::sync::Arc;

// Needs a Postgres database with row locks.
// Run with: DATABASE_URL=postgres://... cargo test -- --ignored concurrent_removals
#[tokio::test]
#[ignore]
async fn concurrent_removals_never_oversell() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at Postgres");
    let mut cfg = AppConfig::new(url, "test".to_string());
    cfg.db_max_connections = 20;
    cfg.db_min_connections = 1;

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");
    let pool = Arc::new(pool);

    let product = ProductCatalogService::new(pool.clone())
        .create_product(CreateProductRequest {
            name: "Concurrency Test Item".to_string(),
            category: "Test".to_string(),
            price: dec!(1),
            cost_price: dec!(0),
            stock: 10,
            min_stock: None,
            description: None,
            size: None,
            image_url: None,
        })
        .await
        .expect("seed product");

    let ledger = StockLedger::new(pool.clone());
    let mut tasks = vec![];
    for _ in 0..20 {
        let ledger = ledger.clone();
        let product_id = product.id;
        tasks.push(tokio::spawn(async move {
            ledger
                .adjust_stock(AdjustStockRequest {
                    product_id,
                    kind: "remove".to_string(),
                    quantity: 1,
                    reason: "sale".to_string(),
                    notes: None,
                })
                .await
                .is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap_or(false) {
            successes += 1;
        }
    }

    assert_eq!(successes, 10, "exactly 10 removals should succeed");
    let history = ledger.get_history(product.id).await.expect("history");
    assert_eq!(history.len(), 10);
    assert_eq!(history[0].new_stock, 0);
}

// Orders touching the same products in opposite line order must not deadlock.
// Run with: DATABASE_URL=postgres://... cargo test -- --ignored crossed_orders
#[tokio::test]
#[ignore]
async fn crossed_orders_never_deadlock() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at Postgres");
    let mut cfg = AppConfig::new(url, "test".to_string());
    cfg.db_max_connections = 20;
    cfg.db_min_connections = 1;

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("db connect");
    db::run_migrations(&pool).await.expect("migrations");
    let pool = Arc::new(pool);

    let catalog = ProductCatalogService::new(pool.clone());
    let mut products = vec![];
    for name in ["Crossed Order Item A", "Crossed Order Item B"] {
        products.push(
            catalog
                .create_product(CreateProductRequest {
                    name: name.to_string(),
                    category: "Test".to_string(),
                    price: dec!(5),
                    cost_price: dec!(0),
                    stock: 100,
                    min_stock: None,
                    description: None,
                    size: None,
                    image_url: None,
                })
                .await
                .expect("seed product"),
        );
    }
    let (a, b) = (products[0].id, products[1].id);

    let coordinator = OrderCoordinator::new(pool.clone());
    let mut tasks = vec![];
    for i in 0..20 {
        let coordinator = coordinator.clone();
        let ids = if i % 2 == 0 { [a, b] } else { [b, a] };
        tasks.push(tokio::spawn(async move {
            coordinator
                .create_order(CreateOrderRequest {
                    customer_name: format!("Crossed {}", i),
                    status: None,
                    items: ids
                        .iter()
                        .map(|&product_id| OrderItemRequest {
                            product_id,
                            quantity: 1,
                            price: dec!(5),
                        })
                        .collect(),
                })
                .await
        }));
    }

    for task in tasks {
        if let Err(e) = task.await.expect("order task") {
            panic!("crossed order failed ({:?}): {}", e.kind(), e);
        }
    }

    for product in [a, b] {
        let history = StockLedger::new(pool.clone())
            .get_history(product)
            .await
            .expect("history");
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].new_stock, 80);
    }
}
