#![allow(dead_code)]

use std::sync::Arc;

use bookstore_backoffice::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        order::Entity as OrderEntity, order_item::Entity as OrderItemEntity,
        product::Entity as Product, stock_adjustment::Entity as StockAdjustment, ProductModel,
        StudentModel,
    },
    events::{self, outbox},
    services::{
        factory::{ServiceContainer, ServiceFactory},
        inventory_ledger::AdjustStockRequest,
        products::CreateProductRequest,
        students::CreateStudentRequest,
        PageLimits,
    },
};
use rust_decimal::Decimal;
use sea_orm::{EntityTrait, PaginatorTrait};

/// Helper harness backed by a fresh in-memory SQLite database per test.
pub struct TestApp {
    pub config: AppConfig,
    pub db: Arc<DbPool>,
    pub factory: ServiceFactory,
    pub services: ServiceContainer,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // One connection keeps the in-memory database alive and shared.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let factory = ServiceFactory::new(db.clone(), PageLimits::from(&cfg));
        let services = ServiceContainer::new(&factory);

        Self {
            config: cfg,
            db,
            factory,
            services,
        }
    }

    pub async fn create_product(&self, name: &str, stock: i32, price: Decimal) -> ProductModel {
        self.create_product_in(name, "Books", stock, price).await
    }

    pub async fn create_product_in(
        &self,
        name: &str,
        category: &str,
        stock: i32,
        price: Decimal,
    ) -> ProductModel {
        self.services
            .products
            .create_product(CreateProductRequest {
                name: name.to_string(),
                category: category.to_string(),
                price,
                cost_price: Decimal::ZERO,
                stock,
                min_stock: None,
                description: None,
                size: None,
                image_url: None,
            })
            .await
            .expect("create product")
    }

    /// Registers a student whose email and student number derive from `name`.
    pub async fn create_student(&self, name: &str) -> StudentModel {
        let handle = name.to_lowercase().replace(' ', ".");
        self.services
            .students
            .create_student(CreateStudentRequest {
                name: name.to_string(),
                email: format!("{}@campus.test", handle),
                student_number: format!("S-{}", handle),
            })
            .await
            .expect("create student")
    }

    pub fn adjustment(
        product_id: i32,
        kind: &str,
        quantity: i32,
        reason: &str,
    ) -> AdjustStockRequest {
        AdjustStockRequest {
            product_id,
            kind: kind.to_string(),
            quantity,
            reason: reason.to_string(),
            notes: None,
        }
    }

    pub async fn stock_of(&self, product_id: i32) -> i32 {
        Product::find_by_id(product_id)
            .one(self.db.as_ref())
            .await
            .expect("query product")
            .expect("product exists")
            .stock
    }

    pub async fn order_count(&self) -> u64 {
        OrderEntity::find()
            .count(self.db.as_ref())
            .await
            .expect("count orders")
    }

    pub async fn order_item_count(&self) -> u64 {
        OrderItemEntity::find()
            .count(self.db.as_ref())
            .await
            .expect("count order items")
    }

    pub async fn adjustment_count(&self) -> u64 {
        StockAdjustment::find()
            .count(self.db.as_ref())
            .await
            .expect("count adjustments")
    }

    pub async fn pending_events(&self) -> u64 {
        outbox::count_with_status(self.db.as_ref(), outbox::OutboxStatus::Pending)
            .await
            .expect("count outbox")
    }

    /// Dispatches every due outbox event through the notification fan-out
    /// and waits until all handlers are done. Returns the delivered count.
    pub async fn flush_events(&self) -> usize {
        let (sender, rx) = events::channel(self.config.event_channel_capacity);
        let dispatcher = tokio::spawn(events::process_events(rx, self.factory.event_handlers()));

        let mut delivered = 0;
        loop {
            let batch = outbox::drain_once(&self.db, &sender, self.config.outbox_batch_size)
                .await
                .expect("drain outbox");
            if batch == 0 {
                break;
            }
            delivered += batch;
        }

        drop(sender);
        dispatcher.await.expect("dispatcher task");
        delivered
    }
}
