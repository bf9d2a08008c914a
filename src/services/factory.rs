use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventHandler,
    notifications::{NotificationFanout, NotificationService},
    services::{
        feedback::FeedbackService, inventory_ledger::StockLedger, orders::OrderCoordinator,
        products::ProductCatalogService, students::StudentService,
        subscriptions::SubscriptionService, PageLimits,
    },
};

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    page_limits: PageLimits,
}

impl ServiceFactory {
    /// Creates a new service factory with the given dependencies
    pub fn new(db_pool: Arc<DbPool>, page_limits: PageLimits) -> Self {
        Self {
            db_pool,
            page_limits,
        }
    }

    pub fn stock_ledger(&self) -> StockLedger {
        StockLedger::new(self.db_pool.clone())
    }

    pub fn order_coordinator(&self) -> OrderCoordinator {
        OrderCoordinator::new(self.db_pool.clone()).with_page_limits(self.page_limits)
    }

    pub fn product_catalog(&self) -> ProductCatalogService {
        ProductCatalogService::new(self.db_pool.clone()).with_page_limits(self.page_limits)
    }

    pub fn subscription_service(&self) -> SubscriptionService {
        SubscriptionService::new(self.db_pool.clone())
    }

    pub fn notification_service(&self) -> NotificationService {
        NotificationService::new(self.db_pool.clone())
    }

    pub fn student_service(&self) -> StudentService {
        StudentService::new(self.db_pool.clone())
    }

    pub fn feedback_service(&self) -> FeedbackService {
        FeedbackService::new(self.db_pool.clone())
    }

    /// Event handlers to register with [`crate::events::process_events`].
    pub fn event_handlers(&self) -> Vec<Arc<dyn EventHandler>> {
        vec![Arc::new(NotificationFanout::new(
            Arc::new(self.subscription_service()),
            Arc::new(self.notification_service()),
        ))]
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub ledger: Arc<StockLedger>,
    pub orders: Arc<OrderCoordinator>,
    pub products: Arc<ProductCatalogService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub notifications: Arc<NotificationService>,
    pub students: Arc<StudentService>,
    pub feedback: Arc<FeedbackService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            ledger: Arc::new(factory.stock_ledger()),
            orders: Arc::new(factory.order_coordinator()),
            products: Arc::new(factory.product_catalog()),
            subscriptions: Arc::new(factory.subscription_service()),
            notifications: Arc::new(factory.notification_service()),
            students: Arc::new(factory.student_service()),
            feedback: Arc::new(factory.feedback_service()),
        }
    }
}
