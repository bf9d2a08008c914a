//! Campus bookstore back-office core
//!
//! An audited stock ledger (every stock change leaves an adjustment row) and
//! an order coordinator that routes order-driven stock changes through the
//! same ledger. Stock and catalog events are written to a transactional
//! outbox and fanned out to subscribed students as notifications. Students can
//! also leave feedback for the store staff.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod notifications;
pub mod services;

pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::db::DbPool;
    pub use crate::entities::{
        AdjustmentKind, AdjustmentReason, FeedbackStatus, FeedbackType, NotificationType,
        OrderStatus,
    };
    pub use crate::errors::{ErrorKind, ServiceError};
    pub use crate::events::{Event, EventHandler, EventSender};
    pub use crate::services::factory::{ServiceContainer, ServiceFactory};
    pub use crate::services::feedback::{FeedbackEntry, FeedbackService, SubmitFeedbackRequest};
    pub use crate::services::inventory_ledger::{AdjustStockRequest, StockLedger};
    pub use crate::services::orders::{
        CreateOrderRequest, ImportRow, ImportSummary, OrderCoordinator, OrderItemRequest,
        UpdateOrderRequest,
    };
    pub use crate::services::products::{
        CreateProductRequest, ProductCatalogService, UpdateProductRequest,
    };
    pub use crate::services::students::{CreateStudentRequest, StudentService};
    pub use crate::services::{Page, PageLimits};
}
