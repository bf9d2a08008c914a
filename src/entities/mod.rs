pub mod feedback;
pub mod notification;
pub mod order;
pub mod order_item;
pub mod outbox_event;
pub mod product;
pub mod product_subscription;
pub mod stock_adjustment;
pub mod student;

pub use feedback::{FeedbackStatus, FeedbackType, Model as FeedbackModel};
pub use notification::{Model as NotificationModel, NotificationType};
pub use order::{Model as OrderModel, OrderStatus};
pub use order_item::Model as OrderItemModel;
pub use product::Model as ProductModel;
pub use stock_adjustment::{AdjustmentKind, AdjustmentReason, Model as StockAdjustmentModel};
pub use student::Model as StudentModel;
