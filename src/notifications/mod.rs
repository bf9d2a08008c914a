use crate::db::DbPool;
use crate::entities::notification::{self, Entity as Notification};
use crate::entities::{AdjustmentKind, AdjustmentReason, NotificationModel, NotificationType};
use crate::errors::ServiceError;
use crate::events::{Event, EventHandler};
use crate::services::students::ensure_student;
use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Resolves which students follow a product.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscribers_of(&self, product_id: i32) -> Result<Vec<i32>, ServiceError>;
}

/// Accepts notifications for students and stores them as unread. A second
/// call with the same `event_id` and student must not add another notification.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        event_id: Uuid,
        student_id: i32,
        product_id: i32,
        message: &str,
        notification_type: NotificationType,
    ) -> Result<(), ServiceError>;
}

/// Builds the text students see when a product's stock moves.
pub fn stock_change_message(
    product_name: &str,
    previous_stock: i32,
    new_stock: i32,
    kind: AdjustmentKind,
    reason: AdjustmentReason,
) -> String {
    let change = match kind {
        AdjustmentKind::Add => {
            format!("Stock increased from {} to {}", previous_stock, new_stock)
        }
        AdjustmentKind::Remove => {
            format!("Stock decreased from {} to {}", previous_stock, new_stock)
        }
        AdjustmentKind::Set => {
            let direction = if new_stock > previous_stock {
                "increased"
            } else {
                "decreased"
            };
            format!(
                "Stock level set from {} to {} ({})",
                previous_stock, new_stock, direction
            )
        }
    };
    format!("Product '{}': {} ({})", product_name, change, reason.describe())
}

pub fn product_update_message(product_name: &str, changes: &[String]) -> String {
    format!(
        "Product '{}' has been updated: {}",
        product_name,
        changes.join(", ")
    )
}

/// Turns domain events into one notification per subscriber.
pub struct NotificationFanout {
    subscriptions: Arc<dyn SubscriptionStore>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationFanout {
    pub fn new(subscriptions: Arc<dyn SubscriptionStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            subscriptions,
            sink,
        }
    }

    async fn fan_out(
        &self,
        event_id: Uuid,
        product_id: i32,
        message: String,
        notification_type: NotificationType,
    ) -> Result<(), ServiceError> {
        let subscribers = self.subscriptions.subscribers_of(product_id).await?;
        for student_id in &subscribers {
            self.sink
                .notify(event_id, *student_id, product_id, &message, notification_type)
                .await?;
        }
        if !subscribers.is_empty() {
            info!(
                product_id,
                recipients = subscribers.len(),
                notification_type = %notification_type,
                "Subscribers notified"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for NotificationFanout {
    fn name(&self) -> &'static str {
        "notification_fanout"
    }

    async fn handle_event(&self, event_id: Uuid, event: &Event) -> Result<(), ServiceError> {
        match event {
            Event::StockChanged {
                product_id,
                product_name,
                previous_stock,
                new_stock,
                kind,
                reason,
            } => {
                if previous_stock == new_stock {
                    return Ok(());
                }
                let message =
                    stock_change_message(product_name, *previous_stock, *new_stock, *kind, *reason);
                self.fan_out(event_id, *product_id, message, NotificationType::StockUpdate)
                    .await
            }
            Event::ProductUpdated {
                product_id,
                product_name,
                changes,
            } => {
                if changes.is_empty() {
                    return Ok(());
                }
                let message = product_update_message(product_name, changes);
                self.fan_out(event_id, *product_id, message, NotificationType::ProductUpdate)
                    .await
            }
            _ => Ok(()),
        }
    }
}

/// Database-backed notification inbox.
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DbPool>,
}

impl NotificationService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Notifications for a student, newest first.
    #[instrument(skip(self))]
    pub async fn list_for_student(
        &self,
        student_id: i32,
        unread_only: bool,
    ) -> Result<Vec<NotificationModel>, ServiceError> {
        ensure_student(self.db.as_ref(), student_id).await?;
        let mut query = Notification::find().filter(notification::Column::StudentId.eq(student_id));
        if unread_only {
            query = query.filter(notification::Column::IsRead.eq(false));
        }
        query
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        student_id: i32,
        notification_id: i32,
    ) -> Result<NotificationModel, ServiceError> {
        ensure_student(self.db.as_ref(), student_id).await?;
        let existing = Notification::find_by_id(notification_id)
            .filter(notification::Column::StudentId.eq(student_id))
            .one(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Notification not found".to_string()))?;

        if existing.is_read {
            return Ok(existing);
        }

        let mut active: notification::ActiveModel = existing.into();
        active.is_read = Set(true);
        active
            .update(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Marks every unread notification of the student as read and returns how many changed.
    #[instrument(skip(self))]
    pub async fn mark_all_read(&self, student_id: i32) -> Result<u64, ServiceError> {
        ensure_student(self.db.as_ref(), student_id).await?;
        let result = Notification::update_many()
            .col_expr(notification::Column::IsRead, Expr::value(true))
            .filter(notification::Column::StudentId.eq(student_id))
            .filter(notification::Column::IsRead.eq(false))
            .exec(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl NotificationSink for NotificationService {
    async fn notify(
        &self,
        event_id: Uuid,
        student_id: i32,
        product_id: i32,
        message: &str,
        notification_type: NotificationType,
    ) -> Result<(), ServiceError> {
        let already_sent = Notification::find()
            .filter(notification::Column::StudentId.eq(student_id))
            .filter(notification::Column::SourceEventId.eq(event_id))
            .count(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;
        if already_sent > 0 {
            debug!(student_id, %event_id, "notification already stored");
            return Ok(());
        }

        notification::ActiveModel {
            student_id: Set(student_id),
            product_id: Set(product_id),
            message: Set(message.to_string()),
            notification_type: Set(notification_type.to_string()),
            is_read: Set(false),
            source_event_id: Set(event_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(ServiceError::db_error)?;

        counter!("bookstore_notifications.created", 1);
        debug!(student_id, product_id, "notification stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore(HashMap<i32, Vec<i32>>);

    #[async_trait]
    impl SubscriptionStore for FakeStore {
        async fn subscribers_of(&self, product_id: i32) -> Result<Vec<i32>, ServiceError> {
            Ok(self.0.get(&product_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct FakeSink(Mutex<Vec<(i32, i32, String, NotificationType)>>);

    #[async_trait]
    impl NotificationSink for FakeSink {
        async fn notify(
            &self,
            _event_id: Uuid,
            student_id: i32,
            product_id: i32,
            message: &str,
            notification_type: NotificationType,
        ) -> Result<(), ServiceError> {
            self.0.lock().unwrap().push((
                student_id,
                product_id,
                message.to_string(),
                notification_type,
            ));
            Ok(())
        }
    }

    fn fanout(subscribers: Vec<i32>) -> (NotificationFanout, Arc<FakeSink>) {
        let mut store = FakeStore::default();
        store.0.insert(1, subscribers);
        let sink = Arc::new(FakeSink::default());
        (NotificationFanout::new(Arc::new(store), sink.clone()), sink)
    }

    #[test]
    fn stock_messages_follow_kind_and_reason() {
        assert_eq!(
            stock_change_message("Lab Gown", 3, 10, AdjustmentKind::Add, AdjustmentReason::Purchase),
            "Product 'Lab Gown': Stock increased from 3 to 10 (New inventory received)"
        );
        assert_eq!(
            stock_change_message("Lab Gown", 10, 8, AdjustmentKind::Remove, AdjustmentReason::Damage),
            "Product 'Lab Gown': Stock decreased from 10 to 8 (Damaged inventory removed)"
        );
        assert_eq!(
            stock_change_message("Lab Gown", 8, 20, AdjustmentKind::Set, AdjustmentReason::Inventory),
            "Product 'Lab Gown': Stock level set from 8 to 20 (increased) (Inventory adjustment)"
        );
        assert_eq!(
            stock_change_message("Lab Gown", 20, 1, AdjustmentKind::Set, AdjustmentReason::Other),
            "Product 'Lab Gown': Stock level set from 20 to 1 (decreased) (other)"
        );
    }

    #[tokio::test]
    async fn stock_change_reaches_every_subscriber() {
        let (fanout, sink) = fanout(vec![11, 12]);
        fanout
            .handle_event(Uuid::new_v4(), &Event::StockChanged {
                product_id: 1,
                product_name: "PE Shirt".into(),
                previous_stock: 4,
                new_stock: 2,
                kind: AdjustmentKind::Remove,
                reason: AdjustmentReason::Sale,
            })
            .await
            .unwrap();

        let sent = sink.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, 11);
        assert_eq!(sent[1].0, 12);
        assert!(sent
            .iter()
            .all(|(_, pid, msg, ty)| *pid == 1
                && *ty == NotificationType::StockUpdate
                && msg == "Product 'PE Shirt': Stock decreased from 4 to 2 (Sale made)"));
    }

    #[tokio::test]
    async fn unchanged_stock_and_unrelated_events_are_ignored() {
        let (fanout, sink) = fanout(vec![11]);
        fanout
            .handle_event(Uuid::new_v4(), &Event::StockChanged {
                product_id: 1,
                product_name: "PE Shirt".into(),
                previous_stock: 4,
                new_stock: 4,
                kind: AdjustmentKind::Set,
                reason: AdjustmentReason::Inventory,
            })
            .await
            .unwrap();
        fanout
            .handle_event(Uuid::new_v4(), &Event::OrderCreated(9))
            .await
            .unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn product_update_lists_changes() {
        let (fanout, sink) = fanout(vec![5]);
        fanout
            .handle_event(Uuid::new_v4(), &Event::ProductUpdated {
                product_id: 1,
                product_name: "Calculus".into(),
                changes: vec![
                    "Price updated from ₱450.00 to ₱500.00".into(),
                    "Description updated".into(),
                ],
            })
            .await
            .unwrap();

        let sent = sink.0.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].2,
            "Product 'Calculus' has been updated: Price updated from ₱450.00 to ₱500.00, Description updated"
        );
        assert_eq!(sent[0].3, NotificationType::ProductUpdate);
    }
}
