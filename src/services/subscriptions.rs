use crate::{
    db::DbPool,
    entities::{
        product::Entity as Product,
        product_subscription::{self, Entity as ProductSubscription, Model as SubscriptionModel},
    },
    errors::ServiceError,
    notifications::SubscriptionStore,
    services::students::ensure_student,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Students following products for stock and catalog updates.
#[derive(Clone)]
pub struct SubscriptionService {
    db_pool: Arc<DbPool>,
}

impl SubscriptionService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Subscribes a student to a product. Subscribing twice returns the existing row.
    #[instrument(skip(self))]
    pub async fn subscribe(
        &self,
        student_id: i32,
        product_id: i32,
    ) -> Result<SubscriptionModel, ServiceError> {
        let db = self.db_pool.as_ref();
        ensure_student(db, student_id).await?;

        Product::find_by_id(product_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::product_not_found(product_id))?;

        if let Some(existing) = ProductSubscription::find()
            .filter(product_subscription::Column::StudentId.eq(student_id))
            .filter(product_subscription::Column::ProductId.eq(product_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            debug!(subscription_id = existing.id, "Already subscribed");
            return Ok(existing);
        }

        let created = product_subscription::ActiveModel {
            student_id: Set(student_id),
            product_id: Set(product_id),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(student_id, product_id, "Subscribed to product");
        Ok(created)
    }

    /// Removes the subscription if present.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, student_id: i32, product_id: i32) -> Result<(), ServiceError> {
        ensure_student(self.db_pool.as_ref(), student_id).await?;
        let result = ProductSubscription::delete_many()
            .filter(product_subscription::Column::StudentId.eq(student_id))
            .filter(product_subscription::Column::ProductId.eq(product_id))
            .exec(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected > 0 {
            info!(student_id, product_id, "Unsubscribed from product");
        }
        Ok(())
    }

    /// Product ids the student follows.
    pub async fn subscriptions_of(&self, student_id: i32) -> Result<Vec<i32>, ServiceError> {
        ensure_student(self.db_pool.as_ref(), student_id).await?;
        ProductSubscription::find()
            .select_only()
            .column(product_subscription::Column::ProductId)
            .filter(product_subscription::Column::StudentId.eq(student_id))
            .order_by_asc(product_subscription::Column::ProductId)
            .into_tuple()
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}

#[async_trait]
impl SubscriptionStore for SubscriptionService {
    async fn subscribers_of(&self, product_id: i32) -> Result<Vec<i32>, ServiceError> {
        ProductSubscription::find()
            .select_only()
            .column(product_subscription::Column::StudentId)
            .filter(product_subscription::Column::ProductId.eq(product_id))
            .order_by_asc(product_subscription::Column::StudentId)
            .into_tuple()
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }
}
