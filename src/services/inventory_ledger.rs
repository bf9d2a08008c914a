use crate::{
    db::{in_transaction, supports_row_locks, DbPool},
    entities::{
        product::{self, Entity as Product},
        stock_adjustment::{self, Entity as StockAdjustment},
        AdjustmentKind, AdjustmentReason, ProductModel, StockAdjustmentModel,
    },
    errors::ServiceError,
    events::{outbox, Event},
};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Raw adjustment input as it arrives from an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustStockRequest {
    pub product_id: i32,
    /// One of `add`, `remove`, `set`
    pub kind: String,
    pub quantity: i32,
    /// One of `purchase`, `return`, `damage`, `inventory`, `sale`, `other`
    pub reason: String,
    pub notes: Option<String>,
}

/// A validated stock mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: i32,
    pub kind: AdjustmentKind,
    pub quantity: i32,
    pub reason: AdjustmentReason,
    pub notes: Option<String>,
}

impl TryFrom<AdjustStockRequest> for StockMovement {
    type Error = ServiceError;

    fn try_from(request: AdjustStockRequest) -> Result<Self, Self::Error> {
        let kind = request.kind.trim().parse::<AdjustmentKind>().map_err(|_| {
            ServiceError::InvalidArgument(
                "Invalid adjustment type. Must be one of: add, remove, set".to_string(),
            )
        })?;

        if request.quantity <= 0 {
            return Err(ServiceError::InvalidArgument(
                "Quantity must be greater than zero".to_string(),
            ));
        }

        let reason = request.reason.trim().parse::<AdjustmentReason>().map_err(|_| {
            ServiceError::InvalidArgument(
                "Invalid reason. Must be one of: purchase, return, damage, inventory, sale, other"
                    .to_string(),
            )
        })?;

        Ok(Self {
            product_id: request.product_id,
            kind,
            quantity: request.quantity,
            reason,
            notes: request.notes.filter(|n| !n.trim().is_empty()),
        })
    }
}

/// Stock level that results from applying `kind`/`quantity` to `previous`.
pub fn compute_new_stock(
    previous: i32,
    kind: AdjustmentKind,
    quantity: i32,
) -> Result<i32, ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::InvalidArgument(
            "Quantity must be greater than zero".to_string(),
        ));
    }

    match kind {
        AdjustmentKind::Add => previous.checked_add(quantity).ok_or_else(|| {
            ServiceError::InvalidArgument("Resulting stock exceeds the supported range".to_string())
        }),
        AdjustmentKind::Remove => {
            if previous < quantity {
                Err(ServiceError::Conflict(format!(
                    "Not enough stock to remove. Current stock: {}",
                    previous
                )))
            } else {
                Ok(previous - quantity)
            }
        }
        AdjustmentKind::Set => Ok(quantity),
    }
}

/// Loads a product for mutation, holding its row lock until the transaction ends.
pub(crate) async fn lock_product<C>(txn: &C, product_id: i32) -> Result<ProductModel, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = Product::find_by_id(product_id);
    if supports_row_locks(txn.get_database_backend()) {
        query = query.lock_exclusive();
    }
    query
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::product_not_found(product_id))
}

/// Applies one movement inside the caller's transaction: updates the stock
/// column, writes the audit row and, when the level actually changed,
/// enqueues a `StockChanged` event.
pub(crate) async fn apply_adjustment<C>(
    txn: &C,
    movement: StockMovement,
) -> Result<StockAdjustmentModel, ServiceError>
where
    C: ConnectionTrait,
{
    let product = lock_product(txn, movement.product_id).await?;
    let previous_stock = product.stock;

    let new_stock = match compute_new_stock(previous_stock, movement.kind, movement.quantity) {
        Ok(stock) => stock,
        Err(e) => {
            if matches!(e, ServiceError::Conflict(_)) {
                counter!("bookstore_ledger.conflicts", 1);
            }
            return Err(e);
        }
    };

    let product_name = product.name.clone();
    let mut active_product: product::ActiveModel = product.into();
    active_product.stock = Set(new_stock);
    active_product
        .update(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let adjustment = stock_adjustment::ActiveModel {
        product_id: Set(movement.product_id),
        kind: Set(movement.kind.to_string()),
        quantity: Set(movement.quantity),
        reason: Set(movement.reason.to_string()),
        notes: Set(movement.notes.clone()),
        previous_stock: Set(previous_stock),
        new_stock: Set(new_stock),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    if new_stock != previous_stock {
        outbox::enqueue(
            txn,
            &Event::StockChanged {
                product_id: movement.product_id,
                product_name,
                previous_stock,
                new_stock,
                kind: movement.kind,
                reason: movement.reason,
            },
        )
        .await?;
    }

    counter!(
        "bookstore_ledger.adjustments",
        1,
        "kind" => movement.kind.as_ref().to_string()
    );

    Ok(adjustment)
}

/// Audited stock mutations and their history.
#[derive(Clone)]
pub struct StockLedger {
    db_pool: Arc<DbPool>,
}

impl StockLedger {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Changes a product's stock and records the adjustment atomically.
    #[instrument(skip(self, request), fields(product_id = request.product_id, kind = %request.kind, quantity = request.quantity))]
    pub async fn adjust_stock(
        &self,
        request: AdjustStockRequest,
    ) -> Result<StockAdjustmentModel, ServiceError> {
        let movement = StockMovement::try_from(request)?;

        let result = in_transaction(&self.db_pool, "adjust_stock", move |txn| {
            Box::pin(async move { apply_adjustment(txn, movement).await })
        })
        .await;

        match &result {
            Ok(adjustment) => info!(
                adjustment_id = adjustment.id,
                product_id = adjustment.product_id,
                previous_stock = adjustment.previous_stock,
                new_stock = adjustment.new_stock,
                reason = %adjustment.reason,
                "Stock adjusted"
            ),
            Err(e) => warn!(error = %e, "Stock adjustment rejected"),
        }

        result
    }

    /// All adjustments of a product, newest first.
    #[instrument(skip(self))]
    pub async fn get_history(
        &self,
        product_id: i32,
    ) -> Result<Vec<StockAdjustmentModel>, ServiceError> {
        let db = self.db_pool.as_ref();

        let exists = Product::find_by_id(product_id)
            .select_only()
            .column(product::Column::Id)
            .into_tuple::<i32>()
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;
        if exists.is_none() {
            return Err(ServiceError::product_not_found(product_id));
        }

        StockAdjustment::find()
            .filter(stock_adjustment::Column::ProductId.eq(product_id))
            .order_by_desc(stock_adjustment::Column::CreatedAt)
            .order_by_desc(stock_adjustment::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }
}
