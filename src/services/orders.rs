use crate::{
    db::{in_transaction, DbPool},
    entities::{
        order::{self, Entity as OrderEntity},
        order_item::{self, Entity as OrderItemEntity},
        product::{self, Entity as Product},
        AdjustmentKind, AdjustmentReason, OrderItemModel, OrderModel, OrderStatus, ProductModel,
    },
    errors::ServiceError,
    events::{outbox, Event},
    services::{
        checked_sum, filter_value,
        inventory_ledger::{apply_adjustment, lock_product, StockMovement},
        money_problem, Page, PageLimits,
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};

const UNKNOWN_PRODUCT: &str = "Unknown Product";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: i32,
    pub quantity: i32,
    /// Unit price agreed with the customer; stored as given.
    pub price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_name: String,
    /// Initial status; `Pending` when omitted.
    #[serde(default)]
    pub status: Option<String>,
    pub items: Vec<OrderItemRequest>,
}

/// Partial order update. Items and stock are never touched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrderRequest {
    pub customer_name: Option<String>,
    pub status: Option<String>,
}

/// One line of a bulk import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    pub customer_name: String,
    pub product_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub created_count: usize,
    pub order_ids: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemDetail {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub id: i32,
    pub customer_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemDetail>,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: i32,
    pub customer_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderList {
    pub orders: Vec<OrderSummary>,
    pub total: u64,
}

fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    raw.trim().parse::<OrderStatus>().map_err(|_| {
        ServiceError::InvalidArgument(format!(
            "Invalid order status '{}'. Must be one of: Pending, Completed, Cancelled",
            raw
        ))
    })
}

fn required_customer_name(raw: &str) -> Result<String, ServiceError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "Customer name is required".to_string(),
        ));
    }
    Ok(name.to_string())
}

fn insufficient_stock(product_name: &str, available: i32, requested: i32) -> ServiceError {
    ServiceError::Conflict(format!(
        "Not enough stock for product '{}'. Available: {}, Requested: {}",
        product_name, available, requested
    ))
}

fn validate_items(items: &[OrderItemRequest]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "An order needs at least one item".to_string(),
        ));
    }
    for item in items {
        if item.quantity <= 0 {
            return Err(ServiceError::InvalidArgument(
                "Quantity must be greater than 0".to_string(),
            ));
        }
        if let Some(problem) = money_problem(&item.price) {
            return Err(ServiceError::InvalidArgument(format!("Price {}", problem)));
        }
    }
    Ok(())
}

fn item_total(item: &OrderItemModel) -> Result<Decimal, ServiceError> {
    item.line_total().ok_or_else(|| {
        ServiceError::InvalidArgument(format!("Total of order item {} is out of range", item.id))
    })
}

/// Locks each distinct product once, in ascending id order.
async fn lock_products<C, I>(txn: &C, product_ids: I) -> Result<HashMap<i32, ProductModel>, ServiceError>
where
    C: ConnectionTrait,
    I: IntoIterator<Item = i32>,
{
    let ordered: BTreeSet<i32> = product_ids.into_iter().collect();
    let mut locked = HashMap::with_capacity(ordered.len());
    for product_id in ordered {
        locked.insert(product_id, lock_product(txn, product_id).await?);
    }
    Ok(locked)
}

async fn insert_order<C>(txn: &C, customer_name: String, status: OrderStatus) -> Result<OrderModel, ServiceError>
where
    C: ConnectionTrait,
{
    order::ActiveModel {
        customer_name: Set(customer_name),
        status: Set(status.to_string()),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)
}

/// Inserts the line and takes its quantity out of stock through the ledger.
async fn place_line<C>(
    txn: &C,
    order_id: i32,
    product_id: i32,
    quantity: i32,
    price: Decimal,
) -> Result<OrderItemDetail, ServiceError>
where
    C: ConnectionTrait,
{
    let product = lock_product(txn, product_id).await?;
    if product.stock < quantity {
        return Err(insufficient_stock(&product.name, product.stock, quantity));
    }

    let item = order_item::ActiveModel {
        order_id: Set(order_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        price: Set(price),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    apply_adjustment(
        txn,
        StockMovement {
            product_id,
            kind: AdjustmentKind::Remove,
            quantity,
            reason: AdjustmentReason::Sale,
            notes: Some(format!("Order #{}", order_id)),
        },
    )
    .await?;

    Ok(OrderItemDetail {
        id: item.id,
        product_id,
        product_name: product.name,
        quantity,
        price,
        line_total: item_total(&item)?,
    })
}

fn order_detail(order: OrderModel, items: Vec<OrderItemDetail>) -> Result<OrderDetail, ServiceError> {
    let total = checked_sum(items.iter().map(|i| i.line_total))?;
    Ok(OrderDetail {
        id: order.id,
        customer_name: order.customer_name,
        status: order.status,
        created_at: order.created_at,
        updated_at: order.updated_at,
        items,
        total,
    })
}

async fn product_names<C>(db: &C, product_ids: Vec<i32>) -> Result<HashMap<i32, String>, ServiceError>
where
    C: ConnectionTrait,
{
    if product_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(i32, String)> = Product::find()
        .select_only()
        .column(product::Column::Id)
        .column(product::Column::Name)
        .filter(product::Column::Id.is_in(product_ids))
        .into_tuple()
        .all(db)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(rows.into_iter().collect())
}

/// Keeps order lines and product stock consistent across the order lifecycle.
#[derive(Clone)]
pub struct OrderCoordinator {
    db_pool: Arc<DbPool>,
    page_limits: PageLimits,
}

impl OrderCoordinator {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self {
            db_pool,
            page_limits: PageLimits::default(),
        }
    }

    pub fn with_page_limits(mut self, page_limits: PageLimits) -> Self {
        self.page_limits = page_limits;
        self
    }

    /// Creates the order, its lines and the matching stock removals, or nothing at all.
    #[instrument(skip(self, request), fields(customer = %request.customer_name, items = request.items.len()))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderDetail, ServiceError> {
        let customer_name = required_customer_name(&request.customer_name)?;
        let status = match request.status.as_deref() {
            Some(raw) => parse_status(raw)?,
            None => OrderStatus::default(),
        };
        validate_items(&request.items)?;
        let items = request.items;

        let detail = in_transaction(&self.db_pool, "create_order", move |txn| {
            Box::pin(async move {
                lock_products(txn, items.iter().map(|i| i.product_id)).await?;
                let order = insert_order(txn, customer_name, status).await?;

                let mut lines = Vec::with_capacity(items.len());
                for item in items {
                    lines.push(
                        place_line(txn, order.id, item.product_id, item.quantity, item.price)
                            .await?,
                    );
                }

                outbox::enqueue(txn, &Event::OrderCreated(order.id)).await?;
                order_detail(order, lines)
            })
        })
        .await?;

        info!(
            order_id = detail.id,
            total = %detail.total,
            lines = detail.items.len(),
            "Order created"
        );
        Ok(detail)
    }

    /// Order with its lines, each carrying the product's current name.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: i32) -> Result<OrderDetail, ServiceError> {
        let db = self.db_pool.as_ref();

        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::order_not_found(order_id))?;

        let items: Vec<OrderItemModel> = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Id)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let names = product_names(db, items.iter().map(|i| i.product_id).collect()).await?;
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            lines.push(OrderItemDetail {
                id: item.id,
                product_id: item.product_id,
                product_name: names
                    .get(&item.product_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_PRODUCT.to_string()),
                quantity: item.quantity,
                price: item.price,
                line_total: item_total(&item)?,
            });
        }

        order_detail(order, lines)
    }

    /// Orders newest first with their totals. `status` of `None` or `"all"` lists every order.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, status: Option<&str>, page: Page) -> Result<OrderList, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = OrderEntity::find();
        if let Some(raw) = filter_value(status) {
            let status = parse_status(raw)?;
            query = query.filter(order::Column::Status.eq(status.to_string()));
        }

        let total = query
            .clone()
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;

        let orders = query
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .offset(page.skip)
            .limit(self.page_limits.clamp(page.limit))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let order_ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
        let mut totals: HashMap<i32, Decimal> = HashMap::new();
        if !order_ids.is_empty() {
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.is_in(order_ids))
                .all(db)
                .await
                .map_err(ServiceError::db_error)?;
            for item in items {
                let total = totals.entry(item.order_id).or_default();
                *total = checked_sum([*total, item_total(&item)?])?;
            }
        }

        let orders = orders
            .into_iter()
            .map(|o| OrderSummary {
                total: totals.get(&o.id).copied().unwrap_or_default(),
                id: o.id,
                customer_name: o.customer_name,
                status: o.status,
                created_at: o.created_at,
            })
            .collect();

        Ok(OrderList { orders, total })
    }

    /// Updates customer name and/or status. Status changes follow the
    /// transition table of [`OrderStatus`]: Pending may become Completed or
    /// Cancelled, and both of those are final. Any other change of status
    /// fails with [`ServiceError::InvalidArgument`] and leaves the order as it was.
    #[instrument(skip(self, patch))]
    pub async fn update_order(
        &self,
        order_id: i32,
        patch: UpdateOrderRequest,
    ) -> Result<OrderDetail, ServiceError> {
        let customer_name = patch
            .customer_name
            .as_deref()
            .map(required_customer_name)
            .transpose()?;
        let next_status = patch.status.as_deref().map(parse_status).transpose()?;

        let changed = in_transaction(&self.db_pool, "update_order", move |txn| {
            Box::pin(async move {
                let order = OrderEntity::find_by_id(order_id)
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| ServiceError::order_not_found(order_id))?;

                let current = order.status().unwrap_or_default();
                let mut active: order::ActiveModel = order.clone().into();
                let mut changed = false;

                if let Some(next) = next_status {
                    if !current.can_transition_to(next) {
                        return Err(ServiceError::InvalidArgument(format!(
                            "Cannot change order status from {} to {}",
                            current, next
                        )));
                    }
                    if next != current {
                        active.status = Set(next.to_string());
                        changed = true;
                    }
                }
                if let Some(name) = customer_name {
                    if name != order.customer_name {
                        active.customer_name = Set(name);
                        changed = true;
                    }
                }

                if changed {
                    active.update(txn).await.map_err(ServiceError::db_error)?;
                    outbox::enqueue(txn, &Event::OrderUpdated(order_id)).await?;
                }
                Ok(changed)
            })
        })
        .await?;

        if changed {
            info!(order_id, "Order updated");
        }
        self.get_order(order_id).await
    }

    /// Puts every line's quantity back into stock, then removes the order and its lines.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: i32) -> Result<(), ServiceError> {
        let restored = in_transaction(&self.db_pool, "delete_order", move |txn| {
            Box::pin(async move {
                let order = OrderEntity::find_by_id(order_id)
                    .one(txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| ServiceError::order_not_found(order_id))?;

                let items = OrderItemEntity::find()
                    .filter(order_item::Column::OrderId.eq(order_id))
                    .order_by_asc(order_item::Column::Id)
                    .all(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                lock_products(txn, items.iter().map(|i| i.product_id)).await?;
                for item in &items {
                    apply_adjustment(
                        txn,
                        StockMovement {
                            product_id: item.product_id,
                            kind: AdjustmentKind::Add,
                            quantity: item.quantity,
                            reason: AdjustmentReason::Other,
                            notes: Some(format!("Restocked from deleted order #{}", order_id)),
                        },
                    )
                    .await?;
                }

                OrderItemEntity::delete_many()
                    .filter(order_item::Column::OrderId.eq(order_id))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                OrderEntity::delete_by_id(order.id)
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                outbox::enqueue(txn, &Event::OrderDeleted(order_id)).await?;
                Ok(items.len())
            })
        })
        .await?;

        info!(order_id, restored_lines = restored, "Order deleted");
        Ok(())
    }

    /// Creates one `Pending` order per distinct customer. Every row is
    /// validated before anything is written; one bad row aborts the import.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn import_orders(&self, rows: Vec<ImportRow>) -> Result<ImportSummary, ServiceError> {
        if rows.is_empty() {
            return Ok(ImportSummary {
                created_count: 0,
                order_ids: Vec::new(),
            });
        }

        let mut grouped: Vec<(String, Vec<ImportRow>)> = Vec::new();
        for (index, row) in rows.into_iter().enumerate() {
            let customer = required_customer_name(&row.customer_name).map_err(|_| {
                ServiceError::InvalidArgument(format!("Customer name is required (row {})", index + 1))
            })?;
            if row.quantity <= 0 {
                return Err(ServiceError::InvalidArgument(format!(
                    "Quantity must be greater than 0 (row {})",
                    index + 1
                )));
            }
            match grouped.iter_mut().find(|(name, _)| *name == customer) {
                Some((_, rows)) => rows.push(row),
                None => grouped.push((customer, vec![row])),
            }
        }

        let summary = in_transaction(&self.db_pool, "import_orders", move |txn| {
            Box::pin(async move {
                let product_ids: Vec<i32> = grouped
                    .iter()
                    .flat_map(|(_, rows)| rows.iter().map(|r| r.product_id))
                    .collect();
                let products = lock_products(txn, product_ids).await?;

                // Validate every row against current stock before any write.
                let mut demand: HashMap<i32, i32> = HashMap::new();
                for (_, rows) in &grouped {
                    for row in rows {
                        let product = products
                            .get(&row.product_id)
                            .ok_or_else(|| ServiceError::product_not_found(row.product_id))?;
                        let requested = demand.entry(row.product_id).or_insert(0);
                        *requested = requested.saturating_add(row.quantity);
                        if product.stock < *requested {
                            return Err(insufficient_stock(&product.name, product.stock, *requested));
                        }
                    }
                }

                let mut order_ids = Vec::with_capacity(grouped.len());
                for (customer, rows) in grouped {
                    let order = insert_order(txn, customer, OrderStatus::Pending).await?;
                    for row in rows {
                        let price = products
                            .get(&row.product_id)
                            .map(|p| p.price)
                            .unwrap_or_default();
                        place_line(txn, order.id, row.product_id, row.quantity, price).await?;
                    }
                    order_ids.push(order.id);
                }

                outbox::enqueue(txn, &Event::OrdersImported(order_ids.clone())).await?;
                Ok(ImportSummary {
                    created_count: order_ids.len(),
                    order_ids,
                })
            })
        })
        .await?;

        info!(
            created_count = summary.created_count,
            order_ids = ?summary.order_ids,
            "Orders imported"
        );
        Ok(summary)
    }
}
