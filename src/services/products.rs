use crate::{
    db::{in_transaction, DbPool},
    entities::{
        notification::{self, Entity as Notification},
        order_item::{self, Entity as OrderItem},
        product::{self, Entity as Product},
        product_subscription::{self, Entity as ProductSubscription},
        stock_adjustment::{self, Entity as StockAdjustment},
        ProductModel,
    },
    errors::ServiceError,
    events::{outbox, Event},
    services::{
        filter_value, inventory_ledger::lock_product, money_problem, not_blank, Page, PageLimits,
    },
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::{Validate, ValidationError};

fn storable_money(value: &Decimal) -> Result<(), ValidationError> {
    if let Some(problem) = money_problem(value) {
        let mut err = ValidationError::new("invalid_amount");
        err.message = Some(problem.into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(custom = "not_blank")]
    pub name: String,
    #[validate(custom = "not_blank")]
    pub category: String,
    #[validate(custom = "storable_money")]
    pub price: Decimal,
    #[validate(custom = "storable_money")]
    pub cost_price: Decimal,
    #[validate(range(min = 0))]
    pub stock: i32,
    #[validate(range(min = 0))]
    pub min_stock: Option<i32>,
    pub description: Option<String>,
    pub size: Option<String>,
    pub image_url: Option<String>,
}

/// Catalog edit. Stock changes only through the ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateProductRequest {
    #[validate(custom = "not_blank")]
    pub name: Option<String>,
    #[validate(custom = "not_blank")]
    pub category: Option<String>,
    #[validate(custom = "storable_money")]
    pub price: Option<Decimal>,
    #[validate(custom = "storable_money")]
    pub cost_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub min_stock: Option<i32>,
    pub description: Option<String>,
    pub size: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductList {
    pub products: Vec<ProductModel>,
    pub total: u64,
}

/// Applies `patch` to `active` and describes every field that actually changed.
fn apply_changes(
    current: &ProductModel,
    patch: UpdateProductRequest,
    active: &mut product::ActiveModel,
) -> Vec<String> {
    let mut changes = Vec::new();

    if let Some(name) = patch.name.map(|n| n.trim().to_string()) {
        if name != current.name {
            changes.push(format!("Name updated from '{}' to '{}'", current.name, name));
            active.name = Set(name);
        }
    }
    if let Some(category) = patch.category.map(|c| c.trim().to_string()) {
        if category != current.category {
            changes.push(format!(
                "Category updated from '{}' to '{}'",
                current.category, category
            ));
            active.category = Set(category);
        }
    }
    if let Some(price) = patch.price {
        if price != current.price {
            changes.push(format!(
                "Price updated from ₱{:.2} to ₱{:.2}",
                current.price, price
            ));
            active.price = Set(price);
        }
    }
    if let Some(cost_price) = patch.cost_price {
        if cost_price != current.cost_price {
            changes.push(format!(
                "Cost price updated from ₱{:.2} to ₱{:.2}",
                current.cost_price, cost_price
            ));
            active.cost_price = Set(cost_price);
        }
    }
    if let Some(min_stock) = patch.min_stock {
        if Some(min_stock) != current.min_stock {
            let previous = current
                .min_stock
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string());
            changes.push(format!(
                "Minimum stock level updated from {} to {}",
                previous, min_stock
            ));
            active.min_stock = Set(Some(min_stock));
        }
    }
    if let Some(description) = patch.description {
        if Some(&description) != current.description.as_ref() {
            changes.push("Description updated".to_string());
            active.description = Set(Some(description));
        }
    }
    if let Some(size) = patch.size {
        if Some(&size) != current.size.as_ref() {
            changes.push(format!(
                "Size updated from '{}' to '{}'",
                current.size.as_deref().unwrap_or("none"),
                size
            ));
            active.size = Set(Some(size));
        }
    }
    if let Some(image_url) = patch.image_url {
        if Some(&image_url) != current.image_url.as_ref() {
            changes.push("Product image updated".to_string());
            active.image_url = Set(Some(image_url));
        }
    }

    changes
}

/// Product catalog backing the ledger and the coordinator.
#[derive(Clone)]
pub struct ProductCatalogService {
    db_pool: Arc<DbPool>,
    page_limits: PageLimits,
}

impl ProductCatalogService {
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

    #[instrument(skip(self, request), fields(name = %request.name, category = %request.category))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request.validate()?;

        let created = product::ActiveModel {
            name: Set(request.name.trim().to_string()),
            category: Set(request.category.trim().to_string()),
            price: Set(request.price),
            cost_price: Set(request.cost_price),
            stock: Set(request.stock),
            min_stock: Set(request.min_stock),
            description: Set(request.description),
            size: Set(request.size),
            image_url: Set(request.image_url),
            ..Default::default()
        }
        .insert(self.db_pool.as_ref())
        .await
        .map_err(ServiceError::db_error)?;

        info!(product_id = created.id, stock = created.stock, "Product created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: i32) -> Result<ProductModel, ServiceError> {
        Product::find_by_id(product_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::product_not_found(product_id))
    }

    /// Products by id. `category` of `None` or `"all"` lists every category.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        category: Option<&str>,
        page: Page,
    ) -> Result<ProductList, ServiceError> {
        let db = self.db_pool.as_ref();

        let mut query = Product::find();
        if let Some(category) = filter_value(category) {
            query = query.filter(product::Column::Category.eq(category));
        }

        let total = query
            .clone()
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        let products = query
            .order_by_asc(product::Column::Id)
            .offset(page.skip)
            .limit(self.page_limits.clamp(page.limit))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(ProductList { products, total })
    }

    /// Edits catalog fields and tells subscribers what changed.
    #[instrument(skip(self, patch))]
    pub async fn update_product(
        &self,
        product_id: i32,
        patch: UpdateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        patch.validate()?;

        let (product, changes) = in_transaction(&self.db_pool, "update_product", move |txn| {
            Box::pin(async move {
                let current = lock_product(txn, product_id).await?;
                let mut active: product::ActiveModel = current.clone().into();
                let changes = apply_changes(&current, patch, &mut active);
                if changes.is_empty() {
                    return Ok((current, changes));
                }

                let updated = active.update(txn).await.map_err(ServiceError::db_error)?;
                outbox::enqueue(
                    txn,
                    &Event::ProductUpdated {
                        product_id,
                        product_name: updated.name.clone(),
                        changes: changes.clone(),
                    },
                )
                .await?;
                Ok((updated, changes))
            })
        })
        .await?;

        if !changes.is_empty() {
            info!(product_id, changes = ?changes, "Product updated");
        }
        Ok(product)
    }

    /// Removes a product that no order references, together with its
    /// adjustments, subscriptions and notifications.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: i32) -> Result<(), ServiceError> {
        in_transaction(&self.db_pool, "delete_product", move |txn| {
            Box::pin(async move {
                let product = lock_product(txn, product_id).await?;

                let referenced = OrderItem::find()
                    .filter(order_item::Column::ProductId.eq(product_id))
                    .count(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                if referenced > 0 {
                    return Err(ServiceError::Conflict(format!(
                        "Product '{}' is referenced by {} order item(s) and cannot be deleted",
                        product.name, referenced
                    )));
                }

                StockAdjustment::delete_many()
                    .filter(stock_adjustment::Column::ProductId.eq(product_id))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                ProductSubscription::delete_many()
                    .filter(product_subscription::Column::ProductId.eq(product_id))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                Notification::delete_many()
                    .filter(notification::Column::ProductId.eq(product_id))
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                Product::delete_by_id(product_id)
                    .exec(txn)
                    .await
                    .map_err(ServiceError::db_error)?;
                Ok(())
            })
        })
        .await?;

        info!(product_id, "Product deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn product() -> ProductModel {
        ProductModel {
            id: 1,
            name: "Calculus".into(),
            category: "Books".into(),
            price: dec!(450.00),
            cost_price: dec!(300.00),
            stock: 10,
            min_stock: None,
            description: Some("Early transcendentals".into()),
            size: None,
            image_url: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn unchanged_fields_produce_no_change_lines() {
        let current = product();
        let mut active: product::ActiveModel = current.clone().into();
        let patch = UpdateProductRequest {
            name: Some("Calculus".into()),
            price: Some(dec!(450)),
            description: Some("Early transcendentals".into()),
            ..Default::default()
        };
        assert!(apply_changes(&current, patch, &mut active).is_empty());
    }

    #[test]
    fn change_lines_describe_each_edit() {
        let current = product();
        let mut active: product::ActiveModel = current.clone().into();
        let patch = UpdateProductRequest {
            name: Some("Calculus II".into()),
            price: Some(dec!(500)),
            min_stock: Some(3),
            size: Some("A4".into()),
            image_url: Some("calculus.png".into()),
            ..Default::default()
        };
        assert_eq!(
            apply_changes(&current, patch, &mut active),
            vec![
                "Name updated from 'Calculus' to 'Calculus II'".to_string(),
                "Price updated from ₱450.00 to ₱500.00".to_string(),
                "Minimum stock level updated from none to 3".to_string(),
                "Size updated from 'none' to 'A4'".to_string(),
                "Product image updated".to_string(),
            ]
        );
    }

    #[test]
    fn negative_money_fails_validation() {
        let request = CreateProductRequest {
            name: "Lab Gown".into(),
            category: "Uniforms".into(),
            price: dec!(-1),
            cost_price: dec!(0),
            stock: 0,
            min_stock: None,
            description: None,
            size: None,
            image_url: None,
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn prices_must_fit_the_money_column() {
        let mut request = CreateProductRequest {
            name: "Lab Gown".into(),
            category: "Uniforms".into(),
            price: dec!(480.125),
            cost_price: dec!(0),
            stock: 0,
            min_stock: None,
            description: None,
            size: None,
            image_url: None,
        };
        assert!(request.validate().is_err());

        request.price = dec!(100000000.00);
        assert!(request.validate().is_err());

        request.price = dec!(480.50);
        assert!(request.validate().is_ok());

        let patch = UpdateProductRequest {
            cost_price: Some(dec!(1.001)),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }
}
