use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue, Set};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// How the new stock level is derived from the requested quantity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdjustmentKind {
    Add,
    Remove,
    Set,
}

/// Categorical justification recorded with every adjustment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AdjustmentReason {
    Purchase,
    Return,
    Damage,
    Inventory,
    Sale,
    Other,
}

impl AdjustmentReason {
    /// Human readable explanation used in subscriber notifications.
    pub fn describe(&self) -> &'static str {
        match self {
            AdjustmentReason::Purchase => "New inventory received",
            AdjustmentReason::Return => "Customer return",
            AdjustmentReason::Damage => "Damaged inventory removed",
            AdjustmentReason::Inventory => "Inventory adjustment",
            AdjustmentReason::Sale => "Sale made",
            AdjustmentReason::Other => "other",
        }
    }
}

/// Immutable audit row written once per ledger mutation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_adjustments")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_id: i32,
    /// Stored as the snake_case name of [`AdjustmentKind`]
    pub kind: String,
    pub quantity: i32,
    /// Stored as the snake_case name of [`AdjustmentReason`]
    pub reason: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub previous_stock: i32,
    pub new_stock: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id",
        on_delete = "Cascade"
    )]
    Product,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C: ConnectionTrait>(self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        if let ActiveValue::NotSet = active_model.created_at {
            active_model.created_at = Set(Utc::now());
        }
        Ok(active_model)
    }
}
