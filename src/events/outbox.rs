use crate::db::supports_row_locks;
use crate::entities::outbox_event::{self, Entity as OutboxEvent};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::{LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumString};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: i32 = 8;
const BASE_BACKOFF_SECS: i64 = 2;
/// How long a claimed row stays invisible to other workers. A row still
/// `processing` after this is treated as abandoned and claimed again.
pub const CLAIM_LEASE_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

/// Writes `event` into the outbox. Call it with the transaction that performs
/// the write the event describes so both commit or roll back together.
pub async fn enqueue<C>(db: &C, event: &Event) -> Result<Uuid, ServiceError>
where
    C: ConnectionTrait,
{
    let id = Uuid::new_v4();
    let now = Utc::now();
    let (aggregate_type, aggregate_id) = event.aggregate();

    outbox_event::ActiveModel {
        id: Set(id),
        aggregate_type: Set(aggregate_type.to_string()),
        aggregate_id: Set(aggregate_id),
        event_type: Set(event.event_type().to_string()),
        payload: Set(serde_json::to_string(event)?),
        status: Set(OutboxStatus::Pending.to_string()),
        attempts: Set(0),
        available_at: Set(now),
        created_at: Set(now),
        processed_at: Set(None),
        error_message: Set(None),
    }
    .insert(db)
    .await
    .map_err(ServiceError::db_error)?;

    debug!(
        outbox_id = %id,
        event_type = event.event_type(),
        aggregate_type,
        "enqueued outbox event"
    );
    Ok(id)
}

/// Background worker polling the outbox and dispatching through `sender`.
pub fn start_worker(
    db: Arc<DatabaseConnection>,
    sender: EventSender,
    batch_size: u64,
    poll_interval: Duration,
) -> JoinHandle<()> {
    info!(batch_size, ?poll_interval, "Starting outbox worker");
    tokio::spawn(async move {
        loop {
            if let Err(e) = drain_once(&db, &sender, batch_size).await {
                error!("outbox worker error: {}", e);
            }
            sleep(poll_interval).await;
        }
    })
}

/// Claims up to `batch_size` due events, hands them to `sender` and records
/// the outcome. A row is marked delivered only after every handler has
/// acknowledged it. Returns the number of events delivered.
pub async fn drain_once(
    db: &DatabaseConnection,
    sender: &EventSender,
    batch_size: u64,
) -> Result<usize, ServiceError> {
    let claimed = claim_batch(db, batch_size).await?;
    let mut delivered = 0;

    for row in claimed {
        let event = match serde_json::from_str::<Event>(&row.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(outbox_id = %row.id, error = %e, "undecodable outbox payload");
                mark(db, &row, OutboxStatus::Failed, Some(format!("undecodable payload: {}", e)))
                    .await;
                continue;
            }
        };

        match sender.deliver(row.id, event).await {
            Ok(()) => {
                mark(db, &row, OutboxStatus::Delivered, None).await;
                counter!("bookstore_outbox.delivered", 1);
                delivered += 1;
            }
            Err(e) if row.attempts < MAX_ATTEMPTS => {
                let backoff = BASE_BACKOFF_SECS.saturating_pow(row.attempts as u32);
                let jitter_ms = Utc::now().timestamp_millis() % 1000;
                let retry_at = Utc::now()
                    + chrono::Duration::seconds(backoff)
                    + chrono::Duration::milliseconds(jitter_ms);

                let mut active: outbox_event::ActiveModel = row.clone().into();
                active.status = Set(OutboxStatus::Pending.to_string());
                active.available_at = Set(retry_at);
                active.error_message = Set(Some(e.to_string()));
                if let Err(e) = active.update(db).await {
                    warn!("failed scheduling retry for outbox {}: {}", row.id, e);
                }
                counter!("bookstore_outbox.retried", 1);
            }
            Err(_) => {
                mark(
                    db,
                    &row,
                    OutboxStatus::Failed,
                    Some("max attempts exceeded".to_string()),
                )
                .await;
                counter!("bookstore_outbox.failed", 1);
            }
        }
    }

    Ok(delivered)
}

/// Number of outbox rows currently in `status`.
pub async fn count_with_status<C>(db: &C, status: OutboxStatus) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    OutboxEvent::find()
        .filter(outbox_event::Column::Status.eq(status.as_ref()))
        .count(db)
        .await
        .map_err(ServiceError::db_error)
}

async fn claim_batch(
    db: &DatabaseConnection,
    batch_size: u64,
) -> Result<Vec<outbox_event::Model>, ServiceError> {
    let txn = db.begin().await.map_err(ServiceError::db_error)?;

    let now = Utc::now();
    let mut query = OutboxEvent::find()
        .filter(outbox_event::Column::Status.is_in([
            OutboxStatus::Pending.as_ref(),
            OutboxStatus::Processing.as_ref(),
        ]))
        .filter(outbox_event::Column::AvailableAt.lte(now))
        .order_by_asc(outbox_event::Column::CreatedAt)
        .limit(batch_size);
    if supports_row_locks(txn.get_database_backend()) {
        query = query.lock_with_behavior(LockType::Update, LockBehavior::SkipLocked);
    }
    let rows = query.all(&txn).await.map_err(ServiceError::db_error)?;

    let lease_until = now + chrono::Duration::seconds(CLAIM_LEASE_SECS);
    let mut claimed = Vec::with_capacity(rows.len());
    for row in rows {
        if row.status == OutboxStatus::Processing.as_ref() {
            warn!(outbox_id = %row.id, attempts = row.attempts, "reclaiming expired outbox lease");
        }
        let attempts = row.attempts + 1;
        let mut active: outbox_event::ActiveModel = row.into();
        active.status = Set(OutboxStatus::Processing.to_string());
        active.attempts = Set(attempts);
        active.available_at = Set(lease_until);
        claimed.push(active.update(&txn).await.map_err(ServiceError::db_error)?);
    }

    txn.commit().await.map_err(ServiceError::db_error)?;
    Ok(claimed)
}

async fn mark(
    db: &DatabaseConnection,
    row: &outbox_event::Model,
    status: OutboxStatus,
    error_message: Option<String>,
) {
    let mut active: outbox_event::ActiveModel = row.clone().into();
    active.status = Set(status.to_string());
    active.error_message = Set(error_message);
    if status == OutboxStatus::Delivered {
        active.processed_at = Set(Some(Utc::now()));
    }
    if let Err(e) = active.update(db).await {
        warn!("failed updating outbox {} to {}: {}", row.id, status, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_match_column_values() {
        assert_eq!(OutboxStatus::Pending.as_ref(), "pending");
        assert_eq!(OutboxStatus::Delivered.to_string(), "delivered");
        assert_eq!("failed".parse::<OutboxStatus>().ok(), Some(OutboxStatus::Failed));
    }
}
