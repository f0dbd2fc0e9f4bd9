use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    entities::outbox_job::{self, Entity as OutboxJobEntity},
    errors::ServiceError,
    services::{inventory::InventoryService, notifications::NotificationService},
};

const MAX_ATTEMPTS: i32 = 8;
const BASE_BACKOFF_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Delivered => "delivered",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    DecrementStock,
    NotifyUser,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DecrementStock => "decrement_stock",
            JobKind::NotifyUser => "notify_user",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "decrement_stock" => Some(JobKind::DecrementStock),
            "notify_user" => Some(JobKind::NotifyUser),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecrementStockJob {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotifyUserJob {
    pub user_id: Uuid,
    pub kind: String,
    pub title: String,
    pub message: String,
}

/// Enqueues a stock decrement for one confirmed order line. Call with the
/// order transaction so the job is committed together with the order rows.
pub async fn enqueue_stock_decrement(
    db: &impl ConnectionTrait,
    order_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let payload = serde_json::to_value(DecrementStockJob {
        order_id,
        product_id,
        quantity,
    })?;
    enqueue(db, JobKind::DecrementStock, payload).await
}

/// Enqueues a user notification. Same transactional contract as
/// [`enqueue_stock_decrement`].
pub async fn enqueue_notification(
    db: &impl ConnectionTrait,
    user_id: Uuid,
    kind: &str,
    title: &str,
    message: &str,
) -> Result<(), ServiceError> {
    let payload = serde_json::to_value(NotifyUserJob {
        user_id,
        kind: kind.to_string(),
        title: title.to_string(),
        message: message.to_string(),
    })?;
    enqueue(db, JobKind::NotifyUser, payload).await
}

async fn enqueue(
    db: &impl ConnectionTrait,
    kind: JobKind,
    payload: serde_json::Value,
) -> Result<(), ServiceError> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    let job = outbox_job::ActiveModel {
        id: Set(id),
        job_type: Set(kind.as_str().to_string()),
        payload: Set(payload),
        status: Set(JobStatus::Pending.as_str().to_string()),
        attempts: Set(0),
        available_at: Set(now),
        last_error: Set(None),
        created_at: Set(now),
        updated_at: Set(None),
    };
    job.insert(db).await?;
    debug!(job_id = %id, job_type = kind.as_str(), "enqueued outbox job");
    Ok(())
}

/// Drains enqueued side-effect jobs. Stock and notification failures are
/// retried here with backoff; they never touch the order itself.
pub struct OutboxWorker {
    db: Arc<DatabaseConnection>,
    inventory: Arc<InventoryService>,
    notifications: Arc<NotificationService>,
    batch_size: u64,
}

impl OutboxWorker {
    pub fn new(
        db: Arc<DatabaseConnection>,
        inventory: Arc<InventoryService>,
        notifications: Arc<NotificationService>,
        batch_size: u64,
    ) -> Self {
        Self {
            db,
            inventory,
            notifications,
            batch_size,
        }
    }

    /// Spawns the polling loop.
    pub fn spawn(self: Arc<Self>, poll_interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!("Outbox worker started");
            loop {
                if let Err(e) = self.drain_once().await {
                    error!(error = %e, "outbox worker pass failed");
                }
                sleep(poll_interval).await;
            }
        })
    }

    /// Claims and executes one batch of due jobs. Returns how many jobs ran.
    pub async fn drain_once(&self) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let jobs = OutboxJobEntity::find()
            .filter(outbox_job::Column::Status.eq(JobStatus::Pending.as_str()))
            .filter(outbox_job::Column::AvailableAt.lte(now))
            .order_by_asc(outbox_job::Column::CreatedAt)
            .limit(self.batch_size)
            .all(&*self.db)
            .await?;

        let mut executed = 0;
        for job in jobs {
            let attempts = job.attempts + 1;
            let mut claiming: outbox_job::ActiveModel = job.into();
            claiming.status = Set(JobStatus::Processing.as_str().to_string());
            claiming.attempts = Set(attempts);
            claiming.updated_at = Set(Some(Utc::now()));
            let claimed = claiming.update(&*self.db).await?;

            match self.execute(&claimed).await {
                Ok(()) => {
                    let mut done: outbox_job::ActiveModel = claimed.into();
                    done.status = Set(JobStatus::Delivered.as_str().to_string());
                    done.last_error = Set(None);
                    done.updated_at = Set(Some(Utc::now()));
                    done.update(&*self.db).await?;
                }
                Err(e) => {
                    warn!(
                        attempts = attempts,
                        error = %e,
                        "outbox job execution failed"
                    );
                    let mut retrying: outbox_job::ActiveModel = claimed.into();
                    if attempts < MAX_ATTEMPTS {
                        retrying.status = Set(JobStatus::Pending.as_str().to_string());
                        retrying.available_at = Set(Utc::now()
                            + chrono::Duration::seconds(backoff_secs(attempts) as i64)
                            + chrono::Duration::milliseconds(jitter_ms()));
                    } else {
                        retrying.status = Set(JobStatus::Failed.as_str().to_string());
                    }
                    retrying.last_error = Set(Some(e.to_string()));
                    retrying.updated_at = Set(Some(Utc::now()));
                    retrying.update(&*self.db).await?;
                }
            }
            executed += 1;
        }
        Ok(executed)
    }

    async fn execute(&self, job: &outbox_job::Model) -> Result<(), ServiceError> {
        let kind = JobKind::parse(&job.job_type).ok_or_else(|| {
            ServiceError::InternalError(format!("unknown outbox job type: {}", job.job_type))
        })?;

        match kind {
            JobKind::DecrementStock => {
                let payload: DecrementStockJob = serde_json::from_value(job.payload.clone())?;
                self.inventory
                    .decrement(payload.product_id, payload.quantity)
                    .await?;
                Ok(())
            }
            JobKind::NotifyUser => {
                let payload: NotifyUserJob = serde_json::from_value(job.payload.clone())?;
                self.notifications
                    .create(
                        payload.user_id,
                        &payload.kind,
                        &payload.title,
                        &payload.message,
                    )
                    .await?;
                Ok(())
            }
        }
    }
}

fn backoff_secs(attempts: i32) -> u64 {
    BASE_BACKOFF_SECS.saturating_pow(attempts as u32)
}

fn jitter_ms() -> i64 {
    rand::thread_rng().gen_range(0..500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_round_trips() {
        for kind in [JobKind::DecrementStock, JobKind::NotifyUser] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("reticulate_splines"), None);
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(3), 8);
        assert!(backoff_secs(40) >= backoff_secs(8));
    }
}
