use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    entities::notification::{self, Entity as NotificationEntity, Model as NotificationModel},
    errors::ServiceError,
};

/// Service for user-facing notifications. Delivery is a side effect of the
/// order workflow and must never roll it back; callers that cannot tolerate
/// failure use [`NotificationService::create_best_effort`].
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
}

impl NotificationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, message), fields(user_id = %user_id, kind = %kind))]
    pub async fn create(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        message: &str,
    ) -> Result<NotificationModel, ServiceError> {
        let model = notification::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            kind: Set(kind.to_string()),
            title: Set(title.to_string()),
            message: Set(message.to_string()),
            read: Set(false),
            created_at: Set(Utc::now()),
        };
        let saved = model.insert(&*self.db).await?;
        Ok(saved)
    }

    /// Creates a notification, swallowing failures with a warning.
    pub async fn create_best_effort(&self, user_id: Uuid, kind: &str, title: &str, message: &str) {
        if let Err(e) = self.create(user_id, kind, title, message).await {
            warn!(user_id = %user_id, error = %e, "notification delivery failed");
        }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<NotificationModel>, ServiceError> {
        let notifications = NotificationEntity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .order_by_desc(notification::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(notifications)
    }

    #[instrument(skip(self), fields(user_id = %user_id, notification_id = %notification_id))]
    pub async fn mark_read(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> Result<NotificationModel, ServiceError> {
        let found = NotificationEntity::find_by_id(notification_id)
            .filter(notification::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Notification {} not found", notification_id))
            })?;

        let mut active: notification::ActiveModel = found.into();
        active.read = Set(true);
        let updated = active.update(&*self.db).await?;
        Ok(updated)
    }
}
