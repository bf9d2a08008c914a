use crate::{
    db::DbPool,
    entities::{
        feedback::{self, Entity as Feedback},
        student::Entity as Student,
        FeedbackModel, FeedbackStatus, FeedbackType,
    },
    errors::ServiceError,
    services::{not_blank, students::ensure_student},
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitFeedbackRequest {
    pub student_id: i32,
    pub feedback_type: FeedbackType,
    #[validate(custom = "not_blank")]
    pub message: String,
    #[serde(default)]
    pub can_contact: bool,
}

/// Feedback row joined with the submitting student's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub id: i32,
    pub student_id: i32,
    pub student_name: String,
    #[serde(rename = "type")]
    pub feedback_type: String,
    pub message: String,
    pub can_contact: bool,
    pub status: String,
    pub admin_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeedbackEntry {
    fn new(row: FeedbackModel, student_name: String) -> Self {
        Self {
            id: row.id,
            student_id: row.student_id,
            student_name,
            feedback_type: row.feedback_type,
            message: row.message,
            can_contact: row.can_contact,
            status: row.status,
            admin_notes: row.admin_notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Clone)]
pub struct FeedbackService {
    db_pool: Arc<DbPool>,
}

impl FeedbackService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Stores feedback from a registered student with status `new`.
    #[instrument(skip(self, request), fields(student_id = request.student_id))]
    pub async fn submit_feedback(
        &self,
        request: SubmitFeedbackRequest,
    ) -> Result<FeedbackModel, ServiceError> {
        request.validate()?;
        let db = self.db_pool.as_ref();
        ensure_student(db, request.student_id).await?;

        let now = Utc::now();
        let created = feedback::ActiveModel {
            student_id: Set(request.student_id),
            feedback_type: Set(request.feedback_type.to_string()),
            message: Set(request.message.trim().to_string()),
            can_contact: Set(request.can_contact),
            status: Set(FeedbackStatus::New.to_string()),
            admin_notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(feedback_id = created.id, feedback_type = %request.feedback_type, "Feedback submitted");
        Ok(created)
    }

    /// All feedback, newest first.
    pub async fn list_feedback(&self) -> Result<Vec<FeedbackEntry>, ServiceError> {
        let rows = Feedback::find()
            .find_also_related(Student)
            .order_by_desc(feedback::Column::CreatedAt)
            .order_by_desc(feedback::Column::Id)
            .all(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(rows
            .into_iter()
            .map(|(row, student)| FeedbackEntry::new(row, student.map(|s| s.name).unwrap_or_default()))
            .collect())
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        feedback_id: i32,
        status: &str,
    ) -> Result<FeedbackModel, ServiceError> {
        let status: FeedbackStatus = status.trim().parse().map_err(|_| {
            ServiceError::InvalidArgument(format!("Invalid feedback status '{}'", status))
        })?;
        let existing = self.find(feedback_id).await?;

        let mut active: feedback::ActiveModel = existing.into();
        active.status = Set(status.to_string());
        active.updated_at = Set(Utc::now());
        active
            .update(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Replaces the staff notes. `None` or blank text clears them.
    #[instrument(skip(self, notes))]
    pub async fn update_notes(
        &self,
        feedback_id: i32,
        notes: Option<String>,
    ) -> Result<FeedbackModel, ServiceError> {
        let existing = self.find(feedback_id).await?;
        let notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let mut active: feedback::ActiveModel = existing.into();
        active.admin_notes = Set(notes);
        active.updated_at = Set(Utc::now());
        active
            .update(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    async fn find(&self, feedback_id: i32) -> Result<FeedbackModel, ServiceError> {
        Feedback::find_by_id(feedback_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Feedback not found".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feedback_vocabulary_parses() {
        assert_eq!("in_progress".parse::<FeedbackStatus>().ok(), Some(FeedbackStatus::InProgress));
        assert_eq!(FeedbackType::Feature.to_string(), "feature");
        assert!("archived".parse::<FeedbackStatus>().is_err());
    }

    #[test]
    fn blank_messages_are_rejected() {
        let request = SubmitFeedbackRequest {
            student_id: 1,
            feedback_type: FeedbackType::Bug,
            message: "  ".to_string(),
            can_contact: false,
        };
        assert!(request.validate().is_err());
    }
}
