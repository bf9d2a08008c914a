use crate::{
    db::DbPool,
    entities::{
        student::{self, Entity as Student},
        StudentModel,
    },
    errors::ServiceError,
    services::not_blank,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(custom = "not_blank")]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(custom = "not_blank")]
    pub student_number: String,
}

/// Fails with `NotFound` unless a student with `student_id` exists.
pub(crate) async fn ensure_student<C>(db: &C, student_id: i32) -> Result<(), ServiceError>
where
    C: ConnectionTrait,
{
    let found = Student::find_by_id(student_id)
        .count(db)
        .await
        .map_err(ServiceError::db_error)?;
    if found == 0 {
        return Err(ServiceError::student_not_found(student_id));
    }
    Ok(())
}

/// Student accounts that subscriptions, notifications and feedback belong to.
#[derive(Clone)]
pub struct StudentService {
    db_pool: Arc<DbPool>,
}

impl StudentService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Registers a student. Email and student number must both be unused.
    #[instrument(skip(self, request), fields(student_number = %request.student_number))]
    pub async fn create_student(
        &self,
        request: CreateStudentRequest,
    ) -> Result<StudentModel, ServiceError> {
        request.validate()?;
        let db = self.db_pool.as_ref();
        let email = request.email.trim().to_lowercase();
        let student_number = request.student_number.trim().to_string();

        let taken = Student::find()
            .filter(
                Condition::any()
                    .add(student::Column::Email.eq(email.as_str()))
                    .add(student::Column::StudentNumber.eq(student_number.as_str())),
            )
            .count(db)
            .await
            .map_err(ServiceError::db_error)?;
        if taken > 0 {
            return Err(ServiceError::Conflict(
                "Email or student ID already registered".to_string(),
            ));
        }

        let created = student::ActiveModel {
            name: Set(request.name.trim().to_string()),
            email: Set(email),
            student_number: Set(student_number),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(student_id = created.id, "Student registered");
        Ok(created)
    }

    pub async fn get_student(&self, student_id: i32) -> Result<StudentModel, ServiceError> {
        Student::find_by_id(student_id)
            .one(self.db_pool.as_ref())
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::student_not_found(student_id))
    }
}
