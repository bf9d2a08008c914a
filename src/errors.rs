use sea_orm::error::DbErr;
use serde::Serialize;

/// Coarse error categories callers branch on when choosing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    Conflict,
    Storage,
    Internal,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidArgument(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::DatabaseError(_) => ErrorKind::Storage,
            Self::EventError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Message safe to surface to an operator. Storage and internal failures
    /// are reduced to a generic text so driver details stay in the logs.
    pub fn response_message(&self) -> String {
        match self.kind() {
            ErrorKind::Storage => "Database error".to_string(),
            ErrorKind::Internal => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    pub(crate) fn product_not_found(product_id: i32) -> Self {
        ServiceError::NotFound(format!("Product with ID {} not found", product_id))
    }

    pub(crate) fn order_not_found(order_id: i32) -> Self {
        ServiceError::NotFound(format!("Order with ID {} not found", order_id))
    }

    pub(crate) fn student_not_found(student_id: i32) -> Self {
        ServiceError::NotFound(format!("Student with ID {} not found", student_id))
    }
}

pub type AppError = ServiceError;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_hide_driver_details() {
        let err = ServiceError::db_error("connection reset by peer");
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.response_message(), "Database error");
    }

    #[test]
    fn business_errors_keep_their_message() {
        let err = ServiceError::Conflict("Not enough stock to remove. Current stock: 5".into());
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            err.response_message(),
            "Conflict: Not enough stock to remove. Current stock: 5"
        );
    }
}
