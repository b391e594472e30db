use crate::error::AppError;
use diesel::result::{DatabaseErrorKind, Error as DieselError};

/// Known constraints of the queue schema, mapped to `(entity, field)`.
const CONSTRAINTS: &[(&str, &str, &str)] = &[
    ("jobs_pkey", "jobs", "id"),
    ("batches_pkey", "batches", "id"),
    ("rate_limit_usage_pkey", "rate_limit_usage", "resource_key"),
    ("jobs_batch_id_fkey", "jobs", "batch_id"),
    ("jobs_attempts_check", "jobs", "attempts"),
    ("batches_progress_check", "batches", "processed_items"),
];

/// Utility for converting database errors to structured AppError variants.
///
/// Constraint names are looked up in the schema's own constraint table;
/// anything unrecognised falls back to `AppError::Database` carrying the
/// driver message.
pub struct DatabaseErrorConverter;

impl DatabaseErrorConverter {
    /// Converts a Diesel error to an appropriate AppError variant.
    pub fn convert_diesel_error(error: DieselError, operation: &str) -> AppError {
        match error {
            DieselError::DatabaseError(kind, info) => {
                Self::convert_database_error(kind, info, operation)
            }
            DieselError::NotFound => AppError::NotFound {
                entity: "resource".to_string(),
                field: "id".to_string(),
                value: "unknown".to_string(),
            },
            other => AppError::Database {
                operation: operation.to_string(),
                source: anyhow::Error::from(other),
            },
        }
    }

    fn convert_database_error(
        kind: DatabaseErrorKind,
        info: Box<dyn diesel::result::DatabaseErrorInformation + Send + Sync>,
        operation: &str,
    ) -> AppError {
        let message = info.message().to_string();
        let known = info.constraint_name().and_then(Self::lookup_constraint);

        match (kind, known) {
            (DatabaseErrorKind::UniqueViolation, Some((entity, field))) => AppError::Duplicate {
                entity: entity.to_string(),
                field: field.to_string(),
                value: Self::extract_key_value(&message).unwrap_or_default(),
            },
            (DatabaseErrorKind::ForeignKeyViolation, Some((_, field)))
            | (DatabaseErrorKind::CheckViolation, Some((_, field))) => AppError::Validation {
                field: field.to_string(),
                reason: message,
            },
            (DatabaseErrorKind::NotNullViolation, _) => AppError::Validation {
                field: info.column_name().unwrap_or("unknown").to_string(),
                reason: "Field is required".to_string(),
            },
            _ => AppError::Database {
                operation: operation.to_string(),
                source: anyhow::Error::msg(format!("Database error: {}", message)),
            },
        }
    }

    fn lookup_constraint(name: &str) -> Option<(&'static str, &'static str)> {
        CONSTRAINTS
            .iter()
            .find(|(constraint, _, _)| *constraint == name)
            .map(|(_, entity, field)| (*entity, *field))
    }

    /// Pulls the value out of Postgres' `Key (col)=(value)` detail line.
    fn extract_key_value(message: &str) -> Option<String> {
        let start = message.find(")=(")? + 3;
        let rest = &message[start..];
        let end = rest.find(')')?;
        Some(rest[..end].to_string())
    }
}
