use reelz_api::{BackendError, ErrorKind};

/// SQLSTATE → error kind.
pub fn classify_sql_state(code: &str) -> ErrorKind {
    match code {
        // unique_violation, check_violation, exclusion_violation
        "23505" | "23514" | "23P01" => ErrorKind::Constraint,
        // serialization_failure, deadlock_detected
        "40001" | "40P01" => ErrorKind::Constraint,
        // foreign_key_violation: the referenced user/post/comment is missing
        "23503" => ErrorKind::NotFound,
        "23502" | "22P02" | "22001" => ErrorKind::Format,
        // connection exceptions, admin shutdown, too many connections
        c if c.starts_with("08") || c.starts_with("57") || c == "53300" => ErrorKind::Io,
        _ => ErrorKind::Logic,
    }
}

pub fn map_sqlx(e: sqlx::Error) -> BackendError {
    match &e {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_string();
            match db.code().as_deref().map(classify_sql_state) {
                Some(ErrorKind::Constraint) => BackendError::constraint(msg),
                Some(ErrorKind::NotFound) => BackendError::not_found(msg),
                Some(ErrorKind::Format) => BackendError::format_err(msg),
                Some(ErrorKind::Io) => BackendError::io(msg),
                _ => BackendError::new(msg),
            }
        }
        sqlx::Error::RowNotFound => BackendError::not_found(e.to_string()),
        sqlx::Error::Configuration(_) => BackendError::config(e.to_string()),
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => BackendError::format_err(e.to_string()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => BackendError::io(e.to_string()),
        _ => BackendError::new(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_states() {
        assert_eq!(classify_sql_state("23505"), ErrorKind::Constraint);
        assert_eq!(classify_sql_state("40001"), ErrorKind::Constraint);
        assert_eq!(classify_sql_state("23503"), ErrorKind::NotFound);
        assert_eq!(classify_sql_state("08006"), ErrorKind::Io);
        assert_eq!(classify_sql_state("57P01"), ErrorKind::Io);
        assert_eq!(classify_sql_state("42601"), ErrorKind::Logic);
    }

    #[test]
    fn pool_errors_are_transient() {
        assert!(map_sqlx(sqlx::Error::PoolTimedOut).is_transient());
        assert_eq!(map_sqlx(sqlx::Error::RowNotFound).kind(), ErrorKind::NotFound);
    }
}
