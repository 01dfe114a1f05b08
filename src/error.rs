//! Error types for Manaforge.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Wizard error: {0}")]
    Wizard(#[from] WizardError),

    #[error("Assignment error: {0}")]
    Assignment(#[from] AssignmentError),

    #[error("Investment error: {0}")]
    Investment(#[from] InvestmentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "postgres")]
    #[error("Pool build error: {0}")]
    PoolBuild(#[from] deadpool_postgres::BuildError),

    #[cfg(feature = "postgres")]
    #[error("Pool runtime error: {0}")]
    PoolRuntime(#[from] deadpool_postgres::PoolError),
}

/// Errors from the wizard/mana surface (sole owner of balances).
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("Wizard {id} not found")]
    NotFound { id: i64 },

    #[error("User {user_id} already owns the maximum of {max} wizards")]
    WizardLimitReached { user_id: i64, max: usize },

    #[error("Insufficient mana: balance {balance}, required {required}")]
    InsufficientMana { balance: i64, required: i64 },

    #[error("Transfer amount must be positive, got {amount}")]
    NonPositiveAmount { amount: i64 },

    #[error("Cannot transfer mana to yourself")]
    SelfTransfer,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Errors from the assignment lifecycle and the job ticker.
#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("Job {id} not found")]
    JobNotFound { id: i64 },

    #[error("Job {id} is full")]
    JobFull { id: i64 },

    #[error("Wizard {id} not found")]
    WizardNotFound { id: i64 },

    #[error("Wizard element {wizard_element} does not match required element {required_element}")]
    ElementMismatch {
        wizard_element: String,
        required_element: String,
    },

    #[error("Wizard level {wizard_level} is below required level {required_level}")]
    LevelTooLow {
        wizard_level: i32,
        required_level: i32,
    },

    #[error("Wizard {wizard_id} is already assigned to job {job_id}")]
    AlreadyAssigned { wizard_id: i64, job_id: i64 },

    #[error("Assignment {id} not found or already finalized")]
    NotFound { id: i64 },

    #[error("Assignment {id} is already {status}")]
    AlreadyTerminal { id: i64, status: String },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Errors from the investment lifecycle and scheduler.
#[derive(Debug, thiserror::Error)]
pub enum InvestmentError {
    #[error("Investment type {id} not found")]
    TypeNotFound { id: i64 },

    #[error("Investment amount {amount} outside allowed range [{min}, {max}]")]
    InvalidAmount { amount: i64, min: i64, max: i64 },

    #[error("Insufficient mana: balance {balance}, required {required}")]
    InsufficientBalance { balance: i64, required: i64 },

    #[error("Wizard {id} not found")]
    WizardNotFound { id: i64 },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// RPC status codes owed to the boundary layer.
///
/// The core never speaks a wire protocol itself; it classifies every
/// business error into one of these codes and the transport maps them 1:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    FailedPrecondition,
    Internal,
    DeadlineExceeded,
    Unauthenticated,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Internal => "INTERNAL",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Unauthenticated => "UNAUTHENTICATED",
        };
        write!(f, "{}", name)
    }
}

impl WizardError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::WizardLimitReached { .. } => ErrorCode::FailedPrecondition,
            Self::InsufficientMana { .. } => ErrorCode::FailedPrecondition,
            Self::NonPositiveAmount { .. } => ErrorCode::InvalidArgument,
            Self::SelfTransfer => ErrorCode::InvalidArgument,
            Self::Database(_) => ErrorCode::Internal,
        }
    }
}

impl AssignmentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::JobNotFound { .. } | Self::WizardNotFound { .. } | Self::NotFound { .. } => {
                ErrorCode::NotFound
            }
            Self::JobFull { .. }
            | Self::ElementMismatch { .. }
            | Self::LevelTooLow { .. }
            | Self::AlreadyAssigned { .. }
            | Self::AlreadyTerminal { .. } => ErrorCode::FailedPrecondition,
            Self::Database(_) => ErrorCode::Internal,
        }
    }
}

impl InvestmentError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TypeNotFound { .. } | Self::WizardNotFound { .. } => ErrorCode::NotFound,
            Self::InvalidAmount { .. } => ErrorCode::InvalidArgument,
            Self::InsufficientBalance { .. } => ErrorCode::FailedPrecondition,
            Self::Database(_) => ErrorCode::Internal,
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wizard_error_codes() {
        assert_eq!(
            WizardError::NotFound { id: 7 }.code(),
            ErrorCode::NotFound
        );
        assert_eq!(
            WizardError::InsufficientMana {
                balance: 5,
                required: 10
            }
            .code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(WizardError::SelfTransfer.code(), ErrorCode::InvalidArgument);
        assert_eq!(
            WizardError::Database(DatabaseError::Query("boom".into())).code(),
            ErrorCode::Internal
        );
    }

    #[test]
    fn test_assignment_error_codes() {
        assert_eq!(
            AssignmentError::JobFull { id: 1 }.code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            AssignmentError::AlreadyAssigned {
                wizard_id: 1,
                job_id: 2
            }
            .code(),
            ErrorCode::FailedPrecondition
        );
        assert_eq!(
            AssignmentError::NotFound { id: 3 }.code(),
            ErrorCode::NotFound
        );
    }

    #[test]
    fn test_investment_error_codes() {
        assert_eq!(
            InvestmentError::InvalidAmount {
                amount: 1,
                min: 100,
                max: 0
            }
            .code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            InvestmentError::InsufficientBalance {
                balance: 1,
                required: 100
            }
            .code(),
            ErrorCode::FailedPrecondition
        );
    }

    #[test]
    fn test_error_code_display_matches_wire_names() {
        assert_eq!(ErrorCode::FailedPrecondition.to_string(), "FAILED_PRECONDITION");
        assert_eq!(ErrorCode::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(ErrorCode::DeadlineExceeded.to_string(), "DEADLINE_EXCEEDED");
    }

    #[test]
    fn test_element_mismatch_display() {
        let err = AssignmentError::ElementMismatch {
            wizard_element: "Water".to_string(),
            required_element: "Fire".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Water"));
        assert!(msg.contains("Fire"));
    }

    #[test]
    fn test_error_from_subsystem_errors() {
        let err = Error::from(AssignmentError::JobFull { id: 9 });
        assert!(err.to_string().contains("Assignment error"));
        let err = Error::from(DatabaseError::Pool("refused".into()));
        assert!(err.to_string().contains("refused"));
    }
}
