use thiserror::Error;

/// Failures loading the offering list from the product registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),

    #[error("Catalog returned no offerings")]
    Empty,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Transaction failed verification: {0}")]
    FailedVerification(String),
}

/// User-visible outcome of a purchase that did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("Purchase cancelled by user")]
    UserCancelled,

    #[error("Purchase pending approval")]
    Pending,

    #[error("Purchase failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Failed to write entitlement state: {0}")]
    WriteFailed(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Purchase(#[from] PurchaseError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transaction source error: {0}")]
    Source(String),

    #[error("Reconciliation loop has stopped")]
    Shutdown,
}

impl AppError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn source<S: Into<String>>(msg: S) -> Self {
        Self::Source(msg.into())
    }

    pub fn is_pii_safe(&self) -> bool {
        match self {
            Self::Database(_) | Self::Serialization(_) | Self::Io(_) | Self::Source(_) => false,
            Self::Catalog(_)
            | Self::Verification(_)
            | Self::Purchase(_)
            | Self::Persistence(_)
            | Self::Config(_)
            | Self::Shutdown => true,
        }
    }

    pub fn to_safe_string(&self) -> String {
        if self.is_pii_safe() {
            self.to_string()
        } else {
            match self {
                Self::Database(_) => "Database operation failed".to_string(),
                Self::Serialization(_) => "Malformed data".to_string(),
                Self::Io(_) => "IO operation failed".to_string(),
                Self::Source(_) => "Store connection failed".to_string(),
                _ => self.to_string(),
            }
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Catalog(CatalogError::Unavailable(_))
                | Self::Persistence(_)
                | Self::Source(_)
                | Self::Io(_)
                | Self::Database(sqlx::Error::PoolTimedOut)
                | Self::Database(sqlx::Error::Io(_))
        )
    }
}

pub type AppResult<T> = Result<T, AppError>;
