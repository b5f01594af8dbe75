use thiserror::Error;
use uuid::Uuid;

/// Why the exchange refused an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientBalance,
    Precision,
    LotSize,
    Notional,
    Other,
}

impl RejectReason {
    /// Classify a raw exchange rejection message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("insufficient balance") {
            return RejectReason::InsufficientBalance;
        }
        if lower.contains("precision") {
            return RejectReason::Precision;
        }
        if lower.contains("lot_size") {
            return RejectReason::LotSize;
        }
        if lower.contains("notional") {
            return RejectReason::Notional;
        }
        RejectReason::Other
    }
}

/// Errors raised by an exchange implementation
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Network(String),

    #[error("order rejected ({reason:?}): {message}")]
    Rejected {
        reason: RejectReason,
        message: String,
    },

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("order book for {0} is empty")]
    EmptyBook(String),
}

impl ExchangeError {
    pub fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        ExchangeError::Rejected {
            reason: RejectReason::classify(&message),
            message,
        }
    }

    /// Worth retrying the same call after a pause
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Network(_))
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ExchangeError::Rejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Errors raised by the position / signal store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("invalid stored value for {field}: {value}")]
    Corrupt { field: &'static str, value: String },

    #[error("position {0} not found")]
    NotFound(Uuid),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Database(sqlx::Error::Io(_))
                | StoreError::Database(sqlx::Error::PoolTimedOut)
                | StoreError::Database(sqlx::Error::PoolClosed)
        )
    }
}

/// Failures surfaced to the cycle scheduler
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("sell attempts exhausted after {attempts} tries for position {transaction_id}")]
    SellAttemptsExhausted { transaction_id: Uuid, attempts: u32 },

    #[error("sell quantity adjustments exhausted after {adjustments} tries for position {transaction_id}")]
    AdjustmentsExhausted {
        transaction_id: Uuid,
        adjustments: u32,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no position in session")]
    MissingPosition,
}
