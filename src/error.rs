//! Error taxonomy for the progress engine.
//!
//! Read paths degrade missing data to empty or zero results and rarely surface these errors.
//! Write paths (goal save, point credit, reward claim, challenge completion) return them so the
//! caller gets an explicit success/failure signal.

use thiserror::Error;

use crate::model::{MetricKey, PeriodKind};

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Structured reason for rejecting a request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("target value must be positive, got {0}")]
    NonPositiveTarget(f64),

    #[error("metric {metric} does not support {period} goals")]
    UnsupportedPeriod { metric: MetricKey, period: PeriodKind },

    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    #[error("unknown period '{0}'")]
    UnknownPeriod(String),

    #[error("sample value must be a finite number")]
    NonFiniteValue,

    #[error("point amounts cannot be negative, got {0}")]
    NegativeAmount(i64),

    #[error("insufficient points: balance {balance}, cost {cost}")]
    InsufficientPoints { balance: i64, cost: i64 },

    #[error("unknown reward '{0}'")]
    UnknownReward(String),

    #[error("reward '{0}' has already been claimed")]
    AlreadyClaimed(String),
}

/// Errors surfaced by the engine and its storage layer.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The write lost a race with another writer and the retry budget ran out.
    #[error("concurrent update conflict, retry later")]
    ConcurrencyConflict,

    /// A challenge whose name has no metric mapping. Fatal for that challenge only.
    #[error("challenge '{0}' has no metric mapping")]
    UnmappedChallenge(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl TrackerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        TrackerError::NotFound(what.into())
    }

    /// Whether a retry of the whole transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, TrackerError::ConcurrencyConflict)
    }
}

impl From<sqlx::Error> for TrackerError {
    fn from(err: sqlx::Error) -> Self {
        if is_busy(&err) {
            TrackerError::ConcurrencyConflict
        } else {
            TrackerError::Database(err)
        }
    }
}

/// SQLite reports lock contention as SQLITE_BUSY (5) or SQLITE_LOCKED (6), possibly extended.
fn is_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}
