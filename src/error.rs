//! Error taxonomy for the swap orchestration core.
//!
//! Every variant carries two orthogonal classifications, queried through
//! [`Error::retryable`] and [`Error::recoverable`], which the [retry
//! driver](crate::retry) and the coordinators use to decide whether to
//! retry, advance, or fail a swap outright.

use thiserror::Error;

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter-layer errors.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("no adapter registered for chain {0:?}")]
    NotFound(crate::chain::Chain),
    #[error("adapter for {0:?} has not completed initialization")]
    NotInitialized(crate::chain::Chain),
    #[error("adapter for {chain:?} failed to initialize: {reason}")]
    InitFailed {
        chain: crate::chain::Chain,
        reason: String,
    },
    #[error("connection to {chain:?} endpoint failed: {reason}")]
    ConnectionFailed {
        chain: crate::chain::Chain,
        reason: String,
    },
}

/// Transaction-layer errors.
#[derive(Error, Debug, Clone)]
pub enum TransactionError {
    #[error("failed to build transaction: {0}")]
    BuildFailed(String),
    #[error("failed to sign transaction: {0}")]
    SignFailed(String),
    #[error("failed to broadcast transaction: {0}")]
    BroadcastFailed(String),
    #[error("timed out waiting for confirmation of {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("insufficient balance: have {available}, need {required}")]
    InsufficientBalance { available: u64, required: u64 },
    #[error("insufficient gas/fee budget: {0}")]
    InsufficientGas(String),
}

/// HTLC-layer errors.
#[derive(Error, Debug, Clone)]
pub enum HtlcError {
    #[error("failed to create HTLC: {0}")]
    CreateFailed(String),
    #[error("failed to claim HTLC: {0}")]
    ClaimFailed(String),
    #[error("failed to refund HTLC: {0}")]
    RefundFailed(String),
    #[error("HTLC {0} not found")]
    NotFound(String),
    #[error("HTLC {0} already claimed")]
    AlreadyClaimed(String),
    #[error("HTLC {0} already refunded")]
    AlreadyRefunded(String),
    #[error("HTLC {0} timelock has not expired yet")]
    TimelockNotExpired(String),
    #[error("HTLC {0} timelock has already expired")]
    TimelockExpired(String),
    #[error("preimage does not hash to the HTLC's hashlock")]
    InvalidPreimage,
}

/// Swap-level (coordinator) errors.
#[derive(Error, Debug, Clone)]
pub enum SwapError {
    #[error("swap execution failed: {0}")]
    ExecutionFailed(String),
    #[error("swap timed out")]
    Timeout,
    #[error("swap was cancelled: {0}")]
    Cancelled(String),
    #[error("invalid swap intent: {0}")]
    InvalidIntent(String),
    #[error("no route available for this intent")]
    NoRoute,
    #[error("slippage exceeded: expected at least {min}, would receive {actual}")]
    SlippageExceeded { min: u64, actual: u64 },
    #[error("swap deadline exceeded")]
    DeadlineExceeded,
}

/// Solver-related errors.
#[derive(Error, Debug, Clone)]
pub enum SolverError {
    #[error("solver not found")]
    NotFound,
    #[error("solver has insufficient inventory for this route")]
    InsufficientInventory,
    #[error("solver is offline")]
    Offline,
}

/// Privacy-hub-specific errors.
#[derive(Error, Debug, Clone)]
pub enum PrivacyError {
    #[error("privacy hub is unavailable: {0}")]
    HubUnavailable(String),
    #[error("stealth address generation failed: {0}")]
    StealthAddressGenerationFailed(String),
    #[error("correlation detected between source and destination legs")]
    CorrelationDetected,
}

/// Network/transport errors.
#[derive(Error, Debug, Clone)]
pub enum NetworkError {
    #[error("network error: {0}")]
    Generic(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited, retry after backoff")]
    RateLimited,
}

/// Top-level error type for the swap orchestration core.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Htlc(#[from] HtlcError),
    #[error(transparent)]
    Swap(#[from] SwapError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Privacy(#[from] PrivacyError),
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(format!("{:#}", err))
    }
}

impl Error {
    /// Whether a central retry driver should retry this error with backoff.
    pub fn retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Adapter(AdapterError::ConnectionFailed { .. }) => true,
            Error::Transaction(TransactionError::BroadcastFailed(_)) => true,
            Error::Transaction(TransactionError::ConfirmationTimeout { .. }) => true,
            Error::Htlc(HtlcError::TimelockNotExpired(_)) => true,
            _ => false,
        }
    }

    /// Whether the overall swap can still succeed after remedial action.
    pub fn recoverable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Adapter(_) => true,
            Error::Transaction(TransactionError::BroadcastFailed(_)) => true,
            Error::Transaction(TransactionError::ConfirmationTimeout { .. }) => true,
            Error::Htlc(HtlcError::TimelockNotExpired(_)) => true,
            Error::Swap(SwapError::SlippageExceeded { .. }) => true,
            Error::Swap(SwapError::DeadlineExceeded) => false,
            Error::Solver(SolverError::Offline) => true,
            _ => false,
        }
    }

    /// A short, user-facing suggestion for the next action, when recoverable.
    pub fn suggestion(&self) -> Option<&'static str> {
        if !self.recoverable() {
            return None;
        }
        match self {
            Error::Network(_) | Error::Adapter(_) => Some("retry once connectivity is restored"),
            Error::Transaction(TransactionError::BroadcastFailed(_)) => {
                Some("retry broadcasting the transaction")
            }
            Error::Transaction(TransactionError::ConfirmationTimeout { .. }) => {
                Some("wait for additional confirmations or rebroadcast with a higher fee")
            }
            Error::Htlc(HtlcError::TimelockNotExpired(_)) => {
                Some("wait for the timelock to expire before retrying the refund")
            }
            Error::Swap(SwapError::SlippageExceeded { .. }) => {
                Some("increase the maximum slippage and retry")
            }
            Error::Solver(SolverError::Offline) => Some("choose a later deadline or another solver"),
            _ => None,
        }
    }
}
