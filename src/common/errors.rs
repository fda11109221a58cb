/// Error taxonomy for the detection engine.
///
/// Transaction-local variants (`SignatureRecovery`, `EventDecode`) are logged and skipped by the
/// scanner. Block-local variants (`BlockUnavailable`, `ReceiptUnavailable`, `MalformedBlock`) abort
/// the current block and are handed back to the caller.
use ethers::types::H256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    /// Node connection or subscription failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Requested block range is empty, reversed or beyond the chain head.
    #[error("invalid block range: start {start}, end {end}, latest known block {latest}")]
    InvalidRange { start: u64, end: u64, latest: u64 },

    #[error("block {0} unavailable from node")]
    BlockUnavailable(u64),

    #[error("receipt unavailable for tx {tx_hash:?} in block {block}: {reason}")]
    ReceiptUnavailable {
        block: u64,
        tx_hash: H256,
        reason: String,
    },

    #[error("signature recovery failed for tx {tx_hash:?}: {reason}")]
    SignatureRecovery { tx_hash: H256, reason: String },

    #[error("failed to decode {event} log #{log_index}: {reason}")]
    EventDecode {
        event: &'static str,
        log_index: usize,
        reason: String,
    },

    /// A fee-market invariant of the block was violated.
    #[error("malformed block {block}: {reason}")]
    MalformedBlock { block: u64, reason: String },

    #[error("detection cancelled")]
    Cancelled,

    #[error("a scan is already running")]
    Busy,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DetectError {
    /// True for failures confined to a single transaction or log entry.
    pub fn is_transaction_local(&self) -> bool {
        matches!(
            self,
            DetectError::SignatureRecovery { .. } | DetectError::EventDecode { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
