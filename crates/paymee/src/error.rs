use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the PayMee library.
///
/// Every variant is terminal for the attempt that produced it; nothing in the
/// crate retries internally.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unsupported chain: endpoint id {eid}")]
    UnsupportedChain { eid: u32 },

    #[error("invalid amount format: {0}")]
    InvalidAmountFormat(String),

    #[error("invalid native drop argument: {0}")]
    InvalidNativeDropArgument(String),

    #[error("rpc unavailable: {0}")]
    RpcUnavailable(String),

    #[error("node rejected request ({code}): {message}")]
    NodeRejected { code: i64, message: String },

    #[error("unexpected node response: {0}")]
    UnexpectedResponse(String),

    #[error("contract call reverted: {}", revert_summary(.message, .data))]
    ContractCallReverted {
        message: String,
        data: Option<Vec<u8>>,
    },

    #[error("quote failed: {}", revert_summary(.message, .data))]
    QuoteFailed {
        message: String,
        data: Option<Vec<u8>>,
    },

    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientBalance {
        asset: String,
        required: String,
        available: String,
    },

    #[error("approval failed: {0}")]
    ApprovalFailed(String),

    #[error("send transaction failed: {}", revert_summary(.message, .data))]
    SendTransactionFailed {
        message: String,
        data: Option<Vec<u8>>,
    },

    #[error("timed out waiting for confirmation of {tx_hash}")]
    ConfirmationTimeout { tx_hash: String },

    #[error("submitted {tx_hash} but its receipt could not be read: {message}")]
    ReceiptUnavailable { tx_hash: String, message: String },

    #[error("payment link {0} not found")]
    NotFound(Uuid),

    #[error("payment link {id} cannot be paid: status is {status}")]
    LinkNotPayable { id: Uuid, status: String },

    #[error("payment link {id} was paid by {tx_hash} but not marked paid: {message}")]
    PaymentNotRecorded {
        id: Uuid,
        tx_hash: String,
        message: String,
    },

    #[error("abi error: {0}")]
    Abi(#[from] AbiError),

    #[error("config error: {0}")]
    Config(String),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("store error: {0}")]
    Store(String),
}

impl Error {
    /// Whether a fresh attempt (re-quoting from scratch) may succeed without
    /// any change to configuration or request.
    ///
    /// Never true once a transaction has been broadcast; see
    /// [`submitted_transaction`](Self::submitted_transaction).
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RpcUnavailable(_))
    }

    /// Hash of a transaction that was broadcast before the failure and may
    /// still be committed. Check it before sending again.
    pub fn submitted_transaction(&self) -> Option<&str> {
        match self {
            Error::ConfirmationTimeout { tx_hash }
            | Error::ReceiptUnavailable { tx_hash, .. }
            | Error::PaymentNotRecorded { tx_hash, .. } => Some(tx_hash),
            _ => None,
        }
    }

    pub(crate) fn reverted(message: impl Into<String>, data: Option<Vec<u8>>) -> Self {
        Error::ContractCallReverted {
            message: message.into(),
            data,
        }
    }
}

impl From<RpcError> for Error {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Reverted { message, data } => Error::ContractCallReverted { message, data },
            RpcError::Node { code, message } => Error::NodeRejected { code, message },
            RpcError::UnexpectedResponse(message) => Error::UnexpectedResponse(message),
            RpcError::Transport(message) => Error::RpcUnavailable(message),
        }
    }
}

fn revert_summary(message: &str, data: &Option<Vec<u8>>) -> String {
    match data {
        Some(bytes) if !bytes.is_empty() => format!("{message} (data 0x{})", hex::encode(bytes)),
        _ => message.to_string(),
    }
}

/// Errors during signature parsing and ABI encoding/decoding.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("invalid function signature: {0}")]
    InvalidSignature(String),

    #[error("data too short: expected at least {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },

    #[error("invalid ABI encoding: {0}")]
    InvalidEncoding(String),

    #[error("value does not match type {expected}")]
    TypeMismatch { expected: String },

    #[error("expected {expected} arguments, got {actual}")]
    ArgumentCount { expected: usize, actual: usize },
}

/// Errors from the JSON-RPC layer, before they are folded into [`Error`].
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The node could not be reached or did not answer in time.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("execution reverted: {message}")]
    Reverted {
        message: String,
        data: Option<Vec<u8>>,
    },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}
