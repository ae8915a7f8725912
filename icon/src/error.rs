//! The closed error taxonomy every node-reported and locally-raised error
//! is classified into: a `code`, a `reason` symbol and a `domain`.

use crate::schema::SchemaErrors;
use std::fmt;

/// Which side of the system an error originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    /// JSON-RPC transport and request-level failures.
    Request,
    /// SCORE (smart contract) execution failures.
    Contract,
}

/// The closed set of reason symbols a node-reported error code maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorReason {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ServerError,
    SystemError,
    PoolOverflow,
    Pending,
    Executing,
    NotFound,
    LackOfResource,
    Timeout,
    SystemTimeout,
    UnknownFailure,
    ContractNotFound,
    ContractMethodNotFound,
    MethodNotPayable,
    IllegalFormat,
    InvalidParameter,
    InvalidInstance,
    InvalidContainerAccess,
    AccessDenied,
    OutOfStep,
    OutOfBalance,
    TimeoutError,
    StackOverflow,
    SkipTransaction,
    ScoreReverted,
}

impl ErrorReason {
    /// The wire symbol this reason is reported as.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorReason::ParseError => "parse_error",
            ErrorReason::InvalidRequest => "invalid_request",
            ErrorReason::MethodNotFound | ErrorReason::ContractMethodNotFound => "method_not_found",
            ErrorReason::InvalidParams => "invalid_params",
            ErrorReason::InternalError => "internal_error",
            ErrorReason::ServerError => "server_error",
            ErrorReason::SystemError => "system_error",
            ErrorReason::PoolOverflow => "pool_overflow",
            ErrorReason::Pending => "pending",
            ErrorReason::Executing => "executing",
            ErrorReason::NotFound => "not_found",
            ErrorReason::LackOfResource => "lack_of_resource",
            ErrorReason::Timeout => "timeout",
            ErrorReason::SystemTimeout => "system_timeout",
            ErrorReason::UnknownFailure => "unknown_failure",
            ErrorReason::ContractNotFound => "contract_not_found",
            ErrorReason::MethodNotPayable => "method_not_payable",
            ErrorReason::IllegalFormat => "illegal_format",
            ErrorReason::InvalidParameter => "invalid_parameter",
            ErrorReason::InvalidInstance => "invalid_instance",
            ErrorReason::InvalidContainerAccess => "invalid_container_access",
            ErrorReason::AccessDenied => "access_denied",
            ErrorReason::OutOfStep => "out_of_step",
            ErrorReason::OutOfBalance => "out_of_balance",
            ErrorReason::TimeoutError => "timeout_error",
            ErrorReason::StackOverflow => "stack_overflow",
            ErrorReason::SkipTransaction => "skip_transaction",
            ErrorReason::ScoreReverted => "score_reverted",
        }
    }
}

/// Classify a JSON-RPC error `code` into its `(reason, domain)` pair per
/// the closed table. Codes outside every known range classify as a
/// generic `server_error`, since the table is closed but nodes are free to
/// add server_error subcodes within `-32099..=-32000`.
pub fn classify(code: i64) -> (ErrorReason, ErrorDomain) {
    match code {
        -32700 => (ErrorReason::ParseError, ErrorDomain::Request),
        -32600 => (ErrorReason::InvalidRequest, ErrorDomain::Request),
        -32601 => (ErrorReason::MethodNotFound, ErrorDomain::Request),
        -32602 => (ErrorReason::InvalidParams, ErrorDomain::Request),
        -32603 => (ErrorReason::InternalError, ErrorDomain::Request),
        -32099..=-32000 => (ErrorReason::ServerError, ErrorDomain::Request),
        -31000 => (ErrorReason::SystemError, ErrorDomain::Request),
        -31001 => (ErrorReason::PoolOverflow, ErrorDomain::Request),
        -31002 => (ErrorReason::Pending, ErrorDomain::Request),
        -31003 => (ErrorReason::Executing, ErrorDomain::Request),
        -31004 => (ErrorReason::NotFound, ErrorDomain::Request),
        -31005 => (ErrorReason::LackOfResource, ErrorDomain::Request),
        -31006 => (ErrorReason::Timeout, ErrorDomain::Request),
        -31007 => (ErrorReason::SystemTimeout, ErrorDomain::Request),
        -30001 => (ErrorReason::UnknownFailure, ErrorDomain::Contract),
        -30002 => (ErrorReason::ContractNotFound, ErrorDomain::Contract),
        -30003 => (ErrorReason::ContractMethodNotFound, ErrorDomain::Contract),
        -30004 => (ErrorReason::MethodNotPayable, ErrorDomain::Contract),
        -30005 => (ErrorReason::IllegalFormat, ErrorDomain::Contract),
        -30006 => (ErrorReason::InvalidParameter, ErrorDomain::Contract),
        -30007 => (ErrorReason::InvalidInstance, ErrorDomain::Contract),
        -30008 => (ErrorReason::InvalidContainerAccess, ErrorDomain::Contract),
        -30009 => (ErrorReason::AccessDenied, ErrorDomain::Contract),
        -30010 => (ErrorReason::OutOfStep, ErrorDomain::Contract),
        -30011 => (ErrorReason::OutOfBalance, ErrorDomain::Contract),
        -30012 => (ErrorReason::TimeoutError, ErrorDomain::Contract),
        -30013 => (ErrorReason::StackOverflow, ErrorDomain::Contract),
        -30014 => (ErrorReason::SkipTransaction, ErrorDomain::Contract),
        -30999..=-30032 => (ErrorReason::ScoreReverted, ErrorDomain::Contract),
        _ => (ErrorReason::ServerError, ErrorDomain::Request),
    }
}

/// An error reported by the node itself, or synthesized locally for a
/// transport/system failure (§7).
#[derive(Debug, Clone)]
pub struct NodeError {
    pub code: i64,
    pub reason: ErrorReason,
    pub domain: ErrorDomain,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl NodeError {
    /// Build a `NodeError` from a decoded `{"code", "message", "data"?}`
    /// JSON-RPC error object, classifying its code.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let code = value.get("code").and_then(|v| v.as_i64()).unwrap_or(-31000);
        let message = value
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();
        let data = value.get("data").cloned();
        let (reason, domain) = classify(code);
        NodeError {
            code,
            reason,
            domain,
            message,
            data,
        }
    }

    /// A locally-synthesized `system_error`, used for transport failures
    /// and the step estimator's generic failure message.
    pub fn system_error(message: impl Into<String>) -> Self {
        NodeError {
            code: -31000,
            reason: ErrorReason::SystemError,
            domain: ErrorDomain::Request,
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.reason.as_str(), self.code, self.message)
    }
}

impl std::error::Error for NodeError {}

/// The top-level error type for every fallible operation this crate
/// exposes.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A node-reported JSON-RPC error, or a locally-synthesized
    /// transport/system failure classified into the same taxonomy.
    #[error(transparent)]
    Node(#[from] NodeError),

    /// Schema validation failed before a request was ever sent.
    #[error("invalid_params: {}", .0.flatten())]
    Schema(SchemaErrors),

    /// The request could not be built, signed or serialized: missing key,
    /// non-transaction method passed to `Sign`/`Serialize`, or a malformed
    /// subscription descriptor.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Lower-level transport failure (HTTP, WebSocket, framing).
    #[error("transport error: {0}")]
    Rpc(#[from] icon_rpcs::Error),

    /// Key material or signing failure.
    #[error("signer error: {0}")]
    Signer(#[from] icon_signer::Error),

    /// A response body, or a subscription frame, was not valid JSON.
    #[error("cannot deserialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A node URL failed to parse.
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Build an `invalid_params` error directly from a message, for call
    /// sites that don't have a [`SchemaErrors`] tree handy.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Error::Node(NodeError {
            code: -32602,
            reason: ErrorReason::InvalidParams,
            domain: ErrorDomain::Request,
            message: message.into(),
            data: None,
        })
    }

    /// Build a `system_error`, matching the node/transport-failure policy
    /// of §7.
    pub fn system_error(message: impl Into<String>) -> Self {
        Error::Node(NodeError::system_error(message))
    }
}
