use crate::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::{future::Future, pin::Pin};

/// A trait describing low level JSON-RPC 2.0 interactions over HTTP.
/// Implementations of this are used to instantiate the `icon` crate's
/// request-building client. This is a low level interface that expects an
/// already-built `params` object and returns the deserialized `result` or
/// `error` payload, deferring envelope construction and schema decoding to
/// the caller.
pub trait RpcClientT: Send + Sync + 'static {
    /// POST a JSON-RPC request, optionally with extra headers (used for
    /// `Icon-Options: <timeout_ms>`), and return either the `result` value
    /// or the `error` value from the response envelope.
    fn call_raw<'a>(
        &'a self,
        url: &'a str,
        id: i64,
        method: &'a str,
        params: &'a Value,
        headers: &'a HashMap<String, String>,
    ) -> RawRpcFuture<'a, RpcOutcome>;
}

/// A boxed future returned from [`RpcClientT::call_raw`].
pub type RawRpcFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// The raw outcome of a JSON-RPC call: either the `result` value or the
/// `error` value, exactly as returned by the node.
#[derive(Debug, Clone)]
pub enum RpcOutcome {
    /// `{"result": ...}`
    Result(Value),
    /// `{"error": {"code", "message", "data"?}}`
    Error(Value),
}

impl<T: RpcClientT> RpcClientT for std::sync::Arc<T> {
    fn call_raw<'a>(
        &'a self,
        url: &'a str,
        id: i64,
        method: &'a str,
        params: &'a Value,
        headers: &'a HashMap<String, String>,
    ) -> RawRpcFuture<'a, RpcOutcome> {
        (**self).call_raw(url, id, method, params, headers)
    }
}
