//! A [`MockRpcClient`], useful for testing request building and response
//! decoding without a live node.

use super::rpc_client_t::{RawRpcFuture, RpcClientT, RpcOutcome};
use crate::Error;
use serde_json::Value;
use std::collections::HashMap;

type HandlerFn = Box<dyn Fn(&str, &Value, &HashMap<String, String>) -> Result<RpcOutcome, Error> + Send + Sync>;

/// A mock RPC client that answers calls programmatically. Construct with
/// [`MockRpcClient::new`] and a closure from `(method, params, headers)` to
/// an [`RpcOutcome`].
pub struct MockRpcClient {
    handler: HandlerFn,
}

impl MockRpcClient {
    /// Build a mock client from a handler closure.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value, &HashMap<String, String>) -> Result<RpcOutcome, Error> + Send + Sync + 'static,
    {
        MockRpcClient {
            handler: Box::new(handler),
        }
    }

    /// Build a mock client that always returns the same `result` value,
    /// regardless of method or params.
    pub fn always_result(value: Value) -> Self {
        Self::new(move |_, _, _| Ok(RpcOutcome::Result(value.clone())))
    }
}

impl RpcClientT for MockRpcClient {
    fn call_raw<'a>(
        &'a self,
        _url: &'a str,
        _id: i64,
        method: &'a str,
        params: &'a Value,
        headers: &'a HashMap<String, String>,
    ) -> RawRpcFuture<'a, RpcOutcome> {
        let result = (self.handler)(method, params, headers);
        Box::pin(async move { result })
    }
}
