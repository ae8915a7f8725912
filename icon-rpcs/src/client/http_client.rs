use super::rpc_client_t::{RawRpcFuture, RpcClientT, RpcOutcome};
use crate::Error;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::Request;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::TokioExecutor;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;

/// A JSON-RPC 2.0 HTTP transport. Pools connections via
/// [`hyper_util`]'s legacy client so repeated calls to the same node reuse
/// a socket; nothing else is cached (each call still builds its own
/// envelope and owns its own headers).
#[derive(Clone)]
pub struct JsonRpcHttpClient {
    inner: LegacyClient<HttpConnector, Full<Bytes>>,
}

impl Default for JsonRpcHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRpcHttpClient {
    /// Construct a new HTTP transport with a fresh connection pool.
    pub fn new() -> Self {
        JsonRpcHttpClient {
            inner: LegacyClient::builder(TokioExecutor::new()).build_http(),
        }
    }
}

impl RpcClientT for JsonRpcHttpClient {
    fn call_raw<'a>(
        &'a self,
        url: &'a str,
        id: i64,
        method: &'a str,
        params: &'a Value,
        headers: &'a HashMap<String, String>,
    ) -> RawRpcFuture<'a, RpcOutcome> {
        Box::pin(async move {
            let mut envelope = json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
            });
            if let Some(obj) = params.as_object() {
                if !obj.is_empty() {
                    envelope["params"] = params.clone();
                }
            } else if !params.is_null() {
                envelope["params"] = params.clone();
            }

            let body = serde_json::to_vec(&envelope)?;

            let mut builder = Request::builder()
                .method("POST")
                .uri(url)
                .header(CONTENT_TYPE, "application/json");
            for (name, value) in headers {
                let name = HeaderName::from_str(name)
                    .map_err(|e| Error::InvalidUrl(format!("bad header name {name}: {e}")))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|e| Error::InvalidUrl(format!("bad header value for {name}: {e}")))?;
                builder = builder.header(name, value);
            }
            let request = builder
                .body(Full::new(Bytes::from(body)))
                .map_err(|e| Error::Client(Box::new(e)))?;

            let response = self
                .inner
                .request(request)
                .await
                .map_err(|e| Error::Client(Box::new(e)))?;

            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| Error::Client(Box::new(e)))?
                .to_bytes();

            let decoded: Value = serde_json::from_slice(&body)?;
            if let Some(error) = decoded.get("error") {
                return Ok(RpcOutcome::Error(error.clone()));
            }
            let result = decoded.get("result").cloned().unwrap_or(Value::Null);
            Ok(RpcOutcome::Result(result))
        })
    }
}
