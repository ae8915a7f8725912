//! The RPC client (component D, continued): binds [`request::Request`] to
//! a transport and exposes every supported node method as a typed
//! wrapper.

use crate::error::NodeError;
use crate::identity::Identity;
use crate::request::{self, Request, RequestOptions};
use crate::schema::{self, Field, FieldType, Primitive, Schema, TypedValue};
use crate::types::TransactionResult;
use crate::wire::{self, AddressKind, Int};
use crate::Error;
use icon_rpcs::client::{JsonRpcHttpClient, RpcClientT, RpcOutcome};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

const ESTIMATE_STEP_METHOD: &str = "debug_estimateStep";

/// A JSON-RPC client bound to one node [`Identity`] and transport.
/// Cloning is cheap; the transport is reference-counted.
#[derive(Clone)]
pub struct Client {
    identity: Identity,
    transport: Arc<dyn RpcClientT>,
}

impl Client {
    /// Build a client against the default [`JsonRpcHttpClient`] transport.
    pub fn new(identity: Identity) -> Self {
        Client::with_transport(identity, Arc::new(JsonRpcHttpClient::new()))
    }

    /// Build a client against an arbitrary [`RpcClientT`] transport, for
    /// tests or alternative HTTP stacks.
    pub fn with_transport(identity: Identity, transport: Arc<dyn RpcClientT>) -> Self {
        Client { identity, transport }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    async fn call_at(&self, url: &str, method: &str, params: Value, timeout_ms: Option<u64>) -> Result<Value, Error> {
        let id = request::next_request_id();
        let mut headers = HashMap::new();
        if let Some(ms) = timeout_ms.filter(|ms| *ms > 0) {
            headers.insert("Icon-Options".to_string(), ms.to_string());
        }
        let outcome = self
            .transport
            .call_raw(url, id, method, &params, &headers)
            .await
            .map_err(|e| Error::system_error(e.to_string()))?;
        match outcome {
            RpcOutcome::Result(value) => Ok(value),
            RpcOutcome::Error(value) => Err(Error::Node(NodeError::from_json(&value))),
        }
    }

    /// Call a method against this client's own node URL (debug endpoint
    /// when `identity.debug()`).
    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        self.call_at(&self.identity.api_url(), method, params, None).await
    }

    fn int_result(value: Value) -> Result<Int, Error> {
        wire::load_int(&value).map_err(Error::InvalidRequest)
    }

    pub async fn get_last_block(&self) -> Result<Value, Error> {
        self.call("icx_getLastBlock", Value::Null).await
    }

    pub async fn get_block_by_height(&self, height: i64) -> Result<Value, Error> {
        self.call("icx_getBlockByHeight", json!({ "height": wire::dump_int(Int::from(height)) })).await
    }

    pub async fn get_block_by_hash(&self, hash: &str) -> Result<Value, Error> {
        self.call("icx_getBlockByHash", json!({ "hash": wire::dump_hash(hash) })).await
    }

    pub async fn get_balance(&self, address: &str) -> Result<Int, Error> {
        let value = self.call("icx_getBalance", json!({ "address": wire::dump_address(address) })).await?;
        Self::int_result(value)
    }

    pub async fn get_score_api(&self, address: &str) -> Result<Value, Error> {
        self.call("icx_getScoreApi", json!({ "address": wire::dump_address(address) })).await
    }

    /// `icx_call`: a read-only SCORE method invocation.
    pub async fn call_score(&self, to: &str, method: &str, params: Option<Value>) -> Result<Value, Error> {
        let mut data = BTreeMap::new();
        data.insert("method".to_string(), TypedValue::Str(method.to_string()));
        if let Some(params) = params {
            data.insert("params".to_string(), schema::json_to_passthrough(&params));
        }
        let mut record = BTreeMap::new();
        record.insert("to".to_string(), TypedValue::Str(to.to_string()));
        record.insert("dataType".to_string(), TypedValue::Str("call".to_string()));
        record.insert("data".to_string(), TypedValue::Record(data));

        let request = Request::build(
            "icx_call",
            TypedValue::Record(record),
            RequestOptions {
                identity: self.identity.clone(),
                schema: Some(call_params_schema()),
                timeout_ms: None,
            },
        );
        let params = request.dumped_params()?;
        self.call(&request.method, params).await
    }

    pub async fn get_total_supply(&self) -> Result<Int, Error> {
        let value = self.call("icx_getTotalSupply", Value::Null).await?;
        Self::int_result(value)
    }

    pub async fn get_transaction_by_hash(&self, tx_hash: &str) -> Result<Value, Error> {
        self.call("icx_getTransactionByHash", json!({ "txHash": wire::dump_hash(tx_hash) })).await
    }

    pub async fn get_transaction_result(&self, tx_hash: &str) -> Result<TransactionResult, Error> {
        let value = self.call("icx_getTransactionResult", json!({ "txHash": wire::dump_hash(tx_hash) })).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `icx_waitTransactionResult`, forwarding `timeout_ms` as the
    /// `Icon-Options` header.
    pub async fn wait_transaction_result(&self, tx_hash: &str, timeout_ms: u64) -> Result<TransactionResult, Error> {
        let value = self
            .call_at(
                &self.identity.api_url(),
                "icx_waitTransactionResult",
                json!({ "txHash": wire::dump_hash(tx_hash) }),
                Some(timeout_ms),
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Sign `request` if it isn't already signed, estimate and fill in a
    /// missing `stepLimit` via [`crate::step_limit`], then POST it and
    /// return the resulting transaction hash.
    pub async fn send_transaction(&self, request: &mut Request) -> Result<String, Error> {
        if request.schema.is_none() {
            request.schema = Some(request::transaction_params_schema());
        }
        ensure_step_limit(self, request).await?;
        if !has_signature(&request.params) {
            request.sign()?;
        }
        let params = request.dumped_params()?;
        let value = self.call_at(&request.url(), &request.method, params, request.timeout_ms).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidRequest("node did not return a transaction hash".into()))
    }

    /// As [`Client::send_transaction`], then block on
    /// `icx_waitTransactionResult`.
    pub async fn send_transaction_and_wait(&self, request: &mut Request) -> Result<TransactionResult, Error> {
        let timeout_ms = request.timeout_ms.unwrap_or(5_000);
        let tx_hash = self.send_transaction(request).await?;
        self.wait_transaction_result(&tx_hash, timeout_ms).await
    }

    /// `debug_estimateStep`: the same params minus `stepLimit` and
    /// `signature`, against the debug endpoint, regardless of the
    /// request's own `identity.debug()` setting.
    pub(crate) async fn estimate_step(&self, identity: &Identity, params: &Value) -> Result<Int, Error> {
        let mut estimate_params = params.clone();
        if let Some(obj) = estimate_params.as_object_mut() {
            obj.remove("stepLimit");
            obj.remove("signature");
        }
        let url = format!("{}/api/v3d", identity.node_url());
        let value = self
            .call_at(&url, ESTIMATE_STEP_METHOD, estimate_params, None)
            .await
            .map_err(|_| Error::system_error("cannot estimate stepLimit"))?;
        Self::int_result(value).map_err(|_| Error::system_error("cannot estimate stepLimit"))
    }
}

/// The production `icx_call` params schema: `to`, `from?`, and the
/// `dataType`-discriminated `data` payload restricted to the `call`
/// branch (§6) — `icx_call` only ever carries read-only method calls.
fn call_params_schema() -> Arc<Schema> {
    schema::generate("icx.call_params", || {
        let mut branches = BTreeMap::new();
        branches.insert(
            "call".to_string(),
            Schema {
                name: "call-data",
                fields: vec![
                    Field::new("method", FieldType::Primitive(Primitive::String)).required(),
                    Field::new("params", FieldType::Primitive(Primitive::Any)),
                ],
            },
        );
        Schema {
            name: "icx.call_params",
            fields: vec![
                Field::new("to", FieldType::Primitive(Primitive::Address(AddressKind::Either))).required(),
                Field::new("from", FieldType::Primitive(Primitive::Address(AddressKind::Eoa))),
                Field::new("dataType", FieldType::Enum(vec!["call".to_string()])).required(),
                Field::new(
                    "data",
                    FieldType::Variant {
                        discriminator: "dataType".to_string(),
                        branches,
                    },
                )
                .required(),
            ],
        }
    })
}

fn has_signature(params: &TypedValue) -> bool {
    matches!(params, TypedValue::Record(record) if record.contains_key("signature"))
}

async fn ensure_step_limit(client: &Client, request: &mut Request) -> Result<(), Error> {
    let needs_estimate = matches!(&request.params, TypedValue::Record(record) if !record.contains_key("stepLimit"));
    if !needs_estimate {
        return Ok(());
    }
    let identity = request.identity.clone();
    let schema = request.schema.clone();
    let params_without_signature = {
        let TypedValue::Record(record) = &request.params else {
            return Err(Error::InvalidRequest("transaction params must be a record".into()));
        };
        TypedValue::Record(record.clone())
    };
    let wire = match &schema {
        Some(schema) => crate::schema::dump(schema, &params_without_signature).map_err(Error::Schema)?,
        None => crate::schema::passthrough_to_json(&params_without_signature),
    };
    let limit = crate::step_limit::estimate(client, &identity, &wire).await?;
    if let TypedValue::Record(record) = &mut request.params {
        record.insert("stepLimit".to_string(), TypedValue::Int(limit));
    }
    Ok(())
}
