//! The step-limit estimator (component E): memoizes `debug_estimateStep`
//! results by the *shape* of a transaction's params, never its values, so
//! repeated calls with the same method/recipient/parameter-keys skip the
//! round trip entirely.

use crate::identity::Identity;
use crate::rpc_client::Client;
use crate::wire::Int;
use crate::Error;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

/// The shape a transaction's params are memoized under: everything that
/// determines how much computation a call costs, nothing that varies
/// between otherwise-identical calls (amounts, nonces, timestamps...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShapeKey {
    schema_id: &'static str,
    from: Option<String>,
    to: Option<String>,
    data_type: Option<String>,
    call_method: Option<String>,
    param_keys: BTreeSet<String>,
}

fn cache() -> &'static RwLock<HashMap<ShapeKey, Int>> {
    static CACHE: OnceLock<RwLock<HashMap<ShapeKey, Int>>> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

fn str_field(wire: &Value, key: &str) -> Option<String> {
    wire.get(key).and_then(Value::as_str).map(str::to_string)
}

fn shape_key(schema_id: &'static str, wire: &Value) -> ShapeKey {
    let data_type = str_field(wire, "dataType");
    let call_method = if data_type.as_deref() == Some("call") {
        wire.get("data").and_then(|d| str_field(d, "method"))
    } else {
        None
    };
    let param_keys = wire.as_object().map(|obj| obj.keys().cloned().collect()).unwrap_or_default();
    ShapeKey {
        schema_id,
        from: str_field(wire, "from"),
        to: str_field(wire, "to"),
        data_type,
        call_method,
        param_keys,
    }
}

/// `dataType`s whose estimate must never be cached: their cost depends on
/// the contract bytecode or message content, which the shape key doesn't
/// capture.
fn is_uncacheable(wire: &Value) -> bool {
    matches!(str_field(wire, "dataType").as_deref(), Some("deploy") | Some("message"))
}

/// Estimate `stepLimit` for `wire` (already-dumped transaction params,
/// `signature` and `stepLimit` not yet present), consulting the
/// process-global shape cache first unless the data type forbids caching.
pub async fn estimate(client: &Client, identity: &Identity, wire: &Value) -> Result<Int, Error> {
    let schema_id = "icx_sendTransaction";
    let cacheable = !is_uncacheable(wire);
    let key = cacheable.then(|| shape_key(schema_id, wire));

    if let Some(key) = &key {
        if let Some(limit) = cache().read().get(key) {
            return Ok(*limit);
        }
    }

    let limit = client.estimate_step(identity, wire).await?;

    if let Some(key) = key {
        cache().write().entry(key).or_insert(limit);
    }
    Ok(limit)
}
