//! Request builder, canonical serialization and signing (component D).

use crate::identity::Identity;
use crate::schema::{self, Field, FieldType, Primitive, Schema, TypedValue};
use crate::wire::{AddressKind, IntegerConstraint};
use crate::Error;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const SEND_TRANSACTION: &str = "icx_sendTransaction";
const SEND_TRANSACTION_AND_WAIT: &str = "icx_sendTransactionAndWait";

fn is_transaction_method(method: &str) -> bool {
    method == SEND_TRANSACTION || method == SEND_TRANSACTION_AND_WAIT
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// A request `id`: the current time in microseconds since the epoch,
/// bumped by one if that value has already been handed out, so ids are
/// strictly monotone even under rapid concurrent calls.
pub(crate) fn next_request_id() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_micros() as i64;
    loop {
        let last = LAST_ID.load(Ordering::Relaxed);
        let next = now.max(last + 1);
        if LAST_ID
            .compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            return next;
        }
    }
}

/// Branches for the `dataType`-discriminated `data` payload shared by
/// `icx_call` and `icx_sendTransaction` (§6): `call`, `deploy`, `message`
/// and `deposit`.
pub(crate) fn transaction_data_branches() -> BTreeMap<String, Schema> {
    let mut branches = BTreeMap::new();
    branches.insert(
        "call".to_string(),
        Schema {
            name: "transaction-data-call",
            fields: vec![
                Field::new("method", FieldType::Primitive(Primitive::String)).required(),
                Field::new("params", FieldType::Primitive(Primitive::Any)),
            ],
        },
    );
    branches.insert(
        "deploy".to_string(),
        Schema {
            name: "transaction-data-deploy",
            fields: vec![
                Field::new("contentType", FieldType::Primitive(Primitive::String)).required(),
                Field::new("content", FieldType::Primitive(Primitive::Bytes)).required(),
                Field::new("params", FieldType::Primitive(Primitive::Any)),
            ],
        },
    );
    branches.insert(
        "message".to_string(),
        Schema {
            name: "transaction-data-message",
            fields: vec![Field::new("data", FieldType::Primitive(Primitive::Any)).required()],
        },
    );
    branches.insert(
        "deposit".to_string(),
        Schema {
            name: "transaction-data-deposit",
            fields: vec![
                Field::new("action", FieldType::Enum(vec!["add".to_string(), "withdraw".to_string()])).required(),
                Field::new("id", FieldType::Primitive(Primitive::Hash)),
                Field::new("amount", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))),
            ],
        },
    );
    branches
}

/// The production `icx_sendTransaction`/`icx_sendTransactionAndWait`
/// params schema: `version`, `from`, `to`, `value?`, `stepLimit`,
/// `timestamp`, `nid`, `nonce?`, `signature`, and the
/// `dataType`-discriminated `data` payload (§6). [`Client::send_transaction`]
/// attaches this schema by default when a caller builds a [`Request`]
/// without one of its own.
pub fn transaction_params_schema() -> Arc<Schema> {
    schema::generate("icx.transaction_params", || Schema {
        name: "icx.transaction_params",
        fields: vec![
            Field::new("version", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))).required(),
            Field::new("from", FieldType::Primitive(Primitive::Address(AddressKind::Eoa))).required(),
            Field::new("to", FieldType::Primitive(Primitive::Address(AddressKind::Either))).required(),
            Field::new("value", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))),
            Field::new("stepLimit", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))).required(),
            Field::new("timestamp", FieldType::Primitive(Primitive::Timestamp)).required(),
            Field::new("nid", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))).required(),
            Field::new("nonce", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))),
            Field::new("signature", FieldType::Primitive(Primitive::Signature)),
            Field::new(
                "dataType",
                FieldType::Enum(vec!["call".to_string(), "deploy".to_string(), "message".to_string(), "deposit".to_string()]),
            ),
            Field::new(
                "data",
                FieldType::Variant {
                    discriminator: "dataType".to_string(),
                    branches: transaction_data_branches(),
                },
            ),
        ],
    })
}

/// Per-call options for [`Request::build`].
pub struct RequestOptions {
    pub identity: Identity,
    pub schema: Option<Arc<Schema>>,
    pub timeout_ms: Option<u64>,
}

/// A JSON-RPC request bound to a method, a typed parameter record, and the
/// identity/schema/timeout it was built with. Constructed per call,
/// discarded after the response is decoded.
pub struct Request {
    pub id: i64,
    pub method: String,
    pub params: TypedValue,
    pub schema: Option<Arc<Schema>>,
    pub identity: Identity,
    pub timeout_ms: Option<u64>,
}

impl Request {
    /// Build a request, stamping it with a fresh monotonic `id`.
    pub fn build(method: impl Into<String>, params: TypedValue, options: RequestOptions) -> Request {
        Request {
            id: next_request_id(),
            method: method.into(),
            params,
            schema: options.schema,
            identity: options.identity,
            timeout_ms: options.timeout_ms,
        }
    }

    /// `node_url + "/api/v3"`, or `"/api/v3d"` in debug mode.
    pub fn url(&self) -> String {
        self.identity.api_url()
    }

    /// Dump `params` through the request's schema (or, lacking one, a
    /// best-effort passthrough) into its wire JSON form.
    pub(crate) fn dumped_params(&self) -> Result<Value, Error> {
        match &self.schema {
            Some(schema) => schema::dump(schema, &self.params).map_err(Error::Schema),
            None => Ok(schema::passthrough_to_json(&self.params)),
        }
    }

    /// The exact pre-image hashed and signed for a transaction: the
    /// literal `"icx_sendTransaction."` prefix followed by the canonical
    /// encoding of the dumped parameter map (with any `signature` field
    /// dropped). Only valid for the two transaction-sending methods.
    pub fn serialize(&self) -> Result<String, Error> {
        if !is_transaction_method(&self.method) {
            return Err(Error::invalid_params("Serialize is only valid for icx_sendTransaction(AndWait)"));
        }
        let wire = self.dumped_params()?;
        let obj = wire.as_object().cloned().unwrap_or_default();
        Ok(format!("{SEND_TRANSACTION}.{}", canonical_encode(&Value::Object(obj))))
    }

    /// Sign the canonical serialization with the identity's key and
    /// insert the base64 `signature` wire value into `params`.
    pub fn sign(&mut self) -> Result<(), Error> {
        if !is_transaction_method(&self.method) {
            return Err(Error::InvalidRequest("cannot sign a non-transaction method".into()));
        }
        if self.identity.key().is_none() {
            return Err(Error::InvalidRequest("identity has no private key".into()));
        }
        let canonical = self.serialize()?;
        let digest = icon_signer::hash_sha3_256(canonical.as_bytes());
        let signature = self.identity.key().expect("checked above").sign_prehashed(&digest);
        if let TypedValue::Record(record) = &mut self.params {
            record.insert("signature".to_string(), TypedValue::Str(signature.to_base64()));
        }
        Ok(())
    }

    /// Recompute the signature over the canonical serialization and
    /// compare it against the embedded `signature` field.
    pub fn verify(&self) -> Result<bool, Error> {
        let key = self
            .identity
            .key()
            .ok_or_else(|| Error::InvalidRequest("identity has no private key".into()))?;
        let signature_b64 = match &self.params {
            TypedValue::Record(record) => record.get("signature").and_then(TypedValue::as_str).map(str::to_string),
            _ => None,
        }
        .ok_or_else(|| Error::InvalidRequest("request has no signature to verify".into()))?;
        let signature = icon_signer::Signature::from_base64(&signature_b64)?;
        let canonical = self.serialize()?;
        let digest = icon_signer::hash_sha3_256(canonical.as_bytes());
        Ok(signature.verify(&digest, &key.public_key()))
    }
}

/// Encode a dumped wire value per the canonical serialization algorithm:
/// object keys sorted ascending (dropping `signature`), `k.<enc(v)>`
/// joined by `.`, nested objects as `k.{<enc>}`, nested arrays as
/// `k.[<enc>]`, `null` as the literal `\0`, and scalars with `\{}[].`
/// backslash-escaped.
fn canonical_encode(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| k.as_str() != "signature").collect();
            keys.sort();
            keys.into_iter()
                .map(|k| {
                    let v = &map[k];
                    let enc = canonical_encode(v);
                    match v {
                        Value::Object(_) => format!("{k}.{{{enc}}}"),
                        Value::Array(_) => format!("{k}.[{enc}]"),
                        _ => format!("{k}.{enc}"),
                    }
                })
                .collect::<Vec<_>>()
                .join(".")
        }
        Value::Array(items) => items.iter().map(canonical_encode).collect::<Vec<_>>().join("."),
        Value::Null => "\\0".to_string(),
        Value::String(s) => escape_scalar(s),
        Value::Bool(b) => escape_scalar(if *b { "true" } else { "false" }),
        Value::Number(n) => escape_scalar(&n.to_string()),
    }
}

fn escape_scalar(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '{' | '}' | '[' | ']' | '.') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{AddressKind, Int, IntegerConstraint};
    use schema::{Field, FieldType, Primitive};
    use std::collections::BTreeMap;

    fn params_schema() -> Schema {
        Schema {
            name: "send-transaction-test",
            fields: vec![
                Field::new("from", FieldType::Primitive(Primitive::Address(AddressKind::Eoa))).required(),
                Field::new("to", FieldType::Primitive(Primitive::Address(AddressKind::Either))).required(),
                Field::new("nid", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))).required(),
                Field::new("version", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))).required(),
                Field::new("timestamp", FieldType::Primitive(Primitive::Timestamp)).required(),
                Field::new("stepLimit", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))).required(),
                Field::new("value", FieldType::Primitive(Primitive::Integer(IntegerConstraint::NonNegative))),
            ],
        }
    }

    fn sample_params() -> TypedValue {
        let mut record = BTreeMap::new();
        record.insert(
            "from".to_string(),
            TypedValue::Str("hx2e243ad926ac48d15156756fce28314357d49d83".to_string()),
        );
        record.insert(
            "to".to_string(),
            TypedValue::Str("hxdd3ead969f0dfb0b72265ca584092a3fb25d27e0".to_string()),
        );
        record.insert("nid".to_string(), TypedValue::Int(Int::from(1i64)));
        record.insert("version".to_string(), TypedValue::Int(Int::from(3i64)));
        record.insert(
            "timestamp".to_string(),
            TypedValue::Timestamp(chrono::DateTime::parse_from_rfc3339("2022-01-05T16:30:11.292452Z").unwrap().into()),
        );
        record.insert("stepLimit".to_string(), TypedValue::Int(Int::from(100_000i64)));
        record.insert(
            "value".to_string(),
            TypedValue::Int(Int::from_magnitude(false, primitive_types::U256::from_dec_str("1000000000000000000").unwrap())),
        );
        TypedValue::Record(record)
    }

    #[test]
    fn canonical_serialization_matches_spec_example() {
        let schema = Arc::new(params_schema());
        let identity = Identity::builder().build();
        let request = Request::build(
            SEND_TRANSACTION,
            sample_params(),
            RequestOptions {
                identity,
                schema: Some(schema),
                timeout_ms: None,
            },
        );
        let canonical = request.serialize().unwrap();
        assert_eq!(
            canonical,
            "icx_sendTransaction.from.hx2e243ad926ac48d15156756fce28314357d49d83.nid.0x1.stepLimit.0x186a0.timestamp.0x5d4d844874124.to.hxdd3ead969f0dfb0b72265ca584092a3fb25d27e0.value.0xde0b6b3a7640000.version.0x3"
        );
    }

    #[test]
    fn nested_map_and_list_encode_per_example() {
        let value = serde_json::json!({"a": 1, "b": {"c": [1, 2]}});
        assert_eq!(canonical_encode(&value), "a.1.b.{c.[1.2]}");
    }

    #[test]
    fn sign_then_verify_round_trips() {
        let key = icon_signer::Keypair::from_hex("8ad9889bcee734a2605a6c4c50dd8acd28f54e62b828b2c8991450abd88d6b3").unwrap();
        let schema = Arc::new(params_schema());
        let identity = Identity::builder().private_key(key).build();
        let mut request = Request::build(
            SEND_TRANSACTION,
            sample_params(),
            RequestOptions {
                identity,
                schema: Some(schema),
                timeout_ms: None,
            },
        );
        request.sign().unwrap();
        assert!(request.verify().unwrap());
    }

    #[test]
    fn production_schema_dumps_call_transaction_data() {
        let schema = transaction_params_schema();
        let mut data = BTreeMap::new();
        data.insert("method".to_string(), TypedValue::Str("transfer".to_string()));
        let mut record = sample_params().as_record().unwrap().clone();
        record.insert("dataType".to_string(), TypedValue::Str("call".to_string()));
        record.insert("data".to_string(), TypedValue::Record(data));

        let wire = schema::dump(&schema, &TypedValue::Record(record)).unwrap();
        assert_eq!(wire["dataType"], "call");
        assert_eq!(wire["data"]["method"], "transfer");
    }

    #[test]
    fn production_schema_rejects_unknown_data_type() {
        let schema = transaction_params_schema();
        let mut record = sample_params().as_record().unwrap().clone();
        record.insert("dataType".to_string(), TypedValue::Str("unknown".to_string()));
        record.insert("data".to_string(), TypedValue::Record(BTreeMap::new()));

        assert!(schema::load(&schema, &schema::dump(&schema, &TypedValue::Record(record)).unwrap()).is_err());
    }

    #[test]
    fn serialize_rejects_non_transaction_methods() {
        let identity = Identity::builder().build();
        let request = Request::build(
            "icx_getBalance",
            TypedValue::Record(BTreeMap::new()),
            RequestOptions {
                identity,
                schema: None,
                timeout_ms: None,
            },
        );
        assert!(request.serialize().is_err());
    }
}
