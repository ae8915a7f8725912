//! Block ticks, event logs and transaction results: the shapes the
//! subscriber and the RPC client hand back to callers, distinct from the
//! internal [`crate::schema::TypedValue`] representation used while
//! validating request parameters.

use crate::schema::TypedValue;
use crate::wire::{self, AddressKind, Int};
use crate::Error;
use icon_rpcs::stream::{BufferItem, DedupKey};
use serde::Deserialize;
use serde_json::Value;

/// A block-level notification: one per block observed on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub height: i64,
    pub hash: String,
}

impl BufferItem for Tick {
    fn height(&self) -> i64 {
        self.height
    }
    fn dedup_key(&self) -> DedupKey {
        DedupKey {
            height: self.height,
            hash: self.hash.clone(),
            index: None,
        }
    }
}

/// One element type an event log's header declares for its indexed/data
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Int,
    Str,
    Bytes,
    Bool,
    Address,
}

impl EventType {
    fn parse(token: &str) -> Option<EventType> {
        match token.trim() {
            "int" => Some(EventType::Int),
            "str" => Some(EventType::Str),
            "bytes" => Some(EventType::Bytes),
            "bool" => Some(EventType::Bool),
            "Address" => Some(EventType::Address),
            _ => None,
        }
    }

    fn load(self, value: &Value) -> Result<TypedValue, String> {
        if matches!(value, Value::Null) {
            return Ok(TypedValue::Null);
        }
        match self {
            EventType::Int => wire::load_int(value).map(TypedValue::Int),
            EventType::Str => wire::load_string(value).map(TypedValue::Str),
            EventType::Bytes => wire::load_bytes(value).map(TypedValue::Bytes),
            EventType::Bool => wire::load_bool(value).map(TypedValue::Bool),
            EventType::Address => wire::load_address(value, AddressKind::Either).map(TypedValue::Str),
        }
    }

    pub(crate) fn dump(self, value: &TypedValue) -> Value {
        match (self, value) {
            (_, TypedValue::Null) => Value::Null,
            (EventType::Int, TypedValue::Int(i)) => wire::dump_int(*i),
            (EventType::Str, TypedValue::Str(s)) => wire::dump_string(s),
            (EventType::Bytes, TypedValue::Bytes(b)) => wire::dump_bytes(b),
            (EventType::Bool, TypedValue::Bool(b)) => wire::dump_bool(*b),
            (EventType::Address, TypedValue::Str(s)) => wire::dump_address(s),
            (_, other) => crate::schema::passthrough_to_json(other),
        }
    }
}

/// The parsed form of a header like `"Transfer(Address,Address,int)"`:
/// the event name and its ordered element types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    pub name: String,
    pub types: Vec<EventType>,
}

/// Parse an event header's name and comma-separated type list between its
/// parentheses. Fails if the header is malformed or names an unknown type.
pub fn parse_header(header: &str) -> Result<EventSignature, Error> {
    let open = header.find('(').ok_or_else(|| Error::InvalidRequest(format!("malformed event header: {header}")))?;
    if !header.ends_with(')') {
        return Err(Error::InvalidRequest(format!("malformed event header: {header}")));
    }
    let name = header[..open].to_string();
    let inner = &header[open + 1..header.len() - 1];
    let types = if inner.is_empty() {
        Vec::new()
    } else {
        inner
            .split(',')
            .map(|t| EventType::parse(t).ok_or_else(|| Error::InvalidRequest(format!("unknown event type token: {t}"))))
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(EventSignature { name, types })
}

/// A decoded, typed contract event log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventLog {
    pub score_address: String,
    pub header: String,
    pub name: String,
    pub indexed: Vec<TypedValue>,
    pub data: Vec<TypedValue>,
}

impl EventLog {
    /// Decode a raw `{scoreAddress, indexed: [header, ...], data: [...]}`
    /// wire event log, pairing each value with its declared element type.
    pub fn from_wire(value: &Value) -> Result<EventLog, Error> {
        let score_address = value
            .get("scoreAddress")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidRequest("event log missing scoreAddress".into()))?
            .to_string();
        let indexed_wire = value.get("indexed").and_then(Value::as_array).cloned().unwrap_or_default();
        let data_wire = value.get("data").and_then(Value::as_array).cloned().unwrap_or_default();
        let header = indexed_wire
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidRequest("event log missing header".into()))?
            .to_string();
        let signature = parse_header(&header)?;
        if signature.types.len() < indexed_wire.len().saturating_sub(1) + data_wire.len() {
            return Err(Error::InvalidRequest(format!(
                "event header {header} declares fewer types than values present"
            )));
        }
        let mut types = signature.types.iter();
        let indexed = indexed_wire[1..]
            .iter()
            .map(|v| {
                let ty = types.next().copied().ok_or_else(|| Error::InvalidRequest("event header arity mismatch".into()))?;
                ty.load(v).map_err(|_| Error::InvalidRequest(format!("event indexed value is invalid for type {ty:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let data = data_wire
            .iter()
            .map(|v| {
                let ty = types.next().copied().ok_or_else(|| Error::InvalidRequest("event header arity mismatch".into()))?;
                ty.load(v).map_err(|_| Error::InvalidRequest(format!("event data value is invalid for type {ty:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventLog {
            score_address,
            header,
            name: signature.name,
            indexed,
            data,
        })
    }

    /// Re-encode as the wire `{scoreAddress, indexed: [header, ...], data}`
    /// shape, with the header reinstated as `indexed[0]`.
    pub fn to_wire(&self) -> Result<Value, Error> {
        let signature = parse_header(&self.header)?;
        let mut types = signature.types.iter();
        let mut indexed_wire = vec![Value::String(self.header.clone())];
        for value in &self.indexed {
            let ty = types.next().copied().ok_or_else(|| Error::InvalidRequest("event header arity mismatch".into()))?;
            indexed_wire.push(ty.dump(value));
        }
        let data_wire = self
            .data
            .iter()
            .map(|value| {
                let ty = types.next().copied().ok_or_else(|| Error::InvalidRequest("event header arity mismatch".into()))?;
                Ok(ty.dump(value))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(serde_json::json!({
            "scoreAddress": self.score_address,
            "indexed": indexed_wire,
            "data": data_wire,
        }))
    }
}

/// A single tick or the event logs it carries, in subscriber emission
/// order. Buffered generically by `icon-rpcs`; this crate supplies the
/// height/dedup semantics.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Tick(Tick),
    Event {
        height: i64,
        tx_hash: String,
        position: usize,
        log: EventLog,
    },
}

impl BufferItem for StreamItem {
    fn height(&self) -> i64 {
        match self {
            StreamItem::Tick(tick) => tick.height,
            StreamItem::Event { height, .. } => *height,
        }
    }
    fn dedup_key(&self) -> DedupKey {
        match self {
            StreamItem::Tick(tick) => tick.dedup_key(),
            StreamItem::Event { height, tx_hash, position, .. } => DedupKey {
                height: *height,
                hash: tx_hash.clone(),
                index: Some(*position as i64),
            },
        }
    }
}

/// A decoded JSON-RPC transaction result (`icx_getTransactionResult`,
/// `icx_waitTransactionResult`).
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionResult {
    pub status: String,
    #[serde(rename = "blockHash")]
    pub block_hash: String,
    #[serde(rename = "blockHeight")]
    pub block_height: String,
    #[serde(rename = "stepPrice")]
    pub step_price: String,
    #[serde(rename = "stepUsed")]
    pub step_used: String,
    #[serde(rename = "scoreAddress", default)]
    pub score_address: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(rename = "txHash")]
    pub tx_hash: String,
    #[serde(rename = "txIndex")]
    pub tx_index: String,
    #[serde(rename = "eventLogs", default)]
    pub event_logs: Vec<Value>,
    #[serde(default)]
    pub failure: Option<Value>,
}

impl TransactionResult {
    /// `true` when `status` is the wire success marker `"0x1"`.
    pub fn succeeded(&self) -> bool {
        self.status == "0x1"
    }

    /// Decode `event_logs` into typed [`EventLog`]s.
    pub fn decoded_event_logs(&self) -> Result<Vec<EventLog>, Error> {
        self.event_logs.iter().map(EventLog::from_wire).collect()
    }

    pub fn step_used(&self) -> Result<Int, Error> {
        wire::load_int(&Value::String(self.step_used.clone())).map_err(Error::InvalidRequest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_with_multiple_types() {
        let sig = parse_header("Transfer(Address,Address,int)").unwrap();
        assert_eq!(sig.name, "Transfer");
        assert_eq!(sig.types, vec![EventType::Address, EventType::Address, EventType::Int]);
    }

    #[test]
    fn parses_header_with_no_types() {
        let sig = parse_header("Paused()").unwrap();
        assert!(sig.types.is_empty());
    }

    #[test]
    fn decodes_event_log_from_wire() {
        let wire = serde_json::json!({
            "scoreAddress": "cxcd8e51579a1a173a6df6c53c46f0c4b04d3a3e9d",
            "indexed": ["Transfer(Address,Address,int)", "hx2e243ad926ac48d15156756fce28314357d49d83", "hxdd3ead969f0dfb0b72265ca584092a3fb25d27e0"],
            "data": ["0x2a"],
        });
        let log = EventLog::from_wire(&wire).unwrap();
        assert_eq!(log.name, "Transfer");
        assert_eq!(log.indexed.len(), 2);
        assert_eq!(log.data[0].as_int().unwrap().to_i64(), Some(42));
    }

    #[test]
    fn event_log_round_trips_through_wire() {
        let wire = serde_json::json!({
            "scoreAddress": "cxcd8e51579a1a173a6df6c53c46f0c4b04d3a3e9d",
            "indexed": ["Transfer(Address,int)", "hx2e243ad926ac48d15156756fce28314357d49d83"],
            "data": ["0x2a"],
        });
        let log = EventLog::from_wire(&wire).unwrap();
        let roundtrip = log.to_wire().unwrap();
        assert_eq!(roundtrip, wire);
    }
}
