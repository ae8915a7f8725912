//! Subscription descriptors, frame construction (§4.5) and the
//! notification decoder (component H) tying the generic
//! [`icon_rpcs::stream`] machinery to ICON's block/event wire shapes.

use crate::identity::Identity;
use crate::rpc_client::Client;
use crate::schema::TypedValue;
use crate::types::{parse_header, EventLog, EventType, StreamItem, Tick};
use crate::wire::{self, Int};
use crate::Error;
use icon_rpcs::stream::state_machine::Producer;
use icon_rpcs::stream::{BackoffConfig, ProducerHandle, StreamBuffer, SubscriptionHandler};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;

/// Which WebSocket endpoint a subscription connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Block,
    Event,
}

impl StreamSource {
    fn path_segment(self) -> &'static str {
        match self {
            StreamSource::Block => "block",
            StreamSource::Event => "event",
        }
    }
}

/// Where a subscription starts reading from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FromHeight {
    Latest,
    Height(i64),
}

/// One event predicate: `{event: header, addr?, indexed?, data?}`. `nil`
/// entries in `indexed`/`data` are wildcards that survive as JSON `null`
/// in the wire filter.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub event: String,
    pub addr: Option<String>,
    pub indexed: Vec<Option<TypedValue>>,
    pub data: Vec<Option<TypedValue>>,
}

impl EventFilter {
    /// Dump this filter to its wire form, typing `indexed`/`data` entries
    /// per the element types parsed from `event`'s header.
    fn to_wire(&self) -> Result<Value, Error> {
        let signature = parse_header(&self.event)?;
        let mut types = signature.types.iter();
        let mut out = serde_json::Map::new();
        out.insert("event".to_string(), Value::String(self.event.clone()));
        if let Some(addr) = &self.addr {
            out.insert("addr".to_string(), wire::dump_address(addr));
        }
        if !self.indexed.is_empty() {
            out.insert("indexed".to_string(), dump_filter_values(&self.indexed, &mut types)?);
        }
        if !self.data.is_empty() {
            out.insert("data".to_string(), dump_filter_values(&self.data, &mut types)?);
        }
        Ok(Value::Object(out))
    }
}

fn dump_filter_values<'a>(values: &[Option<TypedValue>], types: &mut impl Iterator<Item = &'a EventType>) -> Result<Value, Error> {
    let mut out = Vec::with_capacity(values.len());
    for value in values {
        let ty = types.next().ok_or_else(|| Error::InvalidRequest("event filter has more values than the header declares".into()))?;
        out.push(match value {
            Some(v) => ty.dump(v),
            None => Value::Null,
        });
    }
    Ok(Value::Array(out))
}

/// A subscription's configuration: `{source, from_height, identity,
/// max_buffer_size, events}`.
#[derive(Clone)]
pub struct SubscriptionDescriptor {
    pub source: StreamSource,
    pub from_height: FromHeight,
    pub identity: Identity,
    pub max_buffer_size: usize,
    pub events: Vec<EventFilter>,
}

impl SubscriptionDescriptor {
    pub fn new(source: StreamSource, identity: Identity) -> Self {
        SubscriptionDescriptor {
            source,
            from_height: FromHeight::Latest,
            identity,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            events: Vec::new(),
        }
    }

    pub fn from_height(mut self, height: i64) -> Self {
        self.from_height = FromHeight::Height(height);
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn event(mut self, filter: EventFilter) -> Self {
        self.events.push(filter);
        self
    }
}

/// Build the single subscribe frame sent right after the WebSocket
/// upgrade (§4.5).
fn build_subscribe_frame(descriptor: &SubscriptionDescriptor, from_height: i64) -> Result<String, Error> {
    let height = wire::dump_int(Int::from(from_height));
    match descriptor.source {
        StreamSource::Block => {
            let mut frame = serde_json::Map::new();
            frame.insert("height".to_string(), height);
            if !descriptor.events.is_empty() {
                let filters = descriptor
                    .events
                    .iter()
                    .map(EventFilter::to_wire)
                    .collect::<Result<Vec<_>, _>>()?;
                frame.insert("eventFilters".to_string(), Value::Array(filters));
            }
            Ok(serde_json::to_string(&Value::Object(frame))?)
        }
        StreamSource::Event => {
            let filter = descriptor
                .events
                .first()
                .ok_or_else(|| Error::InvalidRequest("event subscriptions need exactly one event filter".into()))?;
            let mut frame = filter.to_wire()?.as_object().cloned().unwrap_or_default();
            frame.insert("height".to_string(), height);
            Ok(serde_json::to_string(&Value::Object(frame))?)
        }
    }
}

fn hex_height(value: &Value, field: &str) -> Result<i64, Error> {
    value
        .get(field)
        .ok_or_else(|| Error::InvalidRequest(format!("notification missing {field}")))
        .and_then(|v| wire::load_int(v).map_err(Error::InvalidRequest))
        .and_then(|i| i.to_i64().ok_or_else(|| Error::InvalidRequest(format!("{field} out of range"))))
}

fn hex_indices(value: &Value) -> Result<Vec<i64>, Error> {
    value
        .as_array()
        .ok_or_else(|| Error::InvalidRequest("expected an array of indices".into()))?
        .iter()
        .map(|v| wire::load_int(v).map_err(Error::InvalidRequest).and_then(|i| i.to_i64().ok_or_else(|| Error::InvalidRequest("index out of range".into()))))
        .collect()
}

/// Look up the transaction hash at `tx_index` within `block`'s
/// `confirmed_transaction_list`.
fn tx_hash_at(block: &Value, height: i64, tx_index: i64) -> Result<String, Error> {
    let list = block
        .get("confirmed_transaction_list")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidRequest("block has no confirmed_transaction_list".into()))?;
    let tx = list.get(tx_index as usize).ok_or_else(|| {
        Error::system_error(format!("cannot find transaction index {tx_index} on block with height {height}"))
    })?;
    tx.get("txHash")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidRequest("transaction is missing txHash".into()))
}

/// Fetch the transaction at `tx_index` in the block confirming `height`
/// and return the event logs at the given 0-based positions, in that
/// order.
async fn resolve_event_logs(client: &Client, block: &Value, height: i64, tx_index: i64, positions: &[i64]) -> Result<(String, Vec<(usize, EventLog)>), Error> {
    let tx_hash = tx_hash_at(block, height, tx_index)?;
    let result = client.get_transaction_result(&tx_hash).await?;
    let logs = result.decoded_event_logs()?;
    let mut out = Vec::with_capacity(positions.len());
    for &position in positions {
        if let Some(log) = logs.get(position as usize) {
            out.push((position as usize, log.clone()));
        }
    }
    Ok((tx_hash, out))
}

/// Decode a block-source notification into `[Tick, ...EventLog]`,
/// resolving transactions and event logs via follow-up RPC calls. The
/// server has already matched notified transactions against the
/// subscription's filters; `indexes`/`events` name which ones and which
/// positions, so no filter re-application is needed here.
async fn decode_block_notification(client: &Client, frame: &Value) -> Result<Vec<StreamItem>, Error> {
    let height = hex_height(frame, "height")?;
    let hash = frame
        .get("hash")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidRequest("notification missing hash".into()))?
        .to_string();
    let tick = Tick { height, hash: hash.clone() };
    let mut out = vec![StreamItem::Tick(tick)];

    let indexes = frame.get("indexes").and_then(Value::as_array).cloned().unwrap_or_default();
    let events = frame.get("events").and_then(Value::as_array).cloned().unwrap_or_default();
    if indexes.is_empty() {
        return Ok(out);
    }

    let confirming_height = height - 1;
    let block = client.get_block_by_height(confirming_height).await?;

    for (filter_indexes, filter_events) in indexes.iter().zip(events.iter()) {
        let tx_indices = hex_indices(filter_indexes)?;
        let position_lists = filter_events.as_array().cloned().unwrap_or_default();
        for (tx_index, position_list) in tx_indices.iter().zip(position_lists.iter()) {
            let positions = hex_indices(position_list)?;
            let (tx_hash, logs) = resolve_event_logs(client, &block, confirming_height, *tx_index, &positions).await?;
            for (position, log) in logs {
                out.push(StreamItem::Event {
                    height,
                    tx_hash: tx_hash.clone(),
                    position,
                    log,
                });
            }
        }
    }
    Ok(out)
}

/// Decode an event-source notification (single transaction, single
/// position list) into `[Tick, ...EventLog]`.
async fn decode_event_notification(client: &Client, frame: &Value) -> Result<Vec<StreamItem>, Error> {
    let height = hex_height(frame, "height")?;
    let hash = frame
        .get("hash")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidRequest("notification missing hash".into()))?
        .to_string();
    let tick = Tick { height, hash };
    let mut out = vec![StreamItem::Tick(tick)];

    let tx_index = hex_height(frame, "index")?;
    let positions = hex_indices(frame.get("events").ok_or_else(|| Error::InvalidRequest("notification missing events".into()))?)?;

    let confirming_height = height - 1;
    let block = client.get_block_by_height(confirming_height).await?;
    let (tx_hash, logs) = resolve_event_logs(client, &block, confirming_height, tx_index, &positions).await?;
    for (position, log) in logs {
        out.push(StreamItem::Event {
            height,
            tx_hash: tx_hash.clone(),
            position,
            log,
        });
    }
    Ok(out)
}

/// Bridges [`SubscriptionDescriptor`] and [`Client`] into what
/// `icon-rpcs`'s generic producer needs.
struct IconSubscriptionHandler {
    client: Client,
    descriptor: SubscriptionDescriptor,
}

impl SubscriptionHandler for IconSubscriptionHandler {
    type Item = StreamItem;

    fn resolve_initial_height<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<i64, icon_rpcs::Error>> + Send + 'a>> {
        Box::pin(async move {
            match self.descriptor.from_height {
                FromHeight::Height(h) => Ok(h),
                FromHeight::Latest => {
                    let last_block = self
                        .client
                        .get_last_block()
                        .await
                        .map_err(|e| icon_rpcs::Error::Disconnected(e.to_string()))?;
                    hex_height(&last_block, "height").map_err(|e| icon_rpcs::Error::Disconnected(e.to_string()))
                }
            }
        })
    }

    fn build_subscribe_frame(&self, from_height: i64) -> Result<String, icon_rpcs::Error> {
        build_subscribe_frame(&self.descriptor, from_height).map_err(|e| icon_rpcs::Error::InvalidUrl(e.to_string()))
    }

    fn decode_notification<'a>(&'a self, frame: &'a str) -> Pin<Box<dyn Future<Output = Result<Vec<Self::Item>, icon_rpcs::Error>> + Send + 'a>> {
        Box::pin(async move {
            let value: Value = serde_json::from_str(frame)?;
            let decoded = match self.descriptor.source {
                StreamSource::Block => decode_block_notification(&self.client, &value).await,
                StreamSource::Event => decode_event_notification(&self.client, &value).await,
            };
            decoded.map_err(|e| icon_rpcs::Error::UnexpectedFrame(e.to_string()))
        })
    }
}

/// A running subscription: a buffer of decoded ticks/event logs fed by a
/// reconnecting background producer.
pub struct Subscription {
    buffer: Arc<StreamBuffer<StreamItem>>,
    handle: ProducerHandle,
}

impl Subscription {
    /// Start a subscription against `client`'s node, per `descriptor`.
    pub fn start(client: Client, descriptor: SubscriptionDescriptor, backoff: BackoffConfig) -> Result<Subscription, Error> {
        let url = descriptor.identity.ws_url(descriptor.source.path_segment())?;
        let buffer = Arc::new(StreamBuffer::new(descriptor.max_buffer_size));
        let handler = IconSubscriptionHandler { client, descriptor };
        let producer = Producer::new(url, handler, buffer.clone(), backoff);
        let handle = producer.spawn();
        Ok(Subscription { buffer, handle })
    }

    /// Pop up to `n` buffered items, oldest first.
    pub fn pop(&self, n: usize) -> Vec<StreamItem> {
        self.buffer.pop(n)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn observed_height(&self) -> i64 {
        self.buffer.observed_height()
    }

    pub fn current_height(&self) -> i64 {
        self.buffer.current_height()
    }

    /// Stop the subscription, waiting for the producer to tear down its
    /// connection.
    pub async fn stop(mut self) {
        self.handle.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_source_frame_omits_filters_when_empty() {
        let descriptor = SubscriptionDescriptor::new(StreamSource::Block, Identity::builder().build());
        let frame = build_subscribe_frame(&descriptor, 42).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["height"], "0x2a");
        assert!(value.get("eventFilters").is_none());
    }

    #[test]
    fn block_source_frame_includes_filters() {
        let descriptor = SubscriptionDescriptor::new(StreamSource::Block, Identity::builder().build()).event(EventFilter {
            event: "Transfer(Address,Address,int)".to_string(),
            addr: Some("cxcd8e51579a1a173a6df6c53c46f0c4b04d3a3e9d".to_string()),
            indexed: vec![None, None],
            data: vec![],
        });
        let frame = build_subscribe_frame(&descriptor, 1).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        let filters = value["eventFilters"].as_array().unwrap();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0]["indexed"], serde_json::json!([null, null]));
    }

    #[test]
    fn event_source_frame_spreads_the_single_filter() {
        let descriptor = SubscriptionDescriptor::new(StreamSource::Event, Identity::builder().build()).event(EventFilter {
            event: "Transfer(Address,Address,int)".to_string(),
            addr: None,
            indexed: vec![],
            data: vec![],
        });
        let frame = build_subscribe_frame(&descriptor, 0).unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "Transfer(Address,Address,int)");
        assert_eq!(value["height"], "0x0");
    }

    #[test]
    fn event_source_frame_requires_a_filter() {
        let descriptor = SubscriptionDescriptor::new(StreamSource::Event, Identity::builder().build());
        assert!(build_subscribe_frame(&descriptor, 0).is_err());
    }

    #[tokio::test]
    async fn block_notification_resolves_to_tick_and_filtered_event_log() {
        use icon_rpcs::client::mock::MockRpcClient;
        use icon_rpcs::client::RpcOutcome;

        let block = serde_json::json!({
            "confirmed_transaction_list": [
                { "txHash": "0x0000000000000000000000000000000000000000000000000000000000000" },
                { "txHash": "0xf877" },
            ],
        });
        let tx_result = serde_json::json!({
            "status": "0x1",
            "blockHash": "0xc71",
            "blockHeight": "0x29",
            "stepPrice": "0x0",
            "stepUsed": "0x0",
            "txHash": "0xf877",
            "txIndex": "0x1",
            "eventLogs": [
                { "scoreAddress": "cxabc", "indexed": ["Transfer(int)"], "data": ["0x1"] },
                { "scoreAddress": "cxabc", "indexed": ["Transfer(int)"], "data": ["0x2"] },
            ],
        });

        let mock = MockRpcClient::new(move |method, _, _| match method {
            "icx_getBlockByHeight" => Ok(RpcOutcome::Result(block.clone())),
            "icx_getTransactionResult" => Ok(RpcOutcome::Result(tx_result.clone())),
            other => panic!("unexpected method {other}"),
        });
        let client = Client::with_transport(Identity::builder().build(), Arc::new(mock));

        let frame = serde_json::json!({
            "height": "0x2a",
            "hash": "0xc71d8238",
            "indexes": [["0x1"]],
            "events": [[["0x1"]]],
        });
        let items = decode_block_notification(&client, &frame).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], StreamItem::Tick(t) if t.height == 42 && t.hash == "0xc71d8238"));
        match &items[1] {
            StreamItem::Event { position, log, .. } => {
                assert_eq!(*position, 1);
                assert_eq!(log.data[0].as_int().unwrap().to_i64(), Some(2));
            }
            other => panic!("expected an event, got {other:?}"),
        }
    }
}
