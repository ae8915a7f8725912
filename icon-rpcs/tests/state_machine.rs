use futures_util::{SinkExt, StreamExt};
use icon_rpcs::stream::{BackoffConfig, BufferItem, DedupKey, StreamBuffer, SubscriptionHandler};
use icon_rpcs::Error;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

struct Tick {
    height: i64,
    hash: String,
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

struct TickHandler;

impl SubscriptionHandler for TickHandler {
    type Item = Tick;

    fn resolve_initial_height<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<i64, Error>> + Send + 'a>> {
        Box::pin(async { Ok(1) })
    }

    fn build_subscribe_frame(&self, from_height: i64) -> Result<String, Error> {
        Ok(format!(r#"{{"height":"0x{from_height:x}"}}"#))
    }

    fn decode_notification<'a>(
        &'a self,
        frame: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Self::Item>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let value: serde_json::Value = serde_json::from_str(frame)?;
            let height = i64::from_str_radix(value["height"].as_str().unwrap_or("0x0").trim_start_matches("0x"), 16)
                .unwrap_or(0);
            let hash = value["hash"].as_str().unwrap_or_default().to_string();
            Ok(vec![Tick { height, hash }])
        })
    }
}

struct StrictHandler;

impl SubscriptionHandler for StrictHandler {
    type Item = Tick;

    fn resolve_initial_height<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<i64, Error>> + Send + 'a>> {
        Box::pin(async { Ok(1) })
    }

    fn build_subscribe_frame(&self, from_height: i64) -> Result<String, Error> {
        Ok(format!(r#"{{"height":"0x{from_height:x}"}}"#))
    }

    /// Unlike [`TickHandler`], rejects a notification with no `hash` field
    /// instead of defaulting it, so a malformed frame is a decode failure
    /// rather than a degraded item.
    fn decode_notification<'a>(
        &'a self,
        frame: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Self::Item>, Error>> + Send + 'a>> {
        Box::pin(async move {
            let value: serde_json::Value = serde_json::from_str(frame)?;
            let hash = value
                .get("hash")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::UnexpectedFrame("missing hash".to_string()))?;
            let height =
                i64::from_str_radix(value["height"].as_str().unwrap_or("0x0").trim_start_matches("0x"), 16).unwrap_or(0);
            Ok(vec![Tick {
                height,
                hash: hash.to_string(),
            }])
        })
    }
}

/// Accepts one connection that acks then sends a notification missing
/// `hash` (a decode failure), then a second connection once the producer
/// reconnects, sending a well-formed notification.
async fn spawn_fake_node_with_one_bad_notification() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut write, mut read) = ws.split();
            let _ = read.next().await;
            write.send(WsMessage::Text(r#"{"code":0}"#.to_string())).await.unwrap();
            write.send(WsMessage::Text(r#"{"height":"0x5"}"#.to_string())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();
        let _ = read.next().await;
        write.send(WsMessage::Text(r#"{"code":0}"#.to_string())).await.unwrap();
        write
            .send(WsMessage::Text(r#"{"height":"0x6","hash":"0xdef6"}"#.to_string()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    format!("ws://{addr}")
}

#[tokio::test]
async fn decode_failure_still_advances_the_height_watermark_and_reconnects() {
    let url = spawn_fake_node_with_one_bad_notification().await;
    let buffer = Arc::new(StreamBuffer::new(16));
    let producer = icon_rpcs::stream::state_machine::Producer::new(url, StrictHandler, buffer.clone(), BackoffConfig::default());
    let mut handle = producer.spawn();

    // The bad frame at height 5 never becomes a buffered item, but its
    // height still reaches the watermark immediately.
    let mut saw_bad_height = false;
    for _ in 0..40 {
        if buffer.observed_height() >= 5 {
            saw_bad_height = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(saw_bad_height, "height 5 should have been observed despite the decode failure");

    // The producer reconnects after backing off and buffers the next,
    // well-formed notification.
    let mut popped = Vec::new();
    for _ in 0..100 {
        if buffer.len() >= 1 {
            popped.extend(buffer.pop(1));
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(popped.len(), 1);
    assert_eq!(popped[0].height, 6);

    handle.stop().await;
}

/// Spins up a bare websocket server that acks the subscribe frame and then
/// pushes a fixed number of notifications, one per height starting at 1.
async fn spawn_fake_node(notification_count: i64) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut write, mut read) = ws.split();

        // consume the subscribe frame
        let _ = read.next().await;

        write.send(WsMessage::Text(r#"{"code":0}"#.to_string())).await.unwrap();

        for height in 1..=notification_count {
            let frame = format!(r#"{{"height":"0x{height:x}","hash":"0xabc{height}"}}"#);
            write.send(WsMessage::Text(frame)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // keep the connection open so the producer doesn't treat a close as
        // an error mid-test
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    format!("ws://{addr}")
}

#[tokio::test]
async fn producer_buffers_notifications_in_order() {
    let url = spawn_fake_node(3).await;
    let buffer = Arc::new(StreamBuffer::new(16));
    let producer = icon_rpcs::stream::state_machine::Producer::new(url, TickHandler, buffer.clone(), BackoffConfig::default());
    let mut handle = producer.spawn();

    let mut popped = Vec::new();
    for _ in 0..20 {
        if buffer.len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    popped.extend(buffer.pop(3));

    assert_eq!(popped.len(), 3);
    assert_eq!(popped.iter().map(|t| t.height).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(buffer.current_height(), 3);
    assert!(buffer.observed_height() >= 3);

    handle.stop().await;
}

#[tokio::test]
async fn producer_stop_is_cooperative_and_idempotent() {
    let url = spawn_fake_node(1).await;
    let buffer = Arc::new(StreamBuffer::new(4));
    let producer = icon_rpcs::stream::state_machine::Producer::new(url, TickHandler, buffer, BackoffConfig::default());
    let mut handle = producer.spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.stop().await;
    handle.stop().await;
}
