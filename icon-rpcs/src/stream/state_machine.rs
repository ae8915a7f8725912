//! A reconnecting WebSocket producer. Generic over a [`SubscriptionHandler`]
//! that knows how to build the subscribe frame and decode notification
//! frames into buffered items; this module only knows about connecting,
//! backing off and feeding a [`StreamBuffer`].

use super::buffer::{BufferItem, StreamBuffer};
use crate::Error;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// Observable lifecycle of a [`ProducerHandle`]'s background task.
///
/// `Disconnected -> Connecting -> Upgrading -> Initializing -> SettingUp ->
/// Consuming <-> Waiting -> (backoff) -> Connecting`, with `Terminating` as
/// the only exit. `Waiting` is entered when the buffer is full and left as
/// soon as a consumer drains it; it is not a failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Disconnected,
    Connecting,
    Upgrading,
    Initializing,
    SettingUp,
    Consuming,
    Waiting,
    Terminating,
}

/// Tunables for [`Backoff`]. Defaults match what a well-behaved subscriber
/// should use against a single node: don't hammer it, but don't wait
/// minutes either.
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    /// Width of the random jitter multiplier, in whole seconds. Each retry
    /// picks a multiplier uniformly from `1..=slot_size`.
    pub slot_size: u64,
    /// Caps how many consecutive failures still grow the exponent; beyond
    /// this the delay plateaus instead of continuing to double.
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            slot_size: 1,
            max_retries: 5,
        }
    }
}

/// Exponential backoff with jitter, tracking a consecutive-failure counter.
///
/// `delay = (2 << min(retries - 2, max_retries - 2)) * rand(1..=slot_size)`
/// seconds, for `retries >= 2`; the first failure (`retries == 1`) uses the
/// same formula with the exponent floored at zero, i.e. `2 *
/// rand(1..=slot_size)` seconds.
pub struct Backoff {
    retries: u32,
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Backoff { retries: 0, config }
    }

    /// Record another consecutive failure and return how long to wait
    /// before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.retries += 1;
        let shift = self
            .retries
            .saturating_sub(2)
            .min(self.config.max_retries.saturating_sub(2));
        let base_secs = 2u64 << shift;
        let jitter = rand::thread_rng().gen_range(1..=self.config.slot_size.max(1));
        Duration::from_secs(base_secs * jitter)
    }

    /// Reset the failure counter after a successful connection.
    pub fn reset(&mut self) {
        self.retries = 0;
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Policy hooks a [`Producer`] needs from its caller: how to resolve where
/// to start from, how to build the one-shot subscribe frame, and how to
/// turn a raw notification frame into buffered items. None of this crate's
/// code needs to know what a tick or an event log looks like.
pub trait SubscriptionHandler: Send + Sync + 'static {
    /// The buffered item type this subscription produces.
    type Item: BufferItem;

    /// Resolve the height to subscribe from. Implementors that were asked
    /// for "latest" typically make an RPC call here to pin down a concrete
    /// height before building the subscribe frame.
    fn resolve_initial_height<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<i64, Error>> + Send + 'a>>;

    /// Build the JSON text of the single subscribe frame sent right after
    /// the WebSocket upgrade completes.
    fn build_subscribe_frame(&self, from_height: i64) -> Result<String, Error>;

    /// Decode one non-ack text frame into zero or more buffered items.
    fn decode_notification<'a>(
        &'a self,
        frame: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Self::Item>, Error>> + Send + 'a>>;
}

#[derive(Deserialize)]
struct AckFrame {
    code: i32,
    #[serde(default)]
    message: Option<String>,
}

/// A handle to a running [`Producer`] task. Dropping it does not stop the
/// task; call [`ProducerHandle::stop`] for a cooperative, awaited shutdown.
pub struct ProducerHandle {
    stop_tx: watch::Sender<bool>,
    done_rx: Option<oneshot::Receiver<()>>,
}

impl ProducerHandle {
    /// Ask the producer to stop and wait until it has torn down its
    /// connection and exited. Safe to call more than once; subsequent
    /// calls return immediately.
    pub async fn stop(&mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(done_rx) = self.done_rx.take() {
            let _ = done_rx.await;
        }
    }
}

/// Drives a single reconnecting WebSocket subscription into a
/// [`StreamBuffer`], per [`SubscriptionHandler`] `H`.
pub struct Producer<H: SubscriptionHandler> {
    url: String,
    handler: H,
    buffer: Arc<StreamBuffer<H::Item>>,
    backoff: Backoff,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl<H: SubscriptionHandler> Producer<H> {
    pub fn new(url: impl Into<String>, handler: H, buffer: Arc<StreamBuffer<H::Item>>, backoff: BackoffConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Producer {
            url: url.into(),
            handler,
            buffer,
            backoff: Backoff::new(backoff),
            stop_tx,
            stop_rx,
        }
    }

    /// Spawn the producer loop on the current Tokio runtime and return a
    /// handle to stop it.
    pub fn spawn(mut self) -> ProducerHandle
    where
        H: 'static,
    {
        let stop_tx = self.stop_tx.clone();
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            self.run().await;
            let _ = done_tx.send(());
        });
        ProducerHandle {
            stop_tx,
            done_rx: Some(done_rx),
        }
    }

    fn stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }

    async fn run(&mut self) {
        let mut state = ProducerState::Disconnected;
        loop {
            if self.stopping() {
                state = ProducerState::Terminating;
                tracing::debug!(?state, "subscription producer stopping");
                return;
            }

            state = ProducerState::Connecting;
            tracing::debug!(?state, url = %self.url, "subscription producer connecting");

            match self.connect_and_consume(&mut state).await {
                Ok(()) => {
                    // `connect_and_consume` only returns `Ok` when asked to stop.
                    return;
                }
                Err(err) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(error = %err, retries = self.backoff.retries(), delay_secs = delay.as_secs(), "subscription producer lost connection, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.stop_rx.changed() => {}
                    }
                }
            }
        }
    }

    async fn connect_and_consume(&mut self, state: &mut ProducerState) -> Result<(), Error> {
        *state = ProducerState::Upgrading;
        let (ws, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;
        let (mut write, mut read) = ws.split();
        self.backoff.reset();

        *state = ProducerState::Initializing;
        let from_height = self.handler.resolve_initial_height().await?;

        *state = ProducerState::SettingUp;
        let frame = self.handler.build_subscribe_frame(from_height)?;
        write
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let ack_text = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => break text,
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(other)) => {
                    return Err(Error::UnexpectedFrame(format!("expected ack frame, got {other:?}")));
                }
                Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
                None => return Err(Error::Disconnected("connection closed before ack".into())),
            }
        };
        let ack: AckFrame = serde_json::from_str(&ack_text)?;
        if ack.code != 0 {
            return Err(Error::WebSocket(format!(
                "subscription rejected, code {}: {}",
                ack.code,
                ack.message.unwrap_or_default()
            )));
        }

        *state = ProducerState::Consuming;
        tracing::debug!(?state, "subscription producer consuming");

        loop {
            if self.stopping() {
                return Ok(());
            }

            if self.buffer.is_full() {
                *state = ProducerState::Waiting;
                tokio::select! {
                    _ = self.stop_rx.changed() => {
                        if self.stopping() {
                            return Ok(());
                        }
                    }
                    () = wait_for_space(&self.buffer) => {}
                }
                *state = ProducerState::Consuming;
                continue;
            }

            let frame = tokio::select! {
                frame = read.next() => frame,
                _ = self.stop_rx.changed() => {
                    if self.stopping() {
                        return Ok(());
                    }
                    continue;
                }
            };

            match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if let Ok(ack) = serde_json::from_str::<AckFrame>(&text) {
                        if ack.code != 0 {
                            return Err(Error::WebSocket(format!(
                                "subscription closed by server, code {}: {}",
                                ack.code,
                                ack.message.unwrap_or_default()
                            )));
                        }
                        continue;
                    }
                    match self.handler.decode_notification(&text).await {
                        Ok(items) => {
                            if let Some(max_height) = items.iter().map(BufferItem::height).max() {
                                self.buffer.observe_height(max_height);
                            }
                            self.buffer.put(items);
                        }
                        Err(err) => {
                            if let Some(height) = raw_frame_height(&text) {
                                self.buffer.observe_height(height);
                            }
                            tracing::warn!(error = %err, "failed to decode subscription notification, backing off");
                            return Err(err);
                        }
                    }
                }
                Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(Error::Disconnected(format!("server closed connection: {frame:?}")));
                }
                Some(Ok(other)) => {
                    return Err(Error::UnexpectedFrame(format!("unexpected frame: {other:?}")));
                }
                Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
                None => return Err(Error::Disconnected("connection closed".into())),
            }
        }
    }
}

/// Best-effort extraction of a notification's `height` field straight from
/// the raw frame, used to keep the height watermark moving even when the
/// handler fails to decode the frame's body.
fn raw_frame_height(text: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let height = value.get("height")?.as_str()?;
    i64::from_str_radix(height.strip_prefix("0x")?, 16).ok()
}

async fn wait_for_space<T: BufferItem>(buffer: &StreamBuffer<T>) {
    while buffer.is_full() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let _ = buffer;
}
