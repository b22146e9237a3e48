//! WebSocket connection lifecycle.
//!
//! Each connection runs two pumps:
//!
//! - the **read pump** runs on the upgrade task, answers `ping` messages
//!   with `pong`, hands other messages to the hub's inbound handler, and
//!   declares the peer dead after `ws_pong_wait` without any frame;
//! - the **write pump** is spawned, drains the client's outbound queue
//!   with a deadline per write, and sends a ping frame every
//!   `ws_ping_period` so a healthy peer keeps the read side alive.
//!
//! Whichever pump stops first ends the connection: the client is
//! unregistered, its queue closes, and the write pump sends a close frame.

use std::fmt::Display;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::HubConfig;
use crate::domain::{Client, Frame, Message, Transport, UserId};
use crate::service::{Hub, InboundHandler};

/// Timing knobs shared by both pumps.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    /// Deadline for one write.
    pub write_wait: Duration,
    /// Read-side idle limit.
    pub pong_wait: Duration,
    /// Interval between keepalive pings.
    pub ping_period: Duration,
}

impl From<&HubConfig> for PumpSettings {
    fn from(config: &HubConfig) -> Self {
        Self {
            write_wait: config.ws_write_wait,
            pong_wait: config.ws_pong_wait,
            ping_period: config.ws_ping_period,
        }
    }
}

/// Runs a registered WebSocket connection until either side ends it.
pub async fn run_connection(mut socket: WebSocket, hub: Hub, user_id: UserId) {
    let (client, outbound) = match hub.connect(user_id, Transport::WebSocket).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::debug!(%user_id, error = %e, "refusing websocket connection");
            let _ = socket.send(WsMessage::Close(None)).await;
            return;
        }
    };

    let (ws_tx, ws_rx) = socket.split();
    serve_client(&hub, &client, ws_tx, ws_rx, outbound).await;
    tracing::debug!(%user_id, connection_id = %client.id(), "ws connection closed");
}

/// Runs both pumps for a registered client over the given halves and
/// unregisters the client as soon as either pump stops.
pub async fn serve_client<T, R, E>(
    hub: &Hub,
    client: &Client,
    ws_tx: T,
    ws_rx: R,
    outbound: mpsc::Receiver<Frame>,
) where
    T: Sink<WsMessage> + Unpin + Send + 'static,
    T::Error: Display + Send,
    R: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    let settings = PumpSettings::from(hub.config());
    let mut writer = tokio::spawn(write_pump(ws_tx, outbound, settings));

    let writer_done = tokio::select! {
        () = read_pump(ws_rx, client, hub.inbound(), settings) => false,
        _ = &mut writer => true,
    };

    hub.unregister(client).await;
    if !writer_done && let Err(e) = writer.await {
        tracing::error!(connection_id = %client.id(), error = %e, "write pump failed");
    }
}

/// Reads frames until the peer closes, errors or goes quiet for
/// `pong_wait`. Every received frame, pong frames included, restarts the
/// idle timer.
pub async fn read_pump<S, E>(
    mut rx: S,
    client: &Client,
    inbound: &dyn InboundHandler,
    settings: PumpSettings,
) where
    S: Stream<Item = Result<WsMessage, E>> + Unpin,
    E: Display,
{
    loop {
        let Ok(next) = tokio::time::timeout(settings.pong_wait, rx.next()).await else {
            tracing::debug!(connection_id = %client.id(), "read timeout; peer presumed dead");
            break;
        };
        match next {
            Some(Ok(WsMessage::Text(text))) => handle_text(client, inbound, text.as_str()),
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::debug!(connection_id = %client.id(), error = %e, "websocket read error");
                break;
            }
        }
    }
}

/// Handles one inbound text message.
///
/// A `ping` gets exactly one `pong` on the client's own queue without
/// involving the hub. Anything else goes to the inbound handler.
/// Malformed JSON is ignored.
pub fn handle_text(client: &Client, inbound: &dyn InboundHandler, text: &str) {
    let message = match serde_json::from_str::<Message>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(connection_id = %client.id(), error = %e, "ignoring malformed client message");
            return;
        }
    };

    if message.is_ping() {
        match Frame::encode(&Message::pong()) {
            Ok(frame) => {
                if let Err(e) = client.try_enqueue(frame) {
                    tracing::debug!(connection_id = %client.id(), error = %e, "pong not queued");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode pong"),
        }
        return;
    }

    inbound.handle(client.user_id(), message);
}

/// Writes queued frames and keepalive pings until the queue closes or a
/// write fails. Sends a close frame when the queue closes.
pub async fn write_pump<S>(mut tx: S, mut outbound: mpsc::Receiver<Frame>, settings: PumpSettings)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    let mut ticker = tokio::time::interval_at(
        Instant::now() + settings.ping_period,
        settings.ping_period,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(frame) => {
                    let msg = WsMessage::text(frame.json().to_string());
                    if !send_before(&mut tx, msg, settings.write_wait).await {
                        break;
                    }
                }
                None => {
                    let _ = send_before(&mut tx, WsMessage::Close(None), settings.write_wait).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                if !send_before(&mut tx, WsMessage::Ping(Bytes::new()), settings.write_wait).await {
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(settings.write_wait, tx.close()).await;
}

/// Sends one message within `deadline`. Returns `false` on error or
/// timeout.
async fn send_before<S>(tx: &mut S, msg: WsMessage, deadline: Duration) -> bool
where
    S: Sink<WsMessage> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(deadline, tx.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "websocket write failed");
            false
        }
        Err(_) => {
            tracing::debug!("websocket write timed out");
            false
        }
    }
}
