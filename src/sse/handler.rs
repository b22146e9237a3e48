//! Axum SSE handler.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::auth::AuthenticatedUser;
use crate::app_state::AppState;
use crate::domain::{Client, Frame, Transport};
use crate::error::ApiError;
use crate::service::Hub;

/// `GET /sse` — Stream the caller's messages as Server-Sent Events.
///
/// Emits `connected` first, then one event per routed message named after
/// its type, and a `ping` event every `sse_ping_interval`.
///
/// # Errors
///
/// Returns [`ApiError::Unauthorized`] without an identity and
/// [`ApiError::ShuttingDown`] once the hub has stopped.
pub async fn sse_handler(
    AuthenticatedUser(user_id): AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let hub = state.hub;
    let (client, outbound) = hub.connect(user_id, Transport::Sse).await?;
    tracing::debug!(%user_id, connection_id = %client.id(), "sse stream opened");

    let ping_every = hub.config().sse_ping_interval;
    let events = event_stream(hub, client, outbound, ping_every);

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(events),
    )
        .into_response())
}

enum Step {
    Deliver(Frame),
    Ping,
    Closed,
}

fn event_stream(
    hub: Hub,
    client: Arc<Client>,
    mut outbound: mpsc::Receiver<Frame>,
    ping_every: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let guard = UnregisterOnDrop { hub, client };

    stream! {
        let _guard = guard;
        yield Ok(connected_event());

        let mut ticker = tokio::time::interval_at(Instant::now() + ping_every, ping_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let step = tokio::select! {
                next = outbound.recv() => next.map_or(Step::Closed, Step::Deliver),
                _ = ticker.tick() => Step::Ping,
            };
            match step {
                Step::Deliver(frame) => yield Ok(frame_event(&frame)),
                Step::Ping => yield Ok(ping_event()),
                Step::Closed => break,
            }
        }
    }
}

fn connected_event() -> Event {
    Event::default()
        .event("connected")
        .data(r#"{"message":"Connected to SSE"}"#)
}

fn ping_event() -> Event {
    Event::default()
        .event("ping")
        .data(serde_json::json!({ "time": Utc::now().timestamp() }).to_string())
}

/// Event names cannot contain line breaks; such types fall back to the
/// default `message` event. The JSON body still carries the real type.
fn frame_event(frame: &Frame) -> Event {
    let kind = frame.kind();
    let name = if kind.is_empty() || kind.contains(['\n', '\r']) {
        "message"
    } else {
        kind
    };
    Event::default().event(name).data(frame.json())
}

/// Unregisters the SSE client when axum drops the response body, which
/// happens when the peer disconnects or the stream ends.
#[derive(Debug)]
struct UnregisterOnDrop {
    hub: Hub,
    client: Arc<Client>,
}

impl Drop for UnregisterOnDrop {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let client = Arc::clone(&self.client);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    hub.unregister(&client).await;
                    tracing::debug!(
                        user_id = %client.user_id(),
                        connection_id = %client.id(),
                        "sse stream closed"
                    );
                });
            }
            // Runtime teardown: unregister in place.
            Err(_) => {
                hub.try_unregister(&client);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::Router;
    use axum::body::{Body, BodyDataStream};
    use axum::http::{Request, StatusCode};
    use futures_util::StreamExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::api::auth::USER_ID_HEADER;
    use crate::broker::MemoryBroker;
    use crate::config::HubConfig;
    use crate::domain::{Message, UserId};

    const WAIT: Duration = Duration::from_secs(2);

    async fn hub_with(config: HubConfig) -> Hub {
        Hub::start(config, Arc::new(MemoryBroker::default())).await
    }

    fn router(hub: &Hub) -> Router {
        crate::api::build_router(AppState::new(hub.clone()))
    }

    async fn open(hub: &Hub, user: UserId) -> (StatusCode, Response) {
        let Ok(request) = Request::builder()
            .uri("/sse")
            .header(USER_ID_HEADER, user.to_string())
            .body(Body::empty())
        else {
            panic!("bad request");
        };
        let Ok(response) = router(hub).oneshot(request).await else {
            panic!("router failed");
        };
        (response.status(), response)
    }

    /// Reads body chunks until the accumulated text contains `needle`.
    async fn read_until(body: &mut BodyDataStream, needle: &str) -> String {
        let mut seen = String::new();
        while !seen.contains(needle) {
            let Ok(Some(Ok(chunk))) = tokio::time::timeout(WAIT, body.next()).await else {
                panic!("stream ended before {needle:?}; got {seen:?}");
            };
            seen.push_str(&String::from_utf8_lossy(&chunk));
        }
        seen
    }

    #[tokio::test]
    async fn stream_opens_with_headers_and_connected_event() {
        let hub = hub_with(HubConfig::default()).await;
        let (status, response) = open(&hub, UserId::random()).await;

        assert_eq!(status, StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );
        assert_eq!(
            headers.get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some("no-cache")
        );
        assert_eq!(
            headers.get(header::CONNECTION).and_then(|v| v.to_str().ok()),
            Some("keep-alive")
        );

        let mut body = response.into_body().into_data_stream();
        let text = read_until(&mut body, "Connected to SSE").await;
        assert!(text.starts_with("event: connected\n"));
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn targeted_message_arrives_as_named_event() {
        let hub = hub_with(HubConfig::default()).await;
        let user = UserId::random();
        let (_, response) = open(&hub, user).await;
        let mut body = response.into_body().into_data_stream();
        read_until(&mut body, "connected").await;

        let Value::Object(data) = json!({ "title": "Call Sam" }) else {
            panic!("expected object");
        };
        assert!(hub.send_to_user(user, "nudge", data).await.is_ok());

        let text = read_until(&mut body, "Call Sam").await;
        assert!(text.contains("event: nudge\n"));
        let Some(line) = text.lines().find(|l| l.starts_with("data: {\"type\":\"nudge\"")) else {
            panic!("no nudge data line in {text:?}");
        };
        let Ok(message) = serde_json::from_str::<Message>(line.trim_start_matches("data: ")) else {
            panic!("data line is not a message");
        };
        assert_eq!(message.target(), Some(user));
        assert!(message.origin.is_none());
    }

    #[tokio::test]
    async fn idle_stream_gets_ping_events() {
        let hub = hub_with(HubConfig {
            sse_ping_interval: Duration::from_millis(30),
            ..HubConfig::default()
        })
        .await;
        let (_, response) = open(&hub, UserId::random()).await;
        let mut body = response.into_body().into_data_stream();

        let text = read_until(&mut body, "event: ping").await;
        assert!(text.contains("\"time\":"));
    }

    #[tokio::test]
    async fn dropping_the_stream_unregisters_the_client() {
        let hub = hub_with(HubConfig::default()).await;
        let user = UserId::random();
        let (_, response) = open(&hub, user).await;
        assert_eq!(hub.user_connection_count(user).await, 1);

        drop(response);

        let gone = tokio::time::timeout(WAIT, async {
            while hub.user_connection_count(user).await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(gone.is_ok());
    }

    #[tokio::test]
    async fn shutdown_ends_the_stream() {
        let hub = hub_with(HubConfig::default()).await;
        let (_, response) = open(&hub, UserId::random()).await;
        let mut body = response.into_body().into_data_stream();
        read_until(&mut body, "connected").await;

        hub.shutdown().await;

        let Ok(end) = tokio::time::timeout(WAIT, body.next()).await else {
            panic!("stream did not end");
        };
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn refused_after_shutdown() {
        let hub = hub_with(HubConfig::default()).await;
        hub.shutdown().await;

        let (status, _) = open(&hub, UserId::random()).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let hub = hub_with(HubConfig::default()).await;
        let Ok(request) = Request::builder().uri("/sse").body(Body::empty()) else {
            panic!("bad request");
        };
        let Ok(response) = router(&hub).oneshot(request).await else {
            panic!("router failed");
        };
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[test]
    fn stream_dropped_outside_a_runtime_still_unregisters() {
        let Ok(runtime) = tokio::runtime::Runtime::new() else {
            panic!("runtime");
        };
        let (hub, client, stream) = runtime.block_on(async {
            let hub = hub_with(HubConfig::default()).await;
            let Ok((client, outbound)) = hub.connect(UserId::random(), Transport::Sse).await else {
                panic!("connect failed");
            };
            let stream = event_stream(hub.clone(), Arc::clone(&client), outbound, WAIT);
            (hub, client, stream)
        });

        drop(stream);

        assert!(client.is_closed());
        assert!(!runtime.block_on(hub.is_registered(&client)));
    }

    #[test]
    fn multiline_types_fall_back_to_message_event() {
        let Ok(frame) = Frame::encode(&Message::new("bad\ntype", None, Default::default())) else {
            panic!("encode failed");
        };
        // building the event must not panic
        let _event = frame_event(&frame);
    }
}
