//! Realtime channel transport. Connects a WebSocket to the gateway, parses
//! pushed document events, and forwards them over an mpsc channel. Frames
//! that do not parse into an event are dropped with a debug log; a broken
//! connection ends the pump without surfacing an error to consumers.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::Result;
use crate::types::RealtimeEvent;

use super::Subscription;

const EVENT_BUFFER: usize = 100;

fn websocket_url(endpoint: &str, project_id: &str, channels: &[String]) -> String {
    let base = endpoint
        .replacen("https://", "wss://", 1)
        .replacen("http://", "ws://", 1);
    let mut url = format!("{base}/realtime?project={project_id}");
    for channel in channels {
        url.push_str("&channels[]=");
        url.push_str(channel);
    }
    url
}

fn parse_event(text: &str) -> Option<RealtimeEvent> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("type").and_then(|t| t.as_str()) != Some("event") {
        return None;
    }
    serde_json::from_value(value.get("data")?.clone()).ok()
}

/// Opens a subscription for the given channels. Returns once the transport
/// is connected; events are pumped in a background task until the connection
/// closes or the subscription is dropped.
pub(crate) async fn open(
    endpoint: &str,
    project_id: &str,
    channels: &[String],
) -> Result<Subscription> {
    let url = websocket_url(endpoint, project_id, channels);
    let (stream, _) = connect_async(&url).await?;
    let (mut writer, mut reader) = stream.split();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    let pump = tokio::spawn(async move {
        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Some(event) = parse_event(&text) {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    } else {
                        tracing::debug!(
                            target: "huddle::gateway::realtime",
                            "Dropping unrecognized frame"
                        );
                    }
                }
                Ok(Message::Ping(payload)) => {
                    if writer.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        target: "huddle::gateway::realtime",
                        "Realtime connection error: {}",
                        e
                    );
                    break;
                }
            }
        }
    });

    Ok(Subscription::new(rx, pump))
}
