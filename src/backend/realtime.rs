//! Realtime row-change subscription.
//!
//! Speaks the Phoenix channel protocol over a WebSocket: joins
//! `realtime:public` with a `postgres_changes` filter, heartbeats every
//! 25 seconds and reconnects with exponential backoff. Each change is
//! republished on a broadcast channel as a [`RowChange`].
//!
//! Row-level security applies to the channel as it does to REST reads, so
//! the join carries an `access_token`; without one only rows visible to the
//! anonymous role are delivered.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{BackendError, ChangeKind, RowChange, Table};

const TOPIC: &str = "realtime:public";
const HEARTBEAT: Duration = Duration::from_secs(25);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Client for the backend's realtime endpoint.
pub struct RealtimeClient {
    url: String,
    access_token: Option<String>,
    changes_tx: broadcast::Sender<RowChange>,
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeClient")
            .field("url", &self.url)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    table: String,
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

impl RealtimeClient {
    /// Creates a client for the project at `base_url`. `access_token` is
    /// the JWT the channel is joined with.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Decode`] if `base_url` does not form a valid
    /// WebSocket URL.
    pub fn new(
        base_url: &str,
        api_key: &str,
        access_token: Option<String>,
        changes_tx: broadcast::Sender<RowChange>,
    ) -> Result<Self, BackendError> {
        let ws_base = base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        let url = Url::parse_with_params(
            &format!("{ws_base}/realtime/v1/websocket"),
            &[("apikey", api_key), ("vsn", "1.0.0")],
        )
        .map_err(|e| BackendError::Decode(format!("invalid realtime url: {e}")))?;
        if access_token.is_none() {
            tracing::warn!("realtime joined without an access token; protected rows are not delivered");
        }
        Ok(Self {
            url: url.into(),
            access_token,
            changes_tx,
        })
    }

    /// Runs forever, reconnecting after every failure.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        loop {
            match self.session().await {
                Ok(()) => {
                    tracing::info!("realtime connection closed, reconnecting");
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?backoff, "realtime connection failed");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn session(&self) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut source) = stream.split();
        let mut next_ref: u64 = 1;

        sink.send(Message::Text(join_message(next_ref, self.access_token.as_deref()).to_string().into()))
            .await?;
        tracing::info!(topic = TOPIC, "realtime channel joined");

        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    next_ref += 1;
                    sink.send(Message::Text(heartbeat_message(next_ref).to_string().into())).await?;
                }
                msg = source.next() => {
                    let Some(msg) = msg else { return Ok(()) };
                    match msg? {
                        Message::Text(text) => {
                            if let Some(change) = parse_change(text.as_str()) {
                                tracing::debug!(table = %change.table, kind = change.kind.as_str(), "row change");
                                let _ = self.changes_tx.send(change);
                            }
                        }
                        Message::Ping(data) => sink.send(Message::Pong(data)).await?,
                        Message::Close(_) => return Ok(()),
                        _ => {}
                    }
                }
            }
        }
    }
}

fn join_message(reference: u64, access_token: Option<&str>) -> Value {
    let mut payload = json!({
        "config": {
            "postgres_changes": [{ "event": "*", "schema": "public" }]
        }
    });
    if let (Some(token), Some(obj)) = (access_token, payload.as_object_mut()) {
        obj.insert("access_token".to_string(), Value::String(token.to_string()));
    }
    json!({
        "topic": TOPIC,
        "event": "phx_join",
        "payload": payload,
        "ref": reference.to_string(),
    })
}

fn heartbeat_message(reference: u64) -> Value {
    json!({
        "topic": "phoenix",
        "event": "heartbeat",
        "payload": {},
        "ref": reference.to_string(),
    })
}

/// Extracts a row change from a channel frame; `None` for anything else.
fn parse_change(text: &str) -> Option<RowChange> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    if envelope.event != "postgres_changes" {
        return None;
    }
    let data: ChangeData = serde_json::from_value(envelope.payload.get("data")?.clone()).ok()?;
    Some(RowChange {
        table: Table::from_name(&data.table)?,
        kind: data.kind,
        record: data.record.unwrap_or_else(|| json!({})),
        old_record: data.old_record.filter(|v| v.as_object().is_some_and(|o| !o.is_empty())),
    })
}
