//! JSON-lines transport helper, spawned and supervised as a child process.
//!
//! Requests go to the helper's stdin as `{"id", "method", "params"}`. The
//! helper's stdout carries responses (`{"id", "result"}` or `{"id", "error"}`)
//! interleaved with events (`{"event": {...}}`). The helper is restarted with
//! exponential backoff whenever it exits; in-flight requests then fail as
//! disconnected, which the retry policy treats as transient.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::BackoffBuilder;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::error::{PlatformError, PlatformResult};
use crate::common::messages::Attachment;
use crate::common::types::{ConversationId, GroupId, MessageId, Platform, WireText};
use crate::config::types::TransportConfig;

use super::{ConversationInfo, GroupSpec, PlatformClient, PlatformEvent};

/// Longest line accepted from the helper.
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Events buffered between the helper and the relay.
const EVENT_BUFFER: usize = 256;

type Pending = Arc<DashMap<u64, oneshot::Sender<PlatformResult<Value>>>>;

#[derive(Debug, Serialize)]
struct Request {
    id: u64,
    method: &'static str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

impl From<RemoteError> for PlatformError {
    fn from(e: RemoteError) -> Self {
        match e.kind.as_str() {
            "rate_limited" => PlatformError::RateLimited {
                retry_after: e.retry_after_ms.map(Duration::from_millis),
            },
            "timeout" => PlatformError::Timeout,
            "network" => PlatformError::Network { message: e.message },
            "rejected" => PlatformError::Rejected { message: e.message },
            "not_found" => PlatformError::NotFound { what: e.message },
            other => PlatformError::Protocol {
                message: format!("{}: {}", other, e.message),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Event {
        event: PlatformEvent,
    },
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<RemoteError>,
    },
}

/// Client for a platform served by a helper process.
pub struct ProcessClient {
    platform: Platform,
    requests: mpsc::Sender<Request>,
    pending: Pending,
    next_id: AtomicU64,
    timeout: Duration,
}

impl ProcessClient {
    /// Spawn and supervise the helper.
    ///
    /// Returns the client, the helper's event stream, and the supervisor task.
    pub fn spawn(
        platform: Platform,
        config: TransportConfig,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<PlatformEvent>, JoinHandle<()>) {
        let (request_tx, request_rx) = mpsc::channel(EVENT_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let pending: Pending = Arc::new(DashMap::new());

        let client = Arc::new(Self {
            platform,
            requests: request_tx,
            pending: pending.clone(),
            next_id: AtomicU64::new(1),
            timeout: Duration::from_millis(config.request_timeout_ms),
        });

        let supervisor = Supervisor {
            platform,
            config,
            pending,
            cancel,
        };
        let handle = tokio::spawn(supervisor.run(request_rx, event_tx));

        (client, event_rx, handle)
    }

    async fn call<T: DeserializeOwned>(&self, method: &'static str, params: Value) -> PlatformResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = Request { id, method, params };
        if self.requests.send(request).await.is_err() {
            self.pending.remove(&id);
            return Err(PlatformError::Disconnected);
        }

        let value = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(PlatformError::Disconnected),
            Err(_) => {
                self.pending.remove(&id);
                warn!(platform = %self.platform, method, id, "Request timed out");
                return Err(PlatformError::Timeout);
            }
        };

        serde_json::from_value(value).map_err(|e| PlatformError::Protocol {
            message: format!("bad {} result: {}", method, e),
        })
    }
}

#[derive(Deserialize)]
struct MessageRef {
    message_id: MessageId,
}

#[derive(Deserialize)]
struct GroupRef {
    group_id: GroupId,
}

#[async_trait]
impl PlatformClient for ProcessClient {
    async fn send_message(
        &self,
        target: &ConversationId,
        text: &WireText,
        attachments: &[Attachment],
    ) -> PlatformResult<MessageId> {
        let sent: MessageRef = self
            .call(
                "send_message",
                json!({ "target": target, "text": text, "attachments": attachments }),
            )
            .await?;
        Ok(sent.message_id)
    }

    async fn create_group(&self, spec: &GroupSpec) -> PlatformResult<GroupId> {
        let params = serde_json::to_value(spec).map_err(|e| PlatformError::Protocol {
            message: e.to_string(),
        })?;
        let created: GroupRef = self.call("create_group", params).await?;
        Ok(created.group_id)
    }

    async fn set_group_avatar(&self, group: &GroupId, avatar: &Bytes) -> PlatformResult<()> {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(avatar);
        let _: Value = self
            .call("set_group_avatar", json!({ "group": group, "avatar": encoded }))
            .await?;
        Ok(())
    }

    async fn conversation_info(&self, conversation: &ConversationId) -> PlatformResult<ConversationInfo> {
        self.call("conversation_info", json!({ "conversation": conversation }))
            .await
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        messages: &[MessageId],
    ) -> PlatformResult<()> {
        let _: Value = self
            .call(
                "mark_read",
                json!({ "conversation": conversation, "messages": messages }),
            )
            .await?;
        Ok(())
    }

    async fn delete_message(&self, target: &ConversationId, message: &MessageId) -> PlatformResult<()> {
        let _: Value = self
            .call("delete_message", json!({ "target": target, "message": message }))
            .await?;
        Ok(())
    }
}

/// Keeps one helper process alive and bridges its stdio.
struct Supervisor {
    platform: Platform,
    config: TransportConfig,
    pending: Pending,
    cancel: CancellationToken,
}

/// How a helper session ended.
enum SessionEnd {
    /// The helper exited or its stdout closed.
    Exited { healthy: bool },
    /// Shutdown was requested or the relay dropped the client.
    Stopped,
}

impl Supervisor {
    async fn run(self, mut requests: mpsc::Receiver<Request>, events: mpsc::Sender<PlatformEvent>) {
        /// 1s initial, 1min max, with jitter, unlimited restarts.
        fn restart_backoff() -> impl Iterator<Item = Duration> {
            backon::ExponentialBuilder::default()
                .with_min_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(60))
                .with_jitter()
                .without_max_times()
                .build()
        }

        let mut backoff = restart_backoff();

        loop {
            info!(platform = %self.platform, command = %self.config.command, "Spawning transport helper");

            let end = match self.spawn_child() {
                Ok(child) => self.run_session(child, &mut requests, &events).await,
                Err(e) => {
                    error!(platform = %self.platform, error = %e, "Failed to spawn transport helper");
                    SessionEnd::Exited { healthy: false }
                }
            };
            self.fail_pending();

            match end {
                SessionEnd::Stopped => break,
                SessionEnd::Exited { healthy } => {
                    if healthy {
                        backoff = restart_backoff();
                    }
                }
            }

            let delay = backoff.next().unwrap_or(Duration::from_secs(60));
            warn!(
                platform = %self.platform,
                "Transport helper stopped. Restarting in {:.1}s...",
                delay.as_secs_f64()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    info!(platform = %self.platform, "Shutdown signal received during backoff");
                    break;
                }
            }
        }

        info!(platform = %self.platform, "Transport supervisor ended");
    }

    fn spawn_child(&self) -> std::io::Result<Child> {
        Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }

    async fn run_session(
        &self,
        mut child: Child,
        requests: &mut mpsc::Receiver<Request>,
        events: &mpsc::Sender<PlatformEvent>,
    ) -> SessionEnd {
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            error!(platform = %self.platform, "Transport helper stdio not piped");
            let _ = child.kill().await;
            return SessionEnd::Exited { healthy: false };
        };

        let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        let mut sink = FramedWrite::new(stdin, LinesCodec::new());
        let mut healthy = false;

        let end = loop {
            tokio::select! {
                line = lines.next() => match line {
                    Some(Ok(line)) => {
                        healthy = true;
                        if !self.handle_line(&line, events).await {
                            break SessionEnd::Stopped;
                        }
                    }
                    Some(Err(e)) => {
                        error!(platform = %self.platform, error = %e, "Error reading transport helper output");
                        break SessionEnd::Exited { healthy };
                    }
                    None => {
                        debug!(platform = %self.platform, "Transport helper stdout closed");
                        break SessionEnd::Exited { healthy };
                    }
                },

                request = requests.recv() => match request {
                    Some(request) => {
                        let id = request.id;
                        let line = match serde_json::to_string(&request) {
                            Ok(line) => line,
                            Err(e) => {
                                self.resolve(id, Err(PlatformError::Protocol { message: e.to_string() }));
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(line).await {
                            error!(platform = %self.platform, error = %e, "Failed to write to transport helper");
                            break SessionEnd::Exited { healthy };
                        }
                    }
                    None => break SessionEnd::Stopped,
                },

                status = child.wait() => {
                    match status {
                        Ok(status) => info!(platform = %self.platform, status = %status, "Transport helper exited"),
                        Err(e) => error!(platform = %self.platform, error = %e, "Error waiting for transport helper"),
                    }
                    return SessionEnd::Exited { healthy };
                }

                _ = self.cancel.cancelled() => break SessionEnd::Stopped,
            }
        };

        let _ = child.kill().await;
        end
    }

    /// Route one line from the helper. Returns `false` once the relay stopped listening.
    async fn handle_line(&self, line: &str, events: &mpsc::Sender<PlatformEvent>) -> bool {
        match serde_json::from_str::<Inbound>(line) {
            Ok(Inbound::Event { event }) => {
                if events.send(event).await.is_err() {
                    debug!(platform = %self.platform, "Event channel closed");
                    return false;
                }
            }
            Ok(Inbound::Response { id, result, error }) => {
                let outcome = match error {
                    Some(e) => Err(e.into()),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                self.resolve(id, outcome);
            }
            Err(e) => {
                warn!(platform = %self.platform, line = %line, error = %e, "Failed to parse transport helper output");
            }
        }
        true
    }

    fn resolve(&self, id: u64, outcome: PlatformResult<Value>) {
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                let _ = tx.send(outcome);
            }
            None => debug!(platform = %self.platform, id, "Response for unknown request"),
        }
    }

    fn fail_pending(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(PlatformError::Disconnected));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::common::error::{Classify, ErrorClass};

    #[test]
    fn test_remote_error_kinds() {
        let rate_limited: PlatformError = RemoteError {
            kind: "rate_limited".into(),
            message: String::new(),
            retry_after_ms: Some(1_500),
        }
        .into();
        assert_eq!(rate_limited.class(), ErrorClass::Transient);
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_millis(1_500)));

        let rejected: PlatformError = RemoteError {
            kind: "rejected".into(),
            message: "too large".into(),
            retry_after_ms: None,
        }
        .into();
        assert_eq!(rejected.class(), ErrorClass::Permanent);

        let unknown: PlatformError = RemoteError {
            kind: "weird".into(),
            message: "?".into(),
            retry_after_ms: None,
        }
        .into();
        assert!(matches!(unknown, PlatformError::Protocol { .. }));
    }

    #[test]
    fn test_inbound_lines() {
        let event: Inbound =
            serde_json::from_str(r#"{"event":{"type":"typing","conversation":"c"}}"#).unwrap();
        assert!(matches!(event, Inbound::Event { .. }));

        let ok: Inbound = serde_json::from_str(r#"{"id":3,"result":{"message_id":"9"}}"#).unwrap();
        assert!(matches!(ok, Inbound::Response { id: 3, error: None, .. }));

        let err: Inbound =
            serde_json::from_str(r#"{"id":4,"error":{"kind":"timeout"}}"#).unwrap();
        assert!(matches!(err, Inbound::Response { id: 4, error: Some(_), .. }));
    }

    #[test]
    fn test_request_line_shape() {
        let line = serde_json::to_string(&Request {
            id: 1,
            method: "mark_read",
            params: json!({ "conversation": "c", "messages": ["1"] }),
        })
        .unwrap();
        assert_eq!(
            line,
            r#"{"id":1,"method":"mark_read","params":{"conversation":"c","messages":["1"]}}"#
        );
    }

    /// A shell helper that answers every request with a fixed message id.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_round_trip_through_helper() {
        let script = r#"
            echo '{"event":{"type":"typing","conversation":"c"}}'
            while IFS= read -r line; do
                id=$(printf '%s' "$line" | sed -e 's/^{"id":\([0-9]*\).*/\1/')
                echo "{\"id\":$id,\"result\":{\"message_id\":\"m-$id\"}}"
            done
        "#;
        let config = TransportConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            request_timeout_ms: 5_000,
        };
        let cancel = CancellationToken::new();
        let (client, mut events, handle) = ProcessClient::spawn(Platform::Signal, config, cancel.clone());

        let event = events.recv().await.unwrap();
        assert!(matches!(event, PlatformEvent::Typing { .. }));

        let id = client
            .send_message(&"group".into(), &WireText::plain("hi"), &[])
            .await
            .unwrap();
        assert_eq!(id, MessageId::new("m-1"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
