//! Realtime connection task.
//!
//! One background task per session owns the WebSocket. The store talks to it
//! through [`RealtimeHandle`]; the task talks back by posting
//! `InternalEvent::Realtime` onto the core channel. Reconnection is handled
//! entirely in here: bounded exponential backoff, then room re-joins, then a
//! `Connected` signal so the store can refresh open threads and heal any gap.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::Sender;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::api::MessageDto;
use crate::updates::{CoreMsg, InternalEvent, RealtimeEvent};
use crate::SharedTokenProvider;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 30_000;

#[derive(Debug)]
enum SocketCommand {
    Join { thread_id: String },
    Leave { thread_id: String },
}

/// Store-side handle. Dropping it (or calling [`shutdown`](Self::shutdown))
/// stops the task; no realtime event for a dead session can reach the core
/// after that because the task exits before its channel send.
pub struct RealtimeHandle {
    cmd_tx: mpsc::UnboundedSender<SocketCommand>,
    alive: Arc<AtomicBool>,
}

impl RealtimeHandle {
    pub fn join(&self, thread_id: &str) {
        let _ = self.cmd_tx.send(SocketCommand::Join {
            thread_id: thread_id.to_string(),
        });
    }

    pub fn leave(&self, thread_id: &str) {
        let _ = self.cmd_tx.send(SocketCommand::Leave {
            thread_id: thread_id.to_string(),
        });
    }

    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Wire frame. The server speaks newline-free JSON text frames shaped
/// `{"event": "...", "data": ...}` in both directions.
#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn join_frame(thread_id: &str) -> String {
    serde_json::json!({ "event": "chat:join", "data": { "threadId": thread_id } }).to_string()
}

fn leave_frame(thread_id: &str) -> String {
    serde_json::json!({ "event": "chat:leave", "data": { "threadId": thread_id } }).to_string()
}

pub fn spawn_socket(
    runtime: &tokio::runtime::Runtime,
    ws_url: String,
    tokens: SharedTokenProvider,
    core_tx: Sender<CoreMsg>,
) -> RealtimeHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let alive = Arc::new(AtomicBool::new(true));

    let task_alive = alive.clone();
    runtime.spawn(async move {
        run_socket(ws_url, tokens, core_tx, cmd_rx, task_alive).await;
    });

    RealtimeHandle { cmd_tx, alive }
}

async fn run_socket(
    ws_url: String,
    tokens: SharedTokenProvider,
    core_tx: Sender<CoreMsg>,
    mut cmd_rx: mpsc::UnboundedReceiver<SocketCommand>,
    alive: Arc<AtomicBool>,
) {
    // Joined rooms survive reconnects; commands that arrive while offline
    // still update the set so the next connect joins the right rooms.
    let mut rooms: HashSet<String> = HashSet::new();
    let mut attempt: u32 = 0;

    loop {
        if !alive.load(Ordering::SeqCst) {
            return;
        }

        match connect(&ws_url, &tokens).await {
            Ok(mut ws) => {
                tracing::info!(url = %ws_url, rooms = rooms.len(), "socket connected");
                attempt = 0;

                for room in &rooms {
                    if ws.send(WsMessage::Text(join_frame(room).into())).await.is_err() {
                        break;
                    }
                }
                if !alive.load(Ordering::SeqCst) {
                    let _ = ws.close(None).await;
                    return;
                }
                let _ = core_tx.send(CoreMsg::Internal(Box::new(InternalEvent::Realtime(
                    RealtimeEvent::Connected,
                ))));

                loop {
                    tokio::select! {
                        cmd = cmd_rx.recv() => match cmd {
                            Some(SocketCommand::Join { thread_id }) => {
                                if rooms.insert(thread_id.clone()) {
                                    let _ = ws.send(WsMessage::Text(join_frame(&thread_id).into())).await;
                                }
                            }
                            Some(SocketCommand::Leave { thread_id }) => {
                                if rooms.remove(&thread_id) {
                                    let _ = ws.send(WsMessage::Text(leave_frame(&thread_id).into())).await;
                                }
                            }
                            // Handle dropped: session is over.
                            None => {
                                let _ = ws.close(None).await;
                                return;
                            }
                        },
                        frame = ws.next() => match frame {
                            Some(Ok(WsMessage::Text(text))) => {
                                handle_text_frame(&text, &core_tx);
                            }
                            Some(Ok(WsMessage::Ping(payload))) => {
                                let _ = ws.send(WsMessage::Pong(payload)).await;
                            }
                            Some(Ok(WsMessage::Close(_))) | None => {
                                tracing::info!("socket closed by server");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "socket read error");
                                break;
                            }
                        },
                    }

                    if !alive.load(Ordering::SeqCst) {
                        let _ = ws.close(None).await;
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %ws_url, attempt, error = %e, "socket connect failed");
            }
        }

        // Backoff before the next attempt, still draining room commands so
        // the set is current when we get back on.
        let delay_ms = (BACKOFF_BASE_MS << attempt.min(5)).min(BACKOFF_CAP_MS);
        attempt = attempt.saturating_add(1);
        let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(SocketCommand::Join { thread_id }) => { rooms.insert(thread_id); }
                    Some(SocketCommand::Leave { thread_id }) => { rooms.remove(&thread_id); }
                    None => return,
                },
            }
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(ws_url: &str, tokens: &SharedTokenProvider) -> anyhow::Result<WsStream> {
    let mut request = ws_url.into_client_request()?;
    // Token is re-read on every attempt so a refreshed token is picked up at
    // the next reconnect without restarting the session.
    let token = {
        let slot = match tokens.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        };
        slot.and_then(|p| p.bearer_token())
    };
    if let Some(token) = token {
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {token}").parse()?);
    }
    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

fn handle_text_frame(text: &str, core_tx: &Sender<CoreMsg>) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable socket frame");
            return;
        }
    };
    match frame.event.as_str() {
        "message:new" => match serde_json::from_value::<MessageDto>(frame.data) {
            Ok(dto) => {
                let _ = core_tx.send(CoreMsg::Internal(Box::new(InternalEvent::Realtime(
                    RealtimeEvent::Message(dto),
                ))));
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed message:new payload");
            }
        },
        other => {
            tracing::trace!(event = %other, "ignoring socket event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_leave_frames_use_the_server_vocabulary() {
        let v: serde_json::Value = serde_json::from_str(&join_frame("t1")).unwrap();
        assert_eq!(v["event"], "chat:join");
        assert_eq!(v["data"]["threadId"], "t1");

        let v: serde_json::Value = serde_json::from_str(&leave_frame("t1")).unwrap();
        assert_eq!(v["event"], "chat:leave");
    }

    #[test]
    fn message_new_frame_is_forwarded_to_the_core() {
        let (tx, rx) = flume::unbounded();
        handle_text_frame(
            r#"{"event":"message:new","data":{"id":"m1","threadId":"t1","content":"hi"}}"#,
            &tx,
        );
        match rx.try_recv().unwrap() {
            CoreMsg::Internal(ev) => match *ev {
                InternalEvent::Realtime(RealtimeEvent::Message(dto)) => {
                    assert_eq!(dto.id, "m1");
                    assert_eq!(dto.thread_id.as_deref(), Some("t1"));
                }
                other => panic!("unexpected event: {other:?}"),
            },
            CoreMsg::Action(_) => panic!("unexpected action"),
        }
    }

    #[test]
    fn unknown_and_malformed_frames_are_dropped() {
        let (tx, rx) = flume::unbounded();
        handle_text_frame(r#"{"event":"presence:update","data":{}}"#, &tx);
        handle_text_frame("not json", &tx);
        assert!(rx.try_recv().is_err());
    }
}
