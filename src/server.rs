//! WebSocket transport front end.
//!
//! Peers open `GET /session/{node_id}` and exchange binary frames carrying
//! the session protocol. Each connection splits into a socket read loop and
//! a forward task; everything else happens on one core task that owns the
//! [`ServerCore`] and a [`SessionParser`] per connection. Events flow to it
//! over an mpsc channel, so handler execution stays strictly serial and the
//! in-memory indexes need no locks.

use std::collections::HashMap;
use std::path::PathBuf;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::handlers::ServerCore;
use crate::session::{self, SessionParser};
use crate::wire;

/// Events delivered to the core task.
enum CoreEvent {
    Connected {
        node_id: String,
        out_tx: mpsc::UnboundedSender<Vec<u8>>,
    },
    Frame {
        node_id: String,
        data: Vec<u8>,
    },
    Disconnected {
        node_id: String,
    },
}

#[derive(Clone)]
struct AppState {
    events: mpsc::UnboundedSender<CoreEvent>,
}

/// Bind the session endpoint and serve until the listener fails.
pub async fn run(
    bind_addr: &str,
    body_cache_dir: PathBuf,
    core: ServerCore,
) -> std::io::Result<()> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(core_loop(core, events_rx, body_cache_dir));

    let app = Router::new()
        .route("/session/:node_id", get(ws_handler))
        .with_state(AppState { events: events_tx });

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    vlogi!("server: listening on {bind_addr}");
    axum::serve(listener, app).await
}

/// The single dispatch task: parses inbound frames, runs handlers to
/// completion, and drains the per-peer queues to connected sockets.
async fn core_loop(
    mut core: ServerCore,
    mut events: mpsc::UnboundedReceiver<CoreEvent>,
    body_cache_dir: PathBuf,
) {
    let mut outputs: HashMap<String, mpsc::UnboundedSender<Vec<u8>>> = HashMap::new();
    let mut parsers: HashMap<String, SessionParser> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            CoreEvent::Connected { node_id, out_tx } => {
                outputs.insert(node_id.clone(), out_tx);
                parsers.insert(node_id.clone(), SessionParser::new(body_cache_dir.clone()));
                core.peer_connected(&node_id);
            }
            CoreEvent::Frame { node_id, data } => {
                let Some(parser) = parsers.get_mut(&node_id) else {
                    continue;
                };
                match parser.feed(&data) {
                    Ok(sections) => {
                        for section in sections {
                            let body = if section.body_size > 0 {
                                std::fs::read(&section.body_path).ok()
                            } else {
                                None
                            };
                            core.handle_frame(&node_id, &section.head, body);
                            session::discard_body(&section.body_path);
                        }
                    }
                    Err(e) => {
                        vloge!(
                            "server: session stream error from {}: {e}",
                            crate::logging::node_id(&node_id)
                        );
                    }
                }
                flush_queues(&mut core, &outputs);
            }
            CoreEvent::Disconnected { node_id } => {
                outputs.remove(&node_id);
                parsers.remove(&node_id);
                core.peer_disconnected(&node_id);
            }
        }
    }
}

/// Frame and forward every queued message whose peer is still connected.
/// Messages for peers without a socket stay queued until they reconnect or
/// the queue cap evicts them.
fn flush_queues(core: &mut ServerCore, outputs: &HashMap<String, mpsc::UnboundedSender<Vec<u8>>>) {
    for node_id in core.msgq_mut().pending_peers() {
        let Some(out_tx) = outputs.get(&node_id) else {
            continue;
        };
        for message in core.msgq_mut().drain(&node_id) {
            let framed = wire::frame_section(&message, &[]);
            if out_tx.send(framed).is_err() {
                vlogw!(
                    "server: dropping message for closed connection {}",
                    crate::logging::node_id(&node_id)
                );
                break;
            }
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(node_id): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, node_id, state))
}

async fn handle_socket(socket: WebSocket, node_id: String, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    if state
        .events
        .send(CoreEvent::Connected {
            node_id: node_id.clone(),
            out_tx,
        })
        .is_err()
    {
        return;
    }

    let forward = tokio::spawn(async move {
        while let Some(bytes) = out_rx.recv().await {
            if sink.send(Message::Binary(bytes)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                if state
                    .events
                    .send(CoreEvent::Frame {
                        node_id: node_id.clone(),
                        data,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Text(_)) => {}
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    let _ = state.events.send(CoreEvent::Disconnected { node_id });
    forward.abort();
}
