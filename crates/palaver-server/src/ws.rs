//! WebSocket bridge onto the [`Hub`](crate::hub::Hub).
//!
//! A client connects to `GET /ws?token=<api_token>` and is subscribed to its
//! own `user.{id}` channel straight away. Further channels are requested with
//! `{"subscribe": "<channel>"}` and dropped with `{"unsubscribe": "<channel>"}`.
//! Every hub event is forwarded as a text frame holding the JSON `Envelope`.
//!
//! Outgoing frames go through a bounded queue per socket; when it is full the
//! frame is dropped with a warning. A group subscription ends as soon as the
//! user is no longer a member of the group.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use palaver_shared::{ChannelName, UserId};
use palaver_store::{Database, StoreError, User};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::auth::authenticate;
use crate::error::ServerError;
use crate::events::Envelope;

/// Frames queued per socket before new ones are dropped.
const OUTBOUND_BUFFER: usize = 64;

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Frames a client may send.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum ClientFrame {
    Subscribe(ChannelName),
    Unsubscribe(ChannelName),
}

/// Control replies sent back to the client.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum ServerFrame {
    Subscribed(ChannelName),
    Unsubscribed(ChannelName),
    Error(String),
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user = {
        let db = state.db.lock().await;
        authenticate(&db, &query.token)?
    };
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

/// Whether `user` may listen on `channel`.
pub fn authorize_channel(
    db: &Database,
    user: &User,
    channel: &ChannelName,
) -> Result<bool, StoreError> {
    match channel {
        ChannelName::User(id) => Ok(*id == user.id),
        ChannelName::Chat(a, b) => Ok(*a == user.id || *b == user.id),
        ChannelName::Group(id) => db.is_group_member(*id, user.id),
    }
}

async fn handle_socket(socket: WebSocket, user: User, state: AppState) {
    info!(user = %user.id, "WebSocket connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut subscriptions: HashMap<ChannelName, JoinHandle<()>> = HashMap::new();
    let own = ChannelName::user(user.id);
    subscriptions.insert(own, forward(&state, user.id, own, tx.clone()).await);

    loop {
        tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => handle_frame(&state, &user, frame, &mut subscriptions, &tx).await,
                        Err(e) => ServerFrame::Error(format!("Invalid frame: {e}")),
                    };
                    send_json(&tx, &reply);
                }
                Some(Ok(Message::Ping(data))) => {
                    queue(&tx, Message::Pong(data));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(user = %user.id, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    for (_, task) in subscriptions.drain() {
        task.abort();
    }
    send_task.abort();
    info!(user = %user.id, "WebSocket disconnected");
}

async fn handle_frame(
    state: &AppState,
    user: &User,
    frame: ClientFrame,
    subscriptions: &mut HashMap<ChannelName, JoinHandle<()>>,
    tx: &mpsc::Sender<Message>,
) -> ServerFrame {
    match frame {
        ClientFrame::Subscribe(channel) => {
            let allowed = {
                let db = state.db.lock().await;
                authorize_channel(&db, user, &channel)
            };
            match allowed {
                Ok(true) => {}
                Ok(false) => return ServerFrame::Error(format!("Not allowed to join {channel}")),
                Err(e) => {
                    warn!(user = %user.id, %channel, error = %e, "Channel authorization failed");
                    return ServerFrame::Error("Internal server error".into());
                }
            }
            // A forwarder that stopped on its own (membership revoked) is replaced.
            if subscriptions.get(&channel).map_or(true, JoinHandle::is_finished) {
                let task = forward(state, user.id, channel, tx.clone()).await;
                subscriptions.insert(channel, task);
                debug!(user = %user.id, %channel, "Subscribed");
            }
            ServerFrame::Subscribed(channel)
        }
        ClientFrame::Unsubscribe(channel) => {
            if let Some(task) = subscriptions.remove(&channel) {
                task.abort();
            }
            ServerFrame::Unsubscribed(channel)
        }
    }
}

/// Pump one hub channel into the socket's outgoing queue. Group channels
/// check membership before every frame and stop once it is gone.
async fn forward(
    state: &AppState,
    user: UserId,
    channel: ChannelName,
    tx: mpsc::Sender<Message>,
) -> JoinHandle<()> {
    let mut rx = state.hub.subscribe(channel).await;
    let db = state.db.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if let ChannelName::Group(group) = channel {
                        let member = db.lock().await.is_group_member(group, user);
                        match member {
                            Ok(true) => {}
                            Ok(false) => {
                                debug!(user = %user, %channel, "Membership revoked, subscription closed");
                                send_json(&tx, &ServerFrame::Unsubscribed(channel));
                                break;
                            }
                            Err(e) => {
                                warn!(user = %user, %channel, error = %e, "Membership check failed");
                                break;
                            }
                        }
                    }
                    if !send_envelope(&tx, &envelope) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%channel, skipped, "Subscriber lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Queue a frame without waiting on the socket. A full queue drops the
/// frame; returns `false` once the socket is gone.
fn queue(tx: &mpsc::Sender<Message>, msg: Message) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!("Outbound queue full, frame dropped");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

fn send_envelope(tx: &mpsc::Sender<Message>, envelope: &Arc<Envelope>) -> bool {
    match serde_json::to_string(envelope.as_ref()) {
        Ok(json) => queue(tx, Message::Text(json)),
        Err(e) => {
            warn!(error = %e, "Failed to encode envelope");
            true
        }
    }
}

fn send_json(tx: &mpsc::Sender<Message>, frame: &ServerFrame) {
    if let Ok(json) = serde_json::to_string(frame) {
        queue(tx, Message::Text(json));
    }
}
