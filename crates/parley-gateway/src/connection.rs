use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, trace, warn};

use parley_types::UserId;
use parley_types::events::ClientFrame;

use crate::auth::AuthFailure;
use crate::dispatcher::Dispatcher;
use crate::registry::PushOutcome;

/// Serve one authenticated live connection until either side closes it.
///
/// Registration is held by a guard for the lifetime of this function, so
/// unregistration and disconnect handling run exactly once however the
/// connection ends.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();

    let (guard, handle, mut outbound_rx) = dispatcher.open_connection(user_id);
    info!("user {} connected (conn {})", user_id, guard.conn_id());

    let heartbeat_interval = dispatcher.config().heartbeat_interval;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };

                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event for user {}: {}", user_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout for user {} (missed {} pongs), dropping connection", user_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read control frames from client
    let presence = dispatcher.presence().clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let Some(frame) = ClientFrame::decode(&text) else {
                        debug!(
                            "user {} sent a malformed frame, dropping -- raw: {}",
                            user_id,
                            text.chars().take(200).collect::<String>()
                        );
                        continue;
                    };
                    trace!("user {} frame {:?}", user_id, frame);

                    if let Some(reply) = presence.handle(user_id, frame).await {
                        if handle.push(reply) == PushOutcome::Full {
                            warn!("Outbound queue full for user {}, dropping reply", user_id);
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish, then for the other to stop. A frame
    // still being handled must finish before the guard is released.
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    let conn_id = guard.conn_id();
    drop(guard);
    info!("user {} disconnected (conn {})", user_id, conn_id);
}

/// Close an unauthenticated connection with a policy-violation code and no
/// other frames.
pub async fn reject_connection(mut socket: WebSocket, reason: AuthFailure) {
    warn!("rejecting live connection: {}", reason);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.to_string().into(),
        })))
        .await;
}
