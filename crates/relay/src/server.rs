// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket server implementation.
//!
//! Each connection answers request frames in order and forwards published
//! messages for the channels it has subscribed to as `event` frames.

use std::collections::HashMap;
use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use bcn_core::protocol::{ClientFrame, ServerFrame};
use bcn_core::ChannelId;

use crate::state::{PublishRejection, RelayState, Upsert};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Subscriptions held by one connection, by subscription id.
type Subscriptions = HashMap<u64, ChannelId>;

/// Run the WebSocket server on the given address.
pub async fn run(addr: SocketAddr, state: RelayState) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Listening on: {}", addr);
    serve(listener, state).await
}

/// Accept connections on an already bound listener until it fails.
pub async fn serve(listener: TcpListener, state: RelayState) -> Result<(), BoxError> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer_addr, state).await {
                error!("Connection error from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Handle a single WebSocket connection.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: RelayState,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!("New WebSocket connection from: {}", peer_addr);

    let (mut ws_sink, mut ws_stream) = ws_stream.split();
    let mut published_rx = state.subscribe();
    let mut subscriptions = Subscriptions::new();

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_frame(text.as_str(), &state, &mut subscriptions);
                        ws_sink.send(Message::text(reply.to_json()?)).await?;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", peer_addr);
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sink.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", peer_addr, e);
                        break;
                    }
                    None => {
                        info!("Client {} stream ended", peer_addr);
                        break;
                    }
                }
            }

            published = published_rx.recv() => {
                match published {
                    Ok(published) => {
                        for (subscription_id, channel_id) in &subscriptions {
                            if *channel_id != published.channel_id {
                                continue;
                            }
                            let event = ServerFrame::Event {
                                subscription_id: *subscription_id,
                                channel_id: channel_id.clone(),
                                envelope: published.envelope.clone(),
                            };
                            if let Err(e) = ws_sink.send(Message::text(event.to_json()?)).await {
                                warn!("Failed to send event to {}: {}", peer_addr, e);
                                return Ok(());
                            }
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} messages", peer_addr, n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Connection closed: {}", peer_addr);
    Ok(())
}

/// Process one client frame and build its reply.
///
/// Frames that cannot be parsed are rejected with request id 0, since the id
/// is unknown.
pub(crate) fn handle_client_frame(
    text: &str,
    state: &RelayState,
    subscriptions: &mut Subscriptions,
) -> ServerFrame {
    let frame = match ClientFrame::from_json(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Unparseable frame: {}", e);
            return ServerFrame::rejected(0, format!("malformed frame: {e}"));
        }
    };
    debug!("Received frame: {:?}", frame);

    match frame {
        ClientFrame::Publish { request_id, channel_id, envelope } => {
            match state.publish(channel_id, envelope) {
                Ok(()) => ServerFrame::Ack { request_id },
                Err(PublishRejection::TooLarge { size, max }) => ServerFrame::rejected(
                    request_id,
                    format!("message of {size} bytes exceeds channel limit of {max}"),
                ),
            }
        }

        ClientFrame::Subscribe { request_id, channel_id } => {
            let channel = state.channel(&channel_id);
            let subscription_id = state.next_subscription_id();
            debug!(subscription_id, channel = %channel.id, "subscribed");
            subscriptions.insert(subscription_id, channel.id);
            ServerFrame::Subscribed { request_id, subscription_id }
        }

        ClientFrame::Unsubscribe { request_id, subscription_id } => {
            match subscriptions.remove(&subscription_id) {
                Some(_) => ServerFrame::Ack { request_id },
                None => ServerFrame::rejected(
                    request_id,
                    format!("unknown subscription {subscription_id}"),
                ),
            }
        }

        ClientFrame::Discover { request_id, kind } => {
            ServerFrame::Channels { request_id, channels: state.channels_of(kind) }
        }

        ClientFrame::Upsert { request_id, record, mode } => {
            let client_id = record.client_id.clone();
            match state.upsert(record, mode) {
                Ok(Upsert::Stored(remote_id)) => {
                    debug!(%client_id, %remote_id, "record stored");
                    ServerFrame::Upserted { request_id, remote_id }
                }
                Ok(Upsert::Conflict(remote_id)) => {
                    debug!(%client_id, %remote_id, "record conflict");
                    ServerFrame::Conflict { request_id, remote_id }
                }
                Err(e) => {
                    error!(%client_id, "upsert failed: {}", e);
                    ServerFrame::rejected(request_id, e.to_string())
                }
            }
        }

        ClientFrame::Fetch { request_id, client_id } => match state.fetch(&client_id) {
            Ok(record) => ServerFrame::Record { request_id, record },
            Err(e) => ServerFrame::rejected(request_id, e.to_string()),
        },

        ClientFrame::Ping { request_id } => ServerFrame::Pong { request_id },
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
