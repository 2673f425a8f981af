//! WebSocket connection lifecycle for live notification delivery.
//!
//! Per connection the states are:
//!
//! ```text
//! Connecting → Authenticating → Rejected (terminal)
//!                             ↘ Registered → Streaming → Unregistered (terminal)
//! ```
//!
//! The first inbound frame must be a subscription request carrying a
//! bearer credential. It is validated once against the authorization
//! oracle; failure closes the connection without ever registering a
//! mailbox. On success the connection registers its mailbox and runs two
//! cooperating tasks: a write task that serializes each notification as it
//! arrives from the mailbox, and a read task whose only job is detecting
//! the transport-level disconnect. Either task ending aborts the other and
//! unregisters the mailbox, so a disconnect promptly frees the slot.

use crate::auth::Authorizer;
use crate::registry::NotificationRegistry;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use wavecart_core::event::OutcomeNotification;

/// Default mailbox depth per connection.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 16;

/// Shared state handed to every connection.
pub struct ConnectionState {
    /// The live-connection registry.
    pub registry: Arc<NotificationRegistry>,
    /// The authorization oracle.
    pub authorizer: Arc<dyn Authorizer>,
    /// Mailbox depth per connection; a full mailbox drops deliveries.
    pub mailbox_capacity: usize,
}

/// The one inbound message a client sends: its credential.
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    /// Short-lived bearer credential issued by the authorization service.
    pub jwt: String,
}

/// Outbound frame for a delivered notification.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct NotificationFrame {
    /// Whether the underlying operation succeeded (informational notices
    /// report `true`).
    pub success: bool,
    /// Human-readable description for the client.
    pub message: String,
}

impl NotificationFrame {
    /// Render a notification for the client.
    #[must_use]
    pub fn from_notification(notification: &OutcomeNotification) -> Self {
        let success = match notification {
            OutcomeNotification::Deposit { success, .. }
            | OutcomeNotification::Buy { success, .. } => *success,
            OutcomeNotification::AlbumDeleted { .. } => true,
        };
        Self {
            success,
            message: notification_message(notification),
        }
    }
}

/// Outbound frame for a pre-registration failure.
#[derive(Debug, Serialize)]
struct ErrorFrame {
    code: u16,
    error: String,
}

/// Client-facing text for each notification kind.
#[must_use]
pub fn notification_message(notification: &OutcomeNotification) -> String {
    match notification {
        OutcomeNotification::Deposit { success: true, .. } => {
            "Money has been added to your account successfully".to_string()
        }
        OutcomeNotification::Deposit { success: false, .. } => {
            "Money has not been added to your account".to_string()
        }
        OutcomeNotification::Buy {
            order_id,
            success: true,
            ..
        } => format!("Order {order_id} has been paid successfully"),
        OutcomeNotification::Buy {
            order_id,
            success: false,
            ..
        } => format!("Order {order_id} has not been paid"),
        OutcomeNotification::AlbumDeleted { album_name, .. } => {
            format!("Album {album_name} that you owned has been deleted")
        }
    }
}

/// Axum handler: upgrade and run the connection lifecycle.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn handle(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ConnectionState>>,
) -> Response {
    debug!("streaming connection requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ConnectionState>) {
    // Connecting → Authenticating: the first frame is the subscription
    // request.
    let Some(Ok(Message::Text(text))) = socket.recv().await else {
        info!("connection closed before subscribing");
        return;
    };

    let request: SubscribeRequest = match serde_json::from_str(&text) {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "invalid subscription request");
            send_error(&mut socket, 400, "invalid subscription data").await;
            return;
        }
    };

    // Authenticating → Rejected | Registered.
    let claims = match state.authorizer.authorize(&request.jwt).await {
        Ok(claims) => claims,
        Err(err) => {
            warn!(error = %err, "subscription rejected");
            send_error(&mut socket, 401, "unauthorized").await;
            return;
        }
    };

    let (mailbox, mut inbox) = mpsc::channel(state.mailbox_capacity);
    state.registry.register(claims.user_id, mailbox.clone());
    info!(
        user_id = claims.user_id,
        connected = state.registry.connected(),
        "streaming connection registered"
    );

    let (mut sender, mut receiver) = socket.split();

    // Write task: serialize each notification as it arrives.
    let mut send_task = tokio::spawn(async move {
        while let Some(notification) = inbox.recv().await {
            let frame = NotificationFrame::from_notification(&notification);
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(err) => {
                    error!(error = %err, "failed to serialize notification frame");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                // Client disconnected mid-write.
                break;
            }
        }
        debug!("notification write task terminated");
    });

    // Read task: nothing arrives after the subscription request, so this
    // exists purely to detect the disconnect.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
        debug!("client disconnected");
    });

    // Streaming → Unregistered: either task ending means the connection is
    // done.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.registry.unregister_if_current(claims.user_id, &mailbox);
    info!(user_id = claims.user_id, "streaming connection closed");
}

async fn send_error(socket: &mut WebSocket, code: u16, error: &str) {
    let frame = ErrorFrame {
        code,
        error: error.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&frame) {
        // The connection is being torn down; a failed write changes nothing.
        let _ = socket.send(Message::Text(json)).await;
    }
}
