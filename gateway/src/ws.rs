//! The socket side of the gateway.
//!
//! One task per connection runs a select loop over inbound frames, the
//! outbound command channel and the keepalive clock. The gateway answers
//! text `"ping"` with `"pong"` for clients that cannot send control frames;
//! RFC-6455 control pings are answered by the WebSocket layer itself and
//! either kind of pong feeds the liveness clock.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_auth::Claims;
use parley_config::{PING_INTERVAL_SECS, PONG_DEADLINE_SECS};
use parley_error::AppError;
use parley_types::routing;
use parley_types::{BrokerEvent, ClientTyping, PresenceEvent, TypingEvent, UserStatus};

use crate::connections::SocketCommand;
use crate::state::GatewayContext;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// `GET /ws?token=<jwt>` — authenticate, then upgrade. Token problems fail
/// the handshake with 401 and leave no trace in the connection table.
pub async fn ws_handler(
    State(ctx): State<GatewayContext>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match params.token {
        Some(token) => token,
        None => return AppError::auth("missing token").into_response(),
    };

    let claims = match ctx.auth.verify_token(&token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "socket upgrade rejected");
            return AppError::auth("invalid or expired token").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, ctx, claims, token))
}

async fn handle_socket(socket: WebSocket, ctx: GatewayContext, claims: Claims, token: String) {
    parley_metrics::CONNECTIONS_TOTAL.inc();
    let user_id = claims.user_id.clone();
    let (tx, rx) = mpsc::unbounded_channel();
    let epoch = ctx.connections.register(&user_id, tx).await;
    info!(user_id, "connection registered");

    publish_presence(&ctx, &user_id, UserStatus::Online).await;

    run_session(socket, &ctx, &claims, &token, rx).await;

    // A superseded connection must not remove its successor's entry or
    // announce the user offline while the new socket is live.
    if ctx.connections.unregister(&user_id, epoch).await {
        publish_presence(&ctx, &user_id, UserStatus::Offline).await;
    }
    info!(user_id, "connection closed");
}

/// Presence publishes are best-effort: a broker hiccup never tears down a
/// healthy connection.
async fn publish_presence(ctx: &GatewayContext, user_id: &str, status: UserStatus) {
    let event = BrokerEvent::Presence(PresenceEvent {
        user_id: user_id.to_string(),
        status,
    });
    if let Err(e) = ctx
        .broker
        .publish_to_exchange(
            routing::MESSAGES_EXCHANGE,
            &routing::presence_key(user_id),
            &event,
        )
        .await
    {
        warn!(error = %e, user_id, status = %status, "presence event not published");
    }
}

async fn run_session(
    socket: WebSocket,
    ctx: &GatewayContext,
    claims: &Claims,
    token: &str,
    mut rx: mpsc::UnboundedReceiver<SocketCommand>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
    let pong_deadline = Duration::from_secs(PONG_DEADLINE_SECS);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_pong = Instant::now();
                        handle_text(&text, ctx, claims, token, &mut ws_tx).await;
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(user_id = %claims.user_id, "close frame from client");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(user_id = %claims.user_id, "binary frame ignored");
                    }
                    Some(Err(e)) => {
                        debug!(user_id = %claims.user_id, error = %e, "socket read error");
                        break;
                    }
                    None => break,
                }
            }
            cmd = rx.recv() => {
                match cmd {
                    Some(SocketCommand::Frame(json)) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(SocketCommand::Close) => {
                        let _ = ws_tx
                            .send(Message::Close(Some(CloseFrame {
                                code: 1000,
                                reason: "connection superseded".into(),
                            })))
                            .await;
                        break;
                    }
                    None => break,
                }
            }
            _ = ping_interval.tick() => {
                if last_pong.elapsed() > pong_deadline {
                    parley_metrics::CONNECTIONS_STALE_TOTAL.inc();
                    info!(user_id = %claims.user_id, "stale connection, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

type WsSink = SplitSink<WebSocket, Message>;

async fn handle_text(
    text: &str,
    ctx: &GatewayContext,
    claims: &Claims,
    token: &str,
    ws_tx: &mut WsSink,
) {
    if text == "ping" {
        let _ = ws_tx.send(Message::Text("pong".to_string())).await;
        return;
    }

    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(user_id = %claims.user_id, error = %e, "unparseable frame dropped");
            return;
        }
    };

    if value.get("type").and_then(Value::as_str) == Some("typing") {
        handle_typing(value, ctx, claims).await;
    } else {
        // Anything else is a message submission; the message service owns
        // validation, so the body goes upstream verbatim.
        forward_submission(text, ctx, claims, token).await;
    }
}

async fn handle_typing(value: Value, ctx: &GatewayContext, claims: &Claims) {
    let typing: ClientTyping = match serde_json::from_value(value) {
        Ok(typing) => typing,
        Err(e) => {
            debug!(user_id = %claims.user_id, error = %e, "malformed typing frame dropped");
            return;
        }
    };

    // sender_id and timestamp are stamped here; the client's word is never
    // taken for either.
    let event = BrokerEvent::Typing(TypingEvent::new(
        claims.user_id.clone(),
        typing.receiver_id.clone(),
        typing.is_typing,
        parley_types::rfc3339(parley_types::now()),
    ));

    if let Err(e) = ctx
        .broker
        .publish_to_exchange(
            routing::MESSAGES_EXCHANGE,
            &routing::typing_key(&typing.receiver_id),
            &event,
        )
        .await
    {
        warn!(error = %e, "typing event not published");
    }
}

/// POST the raw frame to the message service. The response travels back to
/// the sender via the broker, never as a socket echo.
async fn forward_submission(text: &str, ctx: &GatewayContext, claims: &Claims, token: &str) {
    let url = format!("{}/messages", ctx.config.message_service_url);
    let result = ctx
        .http
        .post(&url)
        .header(AUTHORIZATION, format!("Bearer {}", token))
        .header(CONTENT_TYPE, "application/json")
        .body(text.to_string())
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            debug!(user_id = %claims.user_id, "socket submission accepted");
        }
        Ok(response) => {
            warn!(
                user_id = %claims.user_id,
                status = response.status().as_u16(),
                "socket submission rejected upstream"
            );
        }
        Err(e) => {
            warn!(user_id = %claims.user_id, error = %e, "socket submission failed");
        }
    }
}
