//! The broker-to-socket bridge.
//!
//! One durable queue per gateway instance, bound to every event family. The
//! handler strips the `event` tag, picks the local delivery target by event
//! kind and writes the inner frame to that user's socket. A user served by
//! another gateway simply has no local entry; the delivery is acked and
//! dropped, because some queue on the owning gateway also matched it.

use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, trace};

use parley_broker::{ConsumeError, Handler};
use parley_error::AppResult;
use parley_types::routing;
use parley_types::BrokerEvent;

use crate::connections::ConnectionTable;
use crate::state::GatewayContext;

/// Declare the gateway's queue and bindings, then start consuming.
pub async fn start(ctx: &GatewayContext) -> AppResult<()> {
    let queue = ctx.config.gateway_queue.clone();

    ctx.broker
        .declare_exchange(routing::MESSAGES_EXCHANGE, parley_broker::ExchangeKind::Topic)
        .await?;
    ctx.broker.declare_queue(&queue).await?;
    for pattern in [
        routing::MESSAGE_PATTERN,
        routing::STATUS_PATTERN,
        routing::TYPING_PATTERN,
    ] {
        ctx.broker
            .bind_queue(&queue, pattern, routing::MESSAGES_EXCHANGE)
            .await?;
    }

    let connections = ctx.connections.clone();
    let handler: Handler = Arc::new(move |payload: Vec<u8>| {
        let connections = connections.clone();
        async move { dispatch(&connections, &payload).await }.boxed()
    });

    ctx.broker.consume(&queue, "gateway", handler).await
}

async fn dispatch(connections: &ConnectionTable, payload: &[u8]) -> Result<(), ConsumeError> {
    let event: BrokerEvent = serde_json::from_slice(payload)
        .map_err(|e| ConsumeError::Discard(format!("undecodable event: {}", e)))?;

    let target = match delivery_target(&event) {
        Some(target) => target.to_string(),
        None => {
            // Presence, or a status event from a producer that did not say
            // who to tell. Nothing to route; ack and move on.
            trace!("event without a local delivery target acked");
            return Ok(());
        }
    };

    let frame = socket_frame(&event)
        .map_err(|e| ConsumeError::Discard(format!("unserializable frame: {}", e)))?;

    if connections.send_frame(&target, frame).await {
        parley_metrics::FRAMES_DELIVERED_TOTAL
            .with_label_values(&[event_kind(&event)])
            .inc();
    } else {
        parley_metrics::EVENTS_UNROUTED_TOTAL.inc();
        debug!(target, "no local connection for event");
    }
    Ok(())
}

fn event_kind(event: &BrokerEvent) -> &'static str {
    match event {
        BrokerEvent::Message(_) => "message",
        BrokerEvent::Status(_) => "status",
        BrokerEvent::Batch(_) => "batch",
        BrokerEvent::Typing(_) => "typing",
        BrokerEvent::Presence(_) => "presence",
    }
}

/// Which local user gets this event.
///
/// Messages and typing indicators go to the receiver; per-message and batch
/// status updates go back to the original sender, whose UI owns the ticks.
/// Presence has no single target and is dropped here.
pub fn delivery_target(event: &BrokerEvent) -> Option<&str> {
    match event {
        BrokerEvent::Message(m) => m.receiver_id.as_deref(),
        BrokerEvent::Typing(t) => Some(&t.receiver_id),
        BrokerEvent::Status(s) => s.sender_id.as_deref(),
        BrokerEvent::Batch(b) => Some(&b.sender_id),
        BrokerEvent::Presence(_) => None,
    }
}

/// Serialize the payload the way clients expect it: the inner object, with
/// no broker `event` tag.
pub fn socket_frame(event: &BrokerEvent) -> serde_json::Result<String> {
    match event {
        BrokerEvent::Message(m) => serde_json::to_string(m),
        BrokerEvent::Status(s) => serde_json::to_string(s),
        BrokerEvent::Batch(b) => serde_json::to_string(b),
        BrokerEvent::Typing(t) => serde_json::to_string(t),
        BrokerEvent::Presence(p) => serde_json::to_string(p),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::{
        BatchStatusEvent, MessageResponse, MessageStatus, PresenceEvent, StatusEvent, TypingEvent,
        UserStatus,
    };

    fn message_event() -> BrokerEvent {
        BrokerEvent::Message(MessageResponse {
            id: "m1".to_string(),
            sender_id: "alice".to_string(),
            sender_username: "alice".to_string(),
            receiver_id: Some("bob".to_string()),
            group_id: None,
            content: "hi".to_string(),
            media_url: None,
            created_at: "2023-08-01T15:04:05Z".to_string(),
            status: MessageStatus::Sent,
        })
    }

    #[test]
    fn messages_route_to_the_receiver() {
        assert_eq!(delivery_target(&message_event()), Some("bob"));
    }

    #[test]
    fn status_routes_back_to_the_sender() {
        let event = BrokerEvent::Status(StatusEvent {
            message_id: "m1".to_string(),
            status: MessageStatus::Delivered,
            updated_at: "2023-08-01T15:04:05Z".to_string(),
            sender_id: Some("alice".to_string()),
            receiver_id: Some("bob".to_string()),
        });
        assert_eq!(delivery_target(&event), Some("alice"));

        let event = BrokerEvent::Batch(BatchStatusEvent::read(
            "alice".to_string(),
            "bob".to_string(),
            "2023-08-01T15:04:05Z".to_string(),
        ));
        assert_eq!(delivery_target(&event), Some("alice"));
    }

    #[test]
    fn typing_routes_to_the_receiver() {
        let event = BrokerEvent::Typing(TypingEvent::new(
            "bob".to_string(),
            "alice".to_string(),
            true,
            "2023-08-01T15:04:05Z".to_string(),
        ));
        assert_eq!(delivery_target(&event), Some("alice"));
    }

    #[test]
    fn presence_and_anonymous_status_have_no_target() {
        let event = BrokerEvent::Presence(PresenceEvent {
            user_id: "u1".to_string(),
            status: UserStatus::Online,
        });
        assert_eq!(delivery_target(&event), None);

        // Tolerated legacy shape: no sender to tell.
        let event = BrokerEvent::Status(StatusEvent {
            message_id: "m1".to_string(),
            status: MessageStatus::Delivered,
            updated_at: "2023-08-01T15:04:05Z".to_string(),
            sender_id: None,
            receiver_id: None,
        });
        assert_eq!(delivery_target(&event), None);
    }

    #[test]
    fn socket_frames_carry_no_event_tag() {
        let frame = socket_frame(&message_event()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert!(value.get("event").is_none());
        assert_eq!(value["id"], "m1");

        let typing = BrokerEvent::Typing(TypingEvent::new(
            "a".to_string(),
            "b".to_string(),
            false,
            "2023-08-01T15:04:05Z".to_string(),
        ));
        let value: serde_json::Value =
            serde_json::from_str(&socket_frame(&typing).unwrap()).unwrap();
        assert!(value.get("event").is_none());
        assert_eq!(value["type"], "typing");
        assert_eq!(value["is_typing"], false);
    }

    #[tokio::test]
    async fn dispatch_acks_when_user_is_elsewhere() {
        let connections = ConnectionTable::new();
        let payload = serde_json::to_vec(&message_event()).unwrap();
        // No local connection for "bob": still an ack, not an error.
        assert!(dispatch(&connections, &payload).await.is_ok());
    }

    #[tokio::test]
    async fn dispatch_discards_garbage() {
        let connections = ConnectionTable::new();
        let result = dispatch(&connections, b"not json").await;
        assert!(matches!(result, Err(ConsumeError::Discard(_))));
    }
}
