//! The auto-deliver consumer.
//!
//! The message service consumes its own `messages` queue (bound
//! `message.#`): seeing a persisted event come back from the broker is the
//! signal that downstream routing accepted it, so the message advances
//! sent -> delivered and a per-message status event goes out to the sender.

use std::sync::Arc;

use bson::oid::ObjectId;
use futures_util::FutureExt;
use tracing::warn;

use parley_broker::{Broker, ConsumeError, Handler};
use parley_error::AppResult;
use parley_types::routing;
use parley_types::{BrokerEvent, MessageStatus, StatusEvent};

use crate::state::ServiceContext;
use crate::store::MessageStore;

pub async fn start(ctx: &ServiceContext) -> AppResult<()> {
    let store = ctx.store.clone();
    let broker = ctx.broker.clone();

    let handler: Handler = Arc::new(move |payload: Vec<u8>| {
        let store = store.clone();
        let broker = broker.clone();
        async move { handle_event(store, broker, payload).await }.boxed()
    });

    ctx.broker
        .consume(routing::MESSAGE_QUEUE, "message-service", handler)
        .await
}

async fn handle_event(
    store: Arc<MessageStore>,
    broker: Broker,
    payload: Vec<u8>,
) -> Result<(), ConsumeError> {
    let event: BrokerEvent = serde_json::from_slice(&payload)
        .map_err(|e| ConsumeError::Discard(format!("undecodable event: {}", e)))?;

    let frame = match event {
        BrokerEvent::Message(frame) => frame,
        // The queue is bound `message.#` only; anything else is noise.
        _ => return Ok(()),
    };

    let id = ObjectId::parse_str(&frame.id)
        .map_err(|e| ConsumeError::Discard(format!("malformed message id: {}", e)))?;

    match store.advance_status(id, MessageStatus::Delivered).await {
        Ok(Some(updated)) => {
            parley_metrics::STATUS_TRANSITIONS_TOTAL
                .with_label_values(&[updated.status.as_str()])
                .inc();
            let event = BrokerEvent::Status(StatusEvent {
                message_id: updated.id.to_hex(),
                status: updated.status,
                updated_at: parley_types::rfc3339(parley_types::now()),
                sender_id: Some(updated.sender_id.to_hex()),
                receiver_id: updated
                    .receiver_id
                    .map(|r| r.to_hex())
                    .or(frame.receiver_id),
            });
            let key = routing::status_key(&updated.id.to_hex());
            if let Err(e) = broker
                .publish_to_exchange(routing::MESSAGES_EXCHANGE, &key, &event)
                .await
            {
                // Best-effort: the transition is durable, only the tick to
                // the sender's socket is lost.
                warn!(error = %e, message_id = %updated.id, "delivered event not published");
            }
            Ok(())
        }
        // Redelivery, a fan-out sibling, or the message is already read.
        Ok(None) => Ok(()),
        Err(e) => Err(ConsumeError::Requeue(format!(
            "status update failed: {}",
            e
        ))),
    }
}
