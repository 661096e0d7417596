use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bson::doc;
use bson::oid::ObjectId;
use serde::Deserialize;
use tracing::{error, warn};

use parley_auth::AuthenticatedUser;
use parley_error::{AppError, AppResult};
use parley_types::routing;
use parley_types::{
    BatchStatusEvent, BrokerEvent, Message, MessageRequest, MessageResponse, MessageStatus,
    MessageStatusResponse, MessageStatusUpdate, StatusEvent,
};

use crate::fanout;
use crate::state::ServiceContext;
use crate::store::DEFAULT_PAGE_LIMIT;

fn now_rfc3339() -> String {
    parley_types::rfc3339(parley_types::now())
}

// ============================================================================
// POST /messages
// ============================================================================

pub async fn send_message(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Json(req): Json<MessageRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    req.validate().map_err(AppError::Validation)?;

    let (receiver_id, group) = match (&req.receiver_id, &req.group_id) {
        (Some(receiver), None) => {
            let receiver = ObjectId::parse_str(receiver)
                .map_err(|_| AppError::validation("receiver_id is not a valid id"))?;
            if receiver == user.user_id {
                return Err(AppError::validation("cannot send a message to yourself"));
            }
            (Some(receiver), None)
        }
        (None, Some(group_id)) => {
            let group_id = ObjectId::parse_str(group_id)
                .map_err(|_| AppError::validation("group_id is not a valid id"))?;
            let group = ctx
                .store
                .find_group(group_id)
                .await?
                .ok_or_else(|| AppError::not_found("group not found"))?;
            if !group.is_member(user.user_id) {
                return Err(AppError::forbidden("not a member of this group"));
            }
            (None, Some(group))
        }
        _ => {
            return Err(AppError::validation(
                "exactly one of receiver_id or group_id must be set",
            ))
        }
    };

    let message = Message {
        id: ObjectId::new(),
        sender_id: user.user_id,
        receiver_id,
        group_id: group.as_ref().map(|g| g.id),
        content: req.content,
        media_url: req.media_url,
        created_at: parley_types::now(),
        updated_at: None,
        status: MessageStatus::Sent,
    };
    ctx.store.insert_message(&message).await?;
    parley_metrics::MESSAGES_SENT_TOTAL.inc();

    // The JWT already carries the username; the collection lookup wins when
    // the profile was renamed after the token was issued.
    let sender_username = ctx
        .store
        .username(user.user_id)
        .await?
        .unwrap_or(user.username);
    let response = message.to_response(sender_username);

    match group {
        None => {
            let receiver_hex = response.receiver_id.clone().unwrap_or_default();
            publish_or_fallback(
                &ctx,
                &routing::message_key(&receiver_hex),
                &BrokerEvent::Message(response.clone()),
            )
            .await;
        }
        Some(group) => {
            fanout::spawn_group_fanout(ctx.broker.clone(), group, response.clone(), user.user_id);
        }
    }

    Ok((StatusCode::CREATED, Json(response)))
}

/// Routed publish with the direct-queue fallback. Both failing still leaves
/// the message persisted; delivery resumes with the broker.
async fn publish_or_fallback(ctx: &ServiceContext, routing_key: &str, event: &BrokerEvent) {
    if let Err(e) = ctx
        .broker
        .publish_to_exchange(routing::MESSAGES_EXCHANGE, routing_key, event)
        .await
    {
        parley_metrics::PUBLISH_FALLBACKS_TOTAL.inc();
        warn!(error = %e, routing_key, "routed publish failed, trying direct queue");
        if let Err(e) = ctx.broker.publish(routing::MESSAGE_QUEUE, event).await {
            error!(
                error = %e,
                routing_key,
                "event not published; delivery deferred to broker recovery"
            );
        }
    }
}

// ============================================================================
// GET /messages/:target
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GetMessagesParams {
    pub limit: Option<i64>,
    pub before: Option<String>,
    /// Forces group resolution when a target id exists in both namespaces.
    pub group_id: Option<String>,
}

pub async fn get_messages(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Path(target): Path<String>,
    Query(params): Query<GetMessagesParams>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, 200);
    let before = params
        .before
        .as_deref()
        .map(parse_rfc3339)
        .transpose()?;

    let page = if let Some(group_id) = &params.group_id {
        let group_id = ObjectId::parse_str(group_id)
            .map_err(|_| AppError::validation("group_id is not a valid id"))?;
        ctx.store.group_page(group_id, limit, before).await?
    } else {
        let target = ObjectId::parse_str(&target)
            .map_err(|_| AppError::validation("target is not a valid id"))?;

        // Ids share one namespace: a group match wins, otherwise the target
        // is the other end of a 1:1 thread.
        if ctx.store.find_group(target).await?.is_some() {
            ctx.store.group_page(target, limit, before).await?
        } else {
            let page = ctx
                .store
                .conversation_page(user.user_id, target, limit, before)
                .await?;
            spawn_read_on_fetch(&ctx, target, user.user_id);
            page
        }
    };

    to_responses(&ctx, page).await.map(Json)
}

fn parse_rfc3339(raw: &str) -> AppResult<bson::DateTime> {
    let parsed = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|_| AppError::validation("before must be an RFC3339 timestamp"))?;
    Ok(bson::DateTime::from_chrono(parsed.with_timezone(&chrono::Utc)))
}

/// After the page went out, flip the unread tail of the thread to `read` and
/// tell the original sender with one batch event.
fn spawn_read_on_fetch(ctx: &ServiceContext, sender: ObjectId, receiver: ObjectId) {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        match ctx.store.mark_read(sender, receiver).await {
            Ok(0) => {}
            Ok(updated) => {
                parley_metrics::STATUS_TRANSITIONS_TOTAL
                    .with_label_values(&[MessageStatus::Read.as_str()])
                    .inc_by(updated);
                let event = BrokerEvent::Batch(BatchStatusEvent::read(
                    sender.to_hex(),
                    receiver.to_hex(),
                    now_rfc3339(),
                ));
                let key = routing::batch_status_key(&sender.to_hex(), &receiver.to_hex());
                if let Err(e) = ctx
                    .broker
                    .publish_to_exchange(routing::MESSAGES_EXCHANGE, &key, &event)
                    .await
                {
                    warn!(error = %e, updated, "batch read event not published");
                }
            }
            Err(e) => error!(error = %e, "read-on-fetch update failed"),
        }
    });
}

async fn to_responses(
    ctx: &ServiceContext,
    page: Vec<Message>,
) -> AppResult<Vec<MessageResponse>> {
    let mut sender_ids: Vec<ObjectId> = page.iter().map(|m| m.sender_id).collect();
    sender_ids.sort_unstable();
    sender_ids.dedup();
    let usernames = ctx.store.usernames_for(&sender_ids).await?;

    Ok(page
        .into_iter()
        .map(|m| {
            let username = usernames.get(&m.sender_id).cloned().unwrap_or_default();
            m.to_response(username)
        })
        .collect())
}

// ============================================================================
// PATCH /messages/:id/status
// ============================================================================

pub async fn update_status(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Path(id): Path<String>,
    Json(update): Json<MessageStatusUpdate>,
) -> AppResult<Json<MessageStatusResponse>> {
    let id = ObjectId::parse_str(&id).map_err(|_| AppError::validation("invalid message id"))?;
    let status: MessageStatus = update
        .status
        .parse()
        .map_err(|e: String| AppError::validation(e))?;

    let message = ctx
        .store
        .find_message(id)
        .await?
        .ok_or_else(|| AppError::not_found("message not found"))?;

    if message.receiver_id != Some(user.user_id) {
        return Err(AppError::forbidden(
            "only the receiver may update message status",
        ));
    }

    match ctx.store.advance_status(id, status).await? {
        Some(updated) => {
            parley_metrics::STATUS_TRANSITIONS_TOTAL
                .with_label_values(&[updated.status.as_str()])
                .inc();
            let event = BrokerEvent::Status(StatusEvent {
                message_id: updated.id.to_hex(),
                status: updated.status,
                updated_at: now_rfc3339(),
                sender_id: Some(updated.sender_id.to_hex()),
                receiver_id: updated.receiver_id.map(|r| r.to_hex()),
            });
            publish_or_fallback(&ctx, &routing::status_key(&updated.id.to_hex()), &event).await;
            Ok(Json(MessageStatusResponse {
                message_id: updated.id.to_hex(),
                status: updated.status,
            }))
        }
        // Downgrade or duplicate: report the status the message already has.
        None => Ok(Json(MessageStatusResponse {
            message_id: message.id.to_hex(),
            status: message.status,
        })),
    }
}

// ============================================================================
// GET /messages/search
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub contact_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn search_messages(
    State(ctx): State<ServiceContext>,
    user: AuthenticatedUser,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Vec<MessageResponse>>> {
    let query = params
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AppError::validation("q is required"))?;
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, 200);
    let caller = user.user_id;

    let scope = match &params.contact_id {
        Some(contact_id) => {
            let contact_id = ObjectId::parse_str(contact_id)
                .map_err(|_| AppError::validation("contact_id is not a valid id"))?;
            match ctx.store.find_group(contact_id).await? {
                Some(group) => {
                    if !group.is_member(caller) {
                        return Ok(Json(Vec::new()));
                    }
                    doc! { "group_id": contact_id }
                }
                None => doc! { "$or": [
                    { "sender_id": caller, "receiver_id": contact_id },
                    { "sender_id": contact_id, "receiver_id": caller },
                ] },
            }
        }
        None => {
            let group_ids = ctx.store.group_ids_for_member(caller).await?;
            doc! { "$or": [
                { "sender_id": caller },
                { "receiver_id": caller },
                { "group_id": { "$in": group_ids } },
            ] }
        }
    };

    let hits = ctx.store.search(scope, query, limit).await?;
    to_responses(&ctx, hits).await.map(Json)
}
