//! Group fan-out.
//!
//! A group message is persisted once, then multiplied into one broker event
//! per member after the HTTP response is on the wire. Per-copy failures are
//! logged, never surfaced to the sender.

use bson::oid::ObjectId;
use tracing::{debug, error, warn};

use parley_broker::Broker;
use parley_types::routing;
use parley_types::{BrokerEvent, Group, MessageResponse};

/// Every member except the sender gets a copy.
pub fn fanout_targets(member_ids: &[ObjectId], sender_id: ObjectId) -> Vec<ObjectId> {
    member_ids
        .iter()
        .copied()
        .filter(|m| *m != sender_id)
        .collect()
}

pub fn spawn_group_fanout(
    broker: Broker,
    group: Group,
    response: MessageResponse,
    sender_id: ObjectId,
) {
    tokio::spawn(async move {
        let targets = fanout_targets(&group.member_ids, sender_id);
        let total = targets.len();
        let mut published = 0usize;

        for member in targets {
            let member_hex = member.to_hex();
            let mut copy = response.clone();
            copy.receiver_id = Some(member_hex.clone());
            let event = BrokerEvent::Message(copy);
            let key = routing::message_key(&member_hex);

            match broker
                .publish_to_exchange(routing::MESSAGES_EXCHANGE, &key, &event)
                .await
            {
                Ok(()) => {
                    parley_metrics::FANOUT_COPIES_TOTAL.inc();
                    published += 1;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        member = %member_hex,
                        "fan-out publish failed, trying direct queue"
                    );
                    match broker.publish(routing::MESSAGE_QUEUE, &event).await {
                        Ok(()) => published += 1,
                        Err(e) => {
                            error!(
                                error = %e,
                                member = %member_hex,
                                message_id = %response.id,
                                "fan-out copy dropped; delivery deferred to broker recovery"
                            );
                        }
                    }
                }
            }
        }

        debug!(
            group_id = %group.id,
            message_id = %response.id,
            total,
            published,
            "group fan-out complete"
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_is_excluded_once() {
        let sender = ObjectId::new();
        let x = ObjectId::new();
        let y = ObjectId::new();
        let targets = fanout_targets(&[sender, x, y], sender);
        assert_eq!(targets, vec![x, y]);
    }

    #[test]
    fn every_other_member_gets_exactly_one_copy() {
        let sender = ObjectId::new();
        let members: Vec<ObjectId> = (0..5).map(|_| ObjectId::new()).collect();
        let mut all = members.clone();
        all.push(sender);

        let targets = fanout_targets(&all, sender);
        assert_eq!(targets.len(), members.len());
        for member in members {
            assert_eq!(targets.iter().filter(|t| **t == member).count(), 1);
        }
    }

    #[test]
    fn sender_not_in_group_fans_out_to_all() {
        // Defensive: fan-out shape holds even if membership changed between
        // the check and the spawn.
        let members: Vec<ObjectId> = (0..3).map(|_| ObjectId::new()).collect();
        let targets = fanout_targets(&members, ObjectId::new());
        assert_eq!(targets.len(), 3);
    }
}
