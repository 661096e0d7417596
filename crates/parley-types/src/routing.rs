//! Names and routing-key conventions of the broker fabric.
//!
//! One durable topic exchange carries everything; the key prefix selects the
//! event family and the suffix selects the routing target. Dead-lettered
//! deliveries fan out to the `dead_letters` queue.

/// The durable topic exchange all events are published to.
pub const MESSAGES_EXCHANGE: &str = "messages";

/// Fan-out exchange receiving rejected deliveries.
pub const DEAD_LETTER_EXCHANGE: &str = "dead-letters";

/// Queue bound `#` on the dead-letter exchange.
pub const DEAD_LETTER_QUEUE: &str = "dead_letters";

/// The message service's inbound queue (drives sent -> delivered).
pub const MESSAGE_QUEUE: &str = "messages";

pub const MATCH_ALL: &str = "#";
pub const MESSAGE_PATTERN: &str = "message.#";
pub const STATUS_PATTERN: &str = "status.#";
pub const TYPING_PATTERN: &str = "typing.#";

/// `message.<user_id>` — new message bound for a recipient.
pub fn message_key(user_id: &str) -> String {
    format!("message.{}", user_id)
}

/// `status.<message_id>` — per-message status transition.
pub fn status_key(message_id: &str) -> String {
    format!("status.{}", message_id)
}

/// `status.batch.<sender>.<receiver>` — read-on-fetch batch.
pub fn batch_status_key(sender_id: &str, receiver_id: &str) -> String {
    format!("status.batch.{}.{}", sender_id, receiver_id)
}

/// `status.user.<user_id>` — presence change.
pub fn presence_key(user_id: &str) -> String {
    format!("status.user.{}", user_id)
}

/// `typing.<user_id>` — typing indicator bound for a recipient.
pub fn typing_key(user_id: &str) -> String {
    format!("typing.{}", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_the_documented_patterns() {
        assert_eq!(message_key("u1"), "message.u1");
        assert_eq!(status_key("m1"), "status.m1");
        assert_eq!(batch_status_key("a", "b"), "status.batch.a.b");
        assert_eq!(presence_key("u1"), "status.user.u1");
        assert_eq!(typing_key("u1"), "typing.u1");
    }

    #[test]
    fn status_family_shares_one_wildcard() {
        // Both per-message and presence keys must match the gateway's
        // `status.#` binding; a topic `#` matches one-or-more dotted words.
        for key in [status_key("m1"), batch_status_key("a", "b"), presence_key("u1")] {
            assert!(key.starts_with("status."));
        }
    }
}
