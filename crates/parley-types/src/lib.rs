// ============================================================================
// Parley Types - Domain documents, API DTOs and broker event contracts
// ============================================================================
//
// Shared by all three services. Documents mirror the MongoDB collections;
// DTOs mirror the public HTTP surface; `event` is the tagged broker payload
// union consumed by the gateways.
//
// ============================================================================

pub mod contact;
pub mod event;
pub mod group;
pub mod message;
pub mod routing;
pub mod user;

pub use contact::Contact;
pub use event::{
    BatchStatusEvent, BrokerEvent, ClientTyping, PresenceEvent, StatusEvent, TypingEvent,
};
pub use group::{Group, GroupRequest, GroupResponse};
pub use message::{
    Message, MessageRequest, MessageResponse, MessageStatus, MessageStatusResponse,
    MessageStatusUpdate,
};
pub use user::{
    ContactRequest, LoginResponse, ProfileUpdate, StatusResponse, StatusUpdate, User,
    UserLogin, UserRegistration, UserResponse, UserStatus,
};

/// Render a BSON timestamp the way the API does everywhere: RFC3339 UTC.
pub fn rfc3339(ts: bson::DateTime) -> String {
    ts.to_chrono().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Current time as both representations (documents store BSON, wire is RFC3339).
pub fn now() -> bson::DateTime {
    bson::DateTime::from_chrono(chrono::Utc::now())
}
