// ============================================================================
// Parley Broker - AMQP topic-exchange client
// ============================================================================
//
// Thin client over lapin with one job beyond publish/consume: it remembers
// every exchange, queue, binding and consumer declared through it, and a
// supervisor task re-dials with a fixed 5-second backoff when the connection
// drops, restoring the full topology and restarting consumers before
// publishes resume.
//
// ============================================================================

mod client;
mod topology;

pub use client::{Broker, ConsumeError, Handler};
pub use lapin::ExchangeKind;
