use lapin::ExchangeKind;

/// Everything declared through this client, so a reconnect can restore the
/// broker to the state the services expect before traffic resumes.
#[derive(Clone, Default)]
pub(crate) struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<BindingSpec>,
}

#[derive(Clone)]
pub(crate) struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
}

#[derive(Clone)]
pub(crate) struct QueueSpec {
    pub name: String,
    pub dead_letter_exchange: Option<String>,
}

#[derive(Clone, PartialEq)]
pub(crate) struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

impl Topology {
    pub fn record_exchange(&mut self, name: &str, kind: ExchangeKind) {
        if !self.exchanges.iter().any(|e| e.name == name) {
            self.exchanges.push(ExchangeSpec {
                name: name.to_string(),
                kind,
            });
        }
    }

    pub fn record_queue(&mut self, name: &str, dead_letter_exchange: Option<&str>) {
        if !self.queues.iter().any(|q| q.name == name) {
            self.queues.push(QueueSpec {
                name: name.to_string(),
                dead_letter_exchange: dead_letter_exchange.map(str::to_string),
            });
        }
    }

    pub fn record_binding(&mut self, queue: &str, routing_key: &str, exchange: &str) {
        let binding = BindingSpec {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        };
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declarations_are_deduplicated() {
        let mut topology = Topology::default();
        topology.record_exchange("messages", ExchangeKind::Topic);
        topology.record_exchange("messages", ExchangeKind::Topic);
        topology.record_queue("messages", Some("dead-letters"));
        topology.record_queue("messages", Some("dead-letters"));
        topology.record_binding("messages", "message.#", "messages");
        topology.record_binding("messages", "message.#", "messages");

        assert_eq!(topology.exchanges.len(), 1);
        assert_eq!(topology.queues.len(), 1);
        assert_eq!(topology.bindings.len(), 1);
    }

    #[test]
    fn distinct_bindings_accumulate() {
        let mut topology = Topology::default();
        for pattern in ["message.#", "status.#", "typing.#"] {
            topology.record_binding("gateway_events", pattern, "messages");
        }
        assert_eq!(topology.bindings.len(), 3);
        assert!(topology
            .queues
            .iter()
            .all(|q| q.dead_letter_exchange.is_none()));
    }
}
