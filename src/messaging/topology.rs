//! Declarative broker topology.
//!
//! A [`Topology`] is declared in full on every (re)connect. Declarations are
//! idempotent on the broker side, so re-declaring is always safe as long as
//! arguments do not change between declarations.

use crate::constants::{exchanges, queues, routing_keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Topic,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

/// Where a queue's rejected messages are re-published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterSpec {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub dead_letter: Option<DeadLetterSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingSpec {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    exchanges: Vec<ExchangeSpec>,
    queues: Vec<QueueSpec>,
    bindings: Vec<BindingSpec>,
}

pub fn dead_letter_exchange_name(queue: &str) -> String {
    format!("{queue}_dlx")
}

pub fn dead_letter_queue_name(queue: &str) -> String {
    format!("{queue}_dlq")
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Durable topic exchange
    pub fn exchange(mut self, name: &str) -> Self {
        self.add_exchange(ExchangeSpec {
            name: name.to_string(),
            kind: ExchangeKind::Topic,
            durable: true,
        });
        self
    }

    /// Durable queue whose rejected messages are dropped
    pub fn queue(mut self, name: &str) -> Self {
        self.add_queue(QueueSpec {
            name: name.to_string(),
            durable: true,
            dead_letter: None,
        });
        self
    }

    /// Durable queue whose rejected messages go to `{queue}_dlq` via a direct
    /// `{queue}_dlx` exchange
    pub fn queue_with_dead_letter(mut self, name: &str) -> Self {
        let dlx = dead_letter_exchange_name(name);
        let dlq = dead_letter_queue_name(name);

        self.add_exchange(ExchangeSpec {
            name: dlx.clone(),
            kind: ExchangeKind::Direct,
            durable: true,
        });
        self.add_queue(QueueSpec {
            name: dlq.clone(),
            durable: true,
            dead_letter: None,
        });
        self.add_binding(BindingSpec {
            queue: dlq,
            exchange: dlx.clone(),
            routing_key: name.to_string(),
        });
        self.add_queue(QueueSpec {
            name: name.to_string(),
            durable: true,
            dead_letter: Some(DeadLetterSpec {
                exchange: dlx,
                routing_key: name.to_string(),
            }),
        });
        self
    }

    pub fn bind(mut self, queue: &str, exchange: &str, routing_key: &str) -> Self {
        self.add_binding(BindingSpec {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        self
    }

    /// First declaration of a name wins
    pub fn add_exchange(&mut self, spec: ExchangeSpec) {
        if !self.has_exchange(&spec.name) {
            self.exchanges.push(spec);
        }
    }

    /// First declaration of a name wins, so a dead-lettered queue keeps its arguments
    pub fn add_queue(&mut self, spec: QueueSpec) {
        if !self.has_queue(&spec.name) {
            self.queues.push(spec);
        }
    }

    pub fn add_binding(&mut self, spec: BindingSpec) {
        if !self.bindings.contains(&spec) {
            self.bindings.push(spec);
        }
    }

    pub fn merge(&mut self, other: &Topology) {
        for exchange in &other.exchanges {
            self.add_exchange(exchange.clone());
        }
        for queue in &other.queues {
            self.add_queue(queue.clone());
        }
        for binding in &other.bindings {
            self.add_binding(binding.clone());
        }
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.iter().any(|e| e.name == name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.iter().any(|q| q.name == name)
    }

    pub fn queue_spec(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    pub fn exchanges(&self) -> &[ExchangeSpec] {
        &self.exchanges
    }

    pub fn queues(&self) -> &[QueueSpec] {
        &self.queues
    }

    pub fn bindings(&self) -> &[BindingSpec] {
        &self.bindings
    }

    /// Every exchange, queue and binding the recruitment services share.
    ///
    /// Queues that record state transitions are dead-lettered. Notification and
    /// reference-data queues drop rejected messages.
    pub fn recruitment_default() -> Self {
        Topology::new()
            .exchange(exchanges::AUTH_EVENTS)
            .exchange(exchanges::USER_EVENTS)
            .exchange(exchanges::NOTIFICATION_EVENTS)
            .exchange(exchanges::TEST_EVENTS)
            .exchange(exchanges::ASSIGNMENT_EVENTS)
            .queue_with_dead_letter(queues::CANDIDATE_APPROVED)
            .queue_with_dead_letter(queues::CANDIDATE_REJECTED)
            .queue_with_dead_letter(queues::ASSIGNMENT_COMPLETED)
            .queue(queues::TEST_LIST_REQUEST)
            .queue(queues::TEST_LIST_RESPONSE)
            .queue(queues::NOTIFICATION_EMAIL)
            .queue(queues::TEST_ASSIGNMENT_NOTIFICATION)
            .bind(
                queues::CANDIDATE_APPROVED,
                exchanges::USER_EVENTS,
                routing_keys::CANDIDATE_APPROVED,
            )
            .bind(
                queues::CANDIDATE_REJECTED,
                exchanges::USER_EVENTS,
                routing_keys::CANDIDATE_REJECTED,
            )
            .bind(
                queues::ASSIGNMENT_COMPLETED,
                exchanges::ASSIGNMENT_EVENTS,
                routing_keys::ASSIGNMENT_COMPLETED,
            )
            .bind(
                queues::TEST_LIST_REQUEST,
                exchanges::TEST_EVENTS,
                routing_keys::TEST_LIST_REQUEST,
            )
            .bind(
                queues::TEST_LIST_RESPONSE,
                exchanges::TEST_EVENTS,
                routing_keys::TEST_LIST_RESPONSE,
            )
            .bind(
                queues::NOTIFICATION_EMAIL,
                exchanges::NOTIFICATION_EVENTS,
                routing_keys::NOTIFICATION_EMAIL_ALL,
            )
            .bind(
                queues::TEST_ASSIGNMENT_NOTIFICATION,
                exchanges::NOTIFICATION_EVENTS,
                routing_keys::NOTIFICATION_TEST_ASSIGNMENT,
            )
    }
}
