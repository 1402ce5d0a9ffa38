//! Event envelopes and the bus capability traits.
//!
//! The vault does not speak to a broker directly. It publishes through an
//! [`EventSink`] and consumes through an [`EventSource`], both injected at
//! startup; the bus behind them promises at-least-once delivery. A small
//! in-process [`MemoryBus`] implements both traits for wiring and tests.

pub mod publisher;
pub mod subscriber;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Result, VaultError};

pub use publisher::Publisher;
pub use subscriber::Subscriber;

/// The JSON envelope carried by every event on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A message handed to a subscriber. `attempt` counts deliveries, starting
/// at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
    pub attempt: u32,
}

/// Outbound capability: publish a payload to a subject.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;
}

/// Inbound capability: subscribe to a subject pattern.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn subscribe(&self, pattern: &str) -> Result<Subscription>;
}

/// A live subscription. Consumers must [`Subscription::ack`] each delivery;
/// [`Subscription::nack`] requeues it with the attempt count bumped.
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Delivery>,
    redeliver: mpsc::UnboundedSender<Delivery>,
}

impl Subscription {
    /// Wait for the next delivery. Returns `None` when the bus is gone.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Mark a delivery as handled.
    pub fn ack(&self, _delivery: &Delivery) {}

    /// Requeue a delivery for another attempt.
    pub fn nack(&self, mut delivery: Delivery) {
        delivery.attempt += 1;
        let _ = self.redeliver.send(delivery);
    }
}

/// Match a subject against a pattern where `*` matches one token and `>`
/// matches the rest.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// In-process bus implementing both capabilities with explicit ack and
/// bounded redelivery driven by the consumer.
#[derive(Default)]
pub struct MemoryBus {
    subscriptions: Mutex<Vec<(String, mpsc::UnboundedSender<Delivery>)>>,
}

impl MemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl EventSink for MemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .map_err(|_| VaultError::Internal("bus lock poisoned".into()))?;
        subscriptions.retain(|(pattern, sender)| {
            if !subject_matches(pattern, subject) {
                return !sender.is_closed();
            }
            sender
                .send(Delivery {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                    attempt: 1,
                })
                .is_ok()
        });
        Ok(())
    }
}

#[async_trait]
impl EventSource for MemoryBus {
    async fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions
            .lock()
            .map_err(|_| VaultError::Internal("bus lock poisoned".into()))?
            .push((pattern.to_string(), sender.clone()));
        Ok(Subscription {
            receiver,
            redeliver: sender,
        })
    }
}
