//! Typed helpers for the vault's outbound events.
//!
//! Every helper wraps its payload in the standard envelope and publishes to
//! a `swarm.vault.*` subject. Publication is fire-and-forget: the primary
//! write has already committed, the bus is at-least-once, and a failure is
//! logged and swallowed.

use std::sync::Arc;

use uuid::Uuid;

use crate::db;
use crate::events::{Envelope, EventSink};
use crate::knowledge::types::KnowledgeEntry;

/// Outbound event publisher.
#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn EventSink>,
}

impl Publisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    async fn publish(&self, subject: &str, event_type: &str, id: String, data: serde_json::Value) {
        let envelope = Envelope {
            id,
            event_type: event_type.to_string(),
            source: "alexandria".to_string(),
            timestamp: db::now(),
            data,
        };
        let payload = match serde_json::to_vec(&envelope) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(subject, %err, "event serialization failed");
                return;
            }
        };
        if let Err(err) = self.sink.publish(subject, payload).await {
            tracing::warn!(subject, %err, "event publish failed");
        } else {
            tracing::debug!(subject, event_type, "published event");
        }
    }

    pub async fn knowledge_created(&self, entry: &KnowledgeEntry) {
        self.publish(
            "swarm.vault.knowledge.created",
            "vault.knowledge.created",
            entry.id.clone(),
            serde_json::json!({
                "id": entry.id,
                "category": entry.category,
                "source_agent": entry.source_agent,
                "summary": entry.summary,
            }),
        )
        .await;
    }

    pub async fn knowledge_updated(&self, entry: &KnowledgeEntry) {
        self.publish(
            "swarm.vault.knowledge.updated",
            "vault.knowledge.updated",
            entry.id.clone(),
            serde_json::json!({
                "id": entry.id,
                "category": entry.category,
                "source_agent": entry.source_agent,
            }),
        )
        .await;
    }

    pub async fn knowledge_searched(&self, agent_id: &str, result_count: usize) {
        self.publish(
            "swarm.vault.knowledge.searched",
            "vault.knowledge.searched",
            Uuid::new_v4().to_string(),
            serde_json::json!({
                "agent_id": agent_id,
                "result_count": result_count,
            }),
        )
        .await;
    }

    pub async fn secret_accessed(&self, agent_id: &str, secret_name: &str, success: bool) {
        self.publish(
            "swarm.vault.secret.accessed",
            "vault.secret.accessed",
            Uuid::new_v4().to_string(),
            serde_json::json!({
                "agent_id": agent_id,
                "secret_name": secret_name,
                "success": success,
            }),
        )
        .await;
    }

    pub async fn secret_rotated(&self, secret_name: &str, rotated_by: &str) {
        self.publish(
            "swarm.vault.secret.rotated",
            "vault.secret.rotated",
            Uuid::new_v4().to_string(),
            serde_json::json!({
                "secret_name": secret_name,
                "rotated_by": rotated_by,
            }),
        )
        .await;
    }

    pub async fn briefing_generated(&self, agent_id: &str, item_count: usize) {
        self.publish(
            "swarm.vault.briefing.generated",
            "vault.briefing.generated",
            Uuid::new_v4().to_string(),
            serde_json::json!({
                "agent_id": agent_id,
                "item_count": item_count,
            }),
        )
        .await;
    }

    pub async fn context_generated(&self, agent_id: &str) {
        self.publish(
            "swarm.vault.context.generated",
            "vault.context.generated",
            Uuid::new_v4().to_string(),
            serde_json::json!({
                "agent_id": agent_id,
            }),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventSource, MemoryBus};
    use crate::knowledge::types::{Category, Decay, Scope};

    fn entry() -> KnowledgeEntry {
        KnowledgeEntry {
            id: "k1".into(),
            content: "content".into(),
            summary: Some("summary".into()),
            source_agent: "scout".into(),
            category: Category::Discovery,
            scope: Scope::Public,
            shared_with: Vec::new(),
            tags: Vec::new(),
            metadata: None,
            source_event_id: None,
            confidence: 0.8,
            relevance_decay: Decay::Slow,
            expires_at: None,
            superseded_by: None,
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            updated_at: "2026-01-01T00:00:00.000000Z".into(),
        }
    }

    #[tokio::test]
    async fn knowledge_created_envelope_shape() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe("swarm.vault.knowledge.created").await.unwrap();
        let publisher = Publisher::new(bus.clone());

        publisher.knowledge_created(&entry()).await;

        let delivery = sub.next().await.unwrap();
        let envelope: Envelope = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(envelope.id, "k1");
        assert_eq!(envelope.event_type, "vault.knowledge.created");
        assert_eq!(envelope.source, "alexandria");
        assert!(!envelope.timestamp.is_empty());
        assert_eq!(envelope.data["source_agent"], "scout");
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed() {
        // A bus with no subscribers delivers nowhere; publishing must not
        // error or panic either way.
        let publisher = Publisher::new(MemoryBus::new());
        publisher.secret_rotated("api-key", "warren").await;
        publisher.knowledge_searched("scout", 3).await;
    }
}
