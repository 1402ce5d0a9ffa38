//! Inbound event capture: swarm events become knowledge entries.
//!
//! One task per subject family. Each message is parsed, embedded (best
//! effort), inserted as one knowledge row, and acknowledged only after the
//! insert completes. A message that keeps failing is acknowledged after
//! three deliveries so it cannot stall the subject.

use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::Db;
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, VaultError};
use crate::events::{Delivery, Envelope, EventSource, Publisher, Subscription};
use crate::knowledge::types::{Category, CreateInput, Decay, Scope};
use crate::knowledge::store;

/// Deliveries after which a failing message is acknowledged anyway.
const MAX_DELIVERIES: u32 = 3;

/// The subject families the vault captures.
const SUBJECTS: &[(&str, Family)] = &[
    ("swarm.discovery.>", Family::Discovery),
    ("swarm.task.*.completed", Family::TaskCompleted),
    ("swarm.task.*.failed", Family::TaskFailed),
    ("swarm.agent.*.started", Family::AgentStarted),
    ("swarm.agent.*.stopped", Family::AgentStopped),
    ("swarm.dredd.correction", Family::Correction),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Discovery,
    TaskCompleted,
    TaskFailed,
    AgentStarted,
    AgentStopped,
    Correction,
}

/// The data block of a generic swarm event.
#[derive(Debug, Default, Deserialize)]
struct SwarmEventData {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct SwarmEvent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    data: SwarmEventData,
}

/// A correction signal from the decision reviewer.
#[derive(Debug, Deserialize)]
struct CorrectionSignal {
    #[serde(default)]
    session_ref: String,
    #[serde(default)]
    decision_id: String,
    #[serde(default)]
    agent_id: String,
    #[serde(default)]
    model_id: String,
    #[serde(default)]
    model_tier: String,
    #[serde(default)]
    correction_type: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    severity: String,
}

/// Event subscriber: captures swarm events as knowledge.
pub struct Subscriber {
    db: Db,
    embedder: Arc<dyn EmbeddingProvider>,
    publisher: Publisher,
}

impl Subscriber {
    pub fn new(db: Db, embedder: Arc<dyn EmbeddingProvider>, publisher: Publisher) -> Arc<Self> {
        Arc::new(Self {
            db,
            embedder,
            publisher,
        })
    }

    /// Subscribe to every subject family and spawn one consumer task each.
    pub async fn start(
        self: &Arc<Self>,
        source: &dyn EventSource,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        for (pattern, family) in SUBJECTS {
            let subscription = source.subscribe(pattern).await?;
            tracing::info!(subject = %pattern, "subscribed to swarm subject");
            let subscriber = self.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                subscriber.run(subscription, *family, shutdown).await;
            }));
        }
        Ok(handles)
    }

    async fn run(
        self: Arc<Self>,
        mut subscription: Subscription,
        family: Family,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(?family, "subscriber shutting down");
                        return;
                    }
                }
                delivery = subscription.next() => {
                    let Some(delivery) = delivery else { return };
                    match self.handle(family, &delivery).await {
                        Ok(()) => subscription.ack(&delivery),
                        Err(err) if delivery.attempt >= MAX_DELIVERIES => {
                            tracing::warn!(
                                subject = %delivery.subject,
                                attempt = delivery.attempt,
                                %err,
                                "dropping poison message after max deliveries"
                            );
                            subscription.ack(&delivery);
                        }
                        Err(err) => {
                            tracing::warn!(
                                subject = %delivery.subject,
                                attempt = delivery.attempt,
                                %err,
                                "event capture failed, requeueing"
                            );
                            subscription.nack(delivery);
                        }
                    }
                }
            }
        }
    }

    /// Handle one delivery for a subject family. Errors bubble to the
    /// redelivery logic in [`Self::run`].
    async fn handle(&self, family: Family, delivery: &Delivery) -> Result<()> {
        match family {
            Family::Discovery => {
                self.capture(delivery, Category::Discovery, Decay::Slow, 0.8).await
            }
            Family::TaskCompleted => {
                self.capture(delivery, Category::Event, Decay::Fast, 0.9).await
            }
            Family::TaskFailed => {
                self.capture(delivery, Category::Lesson, Decay::Slow, 0.7).await
            }
            Family::AgentStarted | Family::AgentStopped => {
                // Lifecycle events are logged only, never persisted.
                tracing::info!(subject = %delivery.subject, "agent lifecycle event");
                Ok(())
            }
            Family::Correction => self.capture_correction(delivery).await,
        }
    }

    async fn capture(
        &self,
        delivery: &Delivery,
        category: Category,
        decay: Decay,
        confidence: f64,
    ) -> Result<()> {
        let event: SwarmEvent = serde_json::from_slice(&delivery.payload)?;

        let embedding = match self.embedder.embed(&event.data.content).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                tracing::warn!(%err, "embedding failed, storing event without vector");
                None
            }
        };

        let summary = if !event.data.summary.is_empty() {
            event.data.summary.clone()
        } else if event.data.content.len() > 100 {
            let cut = event
                .data
                .content
                .char_indices()
                .take_while(|(i, _)| *i < 100)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(100);
            format!("{}...", &event.data.content[..cut])
        } else {
            event.data.content.clone()
        };

        let entry = {
            let mut conn = self
                .db
                .lock()
                .map_err(|_| VaultError::Internal("db lock poisoned".into()))?;
            store::create(
                &mut conn,
                CreateInput {
                    content: event.data.content,
                    summary: Some(summary),
                    source_agent: event.source,
                    category: Some(category),
                    scope: Some(Scope::Public),
                    tags: event.data.tags,
                    embedding,
                    source_event_id: (!event.id.is_empty()).then(|| event.id.clone()),
                    confidence: Some(confidence),
                    relevance_decay: Some(decay),
                    ..Default::default()
                },
            )?
        };

        tracing::info!(
            knowledge_id = %entry.id,
            subject = %delivery.subject,
            category = category.as_str(),
            "captured swarm event as knowledge"
        );
        self.publisher.knowledge_created(&entry).await;
        Ok(())
    }

    async fn capture_correction(&self, delivery: &Delivery) -> Result<()> {
        let envelope: Envelope = serde_json::from_slice(&delivery.payload)?;
        let signal: CorrectionSignal = serde_json::from_value(envelope.data.clone())?;

        // Only rejected decisions become lessons; confirmed decisions need
        // no correction.
        if signal.correction_type != "rejected" {
            tracing::debug!(
                correction_type = %signal.correction_type,
                decision_id = %signal.decision_id,
                "skipping non-rejected correction"
            );
            return Ok(());
        }

        let content = format!(
            "Dredd rejected decision {} by agent {} (model: {}, tier: {}). \
             Category: {}, severity: {}. Session: {}",
            signal.decision_id,
            signal.agent_id,
            signal.model_id,
            signal.model_tier,
            signal.category,
            signal.severity,
            signal.session_ref,
        );
        let summary = format!(
            "Rejected {} decision ({}) for {}/{}",
            signal.category, signal.severity, signal.agent_id, signal.model_tier,
        );
        let tags = vec![
            "correction".to_string(),
            format!("agent:{}", signal.agent_id),
            format!("model_tier:{}", signal.model_tier),
            format!("category:{}", signal.category),
            format!("severity:{}", signal.severity),
        ];
        let metadata = serde_json::json!({
            "decision_id": signal.decision_id,
            "agent_id": signal.agent_id,
            "model_id": signal.model_id,
            "model_tier": signal.model_tier,
            "correction_type": signal.correction_type,
            "category": signal.category,
            "severity": signal.severity,
            "session_ref": signal.session_ref,
        });

        let embedding = match self.embedder.embed(&content).await {
            Ok(embedding) => Some(embedding),
            Err(err) => {
                tracing::warn!(%err, "embedding failed for correction");
                None
            }
        };

        let entry = {
            let mut conn = self
                .db
                .lock()
                .map_err(|_| VaultError::Internal("db lock poisoned".into()))?;
            store::create(
                &mut conn,
                CreateInput {
                    content,
                    summary: Some(summary),
                    source_agent: "dredd".into(),
                    category: Some(Category::Lesson),
                    scope: Some(Scope::Public),
                    tags,
                    embedding,
                    metadata: Some(metadata),
                    source_event_id: (!envelope.id.is_empty()).then(|| envelope.id.clone()),
                    confidence: Some(0.9),
                    relevance_decay: Some(Decay::Slow),
                    ..Default::default()
                },
            )?
        };

        tracing::info!(
            knowledge_id = %entry.id,
            event_id = %envelope.id,
            "captured correction as lesson"
        );
        self.publisher.knowledge_created(&entry).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::simple::SimpleProvider;
    use crate::events::{EventSink, MemoryBus};
    use crate::knowledge::types::Filter;

    fn subscriber(db: &Db, bus: &Arc<MemoryBus>) -> Arc<Subscriber> {
        Subscriber::new(
            db.clone(),
            Arc::new(SimpleProvider::new()),
            Publisher::new(bus.clone()),
        )
    }

    fn delivery(subject: &str, payload: serde_json::Value, attempt: u32) -> Delivery {
        Delivery {
            subject: subject.into(),
            payload: serde_json::to_vec(&payload).unwrap(),
            attempt,
        }
    }

    #[tokio::test]
    async fn discovery_event_becomes_knowledge() {
        let db = crate::db::open_memory_db().unwrap();
        let bus = MemoryBus::new();
        let sub = subscriber(&db, &bus);

        sub.handle(
            Family::Discovery,
            &delivery(
                "swarm.discovery.web",
                serde_json::json!({
                    "id": "evt-1",
                    "source": "scout",
                    "data": {"content": "found a cache bug", "tags": ["cache"]}
                }),
                1,
            ),
        )
        .await
        .unwrap();

        let conn = db.lock().unwrap();
        let entries = store::list(
            &conn,
            &Filter {
                agent_id: "scout".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].category, Category::Discovery);
        assert_eq!(entries[0].relevance_decay, Decay::Slow);
        assert!((entries[0].confidence - 0.8).abs() < 1e-9);
        assert_eq!(entries[0].source_event_id.as_deref(), Some("evt-1"));
    }

    #[tokio::test]
    async fn task_events_map_to_their_categories() {
        let db = crate::db::open_memory_db().unwrap();
        let bus = MemoryBus::new();
        let sub = subscriber(&db, &bus);

        sub.handle(
            Family::TaskCompleted,
            &delivery(
                "swarm.task.7.completed",
                serde_json::json!({"id": "t1", "source": "worker", "data": {"content": "task done"}}),
                1,
            ),
        )
        .await
        .unwrap();
        sub.handle(
            Family::TaskFailed,
            &delivery(
                "swarm.task.8.failed",
                serde_json::json!({"id": "t2", "source": "worker", "data": {"content": "task blew up"}}),
                1,
            ),
        )
        .await
        .unwrap();

        let conn = db.lock().unwrap();
        let entries = store::list(
            &conn,
            &Filter {
                agent_id: "worker".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        let completed = entries.iter().find(|e| e.content == "task done").unwrap();
        assert_eq!(completed.category, Category::Event);
        assert_eq!(completed.relevance_decay, Decay::Fast);
        let failed = entries.iter().find(|e| e.content == "task blew up").unwrap();
        assert_eq!(failed.category, Category::Lesson);
        assert!((failed.confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn lifecycle_events_are_not_persisted() {
        let db = crate::db::open_memory_db().unwrap();
        let bus = MemoryBus::new();
        let sub = subscriber(&db, &bus);

        sub.handle(
            Family::AgentStarted,
            &delivery("swarm.agent.scout.started", serde_json::json!({}), 1),
        )
        .await
        .unwrap();

        let conn = db.lock().unwrap();
        assert_eq!(store::count(&conn).unwrap(), 0);
    }

    #[tokio::test]
    async fn rejected_correction_becomes_tagged_lesson() {
        let db = crate::db::open_memory_db().unwrap();
        let bus = MemoryBus::new();
        let sub = subscriber(&db, &bus);

        sub.handle(
            Family::Correction,
            &delivery(
                "swarm.dredd.correction",
                serde_json::json!({
                    "id": "corr-1",
                    "type": "dredd.correction",
                    "source": "dredd",
                    "data": {
                        "session_ref": "sess-9",
                        "decision_id": "dec-4",
                        "agent_id": "scout",
                        "model_id": "m-large",
                        "model_tier": "large",
                        "correction_type": "rejected",
                        "category": "safety",
                        "severity": "high"
                    }
                }),
                1,
            ),
        )
        .await
        .unwrap();

        let conn = db.lock().unwrap();
        let entries = store::list(
            &conn,
            &Filter {
                agent_id: "dredd".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        let lesson = &entries[0];
        assert_eq!(lesson.category, Category::Lesson);
        assert_eq!(lesson.source_agent, "dredd");
        assert!((lesson.confidence - 0.9).abs() < 1e-9);
        assert!(lesson.tags.contains(&"correction".to_string()));
        assert!(lesson.tags.contains(&"agent:scout".to_string()));
        assert_eq!(lesson.metadata.as_ref().unwrap()["severity"], "high");
        assert!(lesson.summary.as_ref().unwrap().contains("Rejected safety"));
    }

    #[tokio::test]
    async fn non_rejected_corrections_are_acknowledged_without_persist() {
        let db = crate::db::open_memory_db().unwrap();
        let bus = MemoryBus::new();
        let sub = subscriber(&db, &bus);

        sub.handle(
            Family::Correction,
            &delivery(
                "swarm.dredd.correction",
                serde_json::json!({
                    "id": "corr-2",
                    "data": {"correction_type": "confirmed", "decision_id": "dec-5"}
                }),
                1,
            ),
        )
        .await
        .unwrap();

        let conn = db.lock().unwrap();
        assert_eq!(store::count(&conn).unwrap(), 0);
    }

    #[tokio::test]
    async fn unparseable_event_errors_for_redelivery() {
        let db = crate::db::open_memory_db().unwrap();
        let bus = MemoryBus::new();
        let sub = subscriber(&db, &bus);

        let bad = Delivery {
            subject: "swarm.discovery.x".into(),
            payload: b"not json".to_vec(),
            attempt: 1,
        };
        assert!(sub.handle(Family::Discovery, &bad).await.is_err());
    }

    #[tokio::test]
    async fn end_to_end_capture_publishes_created_event() {
        let db = crate::db::open_memory_db().unwrap();
        let bus = MemoryBus::new();
        let mut created = bus.subscribe("swarm.vault.knowledge.created").await.unwrap();
        let sub = subscriber(&db, &bus);

        let (_tx, shutdown) = watch::channel(false);
        let handles = sub.start(bus.as_ref(), shutdown).await.unwrap();

        bus.publish(
            "swarm.discovery.web",
            serde_json::to_vec(&serde_json::json!({
                "id": "evt-9",
                "source": "scout",
                "data": {"content": "e2e capture"}
            }))
            .unwrap(),
        )
        .await
        .unwrap();

        let outbound = created.next().await.unwrap();
        let envelope: Envelope = serde_json::from_slice(&outbound.payload).unwrap();
        assert_eq!(envelope.event_type, "vault.knowledge.created");
        assert_eq!(envelope.data["source_agent"], "scout");

        for handle in handles {
            handle.abort();
        }
    }
}
