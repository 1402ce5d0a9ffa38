//! Read-only projections: wake-up briefings and boot-context markdown.
//!
//! Both compose the knowledge, secret, and graph stores without writing
//! anything. A briefing is structured JSON for rehydrating an agent after
//! sleep; boot context is a markdown document served as `text/markdown`.

use rusqlite::Connection;
use serde::Serialize;

use crate::db;
use crate::error::Result;
use crate::graph::{edges, entities};
use crate::knowledge::types::{Category, Filter, Scope};
use crate::knowledge::{store, ADMIN_AGENT};
use crate::secrets;

/// A wake-up briefing for one agent.
#[derive(Debug, Serialize)]
pub struct Briefing {
    pub agent_id: String,
    pub generated_at: String,
    pub briefing: BriefingContent,
}

#[derive(Debug, Serialize)]
pub struct BriefingContent {
    pub summary: String,
    pub sections: Vec<BriefingSection>,
    pub secrets_available: Vec<String>,
    pub pending_tasks: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct BriefingSection {
    pub title: String,
    pub items: Vec<BriefingItem>,
}

#[derive(Debug, Serialize)]
pub struct BriefingItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub content: String,
    pub source: String,
    pub relevance: f64,
}

fn summary_or_content(entry: &crate::knowledge::types::KnowledgeEntry) -> String {
    match &entry.summary {
        Some(summary) if !summary.is_empty() => summary.clone(),
        _ => entry.content.clone(),
    }
}

/// Names of the secrets a subject can access through the legacy predicate.
fn accessible_secret_names(conn: &Connection, agent_id: &str) -> Result<Vec<String>> {
    Ok(secrets::list(conn)?
        .iter()
        .filter(|s| secrets::can_access(s, agent_id))
        .map(|s| s.name.clone())
        .collect())
}

/// Assemble a wake-up briefing: public events since `since`, the agent's
/// own preferences, and the secrets available to it.
pub fn generate(
    conn: &Connection,
    agent_id: &str,
    since: Option<&str>,
    max_items: i64,
) -> Result<Briefing> {
    let max_items = if max_items <= 0 || max_items > 100 {
        50
    } else {
        max_items
    };
    let since = since.unwrap_or("");

    // Recent public events since the agent last slept.
    let recent = store::list(
        conn,
        &Filter {
            scope: Some(Scope::Public),
            agent_id: agent_id.to_string(),
            limit: max_items / 2,
            ..Default::default()
        },
    )?;
    let event_items: Vec<BriefingItem> = recent
        .iter()
        .filter(|e| e.created_at.as_str() >= since)
        .map(|e| BriefingItem {
            timestamp: Some(e.created_at.clone()),
            content: summary_or_content(e),
            source: match &e.source_event_id {
                Some(event_id) => format!("swarm:{event_id}"),
                None => "vault:knowledge".to_string(),
            },
            relevance: e.confidence,
        })
        .collect();

    // The agent's own standing context.
    let preferences = store::list(
        conn,
        &Filter {
            category: Some(Category::Preference),
            source_agent: Some(agent_id.to_string()),
            agent_id: agent_id.to_string(),
            limit: 10,
            ..Default::default()
        },
    )?;
    let context_items: Vec<BriefingItem> = preferences
        .iter()
        .map(|e| BriefingItem {
            timestamp: None,
            content: summary_or_content(e),
            source: "vault:knowledge".to_string(),
            relevance: 1.0,
        })
        .collect();

    let secrets_available = accessible_secret_names(conn, agent_id)?;

    let summary = format!(
        "Briefing for {agent_id}. {} new events. {} secrets available.",
        event_items.len(),
        secrets_available.len(),
    );

    let mut sections = Vec::new();
    if !event_items.is_empty() {
        sections.push(BriefingSection {
            title: "Swarm Events".into(),
            items: event_items,
        });
    }
    if !context_items.is_empty() {
        sections.push(BriefingSection {
            title: "Your Context".into(),
            items: context_items,
        });
    }

    Ok(Briefing {
        agent_id: agent_id.to_string(),
        generated_at: db::now(),
        briefing: BriefingContent {
            summary,
            sections,
            secrets_available,
            pending_tasks: Vec::new(),
        },
    })
}

fn meta_str<'a>(metadata: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Render the boot-context markdown for an agent: owner, people, agents,
/// access, rules, and infrastructure, scoped to what the agent may see.
pub fn boot_context(conn: &Connection, agent_id: &str) -> Result<String> {
    let full_access = agent_id == ADMIN_AGENT;

    // The agent's owner, when the graph knows it: someone with an active
    // "owns" edge pointing at the agent's entity.
    let agent_entity = entities::get_by_key(conn, &format!("agent:{agent_id}"))?;
    let owner = match &agent_entity {
        Some(agent_entity) => {
            let mut owner = None;
            for edge in edges::edges_to(conn, &agent_entity.id)? {
                if edge.edge_type == "owns" {
                    owner = entities::get(conn, &edge.from_id)?;
                    break;
                }
            }
            owner
        }
        None => None,
    };

    let mut out = String::new();
    out.push_str("# Boot Context\n\n");
    out.push_str(&format!("Agent: **{agent_id}**\n\n"));

    // Owner section.
    if let Some(owner) = &owner {
        out.push_str("## Your Owner\n\n");
        out.push_str(&format!("- **Name**: {}\n", owner.display_name));
        if let Some(identifier) = meta_str(&owner.metadata, "identifier") {
            out.push_str(&format!("- **Identifier**: {identifier}\n"));
        }
        for (key, label) in [("phone", "Phone"), ("timezone", "Timezone"), ("preferences", "Preferences")] {
            if let Some(value) = meta_str(&owner.metadata, key) {
                out.push_str(&format!("- **{label}**: {value}\n"));
            }
        }
        out.push('\n');
    }

    // People table. Scoped agents only see their owner.
    let people = entities::list(conn, Some("person"), 50, 0)?;
    let visible_people: Vec<_> = people
        .iter()
        .filter(|p| {
            full_access
                || owner
                    .as_ref()
                    .map(|o| o.id == p.id)
                    .unwrap_or(true)
        })
        .collect();
    if !visible_people.is_empty() {
        out.push_str("## People\n\n");
        out.push_str("| Name | Identifier | Timezone |\n");
        out.push_str("|------|------------|----------|\n");
        for person in visible_people {
            let identifier = meta_str(&person.metadata, "identifier").unwrap_or(&person.key);
            let timezone = meta_str(&person.metadata, "timezone").unwrap_or("\u{2014}");
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                person.display_name, identifier, timezone
            ));
        }
        out.push('\n');
    }

    // Agents table, with a knowledge fallback for missing summaries.
    let agents = entities::list(conn, Some("agent"), 50, 0)?;
    if !agents.is_empty() {
        let agent_facts = store::list(
            conn,
            &Filter {
                category: Some(Category::Fact),
                tags: vec!["agent".into(), "config".into()],
                agent_id: agent_id.to_string(),
                limit: 50,
                ..Default::default()
            },
        )?;
        out.push_str("## Agents\n\n");
        out.push_str("| Name | Summary |\n");
        out.push_str("|------|---------|\n");
        for agent in &agents {
            let summary = if !agent.summary.is_empty() {
                agent.summary.clone()
            } else {
                let name_tag = agent.display_name.to_lowercase();
                agent_facts
                    .iter()
                    .find(|f| f.tags.iter().any(|t| *t == name_tag))
                    .map(|f| f.content.clone())
                    .unwrap_or_else(|| "\u{2014}".to_string())
            };
            out.push_str(&format!("| {} | {} |\n", agent.display_name, summary));
        }
        out.push('\n');
    }

    // Access: secrets and channels.
    let secret_names = accessible_secret_names(conn, agent_id)?;
    let channels = store::list(
        conn,
        &Filter {
            category: Some(Category::Fact),
            tags: vec!["channel".into()],
            agent_id: agent_id.to_string(),
            limit: 50,
            ..Default::default()
        },
    )?;
    if !secret_names.is_empty() || !channels.is_empty() {
        out.push_str("## Access\n\n");
        if !secret_names.is_empty() {
            out.push_str("### Secrets Available\n\n");
            for name in &secret_names {
                out.push_str(&format!("- `{name}`\n"));
            }
            out.push('\n');
        }
        if !channels.is_empty() {
            out.push_str("### Channels\n\n");
            for entry in &channels {
                out.push_str(&format!("- {}\n", summary_or_content(entry)));
            }
            out.push('\n');
        }
    }

    // Operational rules.
    let rules = store::list(
        conn,
        &Filter {
            category: Some(Category::Decision),
            tags: vec!["rules".into()],
            agent_id: agent_id.to_string(),
            limit: 50,
            ..Default::default()
        },
    )?;
    if !rules.is_empty() {
        out.push_str("## Rules\n\n");
        for entry in &rules {
            out.push_str(&format!("- {}\n", summary_or_content(entry)));
        }
        out.push('\n');
    }

    // Known services.
    let services = entities::list(conn, Some("service"), 50, 0)?;
    if !services.is_empty() {
        out.push_str("## Infrastructure\n\n");
        for service in &services {
            match meta_str(&service.metadata, "endpoint") {
                Some(endpoint) => {
                    out.push_str(&format!("- **{}** \u{2014} {endpoint}\n", service.display_name));
                }
                None if !service.summary.is_empty() => {
                    out.push_str(&format!(
                        "- **{}** \u{2014} {}\n",
                        service.display_name, service.summary
                    ));
                }
                None => out.push_str(&format!("- **{}**\n", service.display_name)),
            }
        }
        out.push('\n');
    }

    Ok(out)
}
