//! Knowledge entry type definitions.
//!
//! Defines [`Category`] (what kind of knowledge), [`Scope`] (who can see it),
//! [`Decay`] (how fast relevance fades), the [`KnowledgeEntry`] record, and
//! the input/filter types consumed by the store.

use serde::{Deserialize, Serialize};

/// The kind of knowledge an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Discovery,
    Lesson,
    Preference,
    Fact,
    Event,
    Decision,
    Relationship,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Lesson => "lesson",
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Event => "event",
            Self::Decision => "decision",
            Self::Relationship => "relationship",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovery" => Ok(Self::Discovery),
            "lesson" => Ok(Self::Lesson),
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "event" => Ok(Self::Event),
            "decision" => Ok(Self::Decision),
            "relationship" => Ok(Self::Relationship),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

/// Visibility scope for a knowledge entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible to every agent.
    Public,
    /// Visible only to the owning source agent (and the admin identity).
    Private,
    /// Visible to agents listed in `shared_with` (`*` opens it to all).
    Shared,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Shared => "shared",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            "shared" => Ok(Self::Shared),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// How quickly an entry's search relevance decays with age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decay {
    None,
    Slow,
    Fast,
    Ephemeral,
}

impl Decay {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Slow => "slow",
            Self::Fast => "fast",
            Self::Ephemeral => "ephemeral",
        }
    }

    /// Half-life in days, or `None` for no decay.
    pub fn half_life_days(&self) -> Option<f64> {
        match self {
            Self::None => None,
            Self::Slow => Some(30.0),
            Self::Fast => Some(7.0),
            Self::Ephemeral => Some(1.0),
        }
    }
}

impl std::fmt::Display for Decay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "slow" => Ok(Self::Slow),
            "fast" => Ok(Self::Fast),
            "ephemeral" => Ok(Self::Ephemeral),
            _ => Err(format!("unknown decay: {s}")),
        }
    }
}

/// A knowledge record, matching the `knowledge` table schema.
/// Soft-deleted rows are never materialised into this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub source_agent: String,
    pub category: Category,
    pub scope: Scope,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub shared_with: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
    pub confidence: f64,
    pub relevance_decay: Decay,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for creating a knowledge entry. The embedding is provided by the
/// caller; a missing embedding is allowed and simply excludes the entry
/// from similarity search.
#[derive(Debug, Clone, Default)]
pub struct CreateInput {
    pub content: String,
    pub summary: Option<String>,
    pub source_agent: String,
    pub category: Option<Category>,
    pub scope: Option<Scope>,
    pub shared_with: Vec<String>,
    pub tags: Vec<String>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<serde_json::Value>,
    pub source_event_id: Option<String>,
    pub confidence: Option<f64>,
    pub relevance_decay: Option<Decay>,
    pub expires_at: Option<String>,
}

/// Patch for updating a knowledge entry. `None` fields are left unchanged.
/// A content change is expected to arrive with a fresh embedding; the store
/// does not generate one.
#[derive(Debug, Clone, Default)]
pub struct UpdateInput {
    pub content: Option<String>,
    pub summary: Option<String>,
    pub category: Option<Category>,
    pub scope: Option<Scope>,
    pub shared_with: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<serde_json::Value>,
    pub confidence: Option<f64>,
    pub relevance_decay: Option<Decay>,
    pub expires_at: Option<String>,
    pub superseded_by: Option<String>,
}

/// Filter criteria for listing knowledge.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub category: Option<Category>,
    pub scope: Option<Scope>,
    pub source_agent: Option<String>,
    /// Entries must carry every listed tag.
    pub tags: Vec<String>,
    /// Requesting agent, for the visibility predicate.
    pub agent_id: String,
    pub limit: i64,
    pub offset: i64,
}

/// A semantic search request.
#[derive(Debug, Clone)]
pub struct SearchInput {
    pub query_embedding: Vec<f32>,
    pub limit: i64,
    pub scope: Option<Scope>,
    pub categories: Vec<Category>,
    pub agent_id: String,
    pub min_relevance: f64,
    pub include_expired: bool,
}

impl Default for SearchInput {
    fn default() -> Self {
        Self {
            query_embedding: Vec::new(),
            limit: 10,
            scope: None,
            categories: Vec::new(),
            agent_id: String::new(),
            min_relevance: 0.5,
            include_expired: false,
        }
    }
}

/// A knowledge entry with its (decayed) relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub entry: KnowledgeEntry,
    pub relevance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trip() {
        for s in [
            "discovery",
            "lesson",
            "preference",
            "fact",
            "event",
            "decision",
            "relationship",
        ] {
            let c: Category = s.parse().unwrap();
            assert_eq!(c.as_str(), s);
        }
        assert!("bogus".parse::<Category>().is_err());
    }

    #[test]
    fn decay_half_lives() {
        assert_eq!(Decay::None.half_life_days(), None);
        assert_eq!(Decay::Slow.half_life_days(), Some(30.0));
        assert_eq!(Decay::Fast.half_life_days(), Some(7.0));
        assert_eq!(Decay::Ephemeral.half_life_days(), Some(1.0));
    }

    #[test]
    fn scope_serde_is_snake_case() {
        assert_eq!(serde_json::to_string(&Scope::Public).unwrap(), "\"public\"");
        let s: Scope = serde_json::from_str("\"shared\"").unwrap();
        assert_eq!(s, Scope::Shared);
    }
}
