//! Canonical identities, aliases and review items.
//!
//! A canonical entity is the single authoritative identity for a mill or a
//! customer. Every observed spelling is an alias row pointing at exactly one
//! canonical entity. Ambiguous first sightings wait in the review queue until
//! a human picks a target.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of entity being resolved. Names are only ever compared within
/// one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Mill,
    Customer,
}

impl EntityType {
    /// String label for SQL storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Mill => "mill",
            EntityType::Customer => "customer",
        }
    }

    /// Prefix used when minting canonical ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            EntityType::Mill => "mill",
            EntityType::Customer => "cust",
        }
    }

    /// Parse from SQL string. Returns `None` for unknown labels.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mill" => Some(EntityType::Mill),
            "customer" => Some(EntityType::Customer),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an alias row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasSource {
    /// Static alias dictionaries supplied as configuration.
    Dictionary,
    /// Auto-linked by the resolver (exact key or score above the auto threshold).
    Auto,
    /// Trusted manual override.
    Manual,
    /// Human decision from the review queue.
    ManualReview,
    /// Bulk backfill of existing records.
    Migration,
    /// Carried over from a merged-away entity.
    Merge,
    /// The entity's own name at creation.
    Canonical,
}

impl AliasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasSource::Dictionary => "dictionary",
            AliasSource::Auto => "auto",
            AliasSource::Manual => "manual",
            AliasSource::ManualReview => "manual_review",
            AliasSource::Migration => "migration",
            AliasSource::Merge => "merge",
            AliasSource::Canonical => "canonical",
        }
    }

    /// Parse from SQL string. Unknown labels read back as `Manual` so a row
    /// written by a newer build still loads.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "dictionary" => AliasSource::Dictionary,
            "auto" => AliasSource::Auto,
            "manual_review" => AliasSource::ManualReview,
            "migration" => AliasSource::Migration,
            "merge" => AliasSource::Merge,
            "canonical" => AliasSource::Canonical,
            _ => AliasSource::Manual,
        }
    }
}

/// A row from the `entity_canonical` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEntity {
    pub canonical_id: String,
    pub entity_type: EntityType,
    pub canonical_name: String,
    pub normalized_key: String,
    pub metadata: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `entity_alias` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alias {
    pub id: i64,
    pub canonical_id: String,
    pub variant: String,
    pub variant_normalized: String,
    pub source: AliasSource,
    pub score: Option<f64>,
    pub created_at: String,
}

/// One candidate as frozen into a review item at queue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSnapshot {
    pub canonical_id: String,
    pub score: f64,
}

/// A row from the `entity_review` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    pub id: i64,
    pub input_name: String,
    pub entity_type: EntityType,
    pub candidates: Vec<CandidateSnapshot>,
    pub resolved_id: Option<String>,
    pub source_context: String,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

impl ReviewItem {
    pub fn is_pending(&self) -> bool {
        self.resolved_id.is_none()
    }
}
