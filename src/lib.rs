//! Entity resolution for mill and customer names.
//!
//! Free-text names from quotes, CRM rows and imports are resolved to stable
//! canonical entities through normalization, an alias index and fuzzy
//! scoring. Ambiguous names go to a human review queue.

pub mod backfill;
pub mod config;
pub mod db;
pub mod dictionaries;
pub mod entity;
pub mod error;
pub mod merge;
mod migrations;
pub mod normalize;
pub mod resolver;
pub mod review;
pub mod scoring;

pub use config::{load_config, ResolverConfig};
pub use db::EntityDb;
pub use entity::{AliasSource, EntityType};
pub use error::ResolveError;
pub use resolver::{ResolveOutcome, Resolver};
pub use review::ReviewDecision;
