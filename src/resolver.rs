//! Name → canonical entity resolution.
//!
//! Cascade, cheapest first:
//! 1. Exact alias hit on the normalized name (no writes)
//! 2. Exact canonical-key hit (registers an alias)
//! 3. Fuzzy scoring against every entity of the type and its aliases
//! 4. Decision: auto-link, queue for review, or create a new entity
//!
//! Reads run outside any transaction. Each write step runs in its own
//! `BEGIN IMMEDIATE` transaction. Two resolvers creating the same new name
//! collide on UNIQUE(entity_type, normalized_key); the loser gets a
//! conflict, re-reads and links to the winner.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ResolverConfig;
use crate::db::{EntityDb, EntityStats, ExternalRecord, RecordKey};
use crate::entity::{Alias, AliasSource, CandidateSnapshot, CanonicalEntity, EntityType};
use crate::error::ResolveError;
use crate::normalize::{normalize, Normalizer};
use crate::scoring::Scorer;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The entity a name resolved to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedEntity {
    pub canonical_id: String,
    pub canonical_name: String,
    /// Match score. 1.0 for alias and key hits, 0.0 for a newly created entity.
    pub score: f64,
}

/// A name parked in the review queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewQueued {
    pub review_id: i64,
    pub input_name: String,
    pub candidates: Vec<ScoredCandidate>,
}

/// One fuzzy-match candidate with enough context for a human to choose.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    pub canonical_id: String,
    pub canonical_name: String,
    pub score: f64,
    pub aliases: Vec<String>,
    pub metadata: Map<String, Value>,
}

/// Outcome of resolving one name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// Linked to an existing entity (exact or above the auto threshold)
    Matched(ResolvedEntity),
    /// Ambiguous, waiting for a human decision
    Review(ReviewQueued),
    /// No plausible candidate, a new entity was created
    Created(ResolvedEntity),
}

impl ResolveOutcome {
    /// The resolved id, unless the name went to review.
    pub fn canonical_id(&self) -> Option<&str> {
        match self {
            ResolveOutcome::Matched(e) | ResolveOutcome::Created(e) => Some(&e.canonical_id),
            ResolveOutcome::Review(_) => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            ResolveOutcome::Matched(_) => "matched",
            ResolveOutcome::Review(_) => "review",
            ResolveOutcome::Created(_) => "created",
        }
    }
}

/// Result of a manual alias link.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAlias {
    pub canonical_id: String,
    pub variant: String,
    /// False when the entity already carried this variant.
    pub inserted: bool,
}

/// Records from one external source that belong to an entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecords {
    pub label: String,
    pub records: Vec<ExternalRecord>,
}

/// Everything known about one entity across the store and linked sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedView {
    pub canonical: CanonicalEntity,
    pub aliases: Vec<Alias>,
    pub sources: Vec<SourceRecords>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver<'a> {
    pub(crate) db: &'a EntityDb,
    pub(crate) config: &'a ResolverConfig,
    scorer: Scorer,
}

impl<'a> Resolver<'a> {
    pub fn new(db: &'a EntityDb, config: &'a ResolverConfig) -> Self {
        let normalizer = Normalizer::new(&config.dictionaries);
        Self {
            db,
            config,
            scorer: Scorer::new(normalizer, config.weights),
        }
    }

    pub fn db(&self) -> &EntityDb {
        self.db
    }

    /// Resolve a raw name, auto-linking with source `auto`.
    pub fn resolve(
        &self,
        raw: &str,
        entity_type: EntityType,
        context: &str,
    ) -> Result<ResolveOutcome, ResolveError> {
        self.resolve_with(raw, entity_type, context, AliasSource::Auto, &Map::new())
    }

    /// Resolve with an explicit alias source for auto-links and metadata for
    /// a newly created entity.
    pub fn resolve_with(
        &self,
        raw: &str,
        entity_type: EntityType,
        context: &str,
        link_source: AliasSource,
        metadata: &Map<String, Value>,
    ) -> Result<ResolveOutcome, ResolveError> {
        let name = raw.trim();
        let key = normalize(name);
        if key.is_empty() {
            return Err(ResolveError::InvalidInput(format!(
                "name {:?} has no letters or digits",
                raw
            )));
        }

        let mut attempt = 0;
        loop {
            match self.resolve_once(name, &key, entity_type, context, link_source, metadata) {
                Err(ResolveError::Conflict(reason)) if attempt < self.config.write_retries => {
                    attempt += 1;
                    log::warn!(
                        "Resolve conflict for {} '{}' (attempt {}): {}",
                        entity_type,
                        name,
                        attempt,
                        reason
                    );
                }
                other => return other,
            }
        }
    }

    fn resolve_once(
        &self,
        name: &str,
        key: &str,
        entity_type: EntityType,
        context: &str,
        link_source: AliasSource,
        metadata: &Map<String, Value>,
    ) -> Result<ResolveOutcome, ResolveError> {
        if let Some(entity) = self.db.lookup_alias(entity_type, key)? {
            log::debug!("Alias hit: '{}' -> {}", name, entity.canonical_id);
            return Ok(ResolveOutcome::Matched(ResolvedEntity {
                canonical_id: entity.canonical_id,
                canonical_name: entity.canonical_name,
                score: 1.0,
            }));
        }

        if let Some(entity) = self.db.find_by_normalized_key(entity_type, key)? {
            self.db.with_transaction(|tx| -> Result<(), ResolveError> {
                tx.insert_alias(&entity.canonical_id, name, key, link_source, Some(1.0))?;
                Ok(())
            })?;
            log::debug!("Key hit: '{}' -> {}", name, entity.canonical_id);
            return Ok(ResolveOutcome::Matched(ResolvedEntity {
                canonical_id: entity.canonical_id,
                canonical_name: entity.canonical_name,
                score: 1.0,
            }));
        }

        let candidates = self.rank_candidates(name, entity_type, self.config.thresholds.review)?;

        if let Some(best) = candidates.first() {
            if best.score >= self.config.thresholds.auto_link {
                let best = best.clone();
                self.db.with_transaction(|tx| -> Result<(), ResolveError> {
                    if tx.get_entity(&best.canonical_id)?.is_none() {
                        return Err(ResolveError::Conflict(format!(
                            "{} was removed while resolving",
                            best.canonical_id
                        )));
                    }
                    tx.insert_alias(&best.canonical_id, name, key, link_source, Some(best.score))?;
                    Ok(())
                })?;
                log::info!(
                    "Auto-linked {} '{}' -> {} ({:.3})",
                    entity_type,
                    name,
                    best.canonical_id,
                    best.score
                );
                return Ok(ResolveOutcome::Matched(ResolvedEntity {
                    canonical_id: best.canonical_id,
                    canonical_name: best.canonical_name,
                    score: best.score,
                }));
            }

            let top: Vec<ScoredCandidate> = candidates
                .into_iter()
                .take(self.config.max_candidates)
                .collect();
            let snapshot: Vec<CandidateSnapshot> = top
                .iter()
                .map(|c| CandidateSnapshot {
                    canonical_id: c.canonical_id.clone(),
                    score: c.score,
                })
                .collect();
            let review_id = self.db.with_transaction(|tx| -> Result<i64, ResolveError> {
                if let Some(existing) = tx.find_pending_review(name, entity_type)? {
                    return Ok(existing.id);
                }
                Ok(tx.insert_review(name, entity_type, &snapshot, context)?.id)
            })?;
            log::info!(
                "Queued {} '{}' for review #{} ({} candidates)",
                entity_type,
                name,
                review_id,
                top.len()
            );
            return Ok(ResolveOutcome::Review(ReviewQueued {
                review_id,
                input_name: name.to_string(),
                candidates: top,
            }));
        }

        let entity = self
            .db
            .with_transaction(|tx| self.create_entity_in(tx, name, key, entity_type, metadata))?;
        Ok(ResolveOutcome::Created(ResolvedEntity {
            canonical_id: entity.canonical_id,
            canonical_name: entity.canonical_name,
            score: 0.0,
        }))
    }

    /// Insert a new entity plus its `canonical` self-alias. Must run inside a
    /// write transaction. A duplicate key surfaces as `Conflict`.
    pub(crate) fn create_entity_in(
        &self,
        tx: &EntityDb,
        name: &str,
        key: &str,
        entity_type: EntityType,
        metadata: &Map<String, Value>,
    ) -> Result<CanonicalEntity, ResolveError> {
        let mut metadata = metadata.clone();
        if entity_type == EntityType::Mill {
            self.annotate_mill(name, &mut metadata);
        }
        let entity = tx.insert_entity(entity_type, name, key, &metadata)?;
        tx.insert_alias(&entity.canonical_id, name, key, AliasSource::Canonical, Some(1.0))?;
        log::info!("Created {} {} '{}'", entity_type, entity.canonical_id, name);
        Ok(entity)
    }

    /// Company, city, state and region extracted from a mill name. Values
    /// already present are kept.
    fn annotate_mill(&self, name: &str, metadata: &mut Map<String, Value>) {
        let parts = self.scorer.extract_parts(name);
        if !parts.company.is_empty() {
            metadata.entry("company").or_insert_with(|| Value::from(parts.company.clone()));
        }
        if !parts.city.is_empty() {
            metadata.entry("city").or_insert_with(|| Value::from(parts.city.clone()));
        }
        if let Some(state) = parts.state {
            let region = self.config.dictionaries.region_for_state(&state).to_string();
            metadata.entry("state").or_insert_with(|| Value::from(state));
            metadata.entry("region").or_insert_with(|| Value::from(region));
        }
    }

    /// Score `name` against every entity of the type (canonical name and each
    /// alias, best wins). Keeps scores at or above `min_score`, best first.
    ///
    /// Past `prefilter_min_catalog` entities, only entities sharing a
    /// blocking key with `name` are scored.
    pub(crate) fn rank_candidates(
        &self,
        name: &str,
        entity_type: EntityType,
        min_score: f64,
    ) -> Result<Vec<ScoredCandidate>, ResolveError> {
        let entities = self.db.entities_of_type(entity_type)?;
        let mut aliases = self.db.alias_variants_by_entity(entity_type)?;

        let blocking: Option<HashSet<String>> = (entities.len() > self.config.prefilter_min_catalog)
            .then(|| self.scorer.blocking_keys(name));

        let mut ranked = Vec::new();
        for entity in entities {
            let variants = aliases.remove(&entity.canonical_id).unwrap_or_default();

            if let Some(keys) = &blocking {
                let shares_key = std::iter::once(&entity.canonical_name)
                    .chain(variants.iter())
                    .any(|v| !self.scorer.blocking_keys(v).is_disjoint(keys));
                if !shares_key {
                    continue;
                }
            }

            let best = std::iter::once(&entity.canonical_name)
                .chain(variants.iter())
                .map(|v| self.scorer.score(name, v, entity_type))
                .fold(0.0_f64, f64::max);

            if best >= min_score {
                ranked.push(ScoredCandidate {
                    canonical_id: entity.canonical_id,
                    canonical_name: entity.canonical_name,
                    score: best,
                    aliases: variants,
                    metadata: entity.metadata,
                });
            }
        }

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.canonical_id.cmp(&b.canonical_id))
        });
        Ok(ranked)
    }

    /// Fuzzy autocomplete. Read-only; never creates or links anything.
    pub fn search(
        &self,
        query: &str,
        entity_type: EntityType,
        limit: Option<usize>,
    ) -> Result<Vec<ScoredCandidate>, ResolveError> {
        if normalize(query).is_empty() {
            return Ok(Vec::new());
        }
        let mut results = self.rank_candidates(query.trim(), entity_type, self.config.thresholds.search)?;
        results.truncate(limit.unwrap_or(self.config.search_limit));
        Ok(results)
    }

    /// Trusted manual link of a variant to an entity. Bypasses scoring.
    /// Linking the same variant twice is a no-op.
    pub fn link_alias(&self, canonical_id: &str, variant: &str) -> Result<LinkedAlias, ResolveError> {
        let variant = variant.trim();
        let key = normalize(variant);
        if key.is_empty() {
            return Err(ResolveError::InvalidInput(format!(
                "alias {:?} has no letters or digits",
                variant
            )));
        }

        let inserted = self.db.with_transaction(|tx| -> Result<bool, ResolveError> {
            if tx.get_entity(canonical_id)?.is_none() {
                return Err(ResolveError::entity_not_found(canonical_id));
            }
            Ok(tx.relink_alias(canonical_id, variant, &key, AliasSource::Manual, Some(1.0))?)
        })?;
        if inserted {
            log::info!("Linked alias '{}' -> {}", variant, canonical_id);
        } else {
            log::debug!("Relinked alias '{}' -> {}", variant, canonical_id);
        }

        Ok(LinkedAlias {
            canonical_id: canonical_id.to_string(),
            variant: variant.to_string(),
            inserted,
        })
    }

    /// Change an entity's display name. The new name is registered as a
    /// `manual` alias; the normalized key stays as created.
    pub fn rename_entity(
        &self,
        canonical_id: &str,
        new_name: &str,
    ) -> Result<CanonicalEntity, ResolveError> {
        let new_name = new_name.trim();
        let key = normalize(new_name);
        if key.is_empty() {
            return Err(ResolveError::InvalidInput(format!(
                "name {:?} has no letters or digits",
                new_name
            )));
        }

        self.db.with_transaction(|tx| -> Result<CanonicalEntity, ResolveError> {
            if !tx.rename_entity(canonical_id, new_name)? {
                return Err(ResolveError::entity_not_found(canonical_id));
            }
            tx.relink_alias(canonical_id, new_name, &key, AliasSource::Manual, Some(1.0))?;
            tx.get_entity(canonical_id)?
                .ok_or_else(|| ResolveError::entity_not_found(canonical_id))
        })
    }

    /// Canonical record, aliases and every external record that refers to
    /// the entity: rows whose back-reference is set to it, plus unlinked
    /// rows whose name equals one of its aliases (case-insensitive).
    pub fn unified_view(&self, canonical_id: &str) -> Result<UnifiedView, ResolveError> {
        let canonical = self
            .db
            .get_entity(canonical_id)?
            .ok_or_else(|| ResolveError::entity_not_found(canonical_id))?;
        let aliases = self.db.aliases_for(canonical_id)?;

        let mut names: Vec<String> = aliases.iter().map(|a| a.variant.clone()).collect();
        names.push(canonical.canonical_name.clone());

        let mut sources = Vec::new();
        for source in self
            .config
            .sources
            .iter()
            .filter(|s| s.entity_type == canonical.entity_type)
        {
            let mut seen: HashSet<RecordKey> = HashSet::new();
            let mut records = Vec::new();
            let linked = self.db.records_linked_to(source, canonical_id)?;
            let by_name = self.db.unlinked_records_named(source, &names)?;
            for record in linked.into_iter().chain(by_name) {
                if seen.insert(record.key.clone()) {
                    records.push(record);
                }
            }
            sources.push(SourceRecords {
                label: source.label.clone(),
                records,
            });
        }

        Ok(UnifiedView {
            canonical,
            aliases,
            sources,
        })
    }

    pub fn stats(&self) -> Result<EntityStats, ResolveError> {
        Ok(self.db.stats()?)
    }

    /// Entity display names by id, for hydrating stored candidate snapshots.
    pub(crate) fn entity_names(
        &self,
        ids: impl IntoIterator<Item = String>,
    ) -> Result<HashMap<String, String>, ResolveError> {
        let mut names = HashMap::new();
        for id in ids {
            if names.contains_key(&id) {
                continue;
            }
            if let Some(entity) = self.db.get_entity(&id)? {
                names.insert(id, entity.canonical_name);
            }
        }
        Ok(names)
    }
}
