//! Bulk seed of the entity store from the static dictionaries and the
//! existing external tables.
//!
//! Phases, in order:
//! 1. Mill directory entries become mill entities (city, state, region).
//! 2. Mill company aliases attach to company-level mill entities that exist.
//! 3. Customer aliases attach to customer entities, created when missing.
//! 4. Every unlinked row of every linked source goes through the resolver.
//!
//! Safe to run repeatedly: seeded entities are found by key, alias inserts
//! ignore duplicates, and phase 4 only reads rows without a back-reference.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::db::LinkedSource;
use crate::dictionaries::Dictionaries;
use crate::entity::{AliasSource, EntityType};
use crate::error::{ErrorResponse, ResolveError};
use crate::normalize::normalize;
use crate::resolver::{ResolveOutcome, Resolver};

/// Per-source counts from phase 4.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStats {
    /// Rows whose back-reference was written.
    pub linked: usize,
    /// Rows left unlinked because they went to review.
    pub queued: usize,
    /// Rows with no usable name.
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStats {
    pub entities_created: usize,
    pub aliases_created: usize,
    pub reviews_queued: usize,
    pub sources: BTreeMap<String, SourceStats>,
}

/// A failed migration with the progress made before the failure. Completed
/// phases and already-linked rows stay committed.
#[derive(Debug, Error)]
#[error("migration stopped after creating {} entities: {source}", .stats.entities_created)]
pub struct MigrationError {
    pub stats: MigrationStats,
    #[source]
    pub source: ResolveError,
}

/// Machine-readable form of a failed run: the partial counts plus the
/// classified error.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport<'a> {
    pub stats: &'a MigrationStats,
    pub error: ErrorResponse,
}

impl MigrationError {
    pub fn report(&self) -> FailureReport<'_> {
        FailureReport {
            stats: &self.stats,
            error: ErrorResponse::from(&self.source),
        }
    }
}

/// Run all four phases. See the module docs for what each one does.
pub fn migrate_existing(
    resolver: &Resolver,
    dictionaries: &Dictionaries,
    sources: &[LinkedSource],
) -> Result<MigrationStats, MigrationError> {
    let mut stats = MigrationStats::default();
    let aliases_before = match resolver.stats() {
        Ok(s) => s.total_aliases,
        Err(source) => return Err(MigrationError { stats, source }),
    };

    let result = seed_mill_directory(resolver, dictionaries, &mut stats)
        .and_then(|_| seed_mill_company_aliases(resolver, dictionaries))
        .and_then(|_| seed_customer_aliases(resolver, dictionaries, &mut stats))
        .and_then(|_| {
            for source in sources {
                link_source(resolver, source, &mut stats)?;
            }
            Ok(())
        });

    if let Ok(after) = resolver.stats() {
        stats.aliases_created = usize::try_from(after.total_aliases - aliases_before).unwrap_or(0);
    }

    match result {
        Ok(()) => {
            log::info!(
                "Migration complete: {} entities, {} aliases, {} reviews queued",
                stats.entities_created,
                stats.aliases_created,
                stats.reviews_queued
            );
            Ok(stats)
        }
        Err(source) => {
            log::error!("Migration failed: {}", source);
            Err(MigrationError { stats, source })
        }
    }
}

fn seed_mill_directory(
    resolver: &Resolver,
    dictionaries: &Dictionaries,
    stats: &mut MigrationStats,
) -> Result<(), ResolveError> {
    let created = resolver.db().with_transaction(|tx| -> Result<usize, ResolveError> {
        let mut created = 0;
        for (name, location) in &dictionaries.mill_directory {
            let key = normalize(name);
            if key.is_empty() || tx.find_by_normalized_key(EntityType::Mill, &key)?.is_some() {
                continue;
            }
            let mut metadata = Map::new();
            metadata.insert("city".into(), Value::from(location.city.clone()));
            metadata.insert("state".into(), Value::from(location.state.clone()));
            metadata.insert(
                "region".into(),
                Value::from(dictionaries.region_for_state(&location.state)),
            );
            resolver.create_entity_in(tx, name.trim(), &key, EntityType::Mill, &metadata)?;
            created += 1;
        }
        Ok(created)
    })?;
    log::info!("Mill directory: {} entities created", created);
    stats.entities_created += created;
    Ok(())
}

fn seed_mill_company_aliases(
    resolver: &Resolver,
    dictionaries: &Dictionaries,
) -> Result<(), ResolveError> {
    let added = resolver.db().with_transaction(|tx| -> Result<usize, ResolveError> {
        let mut added = 0;
        for (variant, company) in &dictionaries.mill_company_aliases {
            let variant_key = normalize(variant);
            if variant_key.is_empty() {
                continue;
            }
            let Some(entity) = tx.find_by_normalized_key(EntityType::Mill, &normalize(company))? else {
                continue;
            };
            if tx.insert_alias(
                &entity.canonical_id,
                variant,
                &variant_key,
                AliasSource::Dictionary,
                Some(1.0),
            )? {
                added += 1;
            }
        }
        Ok(added)
    })?;
    log::info!("Mill company aliases: {} added", added);
    Ok(())
}

fn seed_customer_aliases(
    resolver: &Resolver,
    dictionaries: &Dictionaries,
    stats: &mut MigrationStats,
) -> Result<(), ResolveError> {
    let created = resolver.db().with_transaction(|tx| -> Result<usize, ResolveError> {
        let mut created = 0;
        for (variant, canonical_name) in &dictionaries.customer_aliases {
            let key = normalize(canonical_name);
            let variant_key = normalize(variant);
            if key.is_empty() || variant_key.is_empty() {
                continue;
            }
            let entity = match tx.find_by_normalized_key(EntityType::Customer, &key)? {
                Some(entity) => entity,
                None => {
                    created += 1;
                    resolver.create_entity_in(
                        tx,
                        canonical_name.trim(),
                        &key,
                        EntityType::Customer,
                        &Map::new(),
                    )?
                }
            };
            tx.insert_alias(
                &entity.canonical_id,
                variant,
                &variant_key,
                AliasSource::Dictionary,
                Some(1.0),
            )?;
        }
        Ok(created)
    })?;
    log::info!("Customer aliases: {} entities created", created);
    stats.entities_created += created;
    Ok(())
}

fn link_source(
    resolver: &Resolver,
    source: &LinkedSource,
    stats: &mut MigrationStats,
) -> Result<(), ResolveError> {
    let records = resolver.db().unlinked_records(source)?;
    let context = format!("migration:{}", source.label);
    log::info!("Source '{}': {} unlinked rows", source.label, records.len());

    for record in records {
        if normalize(&record.name).is_empty() {
            log::warn!("Source '{}': row {:?} has no usable name", source.label, record.key);
            stats.sources.entry(source.label.clone()).or_default().skipped += 1;
            continue;
        }

        let outcome = resolver.resolve_with(
            &record.name,
            source.entity_type,
            &context,
            AliasSource::Migration,
            &record.metadata,
        )?;
        let entry = stats.sources.entry(source.label.clone()).or_default();
        match outcome {
            ResolveOutcome::Matched(entity) => {
                resolver
                    .db()
                    .set_record_canonical(source, &record.key, &entity.canonical_id)?;
                entry.linked += 1;
            }
            ResolveOutcome::Created(entity) => {
                resolver
                    .db()
                    .set_record_canonical(source, &record.key, &entity.canonical_id)?;
                entry.linked += 1;
                stats.entities_created += 1;
            }
            ResolveOutcome::Review(_) => {
                entry.queued += 1;
                stats.reviews_queued += 1;
            }
        }
    }
    Ok(())
}
