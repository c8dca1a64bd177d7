//! Merging a duplicate entity into the one that survives.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::entity::AliasSource;
use crate::error::ResolveError;
use crate::normalize::normalize;
use crate::resolver::Resolver;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub source_id: String,
    pub target_id: String,
    pub target_name: String,
    /// Alias rows carried over from the source (including its display name).
    pub merged_aliases: usize,
    /// External rows re-pointed, by source label.
    pub repointed: BTreeMap<String, usize>,
    pub reviews_repointed: usize,
}

impl Resolver<'_> {
    /// Fold `source_id` into `target_id`. Every alias of the source ends up
    /// on the target, every back-reference moves, and the source is deleted.
    /// All of it commits or none of it does.
    pub fn merge_entities(
        &self,
        source_id: &str,
        target_id: &str,
    ) -> Result<MergeReport, ResolveError> {
        if source_id == target_id {
            return Err(ResolveError::InvalidInput(format!(
                "cannot merge {} into itself",
                source_id
            )));
        }

        let report = self.db.with_transaction(|tx| -> Result<MergeReport, ResolveError> {
            let source = tx
                .get_entity(source_id)?
                .ok_or_else(|| ResolveError::entity_not_found(source_id))?;
            let target = tx
                .get_entity(target_id)?
                .ok_or_else(|| ResolveError::entity_not_found(target_id))?;
            if source.entity_type != target.entity_type {
                return Err(ResolveError::InvalidInput(format!(
                    "cannot merge {} {} into {} {}",
                    source.entity_type, source_id, target.entity_type, target_id
                )));
            }

            let mut merged_aliases = tx.copy_aliases(source_id, target_id)?;
            let name_key = normalize(&source.canonical_name);
            if !name_key.is_empty()
                && tx.relink_alias(
                    target_id,
                    &source.canonical_name,
                    &name_key,
                    AliasSource::Merge,
                    None,
                )?
            {
                merged_aliases += 1;
            }

            let mut repointed = BTreeMap::new();
            for linked in self
                .config
                .sources
                .iter()
                .filter(|s| s.entity_type == source.entity_type)
            {
                let moved = tx.repoint_records(linked, source_id, target_id)?;
                repointed.insert(linked.label.clone(), moved);
            }
            let reviews_repointed = tx.repoint_reviews(source_id, target_id)?;

            tx.delete_aliases_for(source_id)?;
            tx.delete_entity(source_id)?;

            Ok(MergeReport {
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
                target_name: target.canonical_name,
                merged_aliases,
                repointed,
                reviews_repointed,
            })
        })?;

        log::info!(
            "Merged {} into {} ({} aliases, {} reviews)",
            source_id,
            target_id,
            report.merged_aliases,
            report.reviews_repointed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::config::ResolverConfig;
    use crate::db::test_utils::test_db;
    use crate::db::{EntityDb, LinkedSource};
    use crate::entity::EntityType;
    use crate::review::ReviewDecision;

    fn mill(db: &EntityDb, name: &str) -> String {
        db.insert_entity(EntityType::Mill, name, &normalize(name), &Map::new())
            .unwrap()
            .canonical_id
    }

    #[test]
    fn test_every_source_alias_resolves_to_target_after_merge() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let gp = resolver
            .resolve("Georgia Pacific - Gurdon", EntityType::Mill, "")
            .unwrap()
            .canonical_id()
            .unwrap()
            .to_string();
        let dup = mill(&db, "GP Gurdon AR");
        resolver.link_alias(&dup, "G.P. Gurdon").unwrap();
        resolver.link_alias(&dup, "Gurdon Plywood").unwrap();

        let report = resolver.merge_entities(&dup, &gp).unwrap();
        assert_eq!(report.target_id, gp);
        assert_eq!(report.target_name, "Georgia Pacific - Gurdon");
        assert!(report.merged_aliases >= 3);

        assert!(db.get_entity(&dup).unwrap().is_none());
        assert!(db.aliases_for(&dup).unwrap().is_empty());
        for name in ["GP Gurdon AR", "G.P. Gurdon", "gurdon plywood"] {
            let outcome = resolver.resolve(name, EntityType::Mill, "").unwrap();
            assert_eq!(outcome.canonical_id(), Some(gp.as_str()), "{name}");
        }
    }

    #[test]
    fn test_merge_wins_over_older_third_entity_alias() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let customer = |name: &str| {
            db.insert_entity(EntityType::Customer, name, &normalize(name), &Map::new())
                .unwrap()
                .canonical_id
        };
        let acme = customer("Acme");
        let zeta = customer("Zeta Trading");
        let omega = customer("Omega Partners");
        resolver.link_alias(&acme, "Acme").unwrap();
        resolver.link_alias(&zeta, "Acme").unwrap();
        resolver.link_alias(&omega, "Acme").unwrap();
        assert_eq!(
            resolver.resolve("acme", EntityType::Customer, "").unwrap().canonical_id(),
            Some(omega.as_str())
        );

        resolver.merge_entities(&omega, &acme).unwrap();

        for name in ["acme", "Omega Partners"] {
            let outcome = resolver.resolve(name, EntityType::Customer, "").unwrap();
            assert_eq!(outcome.canonical_id(), Some(acme.as_str()), "{name}");
        }
        assert_eq!(db.aliases_for(&zeta).unwrap().len(), 1);
    }

    #[test]
    fn test_merge_preserves_alias_provenance() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let target = mill(&db, "Canfor");
        let source = mill(&db, "Canfor Southern Pine");
        db.insert_alias(&source, "CSP", "csp", AliasSource::Dictionary, Some(1.0))
            .unwrap();
        db.insert_alias(&source, "Canfr", "canfr", AliasSource::Auto, Some(0.93))
            .unwrap();

        resolver.merge_entities(&source, &target).unwrap();

        let aliases = db.aliases_for(&target).unwrap();
        let csp = aliases.iter().find(|a| a.variant == "CSP").unwrap();
        assert_eq!(csp.source, AliasSource::Dictionary);
        let canfr = aliases.iter().find(|a| a.variant == "Canfr").unwrap();
        assert_eq!(canfr.source, AliasSource::Auto);
        assert_eq!(canfr.score, Some(0.93));
        let name = aliases
            .iter()
            .find(|a| a.variant == "Canfor Southern Pine")
            .unwrap();
        assert_eq!(name.source, AliasSource::Merge);
    }

    #[test]
    fn test_merge_repoints_sources_and_reviews() {
        let db = test_db();
        db.conn_ref()
            .execute_batch(
                "CREATE TABLE mills (id INTEGER PRIMARY KEY, name TEXT, canonical_id TEXT);",
            )
            .unwrap();
        let mut config = ResolverConfig::default();
        config.sources = vec![LinkedSource::new("crm_mills", EntityType::Mill, "mills")];
        let resolver = Resolver::new(&db, &config);

        let target = mill(&db, "West Fraser - Huttig");
        let source = mill(&db, "WF Huttig");
        db.conn_ref()
            .execute_batch(&format!(
                "INSERT INTO mills (id, name, canonical_id) VALUES
                    (1, 'WF Huttig', '{source}'),
                    (2, 'WF - Huttig AR', '{source}'),
                    (3, 'West Fraser Huttig', '{target}');"
            ))
            .unwrap();
        let review = db.insert_review("W.F. Huttig", EntityType::Mill, &[], "").unwrap();
        resolver
            .submit_review(review.id, ReviewDecision::Link(source.clone()))
            .unwrap();

        let report = resolver.merge_entities(&source, &target).unwrap();
        assert_eq!(report.repointed.get("crm_mills"), Some(&2));
        assert_eq!(report.reviews_repointed, 1);

        let linked = db.records_linked_to(&config.sources[0], &target).unwrap();
        assert_eq!(linked.len(), 3);
        assert_eq!(
            db.get_review(review.id).unwrap().unwrap().resolved_id.as_deref(),
            Some(target.as_str())
        );
    }

    #[test]
    fn test_invalid_merges_change_nothing() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let a = mill(&db, "Interfor - Monticello");
        let cust = db
            .insert_entity(EntityType::Customer, "Interfor", "interfor", &Map::new())
            .unwrap()
            .canonical_id;
        let before = db.stats().unwrap();

        assert!(matches!(
            resolver.merge_entities(&a, &a),
            Err(ResolveError::InvalidInput(_))
        ));
        assert!(matches!(
            resolver.merge_entities(&a, &cust),
            Err(ResolveError::InvalidInput(_))
        ));
        assert!(matches!(
            resolver.merge_entities("mill_missing", &a),
            Err(ResolveError::NotFound { .. })
        ));
        assert!(matches!(
            resolver.merge_entities(&a, "mill_missing"),
            Err(ResolveError::NotFound { .. })
        ));
        assert_eq!(db.stats().unwrap(), before);
    }

    #[test]
    fn test_failed_source_update_rolls_back_merge() {
        let db = test_db();
        let mut config = ResolverConfig::default();
        // Table does not exist, so the re-point step fails mid-transaction
        config.sources = vec![LinkedSource::new("missing", EntityType::Mill, "no_such_table")];
        let resolver = Resolver::new(&db, &config);
        let target = mill(&db, "Rex Lumber - Bristol");
        let source = mill(&db, "Rex Bristol");

        let err = resolver.merge_entities(&source, &target).unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable(_)));
        assert!(db.get_entity(&source).unwrap().is_some());
        assert!(db.aliases_for(&target).unwrap().is_empty());
    }
}
