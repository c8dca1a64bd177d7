//! Human review queue: listing pending items and applying decisions.

use serde::Serialize;

use crate::entity::{AliasSource, EntityType};
use crate::error::ResolveError;
use crate::normalize::normalize;
use crate::resolver::Resolver;

/// What a reviewer decided for a pending item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    /// The input is a variant of this existing entity.
    Link(String),
    /// The input names a new entity.
    CreateNew,
}

impl ReviewDecision {
    /// Build a decision from the request shape `{chosenId?, createNew}`.
    /// Exactly one of the two must be given.
    pub fn from_request(chosen: Option<&str>, create_new: bool) -> Result<Self, ResolveError> {
        let chosen = chosen.map(str::trim);
        match (chosen, create_new) {
            (Some(""), _) => Err(ResolveError::InvalidInput(
                "chosen canonical id is blank".to_string(),
            )),
            (Some(_), true) => Err(ResolveError::InvalidInput(
                "choose an entity or create a new one, not both".to_string(),
            )),
            (Some(id), false) => Ok(ReviewDecision::Link(id.to_string())),
            (None, true) => Ok(ReviewDecision::CreateNew),
            (None, false) => Err(ResolveError::InvalidInput(
                "no decision: pass a chosen id or createNew".to_string(),
            )),
        }
    }
}

/// A stored candidate with its current display name. The name is `None`
/// when the entity no longer exists (merged away since the item was queued).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCandidate {
    pub canonical_id: String,
    pub canonical_name: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReview {
    pub id: i64,
    pub input_name: String,
    pub entity_type: EntityType,
    pub candidates: Vec<ReviewCandidate>,
    pub source_context: String,
    pub created_at: String,
}

/// Result of applying a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResolution {
    pub review_id: i64,
    pub canonical_id: String,
    pub canonical_name: String,
    /// True when the decision created a new entity.
    pub created: bool,
}

impl Resolver<'_> {
    /// Unresolved items, newest first.
    pub fn list_pending_reviews(&self) -> Result<Vec<PendingReview>, ResolveError> {
        let items = self.db.pending_reviews()?;
        let names = self.entity_names(
            items
                .iter()
                .flat_map(|item| item.candidates.iter().map(|c| c.canonical_id.clone())),
        )?;

        Ok(items
            .into_iter()
            .map(|item| PendingReview {
                candidates: item
                    .candidates
                    .into_iter()
                    .map(|c| ReviewCandidate {
                        canonical_name: names.get(&c.canonical_id).cloned(),
                        canonical_id: c.canonical_id,
                        score: c.score,
                    })
                    .collect(),
                id: item.id,
                input_name: item.input_name,
                entity_type: item.entity_type,
                source_context: item.source_context,
                created_at: item.created_at,
            })
            .collect())
    }

    /// Apply a reviewer's decision. The alias write and the resolution mark
    /// commit together; a review can only be resolved once.
    pub fn submit_review(
        &self,
        review_id: i64,
        decision: ReviewDecision,
    ) -> Result<ReviewResolution, ResolveError> {
        let resolution = self.db.with_transaction(|tx| -> Result<ReviewResolution, ResolveError> {
            let item = tx
                .get_review(review_id)?
                .ok_or_else(|| ResolveError::review_not_found(review_id))?;
            if let Some(resolved) = &item.resolved_id {
                return Err(ResolveError::Conflict(format!(
                    "review {} was already resolved to {}",
                    review_id, resolved
                )));
            }

            let key = normalize(&item.input_name);
            let (entity, created) = match decision {
                ReviewDecision::Link(chosen) => {
                    let entity = tx
                        .get_entity(&chosen)?
                        .ok_or_else(|| ResolveError::entity_not_found(&chosen))?;
                    if entity.entity_type != item.entity_type {
                        return Err(ResolveError::InvalidInput(format!(
                            "{} is a {}, review {} is for a {}",
                            chosen, entity.entity_type, review_id, item.entity_type
                        )));
                    }
                    tx.relink_alias(
                        &entity.canonical_id,
                        &item.input_name,
                        &key,
                        AliasSource::ManualReview,
                        None,
                    )?;
                    (entity, false)
                }
                ReviewDecision::CreateNew => {
                    match tx.find_by_normalized_key(item.entity_type, &key)? {
                        Some(existing) => {
                            tx.relink_alias(
                                &existing.canonical_id,
                                &item.input_name,
                                &key,
                                AliasSource::ManualReview,
                                None,
                            )?;
                            (existing, false)
                        }
                        None => {
                            let entity = self.create_entity_in(
                                tx,
                                &item.input_name,
                                &key,
                                item.entity_type,
                                &serde_json::Map::new(),
                            )?;
                            (entity, true)
                        }
                    }
                }
            };

            if !tx.mark_review_resolved(review_id, &entity.canonical_id)? {
                return Err(ResolveError::Conflict(format!(
                    "review {} was resolved concurrently",
                    review_id
                )));
            }

            Ok(ReviewResolution {
                review_id,
                canonical_id: entity.canonical_id,
                canonical_name: entity.canonical_name,
                created,
            })
        })?;

        log::info!(
            "Review #{} resolved to {}{}",
            review_id,
            resolution.canonical_id,
            if resolution.created { " (new entity)" } else { "" }
        );
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::config::ResolverConfig;
    use crate::db::test_utils::test_db;
    use crate::db::EntityDb;
    use crate::resolver::ResolveOutcome;

    fn queue_big_creek(resolver: &Resolver) -> (String, i64) {
        let target = resolver
            .resolve("Big Creek Pallets Inc", EntityType::Customer, "")
            .unwrap()
            .canonical_id()
            .unwrap()
            .to_string();
        match resolver
            .resolve("Big Creek Pallet", EntityType::Customer, "crm")
            .unwrap()
        {
            ResolveOutcome::Review(q) => (target, q.review_id),
            other => panic!("expected review, got {other:?}"),
        }
    }

    fn alias_count(db: &EntityDb) -> i64 {
        db.stats().unwrap().total_aliases
    }

    #[test]
    fn test_decision_from_request() {
        assert_eq!(
            ReviewDecision::from_request(Some(" cust_a "), false).unwrap(),
            ReviewDecision::Link("cust_a".into())
        );
        assert_eq!(
            ReviewDecision::from_request(None, true).unwrap(),
            ReviewDecision::CreateNew
        );
        for (chosen, create) in [(None, false), (Some("cust_a"), true), (Some("  "), false)] {
            assert!(matches!(
                ReviewDecision::from_request(chosen, create),
                Err(ResolveError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn test_list_pending_hydrates_candidate_names() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (target, review_id) = queue_big_creek(&resolver);

        let pending = resolver.list_pending_reviews().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, review_id);
        assert_eq!(pending[0].input_name, "Big Creek Pallet");
        assert_eq!(pending[0].source_context, "crm");
        assert_eq!(pending[0].candidates[0].canonical_id, target);
        assert_eq!(
            pending[0].candidates[0].canonical_name.as_deref(),
            Some("Big Creek Pallets Inc")
        );

        resolver.rename_entity(&target, "Big Creek Pallets Incorporated").unwrap();
        let pending = resolver.list_pending_reviews().unwrap();
        assert_eq!(
            pending[0].candidates[0].canonical_name.as_deref(),
            Some("Big Creek Pallets Incorporated")
        );
    }

    #[test]
    fn test_vanished_candidate_has_no_name() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (target, _) = queue_big_creek(&resolver);
        db.delete_aliases_for(&target).unwrap();
        db.delete_entity(&target).unwrap();

        let pending = resolver.list_pending_reviews().unwrap();
        assert_eq!(pending[0].candidates[0].canonical_id, target);
        assert!(pending[0].candidates[0].canonical_name.is_none());
    }

    #[test]
    fn test_link_decision_adds_manual_review_alias() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (target, review_id) = queue_big_creek(&resolver);

        let resolution = resolver
            .submit_review(review_id, ReviewDecision::Link(target.clone()))
            .unwrap();
        assert_eq!(resolution.canonical_id, target);
        assert!(!resolution.created);

        let alias = db
            .aliases_for(&target)
            .unwrap()
            .into_iter()
            .find(|a| a.variant == "Big Creek Pallet")
            .unwrap();
        assert_eq!(alias.source, AliasSource::ManualReview);
        assert_eq!(alias.score, None);

        let review = db.get_review(review_id).unwrap().unwrap();
        assert_eq!(review.resolved_id.as_deref(), Some(target.as_str()));
        assert!(resolver.list_pending_reviews().unwrap().is_empty());

        let outcome = resolver.resolve("big creek pallet", EntityType::Customer, "").unwrap();
        assert_eq!(outcome.canonical_id(), Some(target.as_str()));
    }

    #[test]
    fn test_resolved_review_cannot_be_submitted_again() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (target, review_id) = queue_big_creek(&resolver);
        resolver
            .submit_review(review_id, ReviewDecision::Link(target.clone()))
            .unwrap();
        let aliases = alias_count(&db);

        let err = resolver
            .submit_review(review_id, ReviewDecision::Link(target.clone()))
            .unwrap_err();
        assert!(matches!(err, ResolveError::Conflict(_)));
        let err = resolver.submit_review(review_id, ReviewDecision::CreateNew).unwrap_err();
        assert!(matches!(err, ResolveError::Conflict(_)));
        assert_eq!(alias_count(&db), aliases);
        assert_eq!(db.stats().unwrap().customer_entities, 1);
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (_, review_id) = queue_big_creek(&resolver);
        let aliases = alias_count(&db);

        let err = resolver.submit_review(9999, ReviewDecision::CreateNew).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { kind: "Review", .. }));

        let err = resolver
            .submit_review(review_id, ReviewDecision::Link("cust_missing".into()))
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { kind: "Entity", .. }));

        // Nothing written, the item is still pending
        assert_eq!(alias_count(&db), aliases);
        assert!(db.get_review(review_id).unwrap().unwrap().is_pending());
    }

    #[test]
    fn test_link_to_other_type_is_rejected() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (_, review_id) = queue_big_creek(&resolver);
        let mill = db
            .insert_entity(EntityType::Mill, "Big Creek", "big creek", &Map::new())
            .unwrap();

        let err = resolver
            .submit_review(review_id, ReviewDecision::Link(mill.canonical_id))
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidInput(_)));
    }

    #[test]
    fn test_create_new_decision() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (target, review_id) = queue_big_creek(&resolver);

        let resolution = resolver.submit_review(review_id, ReviewDecision::CreateNew).unwrap();
        assert!(resolution.created);
        assert_ne!(resolution.canonical_id, target);
        assert_eq!(resolution.canonical_name, "Big Creek Pallet");
        assert_eq!(db.stats().unwrap().customer_entities, 2);

        let outcome = resolver.resolve("Big Creek Pallet", EntityType::Customer, "").unwrap();
        assert_eq!(outcome.canonical_id(), Some(resolution.canonical_id.as_str()));
    }

    #[test]
    fn test_create_new_links_entity_that_appeared_meanwhile() {
        let db = test_db();
        let config = ResolverConfig::default();
        let resolver = Resolver::new(&db, &config);
        let (_, review_id) = queue_big_creek(&resolver);
        let appeared = db
            .insert_entity(EntityType::Customer, "BIG CREEK PALLET", "big creek pallet", &Map::new())
            .unwrap();

        let resolution = resolver.submit_review(review_id, ReviewDecision::CreateNew).unwrap();
        assert!(!resolution.created);
        assert_eq!(resolution.canonical_id, appeared.canonical_id);
        assert_eq!(db.stats().unwrap().customer_entities, 2);
    }
}
