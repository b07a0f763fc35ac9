use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ProgressSchema, SectionId};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("persisted progress is not an object of section flags: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// What to do with persisted keys that the current schema no longer knows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaDriftPolicy {
    /// Keep foreign keys in the map; metrics ignore them.
    #[default]
    Retain,
    /// Discard foreign keys while loading.
    Drop,
}

/// Result of merging persisted data over the schema defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub map: ProgressMap,
    /// Valid ids found in storage that are not part of the schema.
    pub foreign: Vec<SectionId>,
    /// Raw keys that are not canonical section ids (blank, padded, or containing spaces).
    pub rejected: Vec<String>,
}

/// Section id → "completed" flag. This is the durable state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgressMap(BTreeMap<SectionId, bool>);

impl ProgressMap {
    /// Every schema key present, every flag `false`.
    #[must_use]
    pub fn from_schema(schema: &ProgressSchema) -> Self {
        Self(schema.iter().map(|id| (id.clone(), false)).collect())
    }

    /// Parse the persisted blob without validating keys.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Malformed` if `raw` is not a JSON object whose
    /// values are all booleans.
    pub fn parse_persisted(raw: &str) -> Result<BTreeMap<String, bool>, ProgressError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Merge persisted flags over the schema defaults.
    ///
    /// Schema keys take the persisted value when present. Keys outside the
    /// schema are kept or dropped according to `policy` and always reported.
    #[must_use]
    pub fn reconcile(
        schema: &ProgressSchema,
        persisted: BTreeMap<String, bool>,
        policy: SchemaDriftPolicy,
    ) -> Reconciled {
        let mut map = Self::from_schema(schema);
        let mut foreign = Vec::new();
        let mut rejected = Vec::new();

        for (raw, completed) in persisted {
            // Keys must already be canonical; a padded key is not an alias.
            let id = match SectionId::new(raw.as_str()) {
                Ok(id) if id.as_str() == raw => id,
                _ => {
                    rejected.push(raw);
                    continue;
                }
            };
            if schema.contains(&id) {
                map.0.insert(id, completed);
                continue;
            }
            if policy == SchemaDriftPolicy::Retain {
                map.0.insert(id.clone(), completed);
            }
            foreign.push(id);
        }

        Reconciled {
            map,
            foreign,
            rejected,
        }
    }

    /// Serialize the full map for persistence.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Malformed` if serialization fails.
    pub fn to_json(&self) -> Result<String, ProgressError> {
        Ok(serde_json::to_string(&self.0)?)
    }

    #[must_use]
    pub fn get(&self, id: &SectionId) -> Option<bool> {
        self.0.get(id).copied()
    }

    #[must_use]
    pub fn is_completed(&self, id: &SectionId) -> bool {
        self.get(id).unwrap_or(false)
    }

    #[must_use]
    pub fn contains(&self, id: &SectionId) -> bool {
        self.0.contains_key(id)
    }

    /// Update the flag of a key already in the map and return its previous value.
    ///
    /// Unknown keys are never inserted; `None` is returned instead.
    pub fn set(&mut self, id: &SectionId, completed: bool) -> Option<bool> {
        let slot = self.0.get_mut(id)?;
        let previous = *slot;
        *slot = completed;
        Some(previous)
    }

    /// Set every flag, foreign keys included, back to `false`.
    pub fn clear_all(&mut self) {
        for completed in self.0.values_mut() {
            *completed = false;
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&SectionId, bool)> {
        self.0.iter().map(|(id, completed)| (id, *completed))
    }

    /// Keys present in the map that the schema does not define.
    #[must_use]
    pub fn foreign_keys(&self, schema: &ProgressSchema) -> Vec<SectionId> {
        self.0
            .keys()
            .filter(|id| !schema.contains(id))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Derived completion numbers. Recomputed on demand, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompletionMetrics {
    pub completed: usize,
    pub total: usize,
    pub percent: u8,
}

impl CompletionMetrics {
    /// Count completed sections. Only schema keys are considered.
    #[must_use]
    pub fn compute(map: &ProgressMap, schema: &ProgressSchema) -> Self {
        let total = schema.len();
        let completed = schema.iter().filter(|id| map.is_completed(id)).count();
        Self {
            completed,
            total,
            percent: rounded_percent(completed, total),
        }
    }
}

// Half-up rounding in integers, same result as round(100 * c / t) for c <= t.
fn rounded_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = completed.min(total);
    let pct = (200 * completed + total) / (2 * total);
    u8::try_from(pct).unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(raw: &str) -> SectionId {
        SectionId::new(raw).unwrap()
    }

    fn small_schema() -> ProgressSchema {
        ProgressSchema::new(1, vec![id("a"), id("b"), id("c")]).unwrap()
    }

    #[test]
    fn reconcile_restores_persisted_flag_over_catalog() {
        let schema = ProgressSchema::catalog();
        let persisted = ProgressMap::parse_persisted(r#"{"es6-const-let": true}"#).unwrap();
        let reconciled = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Retain);

        assert!(reconciled.foreign.is_empty());
        assert_eq!(reconciled.map.len(), 34);
        assert_eq!(reconciled.map.get(&id("es6-const-let")), Some(true));
        assert_eq!(reconciled.map.get(&id("vuex-modules")), Some(false));

        let metrics = CompletionMetrics::compute(&reconciled.map, &schema);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.total, 34);
        assert_eq!(metrics.percent, 3);
    }

    #[test]
    fn retain_policy_keeps_foreign_keys_out_of_metrics() {
        let schema = small_schema();
        let persisted =
            ProgressMap::parse_persisted(r#"{"a": true, "legacy": true, "old-one": true}"#)
                .unwrap();
        let reconciled = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Retain);

        assert_eq!(reconciled.foreign, vec![id("legacy"), id("old-one")]);
        assert!(reconciled.map.contains(&id("legacy")));
        assert_eq!(reconciled.map.foreign_keys(&schema).len(), 2);

        let metrics = CompletionMetrics::compute(&reconciled.map, &schema);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.percent, 33);
    }

    #[test]
    fn drop_policy_discards_foreign_keys() {
        let schema = small_schema();
        let persisted = ProgressMap::parse_persisted(r#"{"b": true, "legacy": true}"#).unwrap();
        let reconciled = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Drop);

        assert_eq!(reconciled.foreign, vec![id("legacy")]);
        assert!(!reconciled.map.contains(&id("legacy")));
        assert_eq!(reconciled.map, {
            let mut expected = schema.default_map();
            expected.set(&id("b"), true);
            expected
        });
    }

    #[test]
    fn padded_keys_never_override_exact_keys() {
        let schema = ProgressSchema::catalog();
        let persisted = ProgressMap::parse_persisted(
            r#"{"es6-const-let": true, "es6-const-let ": false, " vuex-modules": true}"#,
        )
        .unwrap();
        let reconciled = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Retain);

        assert_eq!(reconciled.map.get(&id("es6-const-let")), Some(true));
        assert_eq!(reconciled.map.get(&id("vuex-modules")), Some(false));
        assert!(reconciled.foreign.is_empty());
        assert_eq!(
            reconciled.rejected,
            vec![" vuex-modules".to_owned(), "es6-const-let ".to_owned()]
        );
        assert_eq!(CompletionMetrics::compute(&reconciled.map, &schema).completed, 1);
    }

    #[test]
    fn invalid_keys_are_rejected_not_inserted() {
        let schema = small_schema();
        let persisted = ProgressMap::parse_persisted(r#"{"": true, "two words": true}"#).unwrap();
        let reconciled = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Retain);

        assert_eq!(reconciled.rejected.len(), 2);
        assert_eq!(reconciled.map, schema.default_map());
    }

    #[test]
    fn parse_rejects_wrong_shapes() {
        assert!(ProgressMap::parse_persisted("not json").is_err());
        assert!(ProgressMap::parse_persisted("[true, false]").is_err());
        assert!(ProgressMap::parse_persisted(r#"{"a": "yes"}"#).is_err());
    }

    #[test]
    fn json_blob_matches_persisted_shape() {
        let schema = small_schema();
        let mut map = schema.default_map();
        map.set(&id("c"), true);

        let json = map.to_json().unwrap();
        assert_eq!(json, r#"{"a":false,"b":false,"c":true}"#);
        let persisted = ProgressMap::parse_persisted(&json).unwrap();
        let reconciled = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Retain);
        assert_eq!(reconciled.map, map);
    }

    #[test]
    fn set_never_inserts_unknown_keys() {
        let mut map = small_schema().default_map();
        assert_eq!(map.set(&id("zzz"), true), None);
        assert!(!map.contains(&id("zzz")));
        assert_eq!(map.set(&id("a"), true), Some(false));
        assert_eq!(map.set(&id("a"), true), Some(true));
    }

    #[test]
    fn clear_all_includes_foreign_keys() {
        let schema = small_schema();
        let persisted = ProgressMap::parse_persisted(r#"{"a": true, "legacy": true}"#).unwrap();
        let mut map = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Retain).map;

        map.clear_all();
        assert!(map.entries().all(|(_, completed)| !completed));
        assert_eq!(CompletionMetrics::compute(&map, &schema).percent, 0);
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(rounded_percent(0, 0), 0);
        assert_eq!(rounded_percent(1, 8), 13);
        assert_eq!(rounded_percent(1, 3), 33);
        assert_eq!(rounded_percent(2, 3), 67);
        assert_eq!(rounded_percent(34, 34), 100);
    }

    proptest! {
        #[test]
        fn metrics_stay_bounded(
            schema_flags in proptest::collection::vec(any::<bool>(), 1..40),
            foreign_count in 0usize..20,
        ) {
            let ids: Vec<SectionId> = (0..schema_flags.len())
                .map(|i| id(&format!("section-{i}")))
                .collect();
            let schema = ProgressSchema::new(1, ids.clone()).unwrap();

            let mut persisted: BTreeMap<String, bool> = ids
                .iter()
                .zip(&schema_flags)
                .map(|(id, flag)| (id.to_string(), *flag))
                .collect();
            for i in 0..foreign_count {
                persisted.insert(format!("foreign-{i}"), true);
            }

            let map = ProgressMap::reconcile(&schema, persisted, SchemaDriftPolicy::Retain).map;
            let metrics = CompletionMetrics::compute(&map, &schema);
            let expected = schema_flags.iter().filter(|flag| **flag).count();

            prop_assert!(metrics.percent <= 100);
            prop_assert_eq!(metrics.completed, expected);
            prop_assert!(metrics.completed <= metrics.total);
        }
    }
}
