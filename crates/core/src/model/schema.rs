use std::collections::HashSet;

use crate::Error;
use crate::model::{ProgressMap, SectionId};

/// Version of the built-in section catalog.
pub const CATALOG_VERSION: u32 = 1;

const CATALOG: [&str; 34] = [
    "es6-const-let",
    "es6-arrow-functions",
    "es6-destructuring",
    "es6-object-shorthand",
    "es6-array-methods",
    "es6-promise",
    "es6-async-await",
    "lifecycle-hooks",
    "lifecycle-parent-child",
    "lifecycle-cleanup",
    "directives-v-bind",
    "directives-v-if-show",
    "directives-v-for",
    "directives-v-on",
    "directives-v-model",
    "computed-basics",
    "computed-watch",
    "custom-directives-basics",
    "custom-directives-practical",
    "components-register",
    "components-props",
    "components-emit",
    "components-slots",
    "components-refs",
    "router-navigation",
    "router-dynamic",
    "router-nested",
    "router-guards",
    "vuex-state-getters",
    "vuex-mutations-actions",
    "vuex-modules",
    "axios-requests",
    "axios-interceptors",
    "axios-encapsulation",
];

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    #[error("schema has no sections")]
    Empty,

    #[error("duplicate section id in schema: {0}")]
    Duplicate(SectionId),
}

/// Ordered whitelist of the section ids that count towards progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSchema {
    version: u32,
    sections: Vec<SectionId>,
    index: HashSet<SectionId>,
}

impl ProgressSchema {
    /// Build a schema from an ordered list of ids.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Empty` for an empty list and
    /// `SchemaError::Duplicate` if an id appears twice.
    pub fn new(
        version: u32,
        sections: impl IntoIterator<Item = SectionId>,
    ) -> Result<Self, SchemaError> {
        let sections: Vec<SectionId> = sections.into_iter().collect();
        if sections.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut index = HashSet::with_capacity(sections.len());
        for id in &sections {
            if !index.insert(id.clone()) {
                return Err(SchemaError::Duplicate(id.clone()));
            }
        }

        Ok(Self {
            version,
            sections,
            index,
        })
    }

    /// Build a schema from raw keys, validating each one.
    ///
    /// # Errors
    ///
    /// Returns `Error::SectionId` for an invalid key, or `Error::Schema` if the
    /// resulting list is empty or has duplicates.
    pub fn from_keys<S: AsRef<str>>(version: u32, keys: &[S]) -> Result<Self, Error> {
        let sections = keys
            .iter()
            .map(|key| SectionId::new(key.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(version, sections)?)
    }

    /// The built-in learning catalog.
    #[must_use]
    pub fn catalog() -> Self {
        let sections = CATALOG
            .iter()
            .filter_map(|raw| SectionId::new(*raw).ok())
            .collect::<Vec<_>>();
        let index = sections.iter().cloned().collect();
        Self {
            version: CATALOG_VERSION,
            sections,
            index,
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &SectionId) -> bool {
        self.index.contains(id)
    }

    /// Section ids in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &SectionId> {
        self.sections.iter()
    }

    /// Fresh map with every schema key present and set to `false`.
    #[must_use]
    pub fn default_map(&self) -> ProgressMap {
        ProgressMap::from_schema(self)
    }
}
