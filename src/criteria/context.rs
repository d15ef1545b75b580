use std::collections::BTreeMap;

use super::Criteria;

/// What to load alongside the matched records: a projection, eager-loaded
/// relations and relation counts, each relation optionally scoped by its
/// own criteria.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadContext {
    attributes: Vec<String>,
    relations: BTreeMap<String, Option<Criteria>>,
    relation_counts: BTreeMap<String, Option<Criteria>>,
}

impl LoadContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes to load, in first-seen order. Empty means all.
    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    #[must_use]
    pub const fn relations(&self) -> &BTreeMap<String, Option<Criteria>> {
        &self.relations
    }

    #[must_use]
    pub const fn relation_counts(&self) -> &BTreeMap<String, Option<Criteria>> {
        &self.relation_counts
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.relations.is_empty() && self.relation_counts.is_empty()
    }

    pub fn set_attributes<I, S>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.clear();
        for attribute in attributes {
            let attribute = attribute.into();
            if !self.attributes.contains(&attribute) {
                self.attributes.push(attribute);
            }
        }
        self
    }

    /// Load `relation` (dotted for nested relations), replacing any earlier
    /// criteria given for it.
    pub fn add_relation(&mut self, relation: impl Into<String>, criteria: Option<Criteria>) -> &mut Self {
        self.relations.insert(relation.into(), criteria);
        self
    }

    pub fn set_relations<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, Option<Criteria>)>,
        S: Into<String>,
    {
        self.relations = relations.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }

    pub fn add_relation_count(&mut self, relation: impl Into<String>, criteria: Option<Criteria>) -> &mut Self {
        self.relation_counts.insert(relation.into(), criteria);
        self
    }

    pub fn set_relation_counts<I, S>(&mut self, relations: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, Option<Criteria>)>,
        S: Into<String>,
    {
        self.relation_counts = relations.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self
    }
}
