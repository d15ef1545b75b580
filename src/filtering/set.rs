use tracing::warn;

use super::{
    codec::{decode_filters_with_depth, encode_filters},
    factory::FilterFactory,
    node::{FilterData, FilterNode, Group, GroupMode},
    operator::BooleanOperator,
    optimizer::optimize,
    value::Value,
};
use crate::errors::{CriteriaError, Result};

///
/// FilterSet
///
/// The filtering capability of an aggregate: one optional filter tree plus
/// the setters that fill it from raw strings, JSON, or builder calls.
///
/// Raw and structured input is decoded, validated and optimized before it is
/// stored. Builder calls (`where_`, `or_where`) append one validated
/// predicate to the plain root group without re-optimizing.
///

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    root: Option<FilterNode>,
}

impl FilterSet {
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    #[must_use]
    pub const fn get(&self) -> Option<&FilterNode> {
        self.root.as_ref()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Replace the tree as given.
    pub fn set(&mut self, filters: Option<FilterNode>) -> &mut Self {
        self.root = filters;
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.root = None;
        self
    }

    /// Decode, validate and optimize a raw filter string.
    pub fn set_raw(&mut self, raw: &str, factory: &FilterFactory) -> Result<&mut Self> {
        let items = decode_filters_with_depth(raw, factory.max_depth()).inspect_err(|error| {
            warn!(%error, raw, "rejected filter string");
        })?;
        self.set_data(&items, factory)
    }

    /// Validate and optimize a JSON array of filter items.
    pub fn set_json(&mut self, json: &serde_json::Value, factory: &FilterFactory) -> Result<&mut Self> {
        let items = items_from_json(json).inspect_err(|error| {
            warn!(%error, "rejected filter json");
        })?;
        self.set_data(&items, factory)
    }

    /// Validate and optimize structured items.
    pub fn set_data(&mut self, items: &[FilterData], factory: &FilterFactory) -> Result<&mut Self> {
        let built = factory.build(items)?;
        self.root = built.as_ref().and_then(optimize);
        Ok(self)
    }

    /// Append `attribute operator value`, joined with AND.
    pub fn where_(
        &mut self,
        attribute: &str,
        operator: &str,
        value: impl Into<Value>,
        factory: &FilterFactory,
    ) -> Result<&mut Self> {
        let node = factory.create(operator, attribute, Some(value.into()), BooleanOperator::And)?;
        Ok(self.push(node))
    }

    /// Append `attribute operator value`, joined with OR.
    pub fn or_where(
        &mut self,
        attribute: &str,
        operator: &str,
        value: impl Into<Value>,
        factory: &FilterFactory,
    ) -> Result<&mut Self> {
        let node = factory.create(operator, attribute, Some(value.into()), BooleanOperator::Or)?;
        Ok(self.push(node))
    }

    /// Append an already built node; its own boolean joins it.
    pub fn push(&mut self, node: FilterNode) -> &mut Self {
        self.root = Some(match self.root.take() {
            None => node.with_boolean(BooleanOperator::And),
            Some(FilterNode::Group(mut group)) if group.mode == GroupMode::Plain => {
                group.children.push(node);
                group.into()
            }
            Some(existing) => Group::plain(vec![existing, node]).into(),
        });
        self
    }

    /// Optimize the stored tree in place.
    pub fn optimize(&mut self) -> &mut Self {
        self.root = self.root.as_ref().and_then(optimize);
        self
    }

    /// Raw-string form of the stored tree.
    #[must_use]
    pub fn to_raw(&self) -> Option<String> {
        self.root.as_ref().map(encode_filters)
    }

    /// Structured form of the stored tree, as accepted by `set_data`.
    #[must_use]
    pub fn to_data(&self) -> Vec<FilterData> {
        match &self.root {
            None => Vec::new(),
            Some(FilterNode::Group(group)) if group.mode == GroupMode::Plain => {
                group.children.iter().map(FilterNode::to_data).collect()
            }
            Some(node) => vec![node.to_data()],
        }
    }
}

fn items_from_json(json: &serde_json::Value) -> Result<Vec<FilterData>> {
    if !json.is_array() {
        return Err(CriteriaError::malformed_filter(0, "filters must be a JSON array"));
    }
    serde_json::from_value(json.clone())
        .map_err(|e| CriteriaError::malformed_filter(0, format!("invalid filter items: {e}")))
}
