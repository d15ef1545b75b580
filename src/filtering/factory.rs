use std::collections::HashMap;
use tracing::{debug, warn};

use super::{
    node::{FilterData, FilterNode, Group, GroupMode, Predicate, PredicateData},
    operator::{BooleanOperator, OperatorKind},
    schema::{AttributeLookup, AttributeSchema},
    value::{Scalar, Value},
};
use crate::{
    config::CriteriaConfig,
    errors::{CriteriaError, Result, ValidationErrors},
};

const MAX_ATTRIBUTE_NAME_LENGTH: usize = 100;

/// Attribute names are dot-separated segments of ASCII letters, digits and
/// underscores. Leading underscores are reserved.
#[must_use]
pub fn is_valid_attribute_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ATTRIBUTE_NAME_LENGTH
        && !name.starts_with('_')
        && name.split('.').all(|segment| {
            !segment.is_empty() && segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Operand shape an operator accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// Exactly one scalar
    Scalar,
    /// One scalar or a non-empty list
    ScalarOrList,
    /// Non-empty list; a lone scalar is wrapped
    List,
    /// Exactly two scalars, stored ascending
    Pair,
    /// No operand; anything given is dropped
    Empty,
    /// Optional nested filter tree
    Nested,
}

impl ValueShape {
    /// Shape of the built-in operators.
    #[must_use]
    pub const fn of(kind: OperatorKind) -> Self {
        use OperatorKind as Op;
        match kind {
            Op::Eq | Op::Ne | Op::Gt | Op::Gte | Op::Lt | Op::Lte => Self::Scalar,
            Op::Like | Op::NotLike | Op::Contains | Op::NotContains => Self::ScalarOrList,
            Op::In | Op::NotIn => Self::List,
            Op::Between | Op::NotBetween => Self::Pair,
            Op::IsNull | Op::IsNotNull => Self::Empty,
            Op::Exists | Op::DoesNotExist => Self::Nested,
        }
    }

    /// Bring a value into the canonical form for this shape.
    fn sanitize(self, value: Option<Value>) -> Option<Value> {
        match (self, value) {
            (Self::Empty, _) => None,
            (Self::List, Some(Value::Scalar(s))) => Some(Value::List(vec![s])),
            (Self::List, Some(Value::List(items))) => Some(Value::List(dedup(items))),
            (Self::ScalarOrList, Some(Value::List(items))) => {
                let mut items = dedup(items);
                if items.len() == 1 {
                    items.pop().map(Value::Scalar)
                } else {
                    Some(Value::List(items))
                }
            }
            (Self::Pair, Some(Value::List(mut items))) => {
                if let [low, high] = items.as_slice()
                    && low.compare(high) == Some(std::cmp::Ordering::Greater)
                {
                    items.swap(0, 1);
                }
                Some(Value::List(items))
            }
            (_, value) => value,
        }
    }
}

fn dedup(items: Vec<Scalar>) -> Vec<Scalar> {
    let mut unique: Vec<Scalar> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}

/// Part of a structured item a validation message is reported against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Attr,
    Operator,
    Value,
}

impl Field {
    const fn key(self) -> &'static str {
        match self {
            Self::Attr => "attr",
            Self::Operator => "operator",
            Self::Value => "value",
        }
    }
}

type Violations = Vec<(Field, String)>;

///
/// FilterFactory
///
/// Registry of the operators a deployment accepts and the contract each one
/// enforces on its operand, plus the attribute schema filters are validated
/// against. Built once at startup and shared by reference.
///

#[derive(Debug, Clone)]
pub struct FilterFactory {
    operators: HashMap<OperatorKind, ValueShape>,
    schema: AttributeSchema,
    max_depth: usize,
    max_value_length: usize,
}

impl Default for FilterFactory {
    fn default() -> Self {
        Self::standard()
    }
}

impl FilterFactory {
    /// A factory with no operators registered.
    #[must_use]
    pub fn empty() -> Self {
        let config = CriteriaConfig::default();
        Self {
            operators: HashMap::new(),
            schema: AttributeSchema::permissive(),
            max_depth: config.max_filter_depth,
            max_value_length: config.max_value_length,
        }
    }

    /// Every built-in operator with its standard contract.
    #[must_use]
    pub fn standard() -> Self {
        OperatorKind::ALL
            .into_iter()
            .fold(Self::empty(), |factory, kind| {
                factory.with_operator(kind, ValueShape::of(kind))
            })
    }

    #[must_use]
    pub fn with_operator(mut self, kind: OperatorKind, shape: ValueShape) -> Self {
        self.operators.insert(kind, shape);
        self
    }

    #[must_use]
    pub fn without_operator(mut self, kind: OperatorKind) -> Self {
        self.operators.remove(&kind);
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: AttributeSchema) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: &CriteriaConfig) -> Self {
        self.max_depth = config.max_filter_depth;
        self.max_value_length = config.max_value_length;
        self
    }

    #[must_use]
    pub const fn schema(&self) -> &AttributeSchema {
        &self.schema
    }

    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    #[must_use]
    pub fn supports(&self, kind: OperatorKind) -> bool {
        self.operators.contains_key(&kind)
    }

    /// Resolve an operator token against the registry.
    pub fn resolve(&self, token: &str) -> Result<OperatorKind> {
        OperatorKind::from_token(token)
            .filter(|kind| self.supports(*kind))
            .ok_or_else(|| CriteriaError::UnknownOperator {
                token: token.to_string(),
            })
    }

    /// Build one predicate from an operator token.
    pub fn create(
        &self,
        operator: &str,
        attribute: &str,
        value: Option<Value>,
        boolean: BooleanOperator,
    ) -> Result<FilterNode> {
        let kind = self.resolve(operator)?;
        self.create_kind(kind, attribute, value, boolean)
    }

    /// Build one predicate, failing with `InvalidValueShape` on any violation.
    pub fn create_kind(
        &self,
        kind: OperatorKind,
        attribute: &str,
        value: Option<Value>,
        boolean: BooleanOperator,
    ) -> Result<FilterNode> {
        let (kind, value) = self.prepare(kind, value)?;
        let messages = self.validate(kind, attribute, value.as_ref());
        if !messages.is_empty() {
            warn!(attribute, operator = %kind, reason = %messages.join(" "), "filter rejected");
            return Err(CriteriaError::InvalidValueShape {
                attribute: attribute.to_string(),
                operator: kind,
                reason: messages.join(" "),
            });
        }

        Ok(Predicate {
            attribute: attribute.to_string(),
            operator: kind,
            value,
            boolean,
        }
        .into())
    }

    /// Every violation of `kind`'s contract for this attribute and value,
    /// including violations inside nested trees.
    #[must_use]
    pub fn validate(&self, kind: OperatorKind, attribute: &str, value: Option<&Value>) -> Vec<String> {
        let mut messages: Vec<String> = self
            .check(&self.schema, kind, attribute, value)
            .into_iter()
            .map(|(_, message)| message)
            .collect();

        if let Some(Value::Nested(node)) = value
            && let Some(schema) = self.schema.relation(attribute)
        {
            self.validate_node(node, schema, 2, &mut messages);
        }
        messages
    }

    /// Build the structured items into one plain root group.
    ///
    /// All violations are collected and reported together as
    /// `ValidationFailed`, keyed by item path under `filters`. An empty item
    /// list yields `None`.
    pub fn build(&self, items: &[FilterData]) -> Result<Option<FilterNode>> {
        self.build_at(items, "filters")
    }

    /// Like [`build`](Self::build), with error keys rooted at `key`.
    pub fn build_at(&self, items: &[FilterData], key: &str) -> Result<Option<FilterNode>> {
        let mut errors = ValidationErrors::new();
        let children = self.build_items(items, &self.schema, key, 1, &mut errors);

        if !errors.is_empty() {
            warn!(errors = errors.len(), key, "filter validation failed");
            return Err(CriteriaError::ValidationFailed(errors));
        }
        if children.is_empty() {
            return Ok(None);
        }

        let root = FilterNode::from(Group::plain(children));
        debug!(items = items.len(), nodes = root.node_count(), "filters built");
        Ok(Some(root))
    }

    fn build_items(
        &self,
        items: &[FilterData],
        schema: &AttributeSchema,
        path: &str,
        depth: usize,
        errors: &mut ValidationErrors,
    ) -> Vec<FilterNode> {
        items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                self.build_item(item, schema, &format!("{path}.{index}"), depth, errors)
            })
            .collect()
    }

    fn build_item(
        &self,
        item: &FilterData,
        schema: &AttributeSchema,
        path: &str,
        depth: usize,
        errors: &mut ValidationErrors,
    ) -> Option<FilterNode> {
        if depth > self.max_depth {
            errors.add(
                path,
                format!("Filters are nested deeper than {} levels.", self.max_depth),
            );
            return None;
        }

        match item {
            FilterData::Predicate(data) => self.build_predicate(data, schema, path, depth, errors),
            FilterData::Group(group) => {
                let mode = match (group.mode.as_deref(), group.relation.as_deref()) {
                    (None, None) => GroupMode::Plain,
                    (Some(keyword), Some(relation)) => {
                        if !is_valid_attribute_name(relation) {
                            errors.add(
                                format!("{path}.relation"),
                                format!("`{relation}` is not a valid relation name."),
                            );
                            return None;
                        }
                        let Some(mode) = GroupMode::from_keyword(keyword, relation) else {
                            errors.add(
                                format!("{path}.mode"),
                                format!("`{keyword}` is not a valid group mode."),
                            );
                            return None;
                        };
                        mode
                    }
                    (Some(_), None) => {
                        errors.add(format!("{path}.relation"), "A relation is required for this group mode.");
                        return None;
                    }
                    (None, Some(_)) => {
                        errors.add(format!("{path}.mode"), "A group mode is required when a relation is given.");
                        return None;
                    }
                };

                let child_schema = match mode.relation() {
                    Some(relation) => match schema.relation(relation) {
                        Some(related) => related,
                        None => {
                            errors.add(
                                format!("{path}.relation"),
                                format!("The relation `{relation}` is not filterable."),
                            );
                            return None;
                        }
                    },
                    None => schema,
                };

                let children =
                    self.build_items(&group.items, child_schema, &format!("{path}.items"), depth + 1, errors);
                Some(Group::new(group.boolean, mode, children).into())
            }
        }
    }

    fn build_predicate(
        &self,
        data: &PredicateData,
        schema: &AttributeSchema,
        path: &str,
        depth: usize,
        errors: &mut ValidationErrors,
    ) -> Option<FilterNode> {
        let Ok(kind) = self.resolve(&data.operator) else {
            errors.add(
                format!("{path}.operator"),
                format!("`{}` is not a supported filter operator.", data.operator),
            );
            return None;
        };

        let value_key = format!("{path}.value");
        let value = if kind.is_relational() {
            match &data.value {
                None | Some(serde_json::Value::Null) => None,
                Some(serde_json::Value::Array(raw)) => {
                    let Ok(items) = raw
                        .iter()
                        .map(|item| serde_json::from_value::<FilterData>(item.clone()))
                        .collect::<std::result::Result<Vec<_>, _>>()
                    else {
                        errors.add(value_key, format!("The nested filters of `{}` are malformed.", data.attr));
                        return None;
                    };
                    // An unknown relation is reported by `check` below.
                    let children = schema.relation(&data.attr).map_or_else(Vec::new, |related| {
                        self.build_items(&items, related, &value_key, depth + 1, errors)
                    });
                    Some(Value::Nested(Box::new(Group::plain(children).into())))
                }
                Some(_) => {
                    errors.add(
                        value_key,
                        format!("The `{kind}` operator expects a list of nested filters for `{}`.", data.attr),
                    );
                    return None;
                }
            }
        } else {
            match &data.value {
                None => None,
                Some(json) => {
                    let Some(value) = Value::from_json(json) else {
                        errors.add(
                            value_key,
                            format!("The value of `{}` must be a scalar or a list of scalars.", data.attr),
                        );
                        return None;
                    };
                    Some(value)
                }
            }
        };

        let Ok((kind, value)) = self.prepare(kind, value) else {
            errors.add(
                format!("{path}.operator"),
                format!("`{}` is not a supported filter operator.", data.operator),
            );
            return None;
        };

        let violations = self.check(schema, kind, &data.attr, value.as_ref());
        if !violations.is_empty() {
            for (field, message) in violations {
                errors.add(format!("{path}.{}", field.key()), message);
            }
            return None;
        }

        Some(
            Predicate {
                attribute: data.attr.clone(),
                operator: kind,
                value,
                boolean: data.boolean,
            }
            .into(),
        )
    }

    /// Rewrite null comparisons and canonicalize the operand.
    fn prepare(&self, kind: OperatorKind, value: Option<Value>) -> Result<(OperatorKind, Option<Value>)> {
        let kind = match (kind, &value) {
            (OperatorKind::Eq, Some(v)) if v.is_null() => OperatorKind::IsNull,
            (OperatorKind::Ne, Some(v)) if v.is_null() => OperatorKind::IsNotNull,
            _ => kind,
        };
        let shape = self
            .operators
            .get(&kind)
            .copied()
            .ok_or_else(|| CriteriaError::UnknownOperator {
                token: kind.token().to_string(),
            })?;
        Ok((kind, shape.sanitize(value)))
    }

    fn check(
        &self,
        schema: &AttributeSchema,
        kind: OperatorKind,
        attribute: &str,
        value: Option<&Value>,
    ) -> Violations {
        let mut violations = Violations::new();

        if !is_valid_attribute_name(attribute) {
            violations.push((Field::Attr, format!("`{attribute}` is not a valid attribute name.")));
            return violations;
        }

        let declared = match schema.lookup(attribute) {
            AttributeLookup::Unknown => {
                violations.push((Field::Attr, format!("The attribute `{attribute}` is not filterable.")));
                return violations;
            }
            AttributeLookup::Relation(_) if !kind.is_relational() => {
                violations.push((
                    Field::Operator,
                    format!("`{attribute}` is a relation and cannot be filtered with `{kind}`."),
                ));
                return violations;
            }
            AttributeLookup::Declared(_) if kind.is_relational() => {
                violations.push((Field::Operator, format!("`{attribute}` is not a relation.")));
                return violations;
            }
            AttributeLookup::Declared(declared) => Some(declared),
            AttributeLookup::Relation(_) | AttributeLookup::Undeclared => None,
        };

        if let Some(declared) = declared
            && !declared.supports(kind)
        {
            violations.push((
                Field::Operator,
                format!(
                    "The `{kind}` operator cannot be applied to the {} attribute `{attribute}`.",
                    declared.name()
                ),
            ));
        }

        let shape = self.operators.get(&kind).copied().unwrap_or(ValueShape::of(kind));
        if let Some(message) = shape_violation(shape, kind, attribute, value) {
            violations.push((Field::Value, message));
            return violations;
        }

        for scalar in value.map(Value::scalars).unwrap_or_default() {
            if scalar.is_null() {
                violations.push((Field::Value, format!("`{attribute}` cannot be compared with null using `{kind}`.")));
            } else if let Some(declared) = declared
                && !declared.accepts(scalar)
            {
                violations.push((
                    Field::Value,
                    format!("The value of `{attribute}` must be of type {}.", declared.name()),
                ));
            } else if scalar.as_text().is_some_and(|text| text.len() > self.max_value_length) {
                violations.push((
                    Field::Value,
                    format!(
                        "The value of `{attribute}` exceeds {} characters.",
                        self.max_value_length
                    ),
                ));
            }
        }

        violations
    }

    /// Validate a programmatically built nested tree.
    fn validate_node(&self, node: &FilterNode, schema: &AttributeSchema, depth: usize, messages: &mut Vec<String>) {
        if depth > self.max_depth {
            messages.push(format!("Filters are nested deeper than {} levels.", self.max_depth));
            return;
        }

        match node {
            FilterNode::Predicate(predicate) => {
                messages.extend(
                    self.check(schema, predicate.operator, &predicate.attribute, predicate.value.as_ref())
                        .into_iter()
                        .map(|(_, message)| message),
                );
                if let Some(nested) = predicate.nested()
                    && let Some(related) = schema.relation(&predicate.attribute)
                {
                    self.validate_node(nested, related, depth + 1, messages);
                }
            }
            FilterNode::Group(group) => {
                let child_schema = match group.mode.relation() {
                    Some(relation) => match schema.relation(relation) {
                        Some(related) => related,
                        None => {
                            messages.push(format!("The relation `{relation}` is not filterable."));
                            return;
                        }
                    },
                    None => schema,
                };
                for child in &group.children {
                    self.validate_node(child, child_schema, depth + 1, messages);
                }
            }
        }
    }
}

fn shape_violation(shape: ValueShape, kind: OperatorKind, attribute: &str, value: Option<&Value>) -> Option<String> {
    match (shape, value) {
        (ValueShape::Empty, _) | (ValueShape::Nested, None | Some(Value::Nested(_))) => None,
        (ValueShape::Nested, Some(_)) => Some(format!(
            "The `{kind}` operator expects nested filters for the relation `{attribute}`."
        )),
        (_, Some(Value::Nested(_))) => Some(format!(
            "The `{kind}` operator does not accept nested filters."
        )),
        (_, None) => Some(format!("The `{kind}` operator requires a value for `{attribute}`.")),
        (ValueShape::Scalar, Some(Value::List(_))) => Some(format!(
            "The `{kind}` operator expects a single value for `{attribute}`, a list was given."
        )),
        (ValueShape::ScalarOrList | ValueShape::List, Some(Value::List(items))) if items.is_empty() => {
            Some(format!("The `{kind}` operator requires at least one value for `{attribute}`."))
        }
        (ValueShape::Pair, Some(Value::Scalar(_))) => Some(format!(
            "The `{kind}` operator requires exactly two values for `{attribute}`."
        )),
        (ValueShape::Pair, Some(Value::List(items))) => match items.as_slice() {
            [low, high] if low.is_null() || high.is_null() => None,
            [low, high] if low.compare(high).is_none() => Some(format!(
                "The bounds of `{attribute}` must be comparable values of the same type."
            )),
            [_, _] => None,
            _ => Some(format!(
                "The `{kind}` operator requires exactly two values for `{attribute}`."
            )),
        },
        _ => None,
    }
}
