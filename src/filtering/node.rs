use serde::{Deserialize, Serialize};

use super::{
    operator::{BooleanOperator, OperatorKind},
    value::Value,
};

///
/// FilterNode
///
/// Element of a filter expression tree. Sibling lists are evaluated left to
/// right: each node is joined to the result so far with its own `boolean`.
/// The boolean of the first node in a list is ignored.
///

#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Predicate(Predicate),
    Group(Group),
}

impl FilterNode {
    #[must_use]
    pub const fn boolean(&self) -> BooleanOperator {
        match self {
            Self::Predicate(p) => p.boolean,
            Self::Group(g) => g.boolean,
        }
    }

    pub const fn set_boolean(&mut self, boolean: BooleanOperator) {
        match self {
            Self::Predicate(p) => p.boolean = boolean,
            Self::Group(g) => g.boolean = boolean,
        }
    }

    #[must_use]
    pub fn with_boolean(mut self, boolean: BooleanOperator) -> Self {
        self.set_boolean(boolean);
        self
    }

    #[must_use]
    pub const fn as_predicate(&self) -> Option<&Predicate> {
        match self {
            Self::Predicate(p) => Some(p),
            Self::Group(_) => None,
        }
    }

    #[must_use]
    pub const fn as_group(&self) -> Option<&Group> {
        match self {
            Self::Group(g) => Some(g),
            Self::Predicate(_) => None,
        }
    }

    /// Total number of nodes, counting nested EXISTS trees.
    #[must_use]
    pub fn node_count(&self) -> usize {
        match self {
            Self::Predicate(p) => 1 + p.nested().map_or(0, Self::node_count),
            Self::Group(g) => 1 + g.children.iter().map(Self::node_count).sum::<usize>(),
        }
    }

    /// Nesting depth; a lone predicate has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            Self::Predicate(p) => 1 + p.nested().map_or(0, Self::depth),
            Self::Group(g) => 1 + g.children.iter().map(Self::depth).max().unwrap_or(0),
        }
    }

    /// Structured (serde) form of this node, the inverse of the factory's
    /// `build` for a single item.
    #[must_use]
    pub fn to_data(&self) -> FilterData {
        match self {
            Self::Predicate(p) => FilterData::Predicate(PredicateData {
                boolean: p.boolean,
                attr: p.attribute.clone(),
                operator: p.operator.token().to_string(),
                value: p.value.as_ref().map(value_to_json),
            }),
            Self::Group(g) => FilterData::Group(GroupData {
                boolean: g.boolean,
                mode: g.mode.keyword().map(str::to_string),
                relation: g.mode.relation().map(str::to_string),
                items: g.children.iter().map(Self::to_data).collect(),
            }),
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Scalar(s) => s.to_json(),
        Value::List(items) => serde_json::Value::Array(items.iter().map(|s| s.to_json()).collect()),
        Value::Nested(node) => match node.as_ref() {
            FilterNode::Group(g) if g.mode == GroupMode::Plain => serde_json::Value::Array(
                g.children
                    .iter()
                    .map(|c| c.to_data().to_json())
                    .collect(),
            ),
            other => serde_json::Value::Array(vec![other.to_data().to_json()]),
        },
    }
}

impl From<Predicate> for FilterNode {
    fn from(p: Predicate) -> Self {
        Self::Predicate(p)
    }
}

impl From<Group> for FilterNode {
    fn from(g: Group) -> Self {
        Self::Group(g)
    }
}

/// Leaf condition
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub attribute: String,
    pub operator: OperatorKind,
    pub value: Option<Value>,
    pub boolean: BooleanOperator,
}

impl Predicate {
    #[must_use]
    pub fn new(attribute: impl Into<String>, operator: OperatorKind, value: Option<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value,
            boolean: BooleanOperator::And,
        }
    }

    #[must_use]
    pub fn with_boolean(mut self, boolean: BooleanOperator) -> Self {
        self.boolean = boolean;
        self
    }

    /// Nested tree of an EXISTS / DOES_NOT_EXIST predicate.
    #[must_use]
    pub fn nested(&self) -> Option<&FilterNode> {
        self.value.as_ref().and_then(Value::as_nested)
    }

    /// `attribute` split at the first dot into relation and remainder.
    #[must_use]
    pub fn relation_path(&self) -> Option<(&str, &str)> {
        self.attribute.split_once('.')
    }
}

/// Composite of sibling nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub boolean: BooleanOperator,
    pub mode: GroupMode,
    pub children: Vec<FilterNode>,
}

impl Group {
    #[must_use]
    pub const fn new(boolean: BooleanOperator, mode: GroupMode, children: Vec<FilterNode>) -> Self {
        Self {
            boolean,
            mode,
            children,
        }
    }

    #[must_use]
    pub const fn plain(children: Vec<FilterNode>) -> Self {
        Self::new(BooleanOperator::And, GroupMode::Plain, children)
    }

    #[must_use]
    pub fn has(relation: impl Into<String>, children: Vec<FilterNode>) -> Self {
        Self::new(BooleanOperator::And, GroupMode::Has(relation.into()), children)
    }

    #[must_use]
    pub fn does_not_have(relation: impl Into<String>, children: Vec<FilterNode>) -> Self {
        Self::new(
            BooleanOperator::And,
            GroupMode::DoesNotHave(relation.into()),
            children,
        )
    }

    #[must_use]
    pub fn with_boolean(mut self, boolean: BooleanOperator) -> Self {
        self.boolean = boolean;
        self
    }
}

/// How a group's children are evaluated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupMode {
    /// Against the current record
    Plain,
    /// At least one record of the relation matches
    Has(String),
    /// No record of the relation matches
    DoesNotHave(String),
}

impl GroupMode {
    #[must_use]
    pub fn relation(&self) -> Option<&str> {
        match self {
            Self::Plain => None,
            Self::Has(r) | Self::DoesNotHave(r) => Some(r),
        }
    }

    #[must_use]
    pub const fn keyword(&self) -> Option<&'static str> {
        match self {
            Self::Plain => None,
            Self::Has(_) => Some("has"),
            Self::DoesNotHave(_) => Some("!has"),
        }
    }

    /// Parse a mode keyword (`has` / `!has`) bound to `relation`.
    #[must_use]
    pub fn from_keyword(keyword: &str, relation: impl Into<String>) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("has") {
            Some(Self::Has(relation.into()))
        } else if keyword.eq_ignore_ascii_case("!has") {
            Some(Self::DoesNotHave(relation.into()))
        } else {
            None
        }
    }
}

///
/// FilterData
///
/// Structured wire form of a filter item, as produced by the raw-string
/// decoder or received as JSON. Items carrying `items` are groups.
///
/// ```json
/// [
///   {"attr": "age", "operator": "gt", "value": 18},
///   {"boolean": "or", "mode": "has", "relation": "comments", "items": [
///     {"attr": "approved", "operator": "eq", "value": true}
///   ]}
/// ]
/// ```
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterData {
    Group(GroupData),
    Predicate(PredicateData),
}

impl FilterData {
    #[must_use]
    pub const fn boolean(&self) -> BooleanOperator {
        match self {
            Self::Group(g) => g.boolean,
            Self::Predicate(p) => p.boolean,
        }
    }

    /// The JSON object this item serializes to.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        object.insert("boolean".to_string(), self.boolean().keyword().into());
        match self {
            Self::Group(g) => {
                if let Some(mode) = &g.mode {
                    object.insert("mode".to_string(), mode.clone().into());
                }
                if let Some(relation) = &g.relation {
                    object.insert("relation".to_string(), relation.clone().into());
                }
                let items = g.items.iter().map(Self::to_json).collect();
                object.insert("items".to_string(), serde_json::Value::Array(items));
            }
            Self::Predicate(p) => {
                object.insert("attr".to_string(), p.attr.clone().into());
                object.insert("operator".to_string(), p.operator.clone().into());
                if let Some(value) = &p.value {
                    object.insert("value".to_string(), value.clone());
                }
            }
        }
        serde_json::Value::Object(object)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupData {
    #[serde(default)]
    pub boolean: BooleanOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation: Option<String>,
    pub items: Vec<FilterData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateData {
    #[serde(default)]
    pub boolean: BooleanOperator,
    pub attr: String,
    pub operator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}
