use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{operator::OperatorKind, value::Scalar};

/// Declared data type of a filterable attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Text,
    Integer,
    Float,
    Boolean,
    DateTime,
    Uuid,
    Json,
}

impl AttributeKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::Uuid => "uuid",
            Self::Json => "json",
        }
    }

    /// Whether `operator` makes sense for attributes of this kind.
    #[must_use]
    pub const fn supports(self, operator: OperatorKind) -> bool {
        use OperatorKind as Op;
        match operator {
            Op::Eq | Op::Ne | Op::In | Op::NotIn | Op::IsNull | Op::IsNotNull => true,
            Op::Gt | Op::Gte | Op::Lt | Op::Lte | Op::Between | Op::NotBetween => {
                matches!(self, Self::Integer | Self::Float | Self::DateTime | Self::Text)
            }
            Op::Like | Op::NotLike => matches!(self, Self::Text),
            Op::Contains | Op::NotContains => matches!(self, Self::Text | Self::Json),
            Op::Exists | Op::DoesNotExist => false,
        }
    }

    /// Whether a non-null scalar is a valid operand for this kind.
    ///
    /// Date-times accept RFC 3339, `YYYY-MM-DD HH:MM:SS` and plain dates.
    #[must_use]
    pub fn accepts(self, scalar: &Scalar) -> bool {
        match (self, scalar) {
            (Self::Json, _) | (Self::Text, Scalar::Text(_)) | (Self::Integer, Scalar::Int(_)) => true,
            (Self::Float, Scalar::Int(_) | Scalar::Float(_)) => true,
            (Self::Boolean, Scalar::Bool(_)) => true,
            (Self::DateTime, Scalar::Text(s)) => parses_as_datetime(s),
            (Self::Uuid, Scalar::Text(s)) => uuid::Uuid::parse_str(s).is_ok(),
            _ => false,
        }
    }

    /// Kinds that can appear in an ORDER BY.
    #[must_use]
    pub const fn is_sortable(self) -> bool {
        !matches!(self, Self::Json)
    }
}

fn parses_as_datetime(s: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(s).is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").is_ok()
        || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

/// Result of resolving a (possibly dotted) path against a schema
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeLookup<'a> {
    /// Declared attribute of the given kind
    Declared(AttributeKind),
    /// The path names a relation
    Relation(&'a AttributeSchema),
    /// Not declared, but the schema is permissive
    Undeclared,
    /// Not declared and the schema is strict
    Unknown,
}

static PERMISSIVE: AttributeSchema = AttributeSchema {
    attributes: BTreeMap::new(),
    relations: BTreeMap::new(),
    strict: false,
};

///
/// AttributeSchema
///
/// Declares the attributes a filter may reference and their kinds, plus the
/// schemas of related models reachable through relation paths.
///
/// A strict schema rejects anything undeclared. A permissive schema (the
/// default) checks what it knows and lets everything else through, which is
/// what an application without declared models gets.
///

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    #[serde(default)]
    attributes: BTreeMap<String, AttributeKind>,
    #[serde(default)]
    relations: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    strict: bool,
}

impl AttributeSchema {
    #[must_use]
    pub fn permissive() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn strict() -> Self {
        Self {
            strict: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, schema: Self) -> Self {
        self.relations.insert(name.into(), schema);
        self
    }

    #[must_use]
    pub const fn is_strict(&self) -> bool {
        self.strict
    }

    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, AttributeKind> {
        &self.attributes
    }

    /// Resolve `path`, walking relations for every dotted segment but the last.
    #[must_use]
    pub fn lookup(&self, path: &str) -> AttributeLookup<'_> {
        let (relations, last) = match path.rsplit_once('.') {
            Some((relations, last)) => (Some(relations), last),
            None => (None, path),
        };

        let owner = match relations {
            Some(relations) => match self.relation(relations) {
                Some(schema) => schema,
                None => return AttributeLookup::Unknown,
            },
            None => self,
        };

        if let Some(kind) = owner.attributes.get(last) {
            AttributeLookup::Declared(*kind)
        } else if let Some(relation) = owner.relations.get(last) {
            AttributeLookup::Relation(relation)
        } else if owner.strict {
            AttributeLookup::Unknown
        } else {
            AttributeLookup::Undeclared
        }
    }

    /// Schema of the relation at `path` (dotted for nested relations).
    /// Permissive schemas yield an empty permissive schema for undeclared
    /// relations.
    #[must_use]
    pub fn relation(&self, path: &str) -> Option<&Self> {
        let mut current = self;
        for segment in path.split('.') {
            current = match current.relations.get(segment) {
                Some(schema) => schema,
                None if !current.strict => &PERMISSIVE,
                None => return None,
            };
        }
        Some(current)
    }
}
