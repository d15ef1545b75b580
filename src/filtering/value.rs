use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

use super::node::FilterNode;

///
/// Scalar
///
/// A single filter operand. Floats are always finite: non-finite numbers are
/// rejected when values are decoded or built.
///

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Name used in validation messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// Convert a JSON leaf. Arrays, objects and non-finite numbers yield `None`.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(Self::Float)),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// Infer the type of an unquoted raw-string token.
    ///
    /// `null`, `true` and `false` are matched case-insensitively. Integers win
    /// over floats; a float is only inferred for numeric-looking tokens so that
    /// words such as `inf` or `NaN` stay text.
    #[must_use]
    pub fn infer(token: &str) -> Self {
        if token.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if token.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if token.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(i) = token.parse::<i64>() {
            return Self::Int(i);
        }
        if looks_numeric(token)
            && let Ok(f) = token.parse::<f64>()
            && f.is_finite()
        {
            return Self::Float(f);
        }
        Self::Text(token.to_string())
    }

    /// Ordering between comparable scalars. Integers and floats compare
    /// numerically; mixed or null operands are incomparable.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Float(b)) => (*a as f64).partial_cmp(b),
            (Self::Float(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Self::Float(a), Self::Float(b)) => a.partial_cmp(b),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

fn looks_numeric(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

///
/// Value
///
/// The operand of a predicate: one scalar, an ordered list, or a nested filter
/// tree for relation existence checks.
///

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    List(Vec<Scalar>),
    Nested(Box<FilterNode>),
}

impl Value {
    #[must_use]
    pub const fn null() -> Self {
        Self::Scalar(Scalar::Null)
    }

    #[must_use]
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Scalar>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Scalar::Null))
    }

    /// The scalars carried by this value; empty for nested trees.
    #[must_use]
    pub fn scalars(&self) -> &[Scalar] {
        match self {
            Self::Scalar(s) => std::slice::from_ref(s),
            Self::List(items) => items,
            Self::Nested(_) => &[],
        }
    }

    #[must_use]
    pub fn as_nested(&self) -> Option<&FilterNode> {
        match self {
            Self::Nested(node) => Some(node),
            _ => None,
        }
    }

    /// Longest textual operand, used for length limits.
    #[must_use]
    pub fn max_text_len(&self) -> usize {
        self.scalars()
            .iter()
            .filter_map(Scalar::as_text)
            .map(str::len)
            .max()
            .unwrap_or(0)
    }

    /// Convert structured JSON input. Nested trees are not representable here
    /// and are built by the factory from `items` arrays instead.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Array(items) => items
                .iter()
                .map(Scalar::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Self::List),
            other => Scalar::from_json(other).map(Self::Scalar),
        }
    }
}

macro_rules! value_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Scalar(value.into())
                }
            }
        )*
    };
}

value_from_scalar!(bool, i32, i64, f64, &str, String);

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        Self::Scalar(value)
    }
}

impl<T: Into<Scalar>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::list(items)
    }
}

impl From<FilterNode> for Value {
    fn from(node: FilterNode) -> Self {
        Self::Nested(Box::new(node))
    }
}
