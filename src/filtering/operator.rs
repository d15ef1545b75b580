use serde::{Deserialize, Serialize};
use std::fmt;

/// Filter operators understood by the factory, the codec and the drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperatorKind {
    /// Equals (attribute = value)
    #[serde(rename = "eq")]
    Eq,
    /// Not equals (attribute != value)
    #[serde(rename = "ne")]
    Ne,
    /// Greater than (attribute > value)
    #[serde(rename = "gt")]
    Gt,
    /// Greater than or equal (attribute >= value)
    #[serde(rename = "gte")]
    Gte,
    /// Less than (attribute < value)
    #[serde(rename = "lt")]
    Lt,
    /// Less than or equal (attribute <= value)
    #[serde(rename = "lte")]
    Lte,
    /// Case-insensitive substring match; a list matches any of its patterns
    #[serde(rename = "like")]
    Like,
    /// Negated `Like`; a list matches none of its patterns
    #[serde(rename = "!like")]
    NotLike,
    /// Array membership or exact substring
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "!contains")]
    NotContains,
    /// Value in list
    #[serde(rename = "in")]
    In,
    #[serde(rename = "!in")]
    NotIn,
    /// Inclusive range `[low, high]`
    #[serde(rename = "between")]
    Between,
    #[serde(rename = "!between")]
    NotBetween,
    #[serde(rename = "null")]
    IsNull,
    #[serde(rename = "!null")]
    IsNotNull,
    /// At least one related record matches the nested filters
    #[serde(rename = "exists")]
    Exists,
    /// No related record matches the nested filters
    #[serde(rename = "!exists")]
    DoesNotExist,
}

impl OperatorKind {
    pub const ALL: [Self; 18] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Like,
        Self::NotLike,
        Self::Contains,
        Self::NotContains,
        Self::In,
        Self::NotIn,
        Self::Between,
        Self::NotBetween,
        Self::IsNull,
        Self::IsNotNull,
        Self::Exists,
        Self::DoesNotExist,
    ];

    /// Parse an operator token, case-insensitively. Symbolic aliases
    /// (`=`, `!=`, `>`, `>=`, `<`, `<=`) are accepted for comparisons.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        let kind = match token.trim().to_ascii_lowercase().as_str() {
            "eq" | "=" => Self::Eq,
            "ne" | "!=" => Self::Ne,
            "gt" | ">" => Self::Gt,
            "gte" | ">=" => Self::Gte,
            "lt" | "<" => Self::Lt,
            "lte" | "<=" => Self::Lte,
            "like" => Self::Like,
            "!like" => Self::NotLike,
            "contains" => Self::Contains,
            "!contains" => Self::NotContains,
            "in" => Self::In,
            "!in" => Self::NotIn,
            "between" => Self::Between,
            "!between" => Self::NotBetween,
            "null" => Self::IsNull,
            "!null" => Self::IsNotNull,
            "exists" => Self::Exists,
            "!exists" => Self::DoesNotExist,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical token written by the encoder.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::NotLike => "!like",
            Self::Contains => "contains",
            Self::NotContains => "!contains",
            Self::In => "in",
            Self::NotIn => "!in",
            Self::Between => "between",
            Self::NotBetween => "!between",
            Self::IsNull => "null",
            Self::IsNotNull => "!null",
            Self::Exists => "exists",
            Self::DoesNotExist => "!exists",
        }
    }

    /// Operators whose attribute names a relation rather than a column.
    #[must_use]
    pub const fn is_relational(self) -> bool {
        matches!(self, Self::Exists | Self::DoesNotExist)
    }

    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Gt | Self::Gte | Self::Lt | Self::Lte
        )
    }

    /// False for every null operand. Used by the optimizer to prove
    /// `IS_NOT_NULL` redundant.
    #[must_use]
    pub const fn rejects_null(self) -> bool {
        !matches!(
            self,
            Self::IsNull | Self::IsNotNull | Self::Exists | Self::DoesNotExist
        )
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Connective joining a node to its preceding sibling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BooleanOperator {
    #[default]
    #[serde(alias = "AND")]
    And,
    #[serde(alias = "OR")]
    Or,
}

impl BooleanOperator {
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        if keyword.eq_ignore_ascii_case("and") {
            Some(Self::And)
        } else if keyword.eq_ignore_ascii_case("or") {
            Some(Self::Or)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::And => "and",
            Self::Or => "or",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_token_parses_back() {
        for kind in OperatorKind::ALL {
            assert_eq!(OperatorKind::from_token(kind.token()), Some(kind));
        }
    }

    #[test]
    fn test_symbolic_aliases() {
        assert_eq!(OperatorKind::from_token(">="), Some(OperatorKind::Gte));
        assert_eq!(OperatorKind::from_token("!="), Some(OperatorKind::Ne));
        assert_eq!(OperatorKind::from_token("IN"), Some(OperatorKind::In));
    }

    #[test]
    fn test_unknown_token() {
        assert_eq!(OperatorKind::from_token("bogus_op"), None);
        assert_eq!(OperatorKind::from_token(""), None);
    }

    #[test]
    fn test_boolean_keywords() {
        assert_eq!(BooleanOperator::from_keyword("OR"), Some(BooleanOperator::Or));
        assert_eq!(BooleanOperator::from_keyword("xor"), None);
        assert_eq!(BooleanOperator::default(), BooleanOperator::And);
    }

    #[test]
    fn test_serde_uses_tokens() {
        let json = serde_json::to_string(&OperatorKind::NotIn).unwrap();
        assert_eq!(json, "\"!in\"");
        let parsed: BooleanOperator = serde_json::from_str("\"OR\"").unwrap();
        assert_eq!(parsed, BooleanOperator::Or);
    }
}
