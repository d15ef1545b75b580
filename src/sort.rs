use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    errors::{CriteriaError, Result},
    filtering::{AttributeLookup, AttributeSchema, is_valid_attribute_name},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse `asc` / `desc`, case-insensitively.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("asc") {
            Some(Self::Asc)
        } else if token.eq_ignore_ascii_case("desc") {
            Some(Self::Desc)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order of the result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sorting {
    pub attribute: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sorting {
    #[must_use]
    pub fn new(attribute: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            attribute: attribute.into(),
            direction,
        }
    }

    #[must_use]
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self::new(attribute, SortDirection::Asc)
    }

    #[must_use]
    pub fn desc(attribute: impl Into<String>) -> Self {
        Self::new(attribute, SortDirection::Desc)
    }

    /// Parse `attribute[,direction]`. The React Admin form
    /// `["attribute","DESC"]` is accepted as well.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let parts: Vec<String> = if raw.starts_with('[') {
            serde_json::from_str(raw).map_err(|e| CriteriaError::MalformedSortString {
                reason: format!("invalid JSON sort array: {e}"),
            })?
        } else {
            raw.split(',').map(|part| part.trim().to_string()).collect()
        };

        let (attribute, direction) = match parts.as_slice() {
            [attribute] => (attribute, SortDirection::Asc),
            [attribute, direction] => {
                let Some(direction) = SortDirection::parse(direction) else {
                    return Err(CriteriaError::MalformedSortString {
                        reason: format!("unknown direction `{direction}`, expected ASC or DESC"),
                    });
                };
                (attribute, direction)
            }
            _ => {
                return Err(CriteriaError::MalformedSortString {
                    reason: "expected `attribute[,direction]`".to_string(),
                });
            }
        };

        if !is_valid_attribute_name(attribute) {
            return Err(CriteriaError::MalformedSortString {
                reason: format!("`{attribute}` is not a valid attribute name"),
            });
        }

        Ok(Self::new(attribute.clone(), direction))
    }

    /// Raw form, `attribute,direction` with a lowercase direction.
    #[must_use]
    pub fn to_raw(&self) -> String {
        format!(
            "{},{}",
            self.attribute,
            self.direction.as_str().to_ascii_lowercase()
        )
    }

    /// Violations of the schema, for batch reporting.
    #[must_use]
    pub fn validate(&self, schema: &AttributeSchema) -> Vec<String> {
        match schema.lookup(&self.attribute) {
            AttributeLookup::Declared(kind) if !kind.is_sortable() => {
                vec![format!("Sorting by the {} attribute `{}` is not supported.", kind.name(), self.attribute)]
            }
            AttributeLookup::Unknown | AttributeLookup::Relation(_) => {
                vec![format!("Sorting by `{}` is not allowed.", self.attribute)]
            }
            _ => Vec::new(),
        }
    }
}
