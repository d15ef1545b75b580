use serde::{Deserialize, Serialize};

use crate::{
    errors::{CriteriaError, Result},
    filtering::{AttributeKind, AttributeLookup, AttributeSchema, is_valid_attribute_name},
};

// Basic safety limit
pub const MAX_SEARCH_TERM_LENGTH: usize = 10_000;

/// Escape character paired with every generated LIKE. Unlike a backslash it
/// needs no string escaping on any backend.
pub const LIKE_ESCAPE: char = '!';

/// Escape LIKE wildcards so user input matches literally.
/// Escapes: % (match any), _ (match single char) and the escape itself.
#[must_use]
pub fn escape_like_wildcards(input: &str) -> String {
    input
        .replace('!', "!!")
        .replace('%', "!%")
        .replace('_', "!_")
}

/// `%TERM%` with wildcards escaped, uppercased for case-insensitive LIKE
/// against `UPPER(column)`. Pair with `ESCAPE '!'`.
#[must_use]
pub fn like_pattern(term: &str) -> String {
    format!("%{}%", escape_like_wildcards(term).to_uppercase())
}

/// A term matched case-insensitively against any of the attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSearch {
    pub term: String,
    attributes: Vec<String>,
}

impl TextSearch {
    /// Attributes keep their first-seen order; repeats are dropped.
    #[must_use]
    pub fn new<I, S>(term: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for attribute in attributes {
            let attribute = attribute.into();
            if !unique.contains(&attribute) {
                unique.push(attribute);
            }
        }
        Self {
            term: term.into(),
            attributes: unique,
        }
    }

    #[must_use]
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    /// Parse `term|attr1,attr2`. A `|` inside the term is written `\|`.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut term = String::new();
        let mut rest = None;
        let mut chars = raw.char_indices();
        while let Some((index, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => term.push(escaped),
                    None => {
                        return Err(CriteriaError::MalformedTextSearchString {
                            reason: "dangling escape at end of input".to_string(),
                        });
                    }
                },
                '|' => {
                    rest = Some(&raw[index + 1..]);
                    break;
                }
                _ => term.push(c),
            }
        }

        let Some(rest) = rest else {
            return Err(CriteriaError::MalformedTextSearchString {
                reason: "expected `term|attribute[,attribute...]`".to_string(),
            });
        };
        if term.trim().is_empty() {
            return Err(CriteriaError::MalformedTextSearchString {
                reason: "search term is empty".to_string(),
            });
        }
        if term.len() > MAX_SEARCH_TERM_LENGTH {
            return Err(CriteriaError::MalformedTextSearchString {
                reason: format!("search term exceeds {MAX_SEARCH_TERM_LENGTH} bytes"),
            });
        }

        let attributes: Vec<&str> = rest.split(',').map(str::trim).collect();
        if let Some(bad) = attributes.iter().find(|a| !is_valid_attribute_name(a)) {
            return Err(CriteriaError::MalformedTextSearchString {
                reason: format!("`{bad}` is not a valid attribute name"),
            });
        }

        Ok(Self::new(term, attributes))
    }

    #[must_use]
    pub fn to_raw(&self) -> String {
        let term = self.term.replace('\\', "\\\\").replace('|', "\\|");
        format!("{term}|{}", self.attributes.join(","))
    }

    /// Violations of the schema, for batch reporting. Strict schemas only
    /// allow declared text attributes.
    #[must_use]
    pub fn validate(&self, schema: &AttributeSchema) -> Vec<String> {
        self.attributes
            .iter()
            .filter_map(|attribute| match schema.lookup(attribute) {
                AttributeLookup::Declared(AttributeKind::Text) | AttributeLookup::Undeclared => None,
                AttributeLookup::Declared(kind) => Some(format!(
                    "Searching the {} attribute `{attribute}` is not supported.",
                    kind.name()
                )),
                AttributeLookup::Relation(_) | AttributeLookup::Unknown => {
                    Some(format!("Searching `{attribute}` is not allowed."))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_escaping() {
        assert_eq!(escape_like_wildcards("test"), "test");
        assert_eq!(escape_like_wildcards("100%"), "100!%");
        assert_eq!(escape_like_wildcards("a_b"), "a!_b");
        assert_eq!(escape_like_wildcards("wow!%"), "wow!!!%");
        assert_eq!(escape_like_wildcards("c:\\tmp"), "c:\\tmp");
        assert_eq!(like_pattern("50%off"), "%50!%OFF%");
    }

    #[test]
    fn test_parse() {
        let search = TextSearch::parse("rust|title,body,title").unwrap();
        assert_eq!(search.term, "rust");
        assert_eq!(search.attributes(), ["title", "body"]);
    }

    #[test]
    fn test_parse_escaped_pipe_in_term() {
        let search = TextSearch::parse(r"a\|b|title").unwrap();
        assert_eq!(search.term, "a|b");
        assert_eq!(TextSearch::parse(&search.to_raw()).unwrap(), search);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for raw in ["rust", "|title", "rust|", "rust|ti tle", "rust\\"] {
            assert!(
                matches!(
                    TextSearch::parse(raw),
                    Err(CriteriaError::MalformedTextSearchString { .. })
                ),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn test_term_length_limit() {
        let raw = format!("{}|title", "x".repeat(MAX_SEARCH_TERM_LENGTH + 1));
        assert!(TextSearch::parse(&raw).is_err());
    }

    #[test]
    fn test_validate_requires_text_kind() {
        let schema = AttributeSchema::strict()
            .with_attribute("title", AttributeKind::Text)
            .with_attribute("views", AttributeKind::Integer);
        assert!(TextSearch::new("x", ["title"]).validate(&schema).is_empty());
        assert_eq!(TextSearch::new("x", ["views", "nope"]).validate(&schema).len(), 2);
        assert!(TextSearch::new("x", ["anything"]).validate(&AttributeSchema::permissive()).is_empty());
    }
}
