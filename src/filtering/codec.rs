//! Compact raw-string form of filter trees.
//!
//! ```text
//! sequence  := item (',' item)*
//! item      := [boolean '|'] (group | predicate)
//! group     := [mode '|' relation] '[' [sequence] ']'
//! predicate := attribute '|' operator ['|' values]
//! values    := value (',' value)*  |  '[' [sequence] ']'
//! value     := '"' text '"' | bare
//! ```
//!
//! `boolean` is `and`/`or`, `mode` is `has`/`!has`; keywords and operator
//! tokens are case-insensitive. A backslash escapes any of `\ | , [ ] "`.
//! Bare values are typed by inference (`null`, booleans, numbers, otherwise
//! text); quoted values are always text.
//!
//! ```text
//! age|gt|18,or|status|in|draft,review,has|comments[approved|eq|true]
//! ```
//!
//! Decoding produces the structured [`FilterData`] form so that raw and JSON
//! input share one validation path through the factory.

use super::{
    node::{FilterData, FilterNode, GroupData, GroupMode, PredicateData},
    operator::{BooleanOperator, OperatorKind},
    value::{Scalar, Value},
};
use crate::{
    config::DEFAULT_MAX_FILTER_DEPTH,
    errors::{CriteriaError, Result},
};

const ESCAPE: char = '\\';
const SPECIAL: [char; 6] = ['\\', '|', ',', '[', ']', '"'];

/// Decode a raw filter string into structured items.
pub fn decode_filters(raw: &str) -> Result<Vec<FilterData>> {
    decode_filters_with_depth(raw, DEFAULT_MAX_FILTER_DEPTH)
}

/// Decode, refusing bracket nesting deeper than `max_depth`.
pub fn decode_filters_with_depth(raw: &str, max_depth: usize) -> Result<Vec<FilterData>> {
    if raw.trim().is_empty() {
        return Err(CriteriaError::malformed_filter(0, "empty filter string"));
    }
    Decoder { max_depth }.sequence(raw, 0, 1)
}

/// Encode a tree. A plain root group is written as its bare sequence.
#[must_use]
pub fn encode_filters(root: &FilterNode) -> String {
    match root {
        FilterNode::Group(group) if group.mode == GroupMode::Plain => encode_sequence(&group.children),
        node => encode_item(node),
    }
}

/// Encode a sibling list.
#[must_use]
pub fn encode_sequence(nodes: &[FilterNode]) -> String {
    nodes.iter().map(encode_item).collect::<Vec<_>>().join(",")
}

fn encode_item(node: &FilterNode) -> String {
    let mut out = String::new();

    let keyword_attribute = matches!(
        node,
        FilterNode::Predicate(p) if BooleanOperator::from_keyword(&p.attribute).is_some()
    );
    if node.boolean() == BooleanOperator::Or || keyword_attribute {
        out.push_str(node.boolean().keyword());
        out.push('|');
    }

    match node {
        FilterNode::Predicate(predicate) => {
            out.push_str(&predicate.attribute);
            out.push('|');
            out.push_str(predicate.operator.token());
            match &predicate.value {
                None => {}
                Some(Value::Scalar(scalar)) => {
                    out.push('|');
                    out.push_str(&encode_scalar(scalar));
                }
                Some(Value::List(items)) => {
                    out.push('|');
                    out.push_str(&items.iter().map(encode_scalar).collect::<Vec<_>>().join(","));
                }
                Some(Value::Nested(nested)) => {
                    out.push_str("|[");
                    out.push_str(&encode_filters(nested));
                    out.push(']');
                }
            }
        }
        FilterNode::Group(group) => {
            if let (Some(keyword), Some(relation)) = (group.mode.keyword(), group.mode.relation()) {
                out.push_str(keyword);
                out.push('|');
                out.push_str(relation);
            }
            out.push('[');
            out.push_str(&encode_sequence(&group.children));
            out.push(']');
        }
    }
    out
}

fn encode_scalar(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Text(text) => {
            let escaped = escape(text);
            let inferred = Scalar::infer(text.trim());
            if text.is_empty() || text.trim() != text || inferred != *scalar {
                format!("\"{escaped}\"")
            } else {
                escaped
            }
        }
        other => other.to_string(),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split at unescaped `separator`s that sit outside quotes and brackets.
/// Positions are absolute byte offsets into the original input.
fn split_top_level(input: &str, offset: usize, separator: char) -> Result<Vec<(usize, &str)>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut start = 0;
    let mut chars = input.char_indices();

    while let Some((index, c)) = chars.next() {
        match c {
            ESCAPE => {
                if chars.next().is_none() {
                    return Err(CriteriaError::malformed_filter(offset + index, "dangling escape"));
                }
            }
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '[' => depth += 1,
            ']' => {
                if depth == 0 {
                    return Err(CriteriaError::malformed_filter(offset + index, "unbalanced `]`"));
                }
                depth -= 1;
            }
            c if c == separator && depth == 0 => {
                parts.push((offset + start, &input[start..index]));
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(CriteriaError::malformed_filter(offset + input.len(), "unterminated quote"));
    }
    if depth > 0 {
        return Err(CriteriaError::malformed_filter(offset + input.len(), "unbalanced `[`"));
    }
    parts.push((offset + start, &input[start..]));
    Ok(parts)
}

/// Offset of the first non-whitespace character of `field`.
fn leading(field: &str, offset: usize) -> usize {
    offset + (field.len() - field.trim_start().len())
}

/// Contents of a `[...]` body whose opening bracket is matched by its final
/// character.
fn bracket_body(field: &str, offset: usize) -> Result<(usize, &str)> {
    let start = leading(field, offset);
    let trimmed = field.trim();
    if !trimmed.starts_with('[') || !trimmed.ends_with(']') {
        return Err(CriteriaError::malformed_filter(start, "expected a `[...]` group"));
    }

    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut chars = trimmed.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            ESCAPE => {
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '[' => depth += 1,
            ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && index != trimmed.len() - 1 {
                    return Err(CriteriaError::malformed_filter(
                        start + index + 1,
                        "unexpected input after `]`",
                    ));
                }
            }
            _ => {}
        }
    }
    Ok((start + 1, &trimmed[1..trimmed.len() - 1]))
}

fn parse_scalar(field: &str, offset: usize) -> Result<Scalar> {
    let start = leading(field, offset);
    let trimmed = field.trim();

    if trimmed.is_empty() {
        return Err(CriteriaError::malformed_filter(
            start,
            "empty value (quote empty text as \"\")",
        ));
    }

    if let Some(body) = trimmed.strip_prefix('"') {
        let mut chars = body.char_indices();
        while let Some((index, c)) = chars.next() {
            match c {
                ESCAPE => {
                    chars.next();
                }
                '"' if index == body.len() - 1 => return Ok(Scalar::Text(unescape(&body[..index]))),
                '"' => {
                    return Err(CriteriaError::malformed_filter(
                        start + index + 2,
                        "unexpected input after closing quote",
                    ));
                }
                _ => {}
            }
        }
        return Err(CriteriaError::malformed_filter(start, "unterminated quote"));
    }

    let mut chars = trimmed.char_indices();
    while let Some((index, c)) = chars.next() {
        match c {
            ESCAPE => {
                chars.next();
            }
            '[' | ']' | '"' => {
                return Err(CriteriaError::malformed_filter(
                    start + index,
                    format!("unescaped `{c}` in value"),
                ));
            }
            _ => {}
        }
    }
    Ok(Scalar::infer(&unescape(trimmed)))
}

fn has_top_level(field: &str, separator: char) -> bool {
    split_top_level(field, 0, separator).is_ok_and(|parts| parts.len() > 1)
}

fn is_group_body(field: &str) -> bool {
    let trimmed = field.trim();
    trimmed.starts_with('[') && trimmed.ends_with(']')
}

struct Decoder {
    max_depth: usize,
}

impl Decoder {
    fn sequence(&self, input: &str, offset: usize, depth: usize) -> Result<Vec<FilterData>> {
        if depth > self.max_depth {
            return Err(CriteriaError::malformed_filter(
                offset,
                format!("filters are nested deeper than {} levels", self.max_depth),
            ));
        }
        if input.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut items: Vec<FilterData> = Vec::new();
        for (position, segment) in split_top_level(input, offset, ',')? {
            if !has_top_level(segment, '|') && !segment.trim_start().starts_with('[') {
                Self::continue_values(items.last_mut(), segment, position)?;
            } else {
                items.push(self.item(segment, position, depth)?);
            }
        }
        Ok(items)
    }

    /// Append a comma-continued value to the preceding predicate.
    fn continue_values(previous: Option<&mut FilterData>, segment: &str, position: usize) -> Result<()> {
        let Some(FilterData::Predicate(previous)) = previous else {
            return Err(CriteriaError::malformed_filter(
                leading(segment, position),
                "value without a preceding filter",
            ));
        };
        let relational = OperatorKind::from_token(&previous.operator).is_some_and(OperatorKind::is_relational);
        let scalar = parse_scalar(segment, position)?.to_json();

        match previous.value.take() {
            Some(serde_json::Value::Array(mut values)) if !relational => {
                values.push(scalar);
                previous.value = Some(serde_json::Value::Array(values));
            }
            Some(first) if !relational => {
                previous.value = Some(serde_json::Value::Array(vec![first, scalar]));
            }
            _ => {
                return Err(CriteriaError::malformed_filter(
                    leading(segment, position),
                    format!("unexpected value after `{}`", previous.operator),
                ));
            }
        }
        Ok(())
    }

    fn item(&self, segment: &str, position: usize, depth: usize) -> Result<FilterData> {
        let fields = split_top_level(segment, position, '|')?;

        let (boolean, rest) = match fields.split_first() {
            Some(((_, first), rest)) if Self::prefix_applies(rest) => {
                match BooleanOperator::from_keyword(first.trim()) {
                    Some(boolean) => (boolean, rest),
                    None => (BooleanOperator::And, fields.as_slice()),
                }
            }
            _ => (BooleanOperator::And, fields.as_slice()),
        };

        match rest {
            [(offset, body)] if is_group_body(body) => {
                let (inner_offset, inner) = bracket_body(body, *offset)?;
                Ok(FilterData::Group(GroupData {
                    boolean,
                    mode: None,
                    relation: None,
                    items: self.sequence(inner, inner_offset, depth + 1)?,
                }))
            }
            [(_, keyword), (offset, body)]
                if GroupMode::from_keyword(keyword.trim(), "").is_some() && body.trim_end().ends_with(']') =>
            {
                let trimmed = body.trim_start();
                let start = leading(body, *offset);
                let Some(open) = trimmed.find('[') else {
                    return Err(CriteriaError::malformed_filter(start, "expected a `[...]` group"));
                };
                let relation = trimmed[..open].trim();
                if relation.is_empty() || relation.contains(SPECIAL) {
                    return Err(CriteriaError::malformed_filter(start, "invalid relation name"));
                }
                let (inner_offset, inner) = bracket_body(&trimmed[open..], start + open)?;
                Ok(FilterData::Group(GroupData {
                    boolean,
                    mode: Some(keyword.trim().to_ascii_lowercase()),
                    relation: Some(relation.to_string()),
                    items: self.sequence(inner, inner_offset, depth + 1)?,
                }))
            }
            [(attr_offset, attribute), (_, operator), value @ ..] if value.len() <= 1 => {
                let name = attribute.trim();
                if name.is_empty() || name.contains(SPECIAL) {
                    return Err(CriteriaError::malformed_filter(
                        leading(attribute, *attr_offset),
                        "invalid attribute name",
                    ));
                }

                let token = operator.trim();
                let Some(kind) = OperatorKind::from_token(token) else {
                    return Err(CriteriaError::UnknownOperator {
                        token: token.to_string(),
                    });
                };

                let value = match value.first() {
                    None => None,
                    Some((offset, field)) if kind.is_relational() => {
                        let (inner_offset, inner) = bracket_body(field, *offset)?;
                        let nested = self.sequence(inner, inner_offset, depth + 1)?;
                        Some(
                            serde_json::to_value(nested)
                                .map_err(|e| CriteriaError::malformed_filter(*offset, e.to_string()))?,
                        )
                    }
                    Some((offset, field)) => Some(parse_scalar(field, *offset)?.to_json()),
                };

                Ok(FilterData::Predicate(PredicateData {
                    boolean,
                    attr: name.to_string(),
                    operator: token.to_ascii_lowercase(),
                    value,
                }))
            }
            _ => Err(CriteriaError::malformed_filter(
                leading(segment, position),
                "expected `attribute|operator|value`",
            )),
        }
    }

    /// Whether a leading `and`/`or` field is a boolean prefix for `rest`.
    fn prefix_applies(rest: &[(usize, &str)]) -> bool {
        match rest {
            [] => false,
            [(_, body), ..] if is_group_body(body) => true,
            [(_, keyword), (_, body), ..] if GroupMode::from_keyword(keyword.trim(), "").is_some() => {
                body.trim_end().ends_with(']') || OperatorKind::from_token(body).is_some()
            }
            [_, (_, operator), ..] => OperatorKind::from_token(operator).is_some(),
            [_] => false,
        }
    }
}
