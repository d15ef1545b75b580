//! # In-memory driver
//!
//! Evaluates criteria over JSON objects. Related records live embedded in
//! their parent, either as an array (to-many) or an object (to-one), and the
//! keys that hold them are declared with a [`RelationTree`].
//!
//! Evaluation follows SQL semantics so both drivers agree on the same data:
//!
//! - every operator except `null` is false when the attribute is null or
//!   missing; `null` is true for both
//! - dotted attributes (`comments.score`) match when any related record does
//! - `like` is a case-insensitive substring match; `eq` is exact
//! - `contains` tests element membership on arrays and is a case-sensitive
//!   substring match on text
//! - ascending sorts put nulls first

use serde_json::{Map, Value as Json};
use std::{cmp::Ordering, collections::BTreeMap, sync::Arc};
use tracing::debug;

use super::{QueryDriver, RelationLoad, RelationshipResolver, plan_loads};
use crate::{
    criteria::Criteria,
    errors::{CriteriaError, Result},
    filtering::{BooleanOperator, FilterNode, GroupMode, OperatorKind, Predicate, Scalar, Value, is_noop},
    search::TextSearch,
    sort::SortDirection,
};

const DRIVER: &str = "memory";

pub type Record = Map<String, Json>;

/// Relation keys of a record, each with the relations of its own records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationTree(BTreeMap<String, RelationTree>);

impl RelationTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, relation: impl Into<String>, nested: Self) -> Self {
        self.0.insert(relation.into(), nested);
        self
    }

    /// Declare a dotted path, creating every relation along it.
    pub fn insert_path(&mut self, path: &str) -> &mut Self {
        let mut current = &mut *self;
        for segment in path.split('.') {
            current = current.0.entry(segment.to_string()).or_default();
        }
        self
    }

    /// The tree of the relation at a dotted path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Self> {
        path.split('.').try_fold(self, |tree, segment| tree.0.get(segment))
    }

    #[must_use]
    pub fn contains(&self, relation: &str) -> bool {
        self.0.contains_key(relation)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Records plus the relations embedded in them. Cloning shares the records.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollection {
    records: Arc<Vec<Record>>,
    relations: RelationTree,
}

impl MemoryCollection {
    #[must_use]
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: Arc::new(records),
            relations: RelationTree::new(),
        }
    }

    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relations.0.entry(relation.into()).or_default();
        self
    }

    #[must_use]
    pub fn with_relation_path(mut self, path: &str) -> Self {
        self.relations.insert_path(path);
        self
    }

    #[must_use]
    pub fn with_relations(mut self, relations: RelationTree) -> Self {
        self.relations = relations;
        self
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub const fn relations(&self) -> &RelationTree {
        &self.relations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<Record> for MemoryCollection {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryDriver;

impl QueryDriver for MemoryDriver {
    type Context = MemoryCollection;
    type Query = MemoryQuery;

    fn name(&self) -> &'static str {
        DRIVER
    }

    fn compile(&self, collection: &MemoryCollection, criteria: &Criteria) -> Result<MemoryQuery> {
        check_criteria(criteria, &collection.relations)?;
        let loads = plan_loads(criteria.context());
        debug!(
            driver = DRIVER,
            records = collection.len(),
            loads = loads.len(),
            "criteria compiled"
        );
        Ok(MemoryQuery {
            records: Arc::clone(&collection.records),
            relations: collection.relations.clone(),
            criteria: criteria.clone(),
            loads,
        })
    }
}

/// Compiled criteria over a collection, ready to run.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    records: Arc<Vec<Record>>,
    relations: RelationTree,
    criteria: Criteria,
    loads: Vec<RelationLoad>,
}

impl MemoryQuery {
    #[must_use]
    pub const fn criteria(&self) -> &Criteria {
        &self.criteria
    }

    /// Relations loaded with every fetch, dotted paths already folded into
    /// their parent relation.
    #[must_use]
    pub fn loads(&self) -> &[RelationLoad] {
        &self.loads
    }

    /// Number of matching records, ignoring pagination.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records
            .iter()
            .filter(|record| matches_criteria(&self.criteria, record, &self.relations))
            .count()
    }

    /// Matching records: filtered, searched, sorted, paginated, with the
    /// requested relations and counts loaded and the projection applied.
    pub fn fetch(&self) -> Result<Vec<Record>> {
        let mut matched: Vec<&Record> = self
            .records
            .iter()
            .filter(|record| matches_criteria(&self.criteria, record, &self.relations))
            .collect();
        let total = matched.len();

        if let Some(sorting) = self.criteria.sorting() {
            matched.sort_by(|a, b| {
                let ordering = compare_fields(
                    first_field(a, &sorting.attribute, &self.relations),
                    first_field(b, &sorting.attribute, &self.relations),
                );
                match sorting.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        if let Some(pagination) = self.criteria.pagination() {
            let offset = usize::try_from(pagination.offset).unwrap_or(usize::MAX);
            let limit = usize::try_from(pagination.limit).unwrap_or(usize::MAX);
            matched = matched.into_iter().skip(offset).take(limit).collect();
        }

        let mut records: Vec<Record> = matched.into_iter().cloned().collect();
        let resolver = EmbeddedRelationResolver::new(&self.relations);
        for load in &self.loads {
            match load {
                RelationLoad::Count { relation, criteria } => {
                    resolver.resolve_count_on_records(&mut records, relation, criteria.as_ref())?;
                }
                RelationLoad::Records { relation, criteria } => {
                    resolver.resolve_on_records(&mut records, relation, Some(criteria))?;
                }
            }
        }
        self.shape(&mut records);

        debug!(driver = DRIVER, matched = total, returned = records.len(), "records fetched");
        Ok(records)
    }

    /// Drop relations that were not asked for and apply the attribute
    /// projection. Loaded relations and counts always survive.
    fn shape(&self, records: &mut [Record]) {
        let attributes = self.criteria.context().attributes();
        let mut loaded = Vec::new();
        let mut counts = Vec::new();
        for load in &self.loads {
            match load {
                RelationLoad::Records { relation, .. } => loaded.push(relation.as_str()),
                RelationLoad::Count { relation, .. } => counts.push(count_key(relation)),
            }
        }

        for record in records {
            record.retain(|key, _| {
                if self.relations.contains(key) {
                    loaded.contains(&key.as_str())
                } else {
                    attributes.is_empty() || attributes.contains(key) || counts.contains(key)
                }
            });
        }
    }
}

fn count_key(relation: &str) -> String {
    format!("{relation}_count")
}

///
/// EmbeddedRelationResolver
///
/// Loads embedded relations in place. A loaded relation is run through the
/// memory driver with its own criteria, so related records are filtered,
/// sorted, paginated and shaped like top-level ones. A to-one relation whose
/// record is filtered out becomes null.
///

#[derive(Debug, Clone, Copy)]
pub struct EmbeddedRelationResolver<'a> {
    relations: &'a RelationTree,
}

impl<'a> EmbeddedRelationResolver<'a> {
    #[must_use]
    pub const fn new(relations: &'a RelationTree) -> Self {
        Self { relations }
    }

    fn subtree(&self, relation: &str) -> Result<&'a RelationTree> {
        self.relations.0.get(relation).ok_or_else(|| unknown_relation(relation))
    }
}

impl RelationshipResolver for EmbeddedRelationResolver<'_> {
    type Records = [Record];

    fn resolve_on_records(
        &self,
        records: &mut [Record],
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<()> {
        let (first, rest) = split_first(relation);
        let subtree = self.subtree(first)?;

        for record in records {
            let Some(slot) = record.get_mut(first) else {
                continue;
            };
            match rest {
                Some(rest) => {
                    let nested = EmbeddedRelationResolver::new(subtree);
                    with_embedded(slot, |related| nested.resolve_on_records(related, rest, criteria))?;
                }
                None => load_embedded(slot, subtree, criteria)?,
            }
        }
        Ok(())
    }

    fn resolve_count_on_records(
        &self,
        records: &mut [Record],
        relation: &str,
        criteria: Option<&Criteria>,
    ) -> Result<()> {
        let (first, rest) = split_first(relation);
        let subtree = self.subtree(first)?;

        for record in records {
            match rest {
                Some(rest) => {
                    let Some(slot) = record.get_mut(first) else {
                        continue;
                    };
                    let nested = EmbeddedRelationResolver::new(subtree);
                    with_embedded(slot, |related| nested.resolve_count_on_records(related, rest, criteria))?;
                }
                None => {
                    let count = embedded(record.get(first))
                        .into_iter()
                        .filter(|related| criteria.is_none_or(|c| matches_criteria(c, related, subtree)))
                        .count();
                    record.insert(count_key(first), Json::from(count));
                }
            }
        }
        Ok(())
    }
}

fn split_first(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((first, rest)) => (first, Some(rest)),
        None => (path, None),
    }
}

/// Run `apply` over the records embedded in `slot` and write them back.
fn with_embedded(slot: &mut Json, apply: impl FnOnce(&mut [Record]) -> Result<()>) -> Result<()> {
    match slot.take() {
        Json::Array(items) => {
            let mut related: Vec<Record> = items.into_iter().filter_map(into_object).collect();
            apply(&mut related)?;
            *slot = Json::Array(related.into_iter().map(Json::Object).collect());
        }
        Json::Object(object) => {
            let mut related = vec![object];
            apply(&mut related)?;
            *slot = related.pop().map_or(Json::Null, Json::Object);
        }
        other => *slot = other,
    }
    Ok(())
}

/// Replace the embedded records in `slot` with the result of running
/// `criteria` over them.
fn load_embedded(slot: &mut Json, relations: &RelationTree, criteria: Option<&Criteria>) -> Result<()> {
    let default = Criteria::new();
    let criteria = criteria.unwrap_or(&default);
    let run = |related: Vec<Record>| {
        let collection = MemoryCollection::new(related).with_relations(relations.clone());
        MemoryDriver.compile(&collection, criteria)?.fetch()
    };

    match slot.take() {
        Json::Array(items) => {
            let related = run(items.into_iter().filter_map(into_object).collect())?;
            *slot = Json::Array(related.into_iter().map(Json::Object).collect());
        }
        Json::Object(object) => {
            let mut related = run(vec![object])?;
            *slot = related.pop().map_or(Json::Null, Json::Object);
        }
        other => *slot = other,
    }
    Ok(())
}

fn into_object(value: Json) -> Option<Record> {
    match value {
        Json::Object(object) => Some(object),
        _ => None,
    }
}

fn embedded(value: Option<&Json>) -> Vec<&Record> {
    match value {
        Some(Json::Array(items)) => items.iter().filter_map(Json::as_object).collect(),
        Some(Json::Object(object)) => vec![object],
        _ => Vec::new(),
    }
}

//
// Relation checks
//

fn unknown_relation(relation: &str) -> CriteriaError {
    CriteriaError::UnknownRelation {
        driver: DRIVER,
        relation: relation.to_string(),
    }
}

fn relation_at<'t>(tree: &'t RelationTree, path: &str) -> Result<&'t RelationTree> {
    tree.get(path).ok_or_else(|| unknown_relation(path))
}

fn check_attribute(tree: &RelationTree, attribute: &str) -> Result<()> {
    if let Some((relation, _)) = attribute.rsplit_once('.') {
        relation_at(tree, relation)?;
    }
    Ok(())
}

fn check_node(node: &FilterNode, tree: &RelationTree) -> Result<()> {
    match node {
        FilterNode::Group(group) => {
            let tree = match group.mode.relation() {
                Some(relation) => relation_at(tree, relation)?,
                None => tree,
            };
            group.children.iter().try_for_each(|child| check_node(child, tree))
        }
        FilterNode::Predicate(predicate) if predicate.operator.is_relational() => {
            let related = relation_at(tree, &predicate.attribute)?;
            predicate.nested().map_or(Ok(()), |nested| check_node(nested, related))
        }
        FilterNode::Predicate(predicate) => check_attribute(tree, &predicate.attribute),
    }
}

fn check_criteria(criteria: &Criteria, tree: &RelationTree) -> Result<()> {
    if let Some(node) = criteria.filters() {
        check_node(node, tree)?;
    }
    if let Some(sorting) = criteria.sorting() {
        check_attribute(tree, &sorting.attribute)?;
    }
    if let Some(search) = criteria.text_search() {
        for attribute in search.attributes() {
            check_attribute(tree, attribute)?;
        }
    }

    let context = criteria.context();
    for (relation, nested) in context.relations().iter().chain(context.relation_counts()) {
        let related = relation_at(tree, relation)?;
        if let Some(nested) = nested {
            check_criteria(nested, related)?;
        }
    }
    Ok(())
}

//
// Evaluation
//

fn matches_criteria(criteria: &Criteria, record: &Record, tree: &RelationTree) -> bool {
    criteria.filters().is_none_or(|node| matches_root(node, record, tree))
        && criteria.text_search().is_none_or(|search| matches_search(search, record, tree))
}

fn matches_root(node: &FilterNode, record: &Record, tree: &RelationTree) -> bool {
    is_noop(node) || matches_node(node, record, tree)
}

fn matches_node(node: &FilterNode, record: &Record, tree: &RelationTree) -> bool {
    match node {
        FilterNode::Predicate(predicate) => matches_predicate(predicate, record, tree),
        FilterNode::Group(group) => {
            let any_related = |relation: &str| {
                related(record, relation, tree)
                    .into_iter()
                    .any(|(item, nested)| matches_sequence(&group.children, item, nested).unwrap_or(true))
            };
            match &group.mode {
                GroupMode::Plain => matches_sequence(&group.children, record, tree).unwrap_or(true),
                GroupMode::Has(relation) => any_related(relation),
                GroupMode::DoesNotHave(relation) => !any_related(relation),
            }
        }
    }
}

/// Left fold over siblings; the first boolean is ignored and no-op groups
/// are skipped. `None` when nothing was evaluated.
fn matches_sequence(children: &[FilterNode], record: &Record, tree: &RelationTree) -> Option<bool> {
    children
        .iter()
        .filter(|child| !is_noop(child))
        .fold(None, |acc, child| {
            Some(match (acc, child.boolean()) {
                (None, _) => matches_node(child, record, tree),
                (Some(true), BooleanOperator::Or) => true,
                (Some(false), BooleanOperator::And) => false,
                (Some(_), _) => matches_node(child, record, tree),
            })
        })
}

/// Records reached by following the dotted relation `path`, each with its
/// own relation tree.
fn related<'r, 't>(record: &'r Record, path: &str, tree: &'t RelationTree) -> Vec<(&'r Record, &'t RelationTree)> {
    path.split('.').fold(vec![(record, tree)], |current, segment| {
        current
            .into_iter()
            .filter_map(|(record, tree)| tree.0.get(segment).map(|nested| (record, segment, nested)))
            .flat_map(|(record, segment, nested)| {
                embedded(record.get(segment))
                    .into_iter()
                    .map(move |item| (item, nested))
            })
            .collect()
    })
}

/// Split `relation.attribute` when the prefix is a declared relation.
fn split_relation<'p>(path: &'p str, tree: &RelationTree) -> Option<(&'p str, &'p str)> {
    path.rsplit_once('.')
        .filter(|(relation, _)| tree.get(relation).is_some())
}

/// Values of `attribute` on the record, or on every related record for
/// dotted attributes.
fn fields<'r>(record: &'r Record, attribute: &str, tree: &RelationTree) -> Vec<Option<&'r Json>> {
    match split_relation(attribute, tree) {
        Some((relation, name)) => related(record, relation, tree)
            .into_iter()
            .map(|(item, _)| item.get(name))
            .collect(),
        None => vec![record.get(attribute)],
    }
}

fn first_field<'r>(record: &'r Record, attribute: &str, tree: &RelationTree) -> Option<&'r Json> {
    fields(record, attribute, tree).into_iter().next().flatten()
}

fn matches_predicate(predicate: &Predicate, record: &Record, tree: &RelationTree) -> bool {
    match predicate.operator {
        OperatorKind::Exists | OperatorKind::DoesNotExist => {
            let found = related(record, &predicate.attribute, tree)
                .into_iter()
                .any(|(item, nested)| predicate.nested().is_none_or(|node| matches_root(node, item, nested)));
            (predicate.operator == OperatorKind::Exists) == found
        }
        operator => fields(record, &predicate.attribute, tree)
            .into_iter()
            .any(|field| matches_field(operator, field, predicate.value.as_ref())),
    }
}

fn matches_field(operator: OperatorKind, field: Option<&Json>, value: Option<&Value>) -> bool {
    let field = field.filter(|field| !field.is_null());
    let Some(field) = field else {
        return operator == OperatorKind::IsNull;
    };
    let operands = value.map_or(&[][..], Value::scalars);
    let first = operands.first();

    match operator {
        OperatorKind::IsNull => false,
        OperatorKind::IsNotNull => true,
        OperatorKind::Eq => first.is_some_and(|o| equals(field, o)),
        OperatorKind::Ne => first.is_some_and(|o| !equals(field, o)),
        OperatorKind::Gt => first.is_some_and(|o| ordering(field, o).is_some_and(Ordering::is_gt)),
        OperatorKind::Gte => first.is_some_and(|o| ordering(field, o).is_some_and(Ordering::is_ge)),
        OperatorKind::Lt => first.is_some_and(|o| ordering(field, o).is_some_and(Ordering::is_lt)),
        OperatorKind::Lte => first.is_some_and(|o| ordering(field, o).is_some_and(Ordering::is_le)),
        OperatorKind::Like => operands.iter().any(|o| like(field, &o.to_string())),
        OperatorKind::NotLike => !operands.iter().any(|o| like(field, &o.to_string())),
        OperatorKind::Contains => operands.iter().any(|o| contains(field, o)),
        OperatorKind::NotContains => !operands.iter().any(|o| contains(field, o)),
        OperatorKind::In => operands.iter().any(|o| equals(field, o)),
        OperatorKind::NotIn => !operands.iter().any(|o| equals(field, o)),
        OperatorKind::Between | OperatorKind::NotBetween => {
            let [low, high] = operands else {
                return false;
            };
            match (ordering(field, low), ordering(field, high)) {
                (Some(low), Some(high)) => {
                    let within = low.is_ge() && high.is_le();
                    (operator == OperatorKind::Between) == within
                }
                _ => false,
            }
        }
        OperatorKind::Exists | OperatorKind::DoesNotExist => false,
    }
}

fn ordering(field: &Json, operand: &Scalar) -> Option<Ordering> {
    Scalar::from_json(field)?.compare(operand)
}

fn equals(field: &Json, operand: &Scalar) -> bool {
    ordering(field, operand) == Some(Ordering::Equal)
}

fn text_of(field: &Json) -> Option<String> {
    match field {
        Json::String(text) => Some(text.clone()),
        Json::Number(number) => Some(number.to_string()),
        Json::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn like(field: &Json, term: &str) -> bool {
    text_of(field).is_some_and(|text| text.to_lowercase().contains(&term.to_lowercase()))
}

fn contains(field: &Json, operand: &Scalar) -> bool {
    match field {
        Json::Array(items) => items.iter().any(|item| equals(item, operand)),
        Json::String(text) => text.contains(&operand.to_string()),
        _ => false,
    }
}

fn matches_search(search: &TextSearch, record: &Record, tree: &RelationTree) -> bool {
    search.attributes().iter().any(|attribute| {
        fields(record, attribute, tree)
            .into_iter()
            .flatten()
            .any(|field| like(field, &search.term))
    })
}

/// Nulls and missing values sort first; incomparable values are equal.
fn compare_fields(a: Option<&Json>, b: Option<&Json>) -> Ordering {
    let scalar = |field: Option<&Json>| {
        field
            .filter(|field| !field.is_null())
            .and_then(Scalar::from_json)
    };
    match (scalar(a), scalar(b)) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.compare(&b).unwrap_or(Ordering::Equal),
    }
}
