//! # SQL statement driver
//!
//! Compiles criteria into sea-query [`SelectStatement`]s against a described
//! table. Nothing is executed; build the statements with the backend of your
//! connection and run them however the application talks to its database.
//!
//! - relation groups, `exists` predicates and dotted attributes become
//!   correlated `EXISTS` subqueries, so a to-many relation matches when any
//!   related row does
//! - `like` compiles to `UPPER(column) LIKE '%TERM%' ESCAPE '!'`
//! - sibling predicates keep their left-to-right grouping with explicit
//!   parentheses
//! - `contains` / `!contains` have no portable SQL form and are rejected
//!
//! Eager loads are separate statements, one per relation, narrowed to the
//! parent keys with [`SeaEagerLoad::for_keys`].

use sea_orm::{
    DatabaseBackend, Statement,
    sea_query::{
        Alias, Asterisk, Condition, Expr, Func, JoinType, LikeExpr, NullOrdering, Order, Query,
        SelectStatement, SimpleExpr,
    },
};
use std::collections::BTreeMap;
use tracing::debug;

use super::{QueryDriver, RelationLoad, plan_loads};
use crate::{
    criteria::Criteria,
    errors::{CriteriaError, Result},
    filtering::{BooleanOperator, FilterNode, GroupMode, OperatorKind, Predicate, Scalar, is_noop},
    search::{LIKE_ESCAPE, TextSearch, like_pattern},
    sort::SortDirection,
};

const DRIVER: &str = "sea-query";

/// A table and the relations reachable from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeaTable {
    pub table: String,
    pub primary_key: String,
    pub relations: BTreeMap<String, SeaRelation>,
}

/// `parent.local_key = target.foreign_key`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeaRelation {
    pub target: SeaTable,
    pub local_key: String,
    pub foreign_key: String,
}

impl SeaTable {
    #[must_use]
    pub fn new(table: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            primary_key: primary_key.into(),
            relations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_relation(mut self, name: impl Into<String>, relation: SeaRelation) -> Self {
        self.relations.insert(name.into(), relation);
        self
    }

    /// Rows of `target` whose `foreign_key` holds this table's primary key.
    #[must_use]
    pub fn has_many(self, name: impl Into<String>, target: Self, foreign_key: impl Into<String>) -> Self {
        let local_key = self.primary_key.clone();
        self.with_relation(
            name,
            SeaRelation {
                target,
                local_key,
                foreign_key: foreign_key.into(),
            },
        )
    }

    /// The row of `target` whose primary key this table holds in `local_key`.
    #[must_use]
    pub fn belongs_to(self, name: impl Into<String>, target: Self, local_key: impl Into<String>) -> Self {
        let foreign_key = target.primary_key.clone();
        self.with_relation(
            name,
            SeaRelation {
                target,
                local_key: local_key.into(),
                foreign_key,
            },
        )
    }
}

/// Compiled statements for one criteria.
#[derive(Debug, Clone)]
pub struct SeaQuery {
    select: SelectStatement,
    count: SelectStatement,
    eager: Vec<SeaEagerLoad>,
}

impl SeaQuery {
    /// Filtered, searched, sorted and paginated rows.
    #[must_use]
    pub const fn select(&self) -> &SelectStatement {
        &self.select
    }

    /// `COUNT(*)` of the matching rows, ignoring pagination.
    #[must_use]
    pub const fn count(&self) -> &SelectStatement {
        &self.count
    }

    #[must_use]
    pub fn eager(&self) -> &[SeaEagerLoad] {
        &self.eager
    }

    /// The row select built for `backend`.
    #[must_use]
    pub fn statement(&self, backend: DatabaseBackend) -> Statement {
        backend.build(&self.select)
    }
}

/// Statement loading one relation for a page of parent rows.
#[derive(Debug, Clone)]
pub struct SeaEagerLoad {
    pub relation: String,
    pub table: String,
    /// Parent column whose values are passed to [`for_keys`](Self::for_keys)
    pub local_key: String,
    /// Related column matched against the parent keys
    pub foreign_key: String,
    pub kind: SeaLoadKind,
}

#[derive(Debug, Clone)]
pub enum SeaLoadKind {
    /// Related rows, compiled from the relation's own criteria
    Records(Box<SeaQuery>),
    /// `foreign_key, COUNT(*) AS {relation}_count ... GROUP BY foreign_key`
    Count(SelectStatement),
}

impl SeaEagerLoad {
    /// The load statement restricted to the given parent key values.
    /// Pagination of the relation's criteria applies across all parents.
    #[must_use]
    pub fn for_keys<I>(&self, keys: I) -> SelectStatement
    where
        I: IntoIterator<Item = sea_orm::Value>,
    {
        let mut statement = match &self.kind {
            SeaLoadKind::Records(query) => query.select.clone(),
            SeaLoadKind::Count(count) => count.clone(),
        };
        statement.and_where(
            Expr::col((Alias::new(&self.table), Alias::new(&self.foreign_key))).is_in(keys),
        );
        statement
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SeaQueryDriver;

impl QueryDriver for SeaQueryDriver {
    type Context = SeaTable;
    type Query = SeaQuery;

    fn name(&self) -> &'static str {
        DRIVER
    }

    fn compile(&self, table: &SeaTable, criteria: &Criteria) -> Result<SeaQuery> {
        let query = compile_query(&Scope::root(table), criteria, &[])?;
        debug!(
            driver = DRIVER,
            table = %table.table,
            eager = query.eager.len(),
            "criteria compiled"
        );
        Ok(query)
    }
}

/// A table as seen from one query level. Subquery tables are always aliased
/// by their `r_`-prefixed relation path, never by a bare table name, so
/// self-referencing relations stay unambiguous.
struct Scope<'a> {
    table: &'a SeaTable,
    path: String,
}

impl<'a> Scope<'a> {
    fn root(table: &'a SeaTable) -> Self {
        Self {
            table,
            path: String::new(),
        }
    }

    fn alias(&self) -> &str {
        if self.path.is_empty() { &self.table.table } else { &self.path }
    }

    fn column(&self, column: &str) -> Expr {
        Expr::col((Alias::new(self.alias()), Alias::new(column)))
    }

    /// Follow `relation` from this table.
    fn relation(&self, relation: &str) -> Result<(&'a SeaRelation, Self)> {
        let related = self
            .table
            .relations
            .get(relation)
            .ok_or_else(|| CriteriaError::UnknownRelation {
                driver: DRIVER,
                relation: relation.to_string(),
            })?;
        let path = if self.path.is_empty() {
            format!("r_{relation}")
        } else {
            format!("{}_{relation}", self.path)
        };
        Ok((related, Self { table: &related.target, path }))
    }

    /// `related.foreign_key = self.local_key`
    fn join_condition(&self, relation: &SeaRelation, child: &Self) -> SimpleExpr {
        child
            .column(&relation.foreign_key)
            .equals((Alias::new(self.alias()), Alias::new(&relation.local_key)))
    }

    fn from_clause(&self, select: &mut SelectStatement) {
        if self.path.is_empty() {
            select.from(Alias::new(&self.table.table));
        } else {
            select.from_as(Alias::new(&self.table.table), Alias::new(self.alias()));
        }
    }
}

fn compile_query(scope: &Scope<'_>, criteria: &Criteria, required: &[&str]) -> Result<SeaQuery> {
    let condition = where_condition(scope, criteria)?;
    let loads = plan_loads(criteria.context());
    let eager = loads
        .iter()
        .map(|load| compile_load(scope, load))
        .collect::<Result<Vec<_>>>()?;

    let mut select = Query::select();
    let attributes = criteria.context().attributes();
    if attributes.is_empty() {
        select.column(Asterisk);
    } else {
        let mut columns: Vec<&str> = attributes.iter().map(String::as_str).collect();
        let keys = required
            .iter()
            .copied()
            .chain(eager.iter().map(|load| load.local_key.as_str()));
        for key in keys {
            if !columns.contains(&key) {
                columns.push(key);
            }
        }
        for column in columns {
            select.column((Alias::new(scope.alias()), Alias::new(column)));
        }
    }
    scope.from_clause(&mut select);
    if !condition.is_empty() {
        select.cond_where(condition.clone());
    }

    let mut count = Query::select();
    count.expr_as(Expr::cust("COUNT(*)"), Alias::new("count"));
    scope.from_clause(&mut count);
    if !condition.is_empty() {
        count.cond_where(condition);
    }

    if let Some(sorting) = criteria.sorting() {
        let (order, nulls) = match sorting.direction {
            SortDirection::Asc => (Order::Asc, NullOrdering::First),
            SortDirection::Desc => (Order::Desc, NullOrdering::Last),
        };
        match sorting.attribute.rsplit_once('.') {
            Some((relation, column)) => {
                let value = related_value(scope, relation, column)?;
                select.order_by_expr_with_nulls(
                    SimpleExpr::SubQuery(None, Box::new(value.into_sub_query_statement())),
                    order,
                    nulls,
                );
            }
            None => {
                select.order_by_with_nulls(
                    (Alias::new(scope.alias()), Alias::new(&sorting.attribute)),
                    order,
                    nulls,
                );
            }
        }
    }

    if let Some(pagination) = criteria.pagination() {
        select.limit(pagination.limit).offset(pagination.offset);
    }

    Ok(SeaQuery { select, count, eager })
}

fn compile_load(scope: &Scope<'_>, load: &RelationLoad) -> Result<SeaEagerLoad> {
    let (relation, _) = scope.relation(load.relation())?;
    let target = Scope::root(&relation.target);

    let kind = match load {
        RelationLoad::Records { criteria, .. } => SeaLoadKind::Records(Box::new(compile_query(
            &target,
            criteria,
            &[relation.foreign_key.as_str()],
        )?)),
        RelationLoad::Count { relation: name, criteria } => {
            let mut count = Query::select();
            count
                .column((Alias::new(target.alias()), Alias::new(&relation.foreign_key)))
                .expr_as(Expr::cust("COUNT(*)"), Alias::new(format!("{name}_count")));
            target.from_clause(&mut count);
            if let Some(criteria) = criteria {
                let condition = where_condition(&target, criteria)?;
                if !condition.is_empty() {
                    count.cond_where(condition);
                }
            }
            count.group_by_col((Alias::new(target.alias()), Alias::new(&relation.foreign_key)));
            SeaLoadKind::Count(count)
        }
    };

    Ok(SeaEagerLoad {
        relation: load.relation().to_string(),
        table: relation.target.table.clone(),
        local_key: relation.local_key.clone(),
        foreign_key: relation.foreign_key.clone(),
        kind,
    })
}

fn where_condition(scope: &Scope<'_>, criteria: &Criteria) -> Result<Condition> {
    let mut condition = Condition::all();
    if let Some(node) = criteria.filters()
        && let Some(filters) = node_condition(scope, node)?
    {
        condition = condition.add(filters);
    }
    if let Some(search) = criteria.text_search() {
        condition = condition.add(search_condition(scope, search)?);
    }
    Ok(condition)
}

fn node_condition(scope: &Scope<'_>, node: &FilterNode) -> Result<Option<Condition>> {
    if is_noop(node) {
        return Ok(None);
    }
    match node {
        FilterNode::Predicate(predicate) => predicate_condition(scope, predicate).map(Some),
        FilterNode::Group(group) => match &group.mode {
            GroupMode::Plain => sequence_condition(scope, &group.children),
            GroupMode::Has(relation) => {
                exists(scope, relation, |inner| sequence_condition(inner, &group.children)).map(Some)
            }
            GroupMode::DoesNotHave(relation) => {
                exists(scope, relation, |inner| sequence_condition(inner, &group.children))
                    .map(|condition| Some(condition.not()))
            }
        },
    }
}

/// Left fold: every connective wraps everything before it.
fn sequence_condition(scope: &Scope<'_>, children: &[FilterNode]) -> Result<Option<Condition>> {
    let mut folded: Option<Condition> = None;
    for child in children {
        let Some(next) = node_condition(scope, child)? else {
            continue;
        };
        folded = Some(match folded {
            None => next,
            Some(previous) => match child.boolean() {
                BooleanOperator::And => Condition::all().add(previous).add(next),
                BooleanOperator::Or => Condition::any().add(previous).add(next),
            },
        });
    }
    Ok(folded)
}

/// `EXISTS (SELECT 1 FROM related WHERE join AND inner)` along a dotted
/// relation path.
fn exists<F>(scope: &Scope<'_>, path: &str, inner: F) -> Result<Condition>
where
    F: FnOnce(&Scope<'_>) -> Result<Option<Condition>>,
{
    let (first, rest) = match path.split_once('.') {
        Some((first, rest)) => (first, Some(rest)),
        None => (path, None),
    };
    let (relation, child) = scope.relation(first)?;

    let nested = match rest {
        Some(rest) => Some(exists(&child, rest, inner)?),
        None => inner(&child)?,
    };
    let mut condition = Condition::all().add(scope.join_condition(relation, &child));
    if let Some(nested) = nested {
        condition = condition.add(nested);
    }

    let mut select = Query::select();
    select.expr(Expr::val(1));
    child.from_clause(&mut select);
    select.cond_where(condition);
    Ok(Condition::all().add(Expr::exists(select)))
}

/// `SELECT related.column ... LIMIT 1` along a dotted relation path, for
/// ordering by a related value.
fn related_value(scope: &Scope<'_>, path: &str, column: &str) -> Result<SelectStatement> {
    let mut select = Query::select();
    let (relation, mut current) = scope.relation(path.split('.').next().unwrap_or(path))?;
    current.from_clause(&mut select);
    select.and_where(scope.join_condition(relation, &current));

    for segment in path.split('.').skip(1) {
        let (relation, child) = current.relation(segment)?;
        select.join_as(
            JoinType::InnerJoin,
            Alias::new(&child.table.table),
            Alias::new(child.alias()),
            current.join_condition(relation, &child),
        );
        current = child;
    }

    select
        .expr(current.column(column))
        .limit(1);
    Ok(select)
}

fn predicate_condition(scope: &Scope<'_>, predicate: &Predicate) -> Result<Condition> {
    match predicate.operator {
        OperatorKind::Exists => exists(scope, &predicate.attribute, |inner| {
            predicate.nested().map_or(Ok(None), |nested| node_condition(inner, nested))
        }),
        OperatorKind::DoesNotExist => exists(scope, &predicate.attribute, |inner| {
            predicate.nested().map_or(Ok(None), |nested| node_condition(inner, nested))
        })
        .map(Condition::not),
        _ => match predicate.attribute.rsplit_once('.') {
            Some((relation, column)) => exists(scope, relation, |inner| {
                column_condition(inner, column, predicate).map(Some)
            }),
            None => column_condition(scope, &predicate.attribute, predicate),
        },
    }
}

fn column_condition(scope: &Scope<'_>, column: &str, predicate: &Predicate) -> Result<Condition> {
    let operands: Vec<&Scalar> = predicate
        .value
        .as_ref()
        .map(|value| value.scalars().iter().collect())
        .unwrap_or_default();
    let invalid = |reason: &str| CriteriaError::InvalidValueShape {
        attribute: predicate.attribute.clone(),
        operator: predicate.operator,
        reason: reason.to_string(),
    };
    let single = || {
        operands
            .first()
            .map(|scalar| to_value(scalar))
            .ok_or_else(|| invalid("expected a value"))
    };
    let pair = || match operands.as_slice() {
        [low, high] => Ok((to_value(low), to_value(high))),
        _ => Err(invalid("expected two values")),
    };
    let values = || operands.iter().map(|scalar| to_value(scalar)).collect::<Vec<_>>();
    let col = scope.column(column);

    let expr = match predicate.operator {
        OperatorKind::Eq => col.eq(single()?),
        OperatorKind::Ne => col.ne(single()?),
        OperatorKind::Gt => col.gt(single()?),
        OperatorKind::Gte => col.gte(single()?),
        OperatorKind::Lt => col.lt(single()?),
        OperatorKind::Lte => col.lte(single()?),
        OperatorKind::In => col.is_in(values()),
        OperatorKind::NotIn => col.is_not_in(values()),
        OperatorKind::Between => {
            let (low, high) = pair()?;
            col.between(low, high)
        }
        OperatorKind::NotBetween => {
            let (low, high) = pair()?;
            col.not_between(low, high)
        }
        OperatorKind::IsNull => col.is_null(),
        OperatorKind::IsNotNull => col.is_not_null(),
        OperatorKind::Like => {
            return Ok(operands.iter().fold(Condition::any(), |any, term| {
                any.add(like(scope, column, &term.to_string()))
            }));
        }
        OperatorKind::NotLike => {
            return Ok(operands.iter().fold(Condition::all(), |all, term| {
                all.add(not_like(scope, column, &term.to_string()))
            }));
        }
        OperatorKind::Contains
        | OperatorKind::NotContains
        | OperatorKind::Exists
        | OperatorKind::DoesNotExist => {
            return Err(CriteriaError::UnsupportedOperator {
                driver: DRIVER,
                operator: predicate.operator,
            });
        }
    };
    Ok(Condition::all().add(expr))
}

fn upper(scope: &Scope<'_>, column: &str) -> Expr {
    Expr::expr(Func::upper(scope.column(column)))
}

fn like(scope: &Scope<'_>, column: &str, term: &str) -> SimpleExpr {
    upper(scope, column).like(LikeExpr::new(like_pattern(term)).escape(LIKE_ESCAPE))
}

fn not_like(scope: &Scope<'_>, column: &str, term: &str) -> SimpleExpr {
    upper(scope, column).not_like(LikeExpr::new(like_pattern(term)).escape(LIKE_ESCAPE))
}

fn search_condition(scope: &Scope<'_>, search: &TextSearch) -> Result<Condition> {
    search
        .attributes()
        .iter()
        .try_fold(Condition::any(), |any, attribute| {
            let matched = match attribute.rsplit_once('.') {
                Some((relation, column)) => exists(scope, relation, |inner| {
                    Ok(Some(Condition::all().add(like(inner, column, &search.term))))
                })?,
                None => Condition::all().add(like(scope, attribute, &search.term)),
            };
            Ok(any.add(matched))
        })
}

fn to_value(scalar: &Scalar) -> sea_orm::Value {
    match scalar {
        Scalar::Null => sea_orm::Value::String(None),
        Scalar::Bool(flag) => (*flag).into(),
        Scalar::Int(number) => (*number).into(),
        Scalar::Float(number) => (*number).into(),
        Scalar::Text(text) => text.clone().into(),
    }
}
