use std::cmp::Ordering;
use tracing::debug;

use super::{
    node::{FilterNode, Group, GroupMode, Predicate},
    operator::{BooleanOperator, OperatorKind},
    value::{Scalar, Value},
};

///
/// Optimizer
///
/// Pure rewrite of a filter tree into a smaller equivalent one. Rules run
/// bottom-up until nothing changes; every rewrite removes at least one node,
/// so the loop terminates and the result is a fixpoint.
///
/// Sibling lists fold left to right, so the optimizer only ever reorders or
/// combines operands inside a *chunk*: a maximal run of siblings joined by
/// the same connective (the first sibling belongs to the first run). Within
/// a chunk the connective is associative and commutative; across chunks
/// nothing moves.
///
/// Rules:
/// - plain groups with a single child collapse into that child, and plain
///   child groups are spliced into their parent when they sit first or use
///   their own boolean as the only internal connective
/// - empty plain groups disappear (relation groups keep their existence test)
/// - same-attribute predicates merge: OR unions `eq`/`in`, `like` and
///   `contains`; AND intersects `in`, unions `ne`/`!in`, `!like` and
///   `!contains`
/// - duplicates and provably redundant `!null` checks are dropped
///
/// AND merges are skipped for dotted attributes, where each predicate may
/// match a different related record.
///

/// Optimize a tree. `None` means the tree filters nothing.
#[must_use]
pub fn optimize(root: &FilterNode) -> Option<FilterNode> {
    let before = root.node_count();
    let mut current = rewrite(root.clone());
    let mut passes = 1usize;

    while let Some(node) = &current {
        let next = rewrite(node.clone());
        if next == current {
            break;
        }
        current = next;
        passes += 1;
    }

    let optimized = current.map(|node| node.with_boolean(BooleanOperator::And));
    debug!(
        before,
        after = optimized.as_ref().map_or(0, FilterNode::node_count),
        passes,
        "filters optimized"
    );
    optimized
}

/// True for plain groups that contain nothing but other no-op groups.
/// Evaluators skip such nodes.
#[must_use]
pub fn is_noop(node: &FilterNode) -> bool {
    match node {
        FilterNode::Group(group) => group.mode == GroupMode::Plain && group.children.iter().all(is_noop),
        FilterNode::Predicate(_) => false,
    }
}

fn rewrite(node: FilterNode) -> Option<FilterNode> {
    match node {
        FilterNode::Predicate(mut predicate) => {
            predicate.value = match predicate.value.take() {
                Some(Value::Nested(nested)) => rewrite(*nested)
                    .map(|tree| Value::Nested(Box::new(tree.with_boolean(BooleanOperator::And)))),
                other => other,
            };
            Some(FilterNode::Predicate(predicate))
        }
        FilterNode::Group(group) => rewrite_group(group),
    }
}

fn rewrite_group(group: Group) -> Option<FilterNode> {
    let Group {
        boolean,
        mode,
        children,
    } = group;

    let children: Vec<FilterNode> = children.into_iter().filter_map(rewrite).collect();
    let children = merge_chunks(splice(children));

    if mode == GroupMode::Plain && children.len() <= 1 {
        return children.into_iter().next().map(|child| child.with_boolean(boolean));
    }
    Some(Group::new(boolean, mode, children).into())
}

/// Inline plain child groups where the fold order allows it.
fn splice(children: Vec<FilterNode>) -> Vec<FilterNode> {
    let mut out = Vec::with_capacity(children.len());

    for (index, child) in children.into_iter().enumerate() {
        match child {
            FilterNode::Group(group)
                if group.mode == GroupMode::Plain
                    && (index == 0
                        || group.children.iter().skip(1).all(|c| c.boolean() == group.boolean)) =>
            {
                let boolean = group.boolean;
                for (position, mut grandchild) in group.children.into_iter().enumerate() {
                    if position == 0 {
                        grandchild.set_boolean(boolean);
                    }
                    out.push(grandchild);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Split siblings into runs joined by one connective.
fn chunks(children: Vec<FilterNode>) -> Vec<(BooleanOperator, Vec<FilterNode>)> {
    let mut chunks: Vec<(BooleanOperator, Vec<FilterNode>)> = Vec::new();

    for (index, child) in children.into_iter().enumerate() {
        let boolean = child.boolean();
        match chunks.last_mut() {
            Some((connective, chunk)) if index == 1 => {
                *connective = boolean;
                chunk.push(child);
            }
            Some((connective, chunk)) if *connective == boolean => chunk.push(child),
            _ => chunks.push((boolean, vec![child])),
        }
    }
    chunks
}

fn merge_chunks(children: Vec<FilterNode>) -> Vec<FilterNode> {
    let mut out = Vec::with_capacity(children.len());
    for (connective, chunk) in chunks(children) {
        out.extend(merge_chunk(chunk, connective));
    }
    out
}

enum Combined {
    Keep,
    DropLeft,
    DropRight,
    Replace(FilterNode),
}

fn merge_chunk(mut chunk: Vec<FilterNode>, connective: BooleanOperator) -> Vec<FilterNode> {
    if chunk.len() < 2 {
        return chunk;
    }
    let leading = chunk[0].boolean();

    let mut i = 0;
    'outer: while i < chunk.len() {
        let mut j = i + 1;
        while j < chunk.len() {
            match combine(&chunk[i], &chunk[j], connective) {
                Combined::Keep => j += 1,
                Combined::DropRight => {
                    chunk.remove(j);
                }
                Combined::DropLeft => {
                    chunk.remove(i);
                    continue 'outer;
                }
                Combined::Replace(node) => {
                    chunk[i] = node;
                    chunk.remove(j);
                    j = i + 1;
                }
            }
        }
        i += 1;
    }

    for (index, node) in chunk.iter_mut().enumerate() {
        node.set_boolean(if index == 0 { leading } else { connective });
    }
    chunk
}

fn same_ignoring_boolean(a: &FilterNode, b: &FilterNode) -> bool {
    if a.boolean() == b.boolean() {
        a == b
    } else {
        a.clone().with_boolean(b.boolean()) == *b
    }
}

fn combine(a: &FilterNode, b: &FilterNode, connective: BooleanOperator) -> Combined {
    if same_ignoring_boolean(a, b) {
        return Combined::DropRight;
    }

    let (FilterNode::Predicate(left), FilterNode::Predicate(right)) = (a, b) else {
        return Combined::Keep;
    };
    if left.attribute != right.attribute {
        return Combined::Keep;
    }

    let left_not_null = left.operator == OperatorKind::IsNotNull;
    let right_not_null = right.operator == OperatorKind::IsNotNull;

    match connective {
        BooleanOperator::And => {
            if left_not_null && right.operator.rejects_null() {
                Combined::DropLeft
            } else if right_not_null && left.operator.rejects_null() {
                Combined::DropRight
            } else if left.attribute.contains('.') {
                Combined::Keep
            } else {
                and_merge(left, right).map_or(Combined::Keep, |p| Combined::Replace(p.into()))
            }
        }
        BooleanOperator::Or => {
            if left_not_null && right.operator.rejects_null() {
                Combined::DropRight
            } else if right_not_null && left.operator.rejects_null() {
                Combined::DropLeft
            } else {
                or_merge(left, right).map_or(Combined::Keep, |p| Combined::Replace(p.into()))
            }
        }
    }
}

fn scalar_eq(a: &Scalar, b: &Scalar) -> bool {
    a == b || a.compare(b) == Some(Ordering::Equal)
}

fn operands(predicate: &Predicate) -> &[Scalar] {
    predicate.value.as_ref().map(Value::scalars).unwrap_or_default()
}

fn union(left: &[Scalar], right: &[Scalar]) -> Vec<Scalar> {
    let mut items = left.to_vec();
    for item in right {
        if !items.iter().any(|existing| scalar_eq(existing, item)) {
            items.push(item.clone());
        }
    }
    items
}

fn rebuild(left: &Predicate, operator: OperatorKind, items: Vec<Scalar>) -> Predicate {
    let value = match (operator, items.len()) {
        (OperatorKind::In | OperatorKind::NotIn, _) => Value::List(items),
        (_, 1) => items.into_iter().next().map_or(Value::List(Vec::new()), Value::Scalar),
        _ => Value::List(items),
    };
    Predicate {
        attribute: left.attribute.clone(),
        operator,
        value: Some(value),
        boolean: left.boolean,
    }
}

fn or_merge(left: &Predicate, right: &Predicate) -> Option<Predicate> {
    use OperatorKind as Op;
    let merged = match (left.operator, right.operator) {
        (Op::Eq | Op::In, Op::Eq | Op::In) => Op::In,
        (Op::Like, Op::Like) => Op::Like,
        (Op::Contains, Op::Contains) => Op::Contains,
        _ => return None,
    };
    Some(rebuild(left, merged, union(operands(left), operands(right))))
}

fn and_merge(left: &Predicate, right: &Predicate) -> Option<Predicate> {
    use OperatorKind as Op;
    match (left.operator, right.operator) {
        (Op::In, Op::In) => {
            let right_items = operands(right);
            let common: Vec<Scalar> = operands(left)
                .iter()
                .filter(|item| right_items.iter().any(|other| scalar_eq(item, other)))
                .cloned()
                .collect();
            (!common.is_empty()).then(|| rebuild(left, Op::In, common))
        }
        (Op::Eq, Op::In) => {
            let value = operands(left).first()?;
            operands(right)
                .iter()
                .any(|item| scalar_eq(value, item))
                .then(|| left.clone())
        }
        (Op::In, Op::Eq) => {
            let value = operands(right).first()?;
            operands(left)
                .iter()
                .any(|item| scalar_eq(value, item))
                .then(|| right.clone().with_boolean(left.boolean))
        }
        (Op::Ne | Op::NotIn, Op::Ne | Op::NotIn) => {
            Some(rebuild(left, Op::NotIn, union(operands(left), operands(right))))
        }
        (Op::NotLike, Op::NotLike) => Some(rebuild(left, Op::NotLike, union(operands(left), operands(right)))),
        (Op::NotContains, Op::NotContains) => {
            Some(rebuild(left, Op::NotContains, union(operands(left), operands(right))))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BooleanOperator::{And, Or};

    fn pred(attr: &str, op: OperatorKind, value: Option<Value>, boolean: BooleanOperator) -> FilterNode {
        Predicate::new(attr, op, value).with_boolean(boolean).into()
    }

    fn eq(attr: &str, value: impl Into<Value>, boolean: BooleanOperator) -> FilterNode {
        pred(attr, OperatorKind::Eq, Some(value.into()), boolean)
    }

    fn plain(children: Vec<FilterNode>) -> FilterNode {
        Group::plain(children).into()
    }

    #[test]
    fn test_empty_group_is_eliminated() {
        assert_eq!(optimize(&plain(vec![])), None);
        assert_eq!(optimize(&plain(vec![plain(vec![]), plain(vec![])])), None);
    }

    #[test]
    fn test_or_eq_becomes_in() {
        let tree = plain(vec![eq("status", "a", And), eq("status", "b", Or)]);
        assert_eq!(
            optimize(&tree),
            Some(pred("status", OperatorKind::In, Some(Value::list(["a", "b"])), And))
        );
    }

    #[test]
    fn test_and_eq_is_not_merged() {
        let tree = plain(vec![eq("status", "a", And), eq("status", "b", And)]);
        assert_eq!(optimize(&tree), Some(tree));
    }

    #[test]
    fn test_sole_child_takes_group_boolean() {
        let tree = plain(vec![eq("a", 1, And), plain(vec![eq("b", 2, And)]).with_boolean(Or)]);
        assert_eq!(
            optimize(&tree),
            Some(plain(vec![eq("a", 1, And), eq("b", 2, Or)]))
        );
    }

    #[test]
    fn test_mixed_group_is_not_spliced() {
        // a AND (b OR c) must keep its parentheses
        let tree = plain(vec![
            eq("a", 1, And),
            plain(vec![eq("b", 2, And), eq("c", 3, Or)]),
        ]);
        assert_eq!(optimize(&tree), Some(tree));
    }

    #[test]
    fn test_homogeneous_group_is_spliced() {
        let tree = plain(vec![
            eq("a", 1, And),
            plain(vec![eq("b", 2, And), eq("c", 3, And)]),
        ]);
        assert_eq!(
            optimize(&tree),
            Some(plain(vec![eq("a", 1, And), eq("b", 2, And), eq("c", 3, And)]))
        );
    }

    #[test]
    fn test_leading_group_is_spliced() {
        let tree = plain(vec![
            plain(vec![eq("b", 2, And), eq("c", 3, Or)]),
            eq("a", 1, And),
        ]);
        assert_eq!(
            optimize(&tree),
            Some(plain(vec![eq("b", 2, And), eq("c", 3, Or), eq("a", 1, And)]))
        );
    }

    #[test]
    fn test_merges_stay_inside_chunks() {
        // (x=1 OR x=2) AND y=3 OR x=4: only the first chunk merges
        let tree = plain(vec![
            eq("x", 1, And),
            eq("x", 2, Or),
            eq("y", 3, And),
            eq("x", 4, Or),
        ]);
        assert_eq!(
            optimize(&tree),
            Some(plain(vec![
                pred("x", OperatorKind::In, Some(Value::list([1, 2])), And),
                eq("y", 3, And),
                eq("x", 4, Or),
            ]))
        );
    }

    #[test]
    fn test_in_intersection_under_and() {
        let tree = plain(vec![
            pred("id", OperatorKind::In, Some(Value::list([1, 2, 3])), And),
            pred("id", OperatorKind::In, Some(Value::list([2, 3, 4])), And),
        ]);
        assert_eq!(
            optimize(&tree),
            Some(pred("id", OperatorKind::In, Some(Value::list([2, 3])), And))
        );
    }

    #[test]
    fn test_disjoint_in_is_kept() {
        let tree = plain(vec![
            pred("id", OperatorKind::In, Some(Value::list([1])), And),
            pred("id", OperatorKind::In, Some(Value::list([2])), And),
        ]);
        assert_eq!(optimize(&tree), Some(tree));
    }

    #[test]
    fn test_dotted_and_is_not_merged() {
        let tree = plain(vec![
            pred("tags.name", OperatorKind::In, Some(Value::list(["a", "b"])), And),
            pred("tags.name", OperatorKind::In, Some(Value::list(["b", "c"])), And),
        ]);
        assert_eq!(optimize(&tree), Some(tree));
    }

    #[test]
    fn test_ne_union_under_and() {
        let tree = plain(vec![
            pred("state", OperatorKind::Ne, Some("a".into()), And),
            pred("state", OperatorKind::NotIn, Some(Value::list(["b", "a"])), And),
        ]);
        assert_eq!(
            optimize(&tree),
            Some(pred("state", OperatorKind::NotIn, Some(Value::list(["a", "b"])), And))
        );
    }

    #[test]
    fn test_not_null_redundant_under_and() {
        let tree = plain(vec![
            pred("email", OperatorKind::IsNotNull, None, And),
            eq("email", "a@b.c", And),
        ]);
        assert_eq!(optimize(&tree), Some(eq("email", "a@b.c", And)));
    }

    #[test]
    fn test_not_null_absorbs_under_or() {
        let tree = plain(vec![
            eq("email", "a@b.c", And),
            pred("email", OperatorKind::IsNotNull, None, Or),
        ]);
        assert_eq!(optimize(&tree), Some(pred("email", OperatorKind::IsNotNull, None, And)));
    }

    #[test]
    fn test_is_null_is_not_redundant() {
        let tree = plain(vec![
            pred("email", OperatorKind::IsNotNull, None, And),
            pred("email", OperatorKind::IsNull, None, And),
        ]);
        assert_eq!(optimize(&tree), Some(tree));
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let tree = plain(vec![eq("a", 1, And), eq("b", 2, And), eq("a", 1, And)]);
        assert_eq!(optimize(&tree), Some(plain(vec![eq("a", 1, And), eq("b", 2, And)])));
    }

    #[test]
    fn test_empty_relation_group_is_kept() {
        let tree = plain(vec![eq("a", 1, And), Group::has("comments", vec![]).into()]);
        assert_eq!(optimize(&tree), Some(tree));
    }

    #[test]
    fn test_relation_group_adopts_plain_child() {
        let inner = plain(vec![eq("a", 1, And), eq("b", 2, Or)]);
        let tree: FilterNode = Group::has("comments", vec![inner]).into();
        assert_eq!(
            optimize(&tree),
            Some(Group::has("comments", vec![eq("a", 1, And), eq("b", 2, Or)]).into())
        );
    }

    #[test]
    fn test_nested_exists_is_optimized() {
        let nested = plain(vec![plain(vec![])]);
        let tree = pred("comments", OperatorKind::Exists, Some(nested.into()), And);
        assert_eq!(
            optimize(&tree),
            Some(pred("comments", OperatorKind::Exists, None, And))
        );
    }

    #[test]
    fn test_optimize_is_idempotent_on_sample() {
        let tree = plain(vec![
            plain(vec![eq("a", 1, And), eq("a", 2, Or)]),
            eq("a", 3, Or),
            plain(vec![]),
            pred("b", OperatorKind::IsNotNull, None, And),
            eq("b", 1, And),
        ]);
        let once = optimize(&tree).unwrap();
        assert_eq!(optimize(&once), Some(once));
    }

    #[test]
    fn test_is_noop() {
        assert!(is_noop(&plain(vec![plain(vec![])])));
        assert!(!is_noop(&Group::has("x", vec![]).into()));
    }
}
