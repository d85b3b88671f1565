//! Parse, normalize, and rewrite queries; derive the grouping signature.
//!
//! The query is represented as a `sqlparser` AST only as an intermediate held on the stack:
//! every public function here takes and returns plain strings. Parsing failures are always
//! handled by falling back to a degraded-but-safe behavior rather than propagating a hard
//! error, per the design's error-handling policy for parse errors.

use itertools::Itertools;
use sqlparser::ast::{Expr, Query, Select, SelectItem, SetExpr, Statement, Value};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

const DIALECT: GenericDialect = GenericDialect {};

/// Parse `sql` as exactly one statement under the fixed dialect.
fn parse_one(sql: &str) -> Option<Statement> {
    let mut statements = Parser::parse_sql(&DIALECT, sql).ok()?;
    if statements.len() != 1 {
        return None;
    }
    statements.pop()
}

/// Collapse all whitespace runs to a single space and trim the ends.
fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().join(" ")
}

/// Parse and re-render `query` in the fixed dialect, collapsing incidental whitespace.
///
/// Falls back to a whitespace-only collapse if the query does not parse.
pub fn normalize(query: &str) -> String {
    match parse_one(query) {
        Some(stmt) => collapse_whitespace(&stmt.to_string()),
        None => collapse_whitespace(query),
    }
}

/// Unwrap a single layer of parenthesized-subquery wrapping: `(SELECT ...)` at the top level
/// parses as a [`SetExpr::Query`] around the real query; replace the outer shell with it.
fn unwrap_subquery_once(query: Query) -> Query {
    if matches!(&query.body, SetExpr::Query(_)) {
        if let SetExpr::Query(inner) = query.body {
            return *inner;
        }
    }
    query
}

/// Render an [`Expr`] in the fixed dialect.
fn render_expr(expr: &Expr) -> String {
    expr.to_string()
}

/// Render a [`SelectItem`] in the fixed dialect.
fn render_select_item(item: &SelectItem) -> String {
    item.to_string()
}

/// The column's own (unqualified) name, if `expr` is a bare or qualified identifier.
fn own_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.clone()),
        _ => None,
    }
}

/// `true` if `expr` renders as the literal boolean truth value.
fn is_literal_true(expr: &Expr) -> bool {
    matches!(expr, Expr::Value(Value::Boolean(true))) || render_expr(expr).eq_ignore_ascii_case("true")
}

/// Apply the five idempotent rewrite steps to a top-level `SELECT`.
fn rewrite_select(select: &mut Select) {
    // 2. Drop a trivially-true WHERE clause.
    if let Some(selection) = &select.selection {
        if is_literal_true(selection) {
            select.selection = None;
        }
    }

    // 3. Deduplicate grouping expressions by rendered form, then sort lexicographically.
    let mut group_by: Vec<(String, Expr)> = select
        .group_by
        .drain(..)
        .map(|e| (render_expr(&e), e))
        .collect();
    group_by.sort_by(|a, b| a.0.cmp(&b.0));
    group_by.dedup_by(|a, b| a.0 == b.0);
    select.group_by = group_by.into_iter().map(|(_, e)| e).collect();

    // 4. Drop a select-list alias that equals the projected column's own name.
    for item in &mut select.projection {
        if let SelectItem::ExprWithAlias { expr, alias } = item {
            if own_name(expr).as_deref() == Some(alias.value.as_str()) {
                *item = SelectItem::UnnamedExpr(expr.clone());
            }
        }
    }

    // 5. Sort the select list lexicographically by rendered form.
    select
        .projection
        .sort_by(|a, b| render_select_item(a).cmp(&render_select_item(b)));
}

/// Apply the best-effort rewrite pipeline (subquery unwrap, trivial-WHERE drop, group-by
/// dedupe+sort, redundant-alias drop, select-list sort) to `query`.
///
/// Returns the input unchanged if it fails to parse, or if its top-level shape is not a plain
/// `SELECT` (e.g. a set operation) after unwrapping — rewriting is best-effort, never an error.
/// Idempotent: applying this twice in a row yields the same string as applying it once.
pub fn rewrite(query: &str) -> String {
    let Some(stmt) = parse_one(query) else {
        return query.to_string();
    };

    let Statement::Query(q) = stmt else {
        return query.to_string();
    };

    let mut unwrapped = unwrap_subquery_once(*q);

    if let SetExpr::Select(select) = &mut unwrapped.body {
        rewrite_select(select.as_mut());
    }

    Statement::Query(Box::new(unwrapped)).to_string()
}

/// The sorted, deduplicated tuple of canonicalized `GROUP BY` expressions, or `None` if the
/// query has no `GROUP BY` (including when it fails to parse, per the parse-error policy).
pub fn grouping_signature(query: &str) -> Option<Vec<String>> {
    let stmt = parse_one(query)?;
    let Statement::Query(q) = stmt else {
        return None;
    };

    let unwrapped = unwrap_subquery_once(*q);
    let SetExpr::Select(select) = unwrapped.body else {
        return None;
    };

    if select.group_by.is_empty() {
        return None;
    }

    let sig: Vec<String> = select
        .group_by
        .iter()
        .map(render_expr)
        .sorted()
        .dedup()
        .collect();

    Some(sig)
}

/// The rendered, sorted select-list entries of a (already parsed-and-rewritten) query's
/// top-level `SELECT`, used to build the metric/filter fingerprint half of the cache key.
/// Returns an empty vec (not an error) if the query has no discernible select list.
pub fn metric_fingerprint_inputs(query: &str) -> (Vec<String>, Option<String>) {
    let Some(stmt) = parse_one(query) else {
        return (Vec::new(), None);
    };
    let Statement::Query(q) = stmt else {
        return (Vec::new(), None);
    };
    let unwrapped = unwrap_subquery_once(*q);
    let SetExpr::Select(select) = unwrapped.body else {
        return (Vec::new(), None);
    };

    let metrics = select
        .projection
        .iter()
        .map(render_select_item)
        .sorted()
        .collect();
    let filter = select.selection.as_ref().map(render_expr);
    (metrics, filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q1: &str = "SELECT p1, p2, SUM(count) FROM public.facts_agg GROUP BY p1, p2";
    const Q2: &str = "SELECT p2, p1, SUM(count) FROM public.facts_agg GROUP BY p2, p1";

    #[test]
    fn signature_commutativity() {
        assert_eq!(grouping_signature(Q1), grouping_signature(Q2));
    }

    #[test]
    fn no_group_by_has_no_signature() {
        assert_eq!(grouping_signature("SELECT * FROM public.facts_agg LIMIT 1"), None);
    }

    #[test]
    fn signature_dedupes_repeated_expressions() {
        let sig = grouping_signature("SELECT p1 FROM t GROUP BY p1, p1").unwrap();
        assert_eq!(sig, vec!["p1".to_string()]);
    }

    #[test]
    fn normalize_idempotent() {
        let n1 = normalize(Q1);
        let n2 = normalize(&n1);
        assert_eq!(n1, n2);
    }

    #[test]
    fn normalize_falls_back_on_parse_failure() {
        let garbage = "this is   not sql  at all";
        assert_eq!(normalize(garbage), "this is not sql at all");
    }

    #[test]
    fn rewrite_idempotent() {
        let r1 = rewrite(Q1);
        let r2 = rewrite(&r1);
        assert_eq!(r1, r2);
    }

    #[test]
    fn rewrite_drops_trivial_where() {
        let out = rewrite("SELECT p1 FROM t WHERE true GROUP BY p1");
        assert!(!out.to_ascii_lowercase().contains("where"));
    }

    #[test]
    fn rewrite_drops_redundant_alias() {
        let out = rewrite("SELECT p1 AS p1, p2 FROM t GROUP BY p1, p2");
        assert!(!out.contains("AS p1"));
    }

    #[test]
    fn rewrite_unwraps_subquery_once() {
        let out = rewrite("(SELECT p1 FROM t GROUP BY p1)");
        assert!(!out.starts_with('('));
    }

    #[test]
    fn rewrite_is_noop_on_unparseable_input() {
        let garbage = "not sql";
        assert_eq!(rewrite(garbage), garbage);
    }
}
