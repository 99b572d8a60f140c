//! The SQL expression builder: a minimal, composable where-tree and a
//! `Select` renderer.
//!
//! The source implementation wires parent pointers onto each node so a
//! child can `remove_from_parent()` itself (used by the query compiler to
//! extract CPE placeholders). Rust's ownership makes that cyclic shape
//! awkward; instead `SqlExpr` is a parent-less tree and extraction is a
//! transform that returns a new tree (see `crate::compiler::extract_cpes`),
//! per the alternative the design notes call out explicitly.

use rusqlite::types::{ToSql, ToSqlOutput};
use rusqlite::Result as SqliteResult;

use crate::cpe::Cpe;

/// A bound parameter for a `Select`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Int(i64),
    Real(f64),
    Text(String),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> SqliteResult<ToSqlOutput<'_>> {
        match self {
            SqlParam::Int(i) => i.to_sql(),
            SqlParam::Real(r) => r.to_sql(),
            SqlParam::Text(t) => t.to_sql(),
        }
    }
}

/// A node in the SQL where-tree. `CpePlaceholder` is never rendered: it is
/// inserted by the query compiler and must be extracted by `finalize`
/// before `to_sql` is called on the tree (calling `to_sql` on a tree that
/// still contains one is a bug in the caller, not a runtime condition to
/// recover from).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    True,
    Simple(String),
    And(Vec<SqlExpr>),
    Or(Vec<SqlExpr>),
    CpePlaceholder(Cpe),
}

impl SqlExpr {
    pub fn to_sql(&self) -> String {
        match self {
            SqlExpr::True => "1".to_string(),
            SqlExpr::Simple(text) => text.clone(),
            SqlExpr::And(children) => Self::join(children, "AND"),
            SqlExpr::Or(children) => Self::join(children, "OR"),
            SqlExpr::CpePlaceholder(_) => {
                unreachable!("_CPEQuery placeholder must be extracted before to_sql is called")
            }
        }
    }

    fn join(children: &[SqlExpr], operand: &str) -> String {
        match children.len() {
            0 => SqlExpr::True.to_sql(),
            1 => children[0].to_sql(),
            _ => children
                .iter()
                .map(|c| format!("({})", c.to_sql()))
                .collect::<Vec<_>>()
                .join(&format!(" {} ", operand)),
        }
    }

    /// Builds an `And`/`Or` node, dropping `True` children and flattening
    /// nested children of the same operand — the functional equivalent of
    /// repeated `CompoundQuery.add()` calls on a mutable tree. Returns
    /// `True` for an empty child list and the sole child unwrapped for a
    /// singleton, matching `CompoundQuery.create()`.
    pub fn and(children: Vec<SqlExpr>) -> SqlExpr {
        Self::compound(children, true)
    }

    pub fn or(children: Vec<SqlExpr>) -> SqlExpr {
        Self::compound(children, false)
    }

    fn compound(children: Vec<SqlExpr>, is_and: bool) -> SqlExpr {
        let mut flat = Vec::with_capacity(children.len());
        for child in children {
            match child {
                SqlExpr::True => {}
                SqlExpr::And(inner) if is_and => flat.extend(inner),
                SqlExpr::Or(inner) if !is_and => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => SqlExpr::True,
            1 => flat.into_iter().next().expect("length checked above"),
            _ => {
                if is_and {
                    SqlExpr::And(flat)
                } else {
                    SqlExpr::Or(flat)
                }
            }
        }
    }

    /// Traverses this node and every descendant.
    pub fn traverse(&self) -> Vec<&SqlExpr> {
        let mut out = vec![self];
        match self {
            SqlExpr::And(children) | SqlExpr::Or(children) => {
                for child in children {
                    out.extend(child.traverse());
                }
            }
            SqlExpr::True | SqlExpr::Simple(_) | SqlExpr::CpePlaceholder(_) => {}
        }
        out
    }
}

/// A `SELECT` statement under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub columns: String,
    pub from_tables: String,
    pub where_clause: Option<SqlExpr>,
    pub order_by: Option<String>,
    pub limit: Option<i64>,
    pub params: Vec<SqlParam>,
}

impl Select {
    pub fn new(columns: impl Into<String>, from_tables: impl Into<String>) -> Self {
        Select {
            columns: columns.into(),
            from_tables: from_tables.into(),
            where_clause: None,
            order_by: None,
            limit: None,
            params: Vec::new(),
        }
    }

    pub fn to_sql(&self) -> String {
        let mut stmt = format!("SELECT {} FROM {}", self.columns, self.from_tables);
        if let Some(where_clause) = &self.where_clause {
            stmt = format!("{} WHERE {}", stmt, where_clause.to_sql());
        }
        if let Some(order_by) = &self.order_by {
            stmt = format!("{} ORDER BY {}", stmt, order_by);
        }
        if let Some(limit) = self.limit {
            stmt = format!("{} LIMIT {}", stmt, limit);
        }
        stmt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn true_query_renders_as_1() {
        assert_eq!(SqlExpr::True.to_sql(), "1");
    }

    #[test]
    fn and_of_one_child_is_just_the_child() {
        let expr = SqlExpr::and(vec![SqlExpr::Simple("x = 1".to_string())]);
        assert_eq!(expr.to_sql(), "x = 1");
    }

    #[test]
    fn and_drops_true_children() {
        let expr = SqlExpr::and(vec![
            SqlExpr::Simple("x = 1".to_string()),
            SqlExpr::True,
            SqlExpr::Simple("y = 2".to_string()),
        ]);
        assert_eq!(expr.to_sql(), "(x = 1) AND (y = 2)");
    }

    #[test]
    fn and_flattens_nested_same_operand() {
        let inner = SqlExpr::and(vec![
            SqlExpr::Simple("a".to_string()),
            SqlExpr::Simple("b".to_string()),
        ]);
        let outer = SqlExpr::and(vec![inner, SqlExpr::Simple("c".to_string())]);
        assert_eq!(outer.to_sql(), "(a) AND (b) AND (c)");
    }

    #[test]
    fn empty_and_is_true() {
        assert_eq!(SqlExpr::and(vec![]).to_sql(), "1");
    }

    #[test]
    fn select_renders_full_statement() {
        let mut select = Select::new("c.*", "cves c");
        select.where_clause = Some(SqlExpr::Simple("c.id = ?".to_string()));
        select.order_by = Some("c.id ASC".to_string());
        select.limit = Some(10);
        assert_eq!(
            select.to_sql(),
            "SELECT c.* FROM cves c WHERE c.id = ? ORDER BY c.id ASC LIMIT 10"
        );
    }

    #[test]
    fn select_without_where_or_order_omits_clauses() {
        let select = Select::new("c.*", "cves c");
        assert_eq!(select.to_sql(), "SELECT c.* FROM cves c");
    }
}
