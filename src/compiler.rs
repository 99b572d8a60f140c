//! Translates a `SearchQuery` into a `Select`, schema-version aware.
//!
//! Schema v0 has no CPE tables, so `CPEQuery` can't be lowered and the
//! caller falls back to an in-memory filter. Schema v1 adds the CPE join;
//! `to_query` leaves a `CpePlaceholder` in the where-tree and
//! `finalize_v1` extracts it afterwards, folding it into the FROM clause
//! and appending equality constraints for each concrete pattern field.
//!
//! The source implementation wires parent pointers onto the where-tree so
//! a node can `remove_from_parent()` itself; `extract_cpes` does the same
//! job functionally, rebuilding the tree without the placeholders and
//! returning the extracted patterns alongside it (see the design notes in
//! `crate::sql`).

use crate::cpe::{AvString, Cpe, LangField, PartField};
use crate::search::{Sort, SearchQuery};
use crate::sql::{Select, SqlExpr, SqlParam};

/// Lowers a single predicate to a where-tree fragment with its bound
/// parameters. Returns `None` for anything schema v0 can't translate
/// (`Cpe`); the caller falls back to in-memory filtering.
pub fn to_sql_v0(query: &SearchQuery) -> Option<(SqlExpr, Vec<SqlParam>)> {
    match query {
        SearchQuery::Term { text, case_sensitive } | SearchQuery::Description { text, case_sensitive } => {
            let is_description_only = matches!(query, SearchQuery::Description { .. });
            let (description_col, id_col) = if *case_sensitive {
                ("d.description".to_string(), "c.id".to_string())
            } else {
                ("UPPER(d.description)".to_string(), "UPPER(c.id)".to_string())
            };
            let needle = if *case_sensitive {
                text.clone()
            } else {
                text.to_uppercase()
            };
            let pattern = SqlParam::Text(format!("%{needle}%"));
            let expr = if is_description_only {
                SqlExpr::Simple(format!("{description_col} LIKE ?"))
            } else {
                SqlExpr::Simple(format!("({description_col} LIKE ? OR {id_col} LIKE ?)"))
            };
            let params = if is_description_only {
                vec![pattern]
            } else {
                vec![pattern.clone(), pattern]
            };
            Some((expr, params))
        }
        SearchQuery::AfterPublished(cutoff) => Some((
            SqlExpr::Simple("c.published >= ?".to_string()),
            vec![SqlParam::Int(cutoff.timestamp())],
        )),
        SearchQuery::BeforePublished(cutoff) => {
            let end_of_day = cutoff.and_hms_opt(23, 59, 59).expect("valid time of day");
            Some((
                SqlExpr::Simple("c.published <= ?".to_string()),
                vec![SqlParam::Int(end_of_day.and_utc().timestamp())],
            ))
        }
        SearchQuery::AfterModified(cutoff) => Some((
            SqlExpr::Simple("c.last_modified >= ?".to_string()),
            vec![SqlParam::Int(cutoff.timestamp())],
        )),
        SearchQuery::BeforeModified(cutoff) => {
            let end_of_day = cutoff.and_hms_opt(23, 59, 59).expect("valid time of day");
            Some((
                SqlExpr::Simple("c.last_modified <= ?".to_string()),
                vec![SqlParam::Int(end_of_day.and_utc().timestamp())],
            ))
        }
        SearchQuery::Cpe(_) => None,
        SearchQuery::And(subs) | SearchQuery::Or(subs) => {
            if subs.is_empty() {
                return Some((SqlExpr::True, vec![]));
            }
            let is_and = matches!(query, SearchQuery::And(_));
            let mut children = Vec::with_capacity(subs.len());
            let mut params = Vec::new();
            for sub in subs {
                let (expr, p) = to_sql_v0(sub)?;
                children.push(expr);
                params.extend(p);
            }
            let expr = if is_and { SqlExpr::and(children) } else { SqlExpr::or(children) };
            Some((expr, params))
        }
    }
}

/// Schema v1 additionally lowers `CPEQuery` to a `CpePlaceholder`, folded
/// into the join shape by `finalize_v1` after the rest of the tree is
/// built (CPE queries never reach `to_sql` directly).
pub fn to_sql_v1(query: &SearchQuery) -> Option<(SqlExpr, Vec<SqlParam>)> {
    match query {
        SearchQuery::Cpe(pattern) => Some((SqlExpr::CpePlaceholder(pattern.clone()), vec![])),
        SearchQuery::And(subs) | SearchQuery::Or(subs) => {
            if subs.is_empty() {
                return Some((SqlExpr::True, vec![]));
            }
            let is_and = matches!(query, SearchQuery::And(_));
            let mut children = Vec::with_capacity(subs.len());
            let mut params = Vec::new();
            for sub in subs {
                let (expr, p) = to_sql_v1(sub)?;
                children.push(expr);
                params.extend(p);
            }
            let expr = if is_and { SqlExpr::and(children) } else { SqlExpr::or(children) };
            Some((expr, params))
        }
        _ => to_sql_v0(query),
    }
}

/// Builds the full `Select` for schema v0: `descriptions d INNER JOIN
/// cves c`, `DISTINCT c.*`, feed-scoped, sorted.
pub fn compile_v0(
    query: &SearchQuery,
    feed_ids: &[i64],
    sort: &[Sort],
    ascending: bool,
) -> Option<Select> {
    let (where_expr, params) = to_sql_v0(query)?;
    Some(finalize(where_expr, params, feed_ids, sort, ascending, "descriptions d INNER JOIN cves c ON d.cve = c.id"))
}

/// Schema v1's `to_query` plus CPE-placeholder extraction, matching
/// `SchemaV1.finalize_query`.
pub fn compile_v1(
    query: &SearchQuery,
    feed_ids: &[i64],
    sort: &[Sort],
    ascending: bool,
) -> Option<Select> {
    let (where_expr, params) = to_sql_v1(query)?;
    let (stripped, cpe_patterns) = extract_cpes(where_expr);

    let mut select = finalize(
        stripped,
        params,
        feed_ids,
        sort,
        ascending,
        "descriptions d INNER JOIN cves c ON d.cve = c.id",
    );

    if !cpe_patterns.is_empty() {
        select.from_tables = "(((descriptions d INNER JOIN cves c ON d.cve = c.id) \
            INNER JOIN configurations f ON f.cve = c.id) \
            INNER JOIN cpes p ON p.rowid = f.cpe)"
            .to_string();
        for pattern in &cpe_patterns {
            let mut extra = Vec::new();
            append_cpe_field(&mut extra, "part", part_field_value(&pattern.part));
            append_cpe_field(&mut extra, "vendor", av_field_value(&pattern.vendor));
            append_cpe_field(&mut extra, "product", av_field_value(&pattern.product));
            append_cpe_field(&mut extra, "version", av_field_value(&pattern.version));
            append_cpe_field(&mut extra, "update_str", av_field_value(&pattern.update));
            append_cpe_field(&mut extra, "edition", av_field_value(&pattern.edition));
            append_cpe_field(&mut extra, "language", lang_field_value(&pattern.lang));
            append_cpe_field(&mut extra, "sw_edition", av_field_value(&pattern.sw_edition));
            append_cpe_field(&mut extra, "target_sw", av_field_value(&pattern.target_sw));
            append_cpe_field(&mut extra, "other", av_field_value(&pattern.other));
            // `target_hw` has no column in the `cpes` table (see DESIGN.md);
            // it is never folded into the predicate.
            for (col, value) in extra {
                select.where_clause = Some(SqlExpr::and(vec![
                    select.where_clause.take().unwrap_or(SqlExpr::True),
                    SqlExpr::Simple(format!("p.{col} = ?")),
                ]));
                select.params.push(SqlParam::Text(value));
            }
        }
    }
    Some(select)
}

fn append_cpe_field(out: &mut Vec<(&'static str, String)>, col: &'static str, value: Option<String>) {
    if let Some(v) = value {
        out.push((col, v));
    }
}

fn av_field_value(field: &AvString) -> Option<String> {
    match field {
        AvString::Value(v) => Some(v.clone()),
        AvString::Logical(_) => None,
    }
}

fn part_field_value(field: &PartField) -> Option<String> {
    match field {
        PartField::Concrete(p) => Some(
            match p {
                crate::cpe::Part::Hardware => "h",
                crate::cpe::Part::Os => "o",
                crate::cpe::Part::Application => "a",
            }
            .to_string(),
        ),
        PartField::Logical(_) => None,
    }
}

fn lang_field_value(field: &LangField) -> Option<String> {
    match field {
        LangField::Tag(l) => Some(l.to_string()),
        LangField::Logical(_) => None,
    }
}

/// Walks the where-tree, pulling out every `CpePlaceholder` and returning
/// the tree rebuilt without them alongside the extracted patterns — the
/// ownership-friendly equivalent of `remove_from_parent()`.
fn extract_cpes(expr: SqlExpr) -> (SqlExpr, Vec<Cpe>) {
    match expr {
        SqlExpr::CpePlaceholder(cpe) => (SqlExpr::True, vec![cpe]),
        SqlExpr::And(children) => {
            let mut out_children = Vec::new();
            let mut patterns = Vec::new();
            for child in children {
                let (stripped, found) = extract_cpes(child);
                out_children.push(stripped);
                patterns.extend(found);
            }
            (SqlExpr::and(out_children), patterns)
        }
        SqlExpr::Or(children) => {
            let mut out_children = Vec::new();
            let mut patterns = Vec::new();
            for child in children {
                let (stripped, found) = extract_cpes(child);
                out_children.push(stripped);
                patterns.extend(found);
            }
            (SqlExpr::or(out_children), patterns)
        }
        other => (other, vec![]),
    }
}

fn finalize(
    where_expr: SqlExpr,
    params: Vec<SqlParam>,
    feed_ids: &[i64],
    sort: &[Sort],
    ascending: bool,
    from_tables: &str,
) -> Select {
    let feeds_clause = SqlExpr::Simple(format!(
        "c.feed IN ({})",
        vec!["?"; feed_ids.len()].join(", ")
    ));
    let combined = SqlExpr::and(vec![where_expr, feeds_clause]);
    let mut all_params = params;
    all_params.extend(feed_ids.iter().map(|id| SqlParam::Int(*id)));

    let mut select = Select::new("DISTINCT c.*", from_tables);
    select.where_clause = Some(combined);
    select.params = all_params;
    if !sort.is_empty() {
        let direction = if ascending { "ASC" } else { "DESC" };
        let columns: Vec<String> = sort.iter().map(|s| format!("{} {direction}", sort_column(*s))).collect();
        select.order_by = Some(columns.join(", "));
    }
    select
}

fn sort_column(sort: Sort) -> &'static str {
    match sort {
        Sort::CveId => "c.id",
        Sort::Description => "d.description",
        Sort::LastModifiedDate => "c.last_modified",
        Sort::PublishedDate => "c.published",
        Sort::Impact => "c.base_score",
        Sort::Severity => "c.severity",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn term_query_v0_folds_into_like_clause() {
        let q = SearchQuery::Term {
            text: "remote".to_string(),
            case_sensitive: false,
        };
        let select = compile_v0(&q, &[1], &[Sort::CveId], true).unwrap();
        assert!(select.to_sql().contains("UPPER(d.description) LIKE ?"));
        assert!(select.to_sql().contains("c.feed IN (?)"));
        assert_eq!(select.params.len(), 3); // %REMOTE%, %REMOTE%, feed id
    }

    #[test]
    fn cpe_query_is_not_translatable_under_v0() {
        let q = SearchQuery::Cpe(Cpe::any());
        assert!(compile_v0(&q, &[1], &[], true).is_none());
    }

    #[test]
    fn cpe_query_folds_join_shape_under_v1() {
        let mut pattern = Cpe::any();
        pattern.vendor = AvString::Value("acme".to_string());
        let q = SearchQuery::Cpe(pattern);
        let select = compile_v1(&q, &[1], &[], true).unwrap();
        assert!(select.from_tables.contains("configurations f"));
        assert!(select.to_sql().contains("p.vendor = ?"));
    }

    #[test]
    fn and_of_term_and_cpe_extracts_only_the_cpe_leaf() {
        let mut pattern = Cpe::any();
        pattern.vendor = AvString::Value("acme".to_string());
        let q = SearchQuery::And(vec![
            SearchQuery::Term {
                text: "x".to_string(),
                case_sensitive: false,
            },
            SearchQuery::Cpe(pattern),
        ]);
        let select = compile_v1(&q, &[1], &[], true).unwrap();
        assert!(select.to_sql().contains("LIKE"));
        assert!(select.to_sql().contains("p.vendor = ?"));
    }

    #[test]
    fn sort_order_maps_columns_and_direction() {
        let q = SearchQuery::And(vec![]);
        let select = compile_v0(&q, &[1, 2], &[Sort::Impact, Sort::CveId], false).unwrap();
        assert_eq!(select.order_by.as_deref(), Some("c.base_score DESC, c.id DESC"));
    }

    #[test]
    fn before_published_uses_end_of_day() {
        let q = SearchQuery::BeforePublished(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let select = compile_v0(&q, &[1], &[], true).unwrap();
        assert!(select.to_sql().contains("c.published <= ?"));
    }
}
