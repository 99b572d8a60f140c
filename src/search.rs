//! The composite search query algebra: a closed predicate tree with a pure
//! in-memory `matches(cve)`, independent of whatever the query compiler can
//! translate to SQL.

use chrono::{DateTime, NaiveDate, Utc};

use crate::cpe::Cpe;
use crate::cve::Cve;

/// A composite search predicate.
///
/// `BeforePublishedDateQuery`/`BeforeModifiedDateQuery` take a bare
/// `NaiveDate` cutoff and compare it against the date portion of the CVE's
/// timestamp (`cve.published_date.date() <= d`); the `After*` variants take
/// a full `DateTime<Utc>` cutoff and compare full timestamps. This mirrors
/// the coercion consistently on both sides of the `Before*` comparison — see
/// DESIGN.md for the reasoning behind this split instead of a single
/// datetime-cutoff type for both directions.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Term {
        text: String,
        case_sensitive: bool,
    },
    Description {
        text: String,
        case_sensitive: bool,
    },
    AfterPublished(DateTime<Utc>),
    BeforePublished(NaiveDate),
    AfterModified(DateTime<Utc>),
    BeforeModified(NaiveDate),
    Cpe(Cpe),
    And(Vec<SearchQuery>),
    Or(Vec<SearchQuery>),
}

impl SearchQuery {
    pub fn matches(&self, cve: &Cve) -> bool {
        match self {
            SearchQuery::Term {
                text,
                case_sensitive,
            } => term_matches(cve, text, *case_sensitive),
            SearchQuery::Description {
                text,
                case_sensitive,
            } => description_matches(cve, text, *case_sensitive),
            SearchQuery::AfterPublished(cutoff) => cve.published_date >= *cutoff,
            SearchQuery::BeforePublished(cutoff) => cve.published_date.date_naive() <= *cutoff,
            SearchQuery::AfterModified(cutoff) => cve.last_modified_date >= *cutoff,
            SearchQuery::BeforeModified(cutoff) => cve.last_modified_date.date_naive() <= *cutoff,
            SearchQuery::Cpe(pattern) => cve.configurations.matches(pattern),
            SearchQuery::And(subs) => subs.iter().all(|q| q.matches(cve)),
            SearchQuery::Or(subs) => subs.iter().any(|q| q.matches(cve)),
        }
    }
}

fn term_matches(cve: &Cve, text: &str, case_sensitive: bool) -> bool {
    let contains = |haystack: &str| -> bool {
        if case_sensitive {
            haystack.contains(text)
        } else {
            haystack.to_uppercase().contains(&text.to_uppercase())
        }
    };
    cve.descriptions.iter().any(|d| contains(&d.value))
        || contains(&cve.cve_id)
        || cve.references.iter().any(|r| {
            r.name.as_deref().map(contains).unwrap_or(false)
                || r.url.as_deref().map(contains).unwrap_or(false)
        })
        || cve.assigner.as_deref().map(contains).unwrap_or(false)
}

fn description_matches(cve: &Cve, text: &str, case_sensitive: bool) -> bool {
    let contains = |haystack: &str| -> bool {
        if case_sensitive {
            haystack.contains(text)
        } else {
            haystack.to_uppercase().contains(&text.to_uppercase())
        }
    };
    cve.descriptions.iter().any(|d| contains(&d.value))
}

/// Lifts raw search terms to `TermQuery` and wraps multiple queries in an
/// `Or`.
pub fn make_query(texts: &[String], extra: Vec<SearchQuery>) -> SearchQuery {
    let mut all: Vec<SearchQuery> = texts
        .iter()
        .map(|t| SearchQuery::Term {
            text: t.clone(),
            case_sensitive: false,
        })
        .collect();
    all.extend(extra);
    match all.len() {
        0 => SearchQuery::Or(vec![]),
        1 => all.into_iter().next().expect("length checked above"),
        _ => SearchQuery::Or(all),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    CveId,
    Description,
    PublishedDate,
    LastModifiedDate,
    Impact,
    Severity,
}

/// In-memory sort/filter, used both as the fallback when the query compiler
/// cannot translate a predicate and as the safety net re-applied to
/// SQL-materialized rows.
pub fn search_in_memory<'a>(
    cves: impl Iterator<Item = &'a Cve>,
    query: &SearchQuery,
    sort: &[Sort],
    ascending: bool,
) -> Vec<&'a Cve> {
    let mut results: Vec<&Cve> = cves.filter(|cve| query.matches(cve)).collect();
    if !sort.is_empty() {
        results.sort_by(|a, b| {
            for key in sort {
                let ord = compare_by(a, b, *key);
                if ord != std::cmp::Ordering::Equal {
                    return if ascending { ord } else { ord.reverse() };
                }
            }
            std::cmp::Ordering::Equal
        });
    }
    results
}

fn compare_by(a: &Cve, b: &Cve, key: Sort) -> std::cmp::Ordering {
    match key {
        Sort::CveId => a.cve_id.cmp(&b.cve_id),
        Sort::Description => a
            .description("en")
            .unwrap_or("")
            .cmp(b.description("en").unwrap_or("")),
        Sort::PublishedDate => a.published_date.cmp(&b.published_date),
        Sort::LastModifiedDate => a.last_modified_date.cmp(&b.last_modified_date),
        Sort::Impact => {
            let a_score = a.impact.as_ref().map(|i| i.base_score()).unwrap_or(0.0);
            let b_score = b.impact.as_ref().map(|i| i.base_score()).unwrap_or(0.0);
            a_score.partial_cmp(&b_score).unwrap_or(std::cmp::Ordering::Equal)
        }
        Sort::Severity => a.severity().cmp(&b.severity()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applicability::Configurations;
    use chrono::TimeZone;

    fn make_cve(id: &str, desc: &str, base_score: f64) -> Cve {
        Cve {
            cve_id: id.to_string(),
            published_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            last_modified_date: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            impact: Some(crate::cve::Impact::Cvss3 {
                vector: "CVSS:3.1/AV:N".to_string(),
                base_score,
            }),
            descriptions: vec![crate::cve::Description {
                lang: "en".to_string(),
                value: desc.to_string(),
            }],
            references: vec![],
            assigner: None,
            configurations: Configurations::default(),
        }
    }

    #[test]
    fn e3_term_query_case_sensitivity() {
        let cve = make_cve("CVE-2024-0001", "remote code execution in widget", 7.4);
        assert!(SearchQuery::Term {
            text: "REMOTE".to_string(),
            case_sensitive: false
        }
        .matches(&cve));
        assert!(SearchQuery::Term {
            text: "remote".to_string(),
            case_sensitive: true
        }
        .matches(&cve));
        assert!(!SearchQuery::Term {
            text: "REMOTE".to_string(),
            case_sensitive: true
        }
        .matches(&cve));
    }

    #[test]
    fn e6_sort_impact_then_id_descending() {
        let cves = vec![
            make_cve("A", "x", 9.5),
            make_cve("B", "x", 7.0),
            make_cve("C", "x", 7.0),
        ];
        let sorted = search_in_memory(
            cves.iter(),
            &SearchQuery::And(vec![]),
            &[Sort::Impact, Sort::CveId],
            false,
        );
        let ids: Vec<&str> = sorted.iter().map(|c| c.cve_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
    }

    #[test]
    fn make_query_wraps_multiple_terms_in_or() {
        let q = make_query(&["a".to_string(), "b".to_string()], vec![]);
        assert!(matches!(q, SearchQuery::Or(_)));
    }

    #[test]
    fn make_query_single_term_is_unwrapped() {
        let q = make_query(&["a".to_string()], vec![]);
        assert!(matches!(q, SearchQuery::Term { .. }));
    }
}
