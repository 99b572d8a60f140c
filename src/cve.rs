//! The CVE record and its derived severity.

use chrono::{DateTime, Utc};

use crate::applicability::Configurations;

/// A CVSS2 or CVSS3 impact, consumed from the feed as an opaque vector
/// string plus its base score (CVSS scoring computation itself is out of
/// scope; the feed already carries the computed base score).
#[derive(Debug, Clone, PartialEq)]
pub enum Impact {
    Cvss2 { vector: String, base_score: f64 },
    Cvss3 { vector: String, base_score: f64 },
}

impl Impact {
    pub fn base_score(&self) -> f64 {
        match self {
            Impact::Cvss2 { base_score, .. } => *base_score,
            Impact::Cvss3 { base_score, .. } => *base_score,
        }
    }

    pub fn vector(&self) -> &str {
        match self {
            Impact::Cvss2 { vector, .. } => vector,
            Impact::Cvss3 { vector, .. } => vector,
        }
    }

    /// Reconstructs an `Impact` from a stored vector + base score pair
    /// (used when materializing CVEs from the database). CVSS3 vectors are
    /// distinguished by their `CVSS:3.` prefix.
    pub fn from_stored(vector: &str, base_score: f64) -> Self {
        if vector.starts_with("CVSS:3.") {
            Impact::Cvss3 {
                vector: vector.to_string(),
                base_score,
            }
        } else {
            Impact::Cvss2 {
                vector: vector.to_string(),
                base_score,
            }
        }
    }
}

/// Derived severity. Ordering (by ascending integer value) is load-bearing:
/// the SQL sort relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i64)]
pub enum Severity {
    None = 0,
    Unknown = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    Critical = 5,
}

impl Severity {
    pub fn from_impact(impact: Option<&Impact>) -> Self {
        match impact {
            None => Severity::Unknown,
            Some(Impact::Cvss2 { base_score, .. }) => {
                if *base_score < 4.0 {
                    Severity::Low
                } else if *base_score < 7.0 {
                    Severity::Medium
                } else {
                    Severity::High
                }
            }
            Some(Impact::Cvss3 { base_score, .. }) => {
                if *base_score == 0.0 {
                    Severity::None
                } else if *base_score < 4.0 {
                    Severity::Low
                } else if *base_score < 7.0 {
                    Severity::Medium
                } else if *base_score < 9.0 {
                    Severity::High
                } else {
                    Severity::Critical
                }
            }
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            0 => Severity::None,
            1 => Severity::Unknown,
            2 => Severity::Low,
            3 => Severity::Medium,
            4 => Severity::High,
            _ => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    pub lang: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reference {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// An aggregate CVE record: identity, timestamps, impact, descriptions,
/// references, assigner, and the applicability tree it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Cve {
    pub cve_id: String,
    pub published_date: DateTime<Utc>,
    pub last_modified_date: DateTime<Utc>,
    pub impact: Option<Impact>,
    pub descriptions: Vec<Description>,
    pub references: Vec<Reference>,
    pub assigner: Option<String>,
    pub configurations: Configurations,
}

impl Cve {
    pub fn severity(&self) -> Severity {
        Severity::from_impact(self.impact.as_ref())
    }

    pub fn description(&self, lang: &str) -> Option<&str> {
        self.descriptions
            .iter()
            .find(|d| d.lang == lang)
            .map(|d| d.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impact_cvss3(score: f64) -> Impact {
        Impact::Cvss3 {
            vector: "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H".to_string(),
            base_score: score,
        }
    }

    fn impact_cvss2(score: f64) -> Impact {
        Impact::Cvss2 {
            vector: "AV:N/AC:L/Au:N/C:P/I:P/A:P".to_string(),
            base_score: score,
        }
    }

    #[test]
    fn severity_table_cvss3() {
        assert_eq!(Severity::from_impact(Some(&impact_cvss3(0.0))), Severity::None);
        assert_eq!(Severity::from_impact(Some(&impact_cvss3(3.9))), Severity::Low);
        assert_eq!(Severity::from_impact(Some(&impact_cvss3(4.0))), Severity::Medium);
        assert_eq!(Severity::from_impact(Some(&impact_cvss3(6.9))), Severity::Medium);
        assert_eq!(Severity::from_impact(Some(&impact_cvss3(7.0))), Severity::High);
        assert_eq!(Severity::from_impact(Some(&impact_cvss3(8.9))), Severity::High);
        assert_eq!(Severity::from_impact(Some(&impact_cvss3(9.0))), Severity::Critical);
    }

    #[test]
    fn severity_table_cvss2() {
        assert_eq!(Severity::from_impact(Some(&impact_cvss2(3.9))), Severity::Low);
        assert_eq!(Severity::from_impact(Some(&impact_cvss2(7.0))), Severity::High);
    }

    #[test]
    fn no_impact_is_unknown() {
        assert_eq!(Severity::from_impact(None), Severity::Unknown);
    }

    #[test]
    fn severity_ordering_is_load_bearing() {
        assert!(Severity::None < Severity::Unknown);
        assert!(Severity::Unknown < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn stored_impact_version_detection() {
        let v3 = Impact::from_stored("CVSS:3.1/AV:N", 7.5);
        assert!(matches!(v3, Impact::Cvss3 { .. }));
        let v2 = Impact::from_stored("AV:N/AC:L", 5.0);
        assert!(matches!(v2, Impact::Cvss2 { .. }));
    }
}
