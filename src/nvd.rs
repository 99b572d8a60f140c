//! Per-year NVD feed meta parsing and JSON ingest: turns a `.meta` sidecar
//! and a decompressed `CVE_Items` document into `Meta`/`Cve` values.
//!
//! Network I/O (the actual `GET` of the `.meta`/`.json.gz` URLs) lives in
//! `crate::session`, which is the only caller that needs a `reqwest::Client`
//! and a progress callback; this module is the pure parse/transform layer
//! so it can be unit tested without a network.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::applicability::{Configurations, Node};
use crate::cpe::Cpe;
use crate::cve::{Cve, Description, Impact, Reference};
use crate::error::{IngestError, Result};

/// The sidecar describing a feed's size, timestamp, and checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct Meta {
    pub last_modified_date: DateTime<Utc>,
    pub size: u64,
    pub zip_size: u64,
    pub gz_size: u64,
    pub sha256: Vec<u8>,
}

/// `CamelKey` -> `snake_key`, mirroring the original feed's meta-line
/// convention (`lastModifiedDate` -> `last_modified_date`).
fn camel_to_snake(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    for (i, c) in text.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_lowercase());
        } else if c.is_ascii_uppercase() {
            out.push('_');
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

impl Meta {
    /// Parses a `.meta` file body: plain `CamelKey:value` lines. Duplicate
    /// keys or malformed lines are parse errors, not silently ignored.
    pub fn parse(body: &str) -> Result<Self> {
        let mut kvs: HashMap<String, String> = HashMap::new();
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let colon = line
                .find(':')
                .filter(|&i| i > 0)
                .ok_or_else(|| IngestError::MalformedMetaLine(line.to_string()))?;
            let key = camel_to_snake(&line[..colon]);
            let value = line[colon + 1..].to_string();
            if kvs.insert(key.clone(), value).is_some() {
                return Err(IngestError::DuplicateMetaKey(key).into());
            }
        }

        let get = |key: &str| -> Result<String> {
            kvs.get(key)
                .cloned()
                .ok_or_else(|| IngestError::MissingMetaKey(key.to_string()).into())
        };

        let last_modified_date = DateTime::parse_from_rfc3339(&get("last_modified_date")?)
            .map_err(|_| IngestError::MalformedMetaLine(get("last_modified_date").unwrap_or_default()))?
            .with_timezone(&Utc);
        let size: u64 = get("size")?
            .parse()
            .map_err(|_| IngestError::MalformedMetaLine("size".to_string()))?;
        let zip_size: u64 = get("zip_size")?
            .parse()
            .map_err(|_| IngestError::MalformedMetaLine("zip_size".to_string()))?;
        let gz_size: u64 = get("gz_size")?
            .parse()
            .map_err(|_| IngestError::MalformedMetaLine("gz_size".to_string()))?;
        let sha256 =
            hex::decode(get("sha256")?).map_err(|_| IngestError::MalformedMetaLine("sha256".to_string()))?;

        Ok(Meta {
            last_modified_date,
            size,
            zip_size,
            gz_size,
            sha256,
        })
    }
}

/// The fixed header fields every NVD 1.1 CVE feed document must carry.
#[derive(Debug, Deserialize)]
struct FeedDocument {
    #[serde(rename = "CVE_data_type")]
    cve_data_type: String,
    #[serde(rename = "CVE_data_format")]
    cve_data_format: String,
    #[serde(rename = "CVE_data_version")]
    cve_data_version: String,
    #[serde(rename = "CVE_Items")]
    cve_items: Vec<serde_json::Value>,
}

/// Parses a decompressed NVD 1.1 `CVE_Items` JSON document into `Cve`
/// records. Validates the fixed header; each item that fails to parse is
/// recorded and skipped rather than aborting the whole feed (partial-success
/// ingest per the ingest error-handling contract), and returned alongside
/// the successfully parsed CVEs.
pub fn parse_feed_document(body: &[u8]) -> Result<(Vec<Cve>, Vec<IngestError>)> {
    let doc: FeedDocument = serde_json::from_slice(body).map_err(IngestError::from)?;
    if doc.cve_data_type != "CVE" {
        return Err(IngestError::UnexpectedHeader(format!(
            "CVE_data_type={:?}, expected \"CVE\"",
            doc.cve_data_type
        ))
        .into());
    }
    if doc.cve_data_format != "MITRE" {
        return Err(IngestError::UnexpectedHeader(format!(
            "CVE_data_format={:?}, expected \"MITRE\"",
            doc.cve_data_format
        ))
        .into());
    }
    if doc.cve_data_version != "4.0" {
        return Err(IngestError::UnexpectedHeader(format!(
            "CVE_data_version={:?}, expected \"4.0\"",
            doc.cve_data_version
        ))
        .into());
    }

    let mut cves = Vec::with_capacity(doc.cve_items.len());
    let mut errors = Vec::new();
    for item in &doc.cve_items {
        match parse_cve_item(item) {
            Ok(cve) => cves.push(cve),
            Err(e) => errors.push(e),
        }
    }
    Ok((cves, errors))
}

fn parse_cve_item(item: &serde_json::Value) -> std::result::Result<Cve, IngestError> {
    let cve_id = item["cve"]["CVE_data_meta"]["ID"]
        .as_str()
        .ok_or_else(|| IngestError::UnexpectedHeader("missing cve.CVE_data_meta.ID".to_string()))?
        .to_string();

    let assigner = item["cve"]["CVE_data_meta"]["ASSIGNER"]
        .as_str()
        .map(|s| s.to_string());

    let descriptions = item["cve"]["description"]["description_data"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .filter_map(|d| {
            Some(Description {
                lang: d["lang"].as_str()?.to_string(),
                value: d["value"].as_str().unwrap_or_default().to_string(),
            })
        })
        .collect();

    let references = item["cve"]["references"]["reference_data"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(|r| Reference {
            name: r["name"].as_str().map(|s| s.to_string()),
            url: r["url"].as_str().map(|s| s.to_string()),
        })
        .collect();

    let published_date = parse_nvd_timestamp(item["publishedDate"].as_str().unwrap_or_default())?;
    let last_modified_date = parse_nvd_timestamp(item["lastModifiedDate"].as_str().unwrap_or_default())?;

    let impact = parse_impact(&item["impact"]);

    let nodes = item["configurations"]["nodes"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let configurations = Configurations(
        nodes
            .iter()
            .map(parse_config_node)
            .collect::<std::result::Result<Vec<_>, _>>()?,
    );

    Ok(Cve {
        cve_id,
        published_date,
        last_modified_date,
        impact,
        descriptions,
        references,
        assigner,
        configurations,
    })
}

/// NVD 1.1 timestamps look like `2021-01-05T19:15Z` (no seconds); accept
/// both that form and full RFC3339.
fn parse_nvd_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, IngestError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%MZ")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ"))
        .map(|naive| naive.and_utc())
        .map_err(|_| IngestError::MalformedMetaLine(s.to_string()))
}

fn parse_impact(impact: &serde_json::Value) -> Option<Impact> {
    if let Some(v3) = impact.get("baseMetricV3") {
        let vector = v3["cvssV3"]["vectorString"].as_str()?.to_string();
        let base_score = v3["cvssV3"]["baseScore"].as_f64()?;
        return Some(Impact::Cvss3 { vector, base_score });
    }
    if let Some(v2) = impact.get("baseMetricV2") {
        let vector = v2["cvssV2"]["vectorString"].as_str()?.to_string();
        let base_score = v2["cvssV2"]["baseScore"].as_f64()?;
        return Some(Impact::Cvss2 { vector, base_score });
    }
    None
}

/// Parses one `configurations.nodes[i]` entry into an applicability tree
/// node, per §4.6:
/// - a node with `cpe23Uri` is a `Cpe` leaf, wrapped in `Not` if
///   `vulnerable=false`, wrapped in `VersionRange` if any
///   `versionStart{Including,Excluding}`/`versionEnd{Including,Excluding}`
///   key is present;
/// - a node with `operator` is `And`/`Or` over `children` and `cpe_match`,
///   negated iff `vulnerable=false`;
/// - unknown keys on a leaf are a hard parse error.
fn parse_config_node(node: &serde_json::Value) -> std::result::Result<Node, IngestError> {
    if let Some(operator) = node.get("operator").and_then(|v| v.as_str()) {
        let negate = node
            .get("negate")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let mut children = Vec::new();
        for child in node["children"].as_array().cloned().unwrap_or_default() {
            children.push(parse_config_node(&child)?);
        }
        for leaf in node["cpe_match"].as_array().cloned().unwrap_or_default() {
            children.push(parse_cpe_match(&leaf)?);
        }
        match operator {
            "AND" => Ok(Node::And { children, negate }),
            "OR" => Ok(Node::Or { children, negate }),
            other => Err(IngestError::UnknownLeafKey {
                key: format!("operator={other:?}"),
            }),
        }
    } else {
        let mut children = Vec::new();
        for leaf in node["cpe_match"].as_array().cloned().unwrap_or_default() {
            children.push(parse_cpe_match(&leaf)?);
        }
        Ok(match children.len() {
            1 => children.into_iter().next().expect("length checked above"),
            _ => Node::Or {
                children,
                negate: false,
            },
        })
    }
}

const RANGE_KEYS: &[&str] = &[
    "versionStartIncluding",
    "versionStartExcluding",
    "versionEndIncluding",
    "versionEndExcluding",
];

const ALLOWED_CPE_MATCH_KEYS: &[&str] = &[
    "cpe23Uri",
    "vulnerable",
    "versionStartIncluding",
    "versionStartExcluding",
    "versionEndIncluding",
    "versionEndExcluding",
];

fn parse_cpe_match(leaf: &serde_json::Value) -> std::result::Result<Node, IngestError> {
    if let Some(obj) = leaf.as_object() {
        for key in obj.keys() {
            if !ALLOWED_CPE_MATCH_KEYS.contains(&key.as_str()) {
                return Err(IngestError::UnknownLeafKey { key: key.clone() });
            }
        }
    }
    let uri = leaf
        .get("cpe23Uri")
        .and_then(|v| v.as_str())
        .ok_or_else(|| IngestError::UnknownLeafKey {
            key: "missing cpe23Uri".to_string(),
        })?;
    let cpe = Cpe::parse(uri)?;
    let vulnerable = leaf.get("vulnerable").and_then(|v| v.as_bool()).unwrap_or(true);

    let has_range = RANGE_KEYS.iter().any(|k| leaf.get(*k).is_some());
    let mut cpe_node = Node::Cpe(cpe);
    if has_range {
        let start_inc = leaf.get("versionStartIncluding").and_then(|v| v.as_str());
        let start_exc = leaf.get("versionStartExcluding").and_then(|v| v.as_str());
        let end_inc = leaf.get("versionEndIncluding").and_then(|v| v.as_str());
        let end_exc = leaf.get("versionEndExcluding").and_then(|v| v.as_str());
        if start_inc.is_some() && start_exc.is_some() {
            return Err(IngestError::ConflictingVersionBounds);
        }
        if end_inc.is_some() && end_exc.is_some() {
            return Err(IngestError::ConflictingVersionBounds);
        }
        let (include_start, start) = match (start_inc, start_exc) {
            (Some(v), None) => (true, Some(v.to_string())),
            (None, Some(v)) => (false, Some(v.to_string())),
            _ => (true, None),
        };
        let (include_end, end) = match (end_inc, end_exc) {
            (Some(v), None) => (true, Some(v.to_string())),
            (None, Some(v)) => (false, Some(v.to_string())),
            _ => (true, None),
        };
        cpe_node = Node::VersionRange {
            wrapped: Box::new(cpe_node),
            start,
            end,
            include_start,
            include_end,
        };
    }
    if !vulnerable {
        cpe_node = Node::Not(Box::new(cpe_node));
    }
    Ok(cpe_node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn meta_parses_key_value_lines() {
        let body = "lastModifiedDate:2024-01-15T08:00:00-05:00\r\n\
                     size:123456\r\n\
                     zipSize:50000\r\n\
                     gzSize:49000\r\n\
                     sha256:ABCDEF0123456789\r\n";
        let meta = Meta::parse(body).unwrap();
        assert_eq!(meta.size, 123456);
        assert_eq!(meta.gz_size, 49000);
        assert_eq!(meta.sha256, hex::decode("ABCDEF0123456789").unwrap());
        assert_eq!(
            meta.last_modified_date,
            chrono::FixedOffset::west_opt(5 * 3600)
                .unwrap()
                .with_ymd_and_hms(2024, 1, 15, 8, 0, 0)
                .unwrap()
                .with_timezone(&Utc)
        );
    }

    #[test]
    fn meta_rejects_duplicate_keys() {
        let body = "size:1\nsize:2\n";
        let err = Meta::parse(body).unwrap_err();
        assert!(matches!(err, crate::error::CvedbError::Ingest(IngestError::DuplicateMetaKey(_))));
    }

    #[test]
    fn meta_rejects_malformed_line() {
        let err = Meta::parse("not-a-kv-line\n").unwrap_err();
        assert!(matches!(err, crate::error::CvedbError::Ingest(IngestError::MalformedMetaLine(_))));
    }

    #[test]
    fn feed_document_rejects_wrong_data_type() {
        let doc = serde_json::json!({
            "CVE_data_type": "NOTCVE",
            "CVE_data_format": "MITRE",
            "CVE_data_version": "4.0",
            "CVE_Items": []
        });
        let err = parse_feed_document(doc.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, crate::error::CvedbError::Ingest(IngestError::UnexpectedHeader(_))));
    }

    fn sample_item() -> serde_json::Value {
        serde_json::json!({
            "cve": {
                "CVE_data_meta": {"ID": "CVE-2024-0001", "ASSIGNER": "cve@mitre.org"},
                "description": {"description_data": [{"lang": "en", "value": "remote code execution in widget"}]},
                "references": {"reference_data": [{"name": "advisory", "url": "https://example.org/x"}]}
            },
            "publishedDate": "2024-01-01T00:00Z",
            "lastModifiedDate": "2024-01-02T00:00Z",
            "impact": {
                "baseMetricV3": {"cvssV3": {"vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H", "baseScore": 7.4}}
            },
            "configurations": {
                "nodes": [{
                    "operator": "OR",
                    "cpe_match": [{
                        "vulnerable": true,
                        "cpe23Uri": "cpe:2.3:a:acme:widget:1.0:*:*:*:*:*:*:*"
                    }]
                }]
            }
        })
    }

    #[test]
    fn parses_a_representative_cve_item() {
        let doc = serde_json::json!({
            "CVE_data_type": "CVE",
            "CVE_data_format": "MITRE",
            "CVE_data_version": "4.0",
            "CVE_Items": [sample_item()]
        });
        let (cves, errors) = parse_feed_document(doc.to_string().as_bytes()).unwrap();
        assert!(errors.is_empty());
        assert_eq!(cves.len(), 1);
        let cve = &cves[0];
        assert_eq!(cve.cve_id, "CVE-2024-0001");
        assert_eq!(cve.impact.as_ref().unwrap().base_score(), 7.4);
        assert_eq!(cve.published_date, chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(cve.configurations.vulnerable_cpes().len(), 1);
    }

    #[test]
    fn version_range_on_cpe_match_wraps_in_version_range_node() {
        let mut item = sample_item();
        item["configurations"]["nodes"][0]["cpe_match"][0]["versionStartIncluding"] =
            serde_json::json!("1.0");
        item["configurations"]["nodes"][0]["cpe_match"][0]["versionEndExcluding"] =
            serde_json::json!("2.0");
        let cve = parse_cve_item(&item).unwrap();
        let node = &cve.configurations.0[0];
        match node {
            Node::Or { children, .. } => {
                assert!(matches!(children[0], Node::VersionRange { .. }));
            }
            other => panic!("expected Or node, got {other:?}"),
        }
    }

    #[test]
    fn non_vulnerable_match_is_wrapped_in_not() {
        let mut item = sample_item();
        item["configurations"]["nodes"][0]["cpe_match"][0]["vulnerable"] = serde_json::json!(false);
        let cve = parse_cve_item(&item).unwrap();
        let node = &cve.configurations.0[0];
        match node {
            Node::Or { children, .. } => assert!(matches!(children[0], Node::Not(_))),
            other => panic!("expected Or node, got {other:?}"),
        }
    }

    #[test]
    fn unknown_key_on_cpe_match_leaf_is_a_hard_error() {
        let mut item = sample_item();
        item["configurations"]["nodes"][0]["cpe_match"][0]
            .as_object_mut()
            .unwrap()
            .insert("cpe_name".to_string(), serde_json::json!([]));
        let err = parse_cve_item(&item).unwrap_err();
        assert!(matches!(err, IngestError::UnknownLeafKey { .. }));
    }

    #[test]
    fn missing_cpe23_uri_is_a_hard_error() {
        let mut item = sample_item();
        item["configurations"]["nodes"][0]["cpe_match"][0]
            .as_object_mut()
            .unwrap()
            .remove("cpe23Uri");
        let errors_only: Vec<IngestError> = match parse_cve_item(&item) {
            Ok(_) => vec![],
            Err(e) => vec![e],
        };
        assert_eq!(errors_only.len(), 1);
    }
}
